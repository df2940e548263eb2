pub mod schema;

use std::time::Duration;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

use crate::config::AppConfig;

/// Upper bound on any single durable-store query.
pub const QUERY_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Db {
    pub pool: AnyPool,
}

impl Db {
    /// Connects the durable pool using the configured profile.
    ///
    /// Proxied profile: an external pooler owns connection liveness, so we
    /// run the full pool without pre-ping. Direct profile: conservative base
    /// size with pre-ping enabled so dead connections never reach a query.
    /// sqlx pools hand out connections LIFO, which keeps the warm subset hot.
    pub async fn connect(cfg: &AppConfig) -> anyhow::Result<Self> {
        let max_connections = cfg.durable_pool_size + cfg.durable_pool_overflow;

        let options = if cfg.proxy_mode {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .test_before_acquire(false)
        } else {
            AnyPoolOptions::new()
                .min_connections(cfg.durable_pool_size)
                .max_connections(max_connections)
                .test_before_acquire(true)
        };

        let pool = options
            .acquire_timeout(Duration::from_secs(cfg.durable_pool_timeout_seconds))
            .connect(&cfg.database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        schema::migrate(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
