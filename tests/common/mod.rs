//! Shared integration harness.
//!
//! Each test gets an isolated in-memory SQLite database (unique name with
//! shared cache, so parallel tests never collide) and the in-memory hot
//! store backend, wired through the real `App`.

use chrono::{DateTime, TimeDelta, Utc};
use gavel::app::App;
use gavel::config::AppConfig;
use gavel::store::model::Principal;
use sqlx::AnyPool;
use uuid::Uuid;

pub fn test_config() -> AppConfig {
    sqlx::any::install_default_drivers();

    AppConfig {
        database_url: format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4()),
        hot_store_url: None,
        auth_token_secret: "integration-test-secret".to_string(),
        token_cache_ttl_seconds: 5,
        token_cache_max_entries: 1_024,
        batch_interval_seconds: 1,
        monitor_interval_seconds: 1,
        persist_max_retries: 3,
        hot_store_max_connections: 4,
        durable_pool_size: 2,
        durable_pool_overflow: 3,
        durable_pool_timeout_seconds: 5,
        proxy_mode: false,
        subscriber_queue_capacity: 16,
    }
}

pub async fn mk_app() -> App {
    App::build(test_config()).await.expect("app build failed")
}

#[allow(dead_code)]
pub async fn insert_user(pool: &AnyPool, username: &str, weight: f64) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO users (id, username, email, password_hash, is_admin, weight)
           VALUES (?, ?, ?, ?, FALSE, ?)"#,
    )
    .bind(id.to_string())
    .bind(username)
    .bind(format!("{username}@example.com"))
    .bind(bcrypt::hash("hunter2", 4).unwrap())
    .bind(weight)
    .execute(pool)
    .await
    .unwrap();
    id
}

#[allow(dead_code)]
pub struct SessionSpec {
    pub reserve_price: f64,
    pub inventory: i64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_active: bool,
}

#[allow(dead_code)]
impl SessionSpec {
    /// The reference session most scenarios use: reserve 200, K = 5,
    /// alpha 0.5 / beta 1000 / gamma 2, open for 60 s starting at `start`.
    pub fn open_at(start: DateTime<Utc>) -> Self {
        Self {
            reserve_price: 200.0,
            inventory: 5,
            alpha: 0.5,
            beta: 1_000.0,
            gamma: 2.0,
            start_time: start,
            end_time: start + TimeDelta::seconds(60),
            is_active: true,
        }
    }
}

#[allow(dead_code)]
pub async fn insert_session(pool: &AnyPool, spec: &SessionSpec) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO sessions
           (id, product_id, reserve_price, final_price, inventory,
            alpha, beta, gamma, start_ms, end_ms, is_active)
           VALUES (?, ?, ?, NULL, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(id.to_string())
    .bind(Uuid::new_v4().to_string())
    .bind(spec.reserve_price)
    .bind(spec.inventory)
    .bind(spec.alpha)
    .bind(spec.beta)
    .bind(spec.gamma)
    .bind(spec.start_time.timestamp_millis())
    .bind(spec.end_time.timestamp_millis())
    .bind(spec.is_active)
    .execute(pool)
    .await
    .unwrap();
    id
}

#[allow(dead_code)]
pub fn principal(id: Uuid, username: &str, weight: f64) -> Principal {
    Principal {
        id,
        username: username.to_string(),
        weight,
        is_admin: false,
    }
}
