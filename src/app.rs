//! Runtime context.
//!
//! Owns every piece of process-wide state: pools, caches, the subscriber
//! registry and the background jobs. Built in dependency order and torn
//! down in reverse: durable pool, hot store, parameter cache, token cache,
//! broadcaster, then jobs. The in-process core API lives here; the transport
//! layer decodes requests and calls straight into these methods.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::auth::token_cache::TokenCache;
use crate::bid::processor::{BidProcessor, BidReceipt};
use crate::broadcast::{PushBroadcaster, SubscriptionHandle};
use crate::config::AppConfig;
use crate::db::Db;
use crate::error::{AppError, durable_err};
use crate::hot::HotStore;
use crate::hot::memory::MemoryHotStore;
use crate::hot::redis::RedisHotStore;
use crate::leaderboard::{LeaderboardPage, LeaderboardReader};
use crate::metrics::counters::Counters;
use crate::monitor::SessionMonitor;
use crate::persister::BatchPersister;
use crate::store::model::{FinalOutcome, Principal};
use crate::store::params_cache::SessionParamsCache;
use crate::store::repository::AuctionRepository;
use crate::store::repository_sqlx::SqlxAuctionRepository;

pub struct App {
    pub config: AppConfig,
    pub counters: Counters,

    pub db: Db,
    redis: Option<Arc<RedisHotStore>>,

    pub hot: Arc<dyn HotStore>,
    pub repo: Arc<dyn AuctionRepository>,
    pub params: Arc<SessionParamsCache>,
    pub auth: Arc<Authenticator>,
    pub broadcaster: Arc<PushBroadcaster>,
    pub processor: Arc<BidProcessor>,
    pub leaderboard: Arc<LeaderboardReader>,
    pub persister: Arc<BatchPersister>,
    pub monitor: Arc<SessionMonitor>,

    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    /// Connects the stores, runs migrations and wires every component.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let counters = Counters::default();

        let db = Db::connect(&config).await?;
        db.migrate().await?;
        let repo: Arc<dyn AuctionRepository> =
            Arc::new(SqlxAuctionRepository::new(db.pool.clone()));

        let (hot, redis): (Arc<dyn HotStore>, Option<Arc<RedisHotStore>>) =
            match &config.hot_store_url {
                Some(url) => {
                    let store = Arc::new(
                        RedisHotStore::connect(url, config.hot_store_max_connections).await?,
                    );
                    (store.clone(), Some(store))
                }
                None => {
                    tracing::info!("no hot store url configured; using the in-memory backend");
                    (Arc::new(MemoryHotStore::new()), None)
                }
            };

        let params = Arc::new(SessionParamsCache::new(hot.clone(), repo.clone()));

        let token_cache = TokenCache::new(
            config.token_cache_max_entries,
            Duration::from_secs(config.token_cache_ttl_seconds),
        );
        let auth = Arc::new(Authenticator::new(
            config.auth_token_secret.clone(),
            token_cache,
            repo.clone(),
            counters.clone(),
        ));

        let broadcaster = Arc::new(PushBroadcaster::new(
            config.subscriber_queue_capacity,
            counters.clone(),
        ));
        let processor = Arc::new(BidProcessor::new(
            hot.clone(),
            params.clone(),
            broadcaster.clone(),
            counters.clone(),
        ));
        let leaderboard = Arc::new(LeaderboardReader::new(
            hot.clone(),
            repo.clone(),
            params.clone(),
        ));
        let persister = Arc::new(BatchPersister::new(
            hot.clone(),
            repo.clone(),
            counters.clone(),
            config.persist_max_retries,
        ));
        let monitor = Arc::new(SessionMonitor::new(
            hot.clone(),
            repo.clone(),
            persister.clone(),
            broadcaster.clone(),
            counters.clone(),
        ));

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            counters,
            db,
            redis,
            hot,
            repo,
            params,
            auth,
            broadcaster,
            processor,
            leaderboard,
            persister,
            monitor,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the persister, monitor and broadcast fan-out loops.
    pub fn start_background_jobs(&self) {
        let mut tasks = self.tasks.lock();

        tasks.push(tokio::spawn(self.persister.clone().run(
            Duration::from_secs(self.config.batch_interval_seconds),
            self.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(self.monitor.clone().run(
            Duration::from_secs(self.config.monitor_interval_seconds),
            self.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(
            self.broadcaster
                .clone()
                .run(self.leaderboard.clone(), self.shutdown_tx.subscribe()),
        ));

        tracing::info!("background jobs started");
    }

    /// Drained shutdown: signal the jobs, wait for them (the persister runs
    /// a final flush on its way out), then close the stores in reverse
    /// initialization order.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down");
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background job ended abnormally");
            }
        }

        if let Some(redis) = &self.redis {
            redis.close().await;
        }
        self.db.close().await;
        tracing::info!("shutdown complete");
    }

    /* =========================
     * Core API
     * ========================= */

    pub async fn authenticate(&self, token: &str) -> Result<Principal, AppError> {
        self.auth.authenticate(token).await
    }

    pub async fn issue_token(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(String, Principal), AppError> {
        self.auth.issue_token(username, password).await
    }

    pub async fn submit_bid(
        &self,
        principal: &Principal,
        session_id: Uuid,
        price: f64,
    ) -> Result<BidReceipt, AppError> {
        self.processor
            .submit(principal, session_id, price, Utc::now())
            .await
    }

    pub async fn get_leaderboard(
        &self,
        session_id: Uuid,
        page: usize,
        page_size: usize,
    ) -> Result<LeaderboardPage, AppError> {
        self.leaderboard.page(session_id, page, page_size).await
    }

    pub fn subscribe(
        &self,
        session_id: Uuid,
    ) -> (SubscriptionHandle, mpsc::Receiver<LeaderboardPage>) {
        self.broadcaster.subscribe(session_id)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.broadcaster.unsubscribe(handle);
    }

    /// On-demand finalization, idempotent on session id.
    pub async fn finalize_session(&self, session_id: Uuid) -> Result<FinalOutcome, AppError> {
        let session = self
            .repo
            .fetch_session(&session_id)
            .await
            .map_err(durable_err)?
            .ok_or(AppError::SessionNotFound(session_id))?;
        self.monitor.finalize(&session).await
    }
}
