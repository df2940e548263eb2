fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Durable store connection string (system of record).
    pub database_url: String,

    /// Hot store connection string. When unset the process runs on the
    /// in-memory hot store backend (local development and tests).
    pub hot_store_url: Option<String>,

    /// HMAC secret for bearer-token signing and verification.
    pub auth_token_secret: String,

    // =========================
    // Token cache configuration
    // =========================
    /// Freshness bound on cached principals, in seconds.
    ///
    /// The token cache is process-local and advisory: a stale entry is
    /// acceptable up to this bound, so no cross-process invalidation exists.
    pub token_cache_ttl_seconds: u64,

    /// Max principals held by the token cache. On insert at capacity the
    /// entry with the earliest expiration is evicted.
    pub token_cache_max_entries: usize,

    // =========================
    // Background job cadence
    // =========================
    /// Batch persister cadence in seconds.
    ///
    /// Every interval the persister snapshots-and-clears the dirty-session
    /// set and drains unpersisted bids into the durable store. Between
    /// cycles the hot store is the authority; nothing is lost if a cycle
    /// fails because metadata is only deleted after a committed upsert.
    pub batch_interval_seconds: u64,

    /// Session monitor cadence in seconds.
    ///
    /// Every interval the monitor finalizes sessions whose end time has
    /// passed: force-flush, freeze ranking, mark winners, set final price.
    pub monitor_interval_seconds: u64,

    /// Consecutive persist failures for one session before the failure is
    /// escalated to an error-level log. Retries continue regardless; the
    /// dirty-set mechanism guarantees the session is revisited.
    pub persist_max_retries: u32,

    // =========================
    // Connection pools
    // =========================
    /// Upper bound on hot store connections.
    pub hot_store_max_connections: usize,

    /// Durable pool base size.
    pub durable_pool_size: u32,

    /// Extra durable connections allowed beyond the base size under load.
    pub durable_pool_overflow: u32,

    /// Seconds to wait for a durable connection before giving up.
    pub durable_pool_timeout_seconds: u64,

    /// Pool profile switch. In proxy mode the pool in front of the durable
    /// store handles liveness, so we run a large pool without pre-ping; in
    /// direct mode we run conservative sizing with pre-ping enabled.
    pub proxy_mode: bool,

    // =========================
    // Push broadcaster
    // =========================
    /// Capacity of each subscriber's outbound snapshot queue. A subscriber
    /// that falls this far behind is closed rather than blocking the
    /// write path.
    pub subscriber_queue_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://gavel_dev.db".to_string());

        let hot_store_url = std::env::var("HOT_STORE_URL").ok().filter(|v| !v.is_empty());

        let auth_token_secret = std::env::var("AUTH_TOKEN_SECRET")
            .unwrap_or_else(|_| "gavel-dev-secret-do-not-use-in-production".to_string());

        Self {
            database_url,
            hot_store_url,
            auth_token_secret,

            token_cache_ttl_seconds: env_parse("TOKEN_CACHE_TTL_SECONDS", 5),
            token_cache_max_entries: env_parse("TOKEN_CACHE_MAX_ENTRIES", 10_000),

            batch_interval_seconds: env_parse("BATCH_INTERVAL_SECONDS", 5),
            monitor_interval_seconds: env_parse("MONITOR_INTERVAL_SECONDS", 10),
            persist_max_retries: env_parse("PERSIST_MAX_RETRIES", 5),

            hot_store_max_connections: env_parse("HOT_STORE_MAX_CONNECTIONS", 200),
            durable_pool_size: env_parse("DURABLE_POOL_SIZE", 10),
            durable_pool_overflow: env_parse("DURABLE_POOL_OVERFLOW", 20),
            durable_pool_timeout_seconds: env_parse("DURABLE_POOL_TIMEOUT_SECONDS", 15),
            proxy_mode: env_parse("PROXY_MODE", false),

            subscriber_queue_capacity: env_parse("SUBSCRIBER_QUEUE_CAPACITY", 16),
        }
    }
}
