use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub bids_accepted: Arc<AtomicU64>,
    pub bids_rejected: Arc<AtomicU64>,

    pub token_cache_hits: Arc<AtomicU64>,
    pub token_cache_misses: Arc<AtomicU64>,

    pub persist_cycles: Arc<AtomicU64>,
    pub persist_sessions: Arc<AtomicU64>,
    pub persist_bids: Arc<AtomicU64>,
    pub persist_failures: Arc<AtomicU64>,

    pub sessions_finalized: Arc<AtomicU64>,

    pub broadcast_snapshots: Arc<AtomicU64>,
    pub broadcast_dropped_subscribers: Arc<AtomicU64>,
}
