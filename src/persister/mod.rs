//! Batch persister.
//!
//! Every interval: snapshot-and-clear the dirty-session set, then for each
//! session scan its metadata hashes, upsert the rows in one transaction and
//! delete the hashes. Metadata is only deleted after a committed upsert, so
//! a failed cycle loses nothing: the session is re-marked dirty and retried
//! on the next tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, durable_err};
use crate::hot::HotStore;
use crate::metrics::counters::Counters;
use crate::store::model::PersistedBid;
use crate::store::repository::AuctionRepository;

pub struct BatchPersister {
    hot: Arc<dyn HotStore>,
    repo: Arc<dyn AuctionRepository>,
    counters: Counters,
    /// Consecutive failures per session before escalating to an error log.
    max_retries: u32,
    retry_counts: Mutex<HashMap<Uuid, u32>>,
}

impl BatchPersister {
    pub fn new(
        hot: Arc<dyn HotStore>,
        repo: Arc<dyn AuctionRepository>,
        counters: Counters,
        max_retries: u32,
    ) -> Self {
        Self {
            hot,
            repo,
            counters,
            max_retries: max_retries.max(1),
            retry_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Background loop. On shutdown it runs one final drain so accepted bids
    /// do not sit unpersisted across a restart.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.drain_once().await {
                warn!(error = %e, "persist cycle failed");
            }
        }

        if let Err(e) = self.drain_once().await {
            warn!(error = %e, "final persist flush failed");
        }
        info!("batch persister stopped");
    }

    /// One full cycle over the current dirty-session snapshot. Returns the
    /// number of bid rows written.
    #[instrument(skip(self), target = "persister")]
    pub async fn drain_once(&self) -> Result<usize, AppError> {
        let sessions = self.hot.snapshot_and_clear_dirty().await?;
        if sessions.is_empty() {
            return Ok(0);
        }

        self.counters.persist_cycles.fetch_add(1, Ordering::Relaxed);
        debug!(sessions = sessions.len(), "draining dirty sessions");

        let mut persisted = 0;
        for session_id in sessions {
            match self.persist_session(&session_id).await {
                Ok(n) => {
                    persisted += n;
                    self.counters.persist_sessions.fetch_add(1, Ordering::Relaxed);
                    self.retry_counts.lock().remove(&session_id);
                }
                Err(e) => self.note_failure(session_id, &e).await,
            }
            // Don't monopolize the scheduler between sessions.
            tokio::task::yield_now().await;
        }

        Ok(persisted)
    }

    /// Drains one session's metadata into the durable store. Also used by
    /// the monitor to force a flush before freezing a ranking.
    pub async fn persist_session(&self, session_id: &Uuid) -> Result<usize, AppError> {
        let metadata = self.hot.scan_bid_metadata(session_id).await?;
        if metadata.is_empty() {
            return Ok(0);
        }

        let rows: Vec<PersistedBid> = metadata
            .iter()
            .map(|(user_id, record)| PersistedBid {
                user_id: *user_id,
                price: record.price,
                score: record.score,
                updated_at_ms: record.updated_at_ms,
            })
            .collect();

        self.repo
            .upsert_bids(session_id, &rows)
            .await
            .map_err(durable_err)?;

        let user_ids: Vec<Uuid> = metadata.iter().map(|(id, _)| *id).collect();
        self.hot.delete_bid_metadata(session_id, &user_ids).await?;

        self.counters
            .persist_bids
            .fetch_add(rows.len() as u64, Ordering::Relaxed);
        debug!(session_id = %session_id, rows = rows.len(), "session persisted");
        Ok(rows.len())
    }

    async fn note_failure(&self, session_id: Uuid, error: &AppError) {
        self.counters.persist_failures.fetch_add(1, Ordering::Relaxed);

        // The hot store still holds the metadata; re-mark for retry.
        if let Err(e) = self.hot.mark_dirty(&session_id).await {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "failed to re-mark dirty session; relying on key TTL window"
            );
        }

        let attempts = {
            let mut counts = self.retry_counts.lock();
            let attempts = counts.entry(session_id).or_insert(0);
            *attempts += 1;
            let current = *attempts;
            if current >= self.max_retries {
                *attempts = 0;
            }
            current
        };

        if attempts >= self.max_retries {
            tracing::error!(
                session_id = %session_id,
                attempts,
                error = %error,
                "session persist keeps failing"
            );
        } else {
            warn!(
                session_id = %session_id,
                attempts,
                error = %error,
                "session persist failed; will retry next cycle"
            );
        }
    }
}
