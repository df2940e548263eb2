//! Session lifecycle monitor.
//!
//! Every interval it finds active sessions whose end time has passed and
//! finalizes each one: force-flush its pending bids, freeze the ranking,
//! mark the winners, set the clearing price and flip the session inactive in
//! one transaction. Finalization is idempotent per session; a failed attempt
//! is simply retried on the next tick because the session stays active.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::broadcast::{PushBroadcaster, SessionEvent};
use crate::error::{AppError, durable_err};
use crate::hot::{ActivityFlag, HotStore, ScoreEntry};
use crate::metrics::counters::Counters;
use crate::persister::BatchPersister;
use crate::store::model::{AuctionSession, BidRecord, FinalOutcome, RankingRow};
use crate::store::params_cache::ENDED_TTL_SECONDS;
use crate::store::repository::AuctionRepository;

pub struct SessionMonitor {
    hot: Arc<dyn HotStore>,
    repo: Arc<dyn AuctionRepository>,
    persister: Arc<BatchPersister>,
    broadcaster: Arc<PushBroadcaster>,
    counters: Counters,
}

impl SessionMonitor {
    pub fn new(
        hot: Arc<dyn HotStore>,
        repo: Arc<dyn AuctionRepository>,
        persister: Arc<BatchPersister>,
        broadcaster: Arc<PushBroadcaster>,
        counters: Counters,
    ) -> Self {
        Self {
            hot,
            repo,
            persister,
            broadcaster,
            counters,
        }
    }

    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.tick(Utc::now(), &shutdown).await {
                tracing::error!(error = %e, "monitor tick failed");
            }
        }
        info!("session monitor stopped");
    }

    /// One sweep at `now`. Cancellation is honored between sessions.
    #[instrument(skip(self, shutdown), target = "monitor")]
    pub async fn tick(
        &self,
        now: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), AppError> {
        let ended = self
            .repo
            .sessions_ending_before(now.timestamp_millis())
            .await
            .map_err(durable_err)?;
        if ended.is_empty() {
            return Ok(());
        }

        info!(count = ended.len(), "finalizing ended sessions");
        for session in ended {
            if *shutdown.borrow() {
                info!("shutdown requested; stopping finalization sweep");
                break;
            }
            let session_id = session.params.session_id;
            if let Err(e) = self.finalize(&session).await {
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "finalization failed; will retry next tick"
                );
            }
        }
        Ok(())
    }

    /// Finalizes one session. Idempotent: re-running against an already
    /// finalized session changes nothing durable.
    #[instrument(skip(self, session), target = "monitor", fields(session_id = %session.params.session_id))]
    pub async fn finalize(&self, session: &AuctionSession) -> Result<FinalOutcome, AppError> {
        let session_id = session.params.session_id;

        // Persist-before-freeze: a bid accepted after the last batch cycle
        // must reach the durable store before the ranking is frozen.
        self.persister.persist_session(&session_id).await?;

        let (board, records) = self.load_final_board(&session_id).await?;

        let inventory = session.params.inventory as usize;
        let rows: Vec<RankingRow> = board
            .iter()
            .zip(records.iter())
            .enumerate()
            .map(|(i, (entry, record))| RankingRow {
                user_id: entry.user_id,
                rank: (i + 1) as u32,
                price: record.as_ref().map_or(0.0, |r| r.price),
                score: entry.score,
                is_winner: i < inventory,
            })
            .collect();

        // Clearing price: the K-th winner's bid, or the reserve when the
        // inventory did not fill.
        let final_price = if rows.len() >= inventory && inventory > 0 {
            rows[inventory - 1].price
        } else {
            session.params.reserve_price
        };

        let wrote = self
            .repo
            .write_final_ranking(&session_id, &rows, final_price)
            .await
            .map_err(durable_err)?;

        let winners = rows.iter().filter(|r| r.is_winner).count();
        let outcome = FinalOutcome {
            session_id,
            final_price: if wrote {
                final_price
            } else {
                session.final_price.unwrap_or(final_price)
            },
            ranked: rows.len(),
            winners,
        };

        if !wrote {
            debug!("session already finalized; no-op");
            return Ok(outcome);
        }

        self.counters.sessions_finalized.fetch_add(1, Ordering::Relaxed);
        self.hot
            .put_activity(&session_id, ActivityFlag::Ended, ENDED_TTL_SECONDS)
            .await?;

        // Final snapshot for live observers, then the session-list event.
        self.broadcaster.notify(session_id);
        self.broadcaster.publish_global(SessionEvent::Finalized {
            session_id,
            final_price: outcome.final_price,
        });

        info!(
            ranked = outcome.ranked,
            winners = outcome.winners,
            final_price = outcome.final_price,
            "session finalized"
        );
        Ok(outcome)
    }

    /// The frozen board, preferring the hot store. When its keys are gone
    /// (e.g. TTL expiry before a late finalization) the board is rebuilt
    /// from the durable bids table in the same order.
    async fn load_final_board(
        &self,
        session_id: &Uuid,
    ) -> Result<(Vec<ScoreEntry>, Vec<Option<BidRecord>>), AppError> {
        let board = self.hot.full_board_desc(session_id).await?;
        if !board.is_empty() {
            let user_ids: Vec<Uuid> = board.iter().map(|e| e.user_id).collect();
            let records = self.hot.bid_records(session_id, &user_ids).await?;
            return Ok((board, records));
        }

        let bids = self
            .repo
            .fetch_bids_desc(session_id)
            .await
            .map_err(durable_err)?;
        let board = bids
            .iter()
            .map(|b| ScoreEntry {
                user_id: b.user_id,
                score: b.score,
            })
            .collect();
        let records = bids
            .iter()
            .map(|b| {
                Some(BidRecord {
                    price: b.price,
                    score: b.score,
                    updated_at_ms: b.updated_at_ms,
                })
            })
            .collect();
        Ok((board, records))
    }
}
