//! The bid write path.
//!
//! Validation runs against cached session state only; the single hot-store
//! round trip then applies the scoreboard upsert, both bid hashes, the TTL
//! refresh and the dirty-session marker together. The durable store is never
//! touched here. An accepted bid is visible on the leaderboard immediately
//! and persisted by the batch job later.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::bid::score::bid_score;
use crate::broadcast::PushBroadcaster;
use crate::error::AppError;
use crate::hot::{ActivityFlag, BidWrite, HotStore};
use crate::logger::warn_if_slow;
use crate::metrics::counters::Counters;
use crate::store::model::Principal;
use crate::store::params_cache::SessionParamsCache;

#[derive(Clone, Debug, Serialize)]
pub struct BidReceipt {
    pub score: f64,
    /// 1-based position on the descending leaderboard at accept time.
    pub rank: u64,
}

pub struct BidProcessor {
    hot: Arc<dyn HotStore>,
    params: Arc<SessionParamsCache>,
    broadcaster: Arc<PushBroadcaster>,
    counters: Counters,
}

impl BidProcessor {
    pub fn new(
        hot: Arc<dyn HotStore>,
        params: Arc<SessionParamsCache>,
        broadcaster: Arc<PushBroadcaster>,
        counters: Counters,
    ) -> Self {
        Self {
            hot,
            params,
            broadcaster,
            counters,
        }
    }

    /// Processes one bid at `now`.
    ///
    /// Flow:
    /// 1) Resolve session parameters (read-through cache).
    /// 2) Validate the timing window and the activity flag.
    /// 3) Enforce the reserve price.
    /// 4) Score and apply the pipelined hot write.
    /// 5) Read back the rank and notify the broadcaster.
    #[instrument(
        skip(self, principal),
        target = "bids",
        fields(session_id = %session_id, user_id = %principal.id)
    )]
    pub async fn submit(
        &self,
        principal: &Principal,
        session_id: Uuid,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<BidReceipt, AppError> {
        let result = self.submit_inner(principal, session_id, price, now).await;
        match &result {
            Ok(receipt) => {
                self.counters.bids_accepted.fetch_add(1, Ordering::Relaxed);
                debug!(score = receipt.score, rank = receipt.rank, "bid accepted");
            }
            Err(e) => {
                self.counters.bids_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(kind = e.kind(), "bid rejected");
            }
        }
        result
    }

    async fn submit_inner(
        &self,
        principal: &Principal,
        session_id: Uuid,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<BidReceipt, AppError> {
        let params = self
            .params
            .params(&session_id)
            .await?
            .ok_or(AppError::SessionNotFound(session_id))?;

        if now < params.start_time {
            return Err(AppError::SessionNotStarted);
        }
        if now >= params.end_time {
            return Err(AppError::SessionEnded);
        }
        match self.params.activity(&session_id).await? {
            Some(ActivityFlag::Active) => {}
            Some(ActivityFlag::Paused) => return Err(AppError::SessionInactive),
            Some(ActivityFlag::Ended) => return Err(AppError::SessionEnded),
            None => return Err(AppError::SessionNotFound(session_id)),
        }

        // NaN and friends must never reach the scoreboard.
        if !price.is_finite() || price < params.reserve_price {
            return Err(AppError::PriceBelowReserve {
                price,
                reserve: params.reserve_price,
            });
        }

        let response_time = params.response_time_seconds(now);
        let score = bid_score(
            params.alpha,
            params.beta,
            params.gamma,
            price,
            response_time,
            principal.weight,
        );

        let write = BidWrite {
            session_id,
            user_id: principal.id,
            price,
            score,
            updated_at_ms: now.timestamp_millis(),
            ttl_seconds: params.hot_key_ttl_seconds(),
        };

        warn_if_slow(
            "hot_bid_write",
            Duration::from_millis(50),
            self.hot.apply_bid_write(&write),
        )
        .await?;

        let rank = self
            .hot
            .rank_desc(&session_id, &principal.id)
            .await?
            .map(|r| r + 1)
            .ok_or_else(|| {
                AppError::internal(anyhow::anyhow!("accepted bid missing from scoreboard"))
            })?;

        self.broadcaster.notify(session_id);

        Ok(BidReceipt { score, rank })
    }
}
