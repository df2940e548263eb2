use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Resolved identity attached to a verified token. Immutable for the token's
/// lifetime; `weight` feeds the scoring formula.
#[derive(Clone, Debug, Serialize)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub weight: f64,
    pub is_admin: bool,
}

/// Scoring parameters and timing for one auction session. Immutable once the
/// session starts; safe to cache for the session's whole lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionParams {
    pub session_id: Uuid,
    pub product_id: Uuid,
    /// Minimum acceptable bid.
    pub reserve_price: f64,
    /// Number of winning slots (K). Always >= 1.
    pub inventory: u32,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl SessionParams {
    /// Seconds elapsed since session start, clamped to >= 0.
    pub fn response_time_seconds(&self, now: DateTime<Utc>) -> f64 {
        let ms = (now - self.start_time).num_milliseconds().max(0);
        ms as f64 / 1_000.0
    }

    /// Hot-store key TTL: twice the session duration, floored at an hour, so
    /// keys outlive the session plus the finalization margin.
    pub fn hot_key_ttl_seconds(&self) -> i64 {
        let duration = (self.end_time - self.start_time).num_seconds().max(0);
        (duration * 2).max(3_600)
    }
}

/// Full durable view of an auction session.
#[derive(Clone, Debug)]
pub struct AuctionSession {
    pub params: SessionParams,
    pub is_active: bool,
    /// Clearing price, set exactly once at finalization.
    pub final_price: Option<f64>,
}

/// One bidder's live record, parsed from the hot-store hash. Exactly one per
/// `(session_id, user_id)`; resubmission updates in place.
#[derive(Clone, Debug, PartialEq)]
pub struct BidRecord {
    pub price: f64,
    pub score: f64,
    pub updated_at_ms: i64,
}

/// Bid row headed for the durable `bids` table.
#[derive(Clone, Debug)]
pub struct PersistedBid {
    pub user_id: Uuid,
    pub price: f64,
    pub score: f64,
    pub updated_at_ms: i64,
}

/// Frozen ranking row written once at finalization.
#[derive(Clone, Debug)]
pub struct RankingRow {
    pub user_id: Uuid,
    pub rank: u32,
    pub price: f64,
    pub score: f64,
    pub is_winner: bool,
}

/// Durable user row.
#[derive(Clone, Debug)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub weight: f64,
}

impl UserRow {
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id,
            username: self.username.clone(),
            weight: self.weight,
            is_admin: self.is_admin,
        }
    }
}

/// Outcome of finalizing a session; returned by `finalize_session` and
/// idempotent across repeat calls.
#[derive(Clone, Debug, Serialize)]
pub struct FinalOutcome {
    pub session_id: Uuid,
    pub final_price: f64,
    pub ranked: usize,
    pub winners: usize,
}
