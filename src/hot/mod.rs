//! Typed facade over the hot store.
//!
//! The hot store is the authority for live session state between persist
//! cycles. Callers never see raw wire strings: hash payloads are parsed into
//! typed records at this boundary, and unparseable entries are skipped with a
//! warning rather than failing a whole batch.

pub mod keys;
pub mod memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::store::model::{BidRecord, SessionParams};

/// Everything one accepted bid writes, applied as a single pipelined
/// operation: scoreboard upsert, bid hash, persister metadata, TTL refresh
/// and the dirty-session marker. Sub-ops apply in issue order on one
/// connection, so two concurrent re-bids by the same user cannot leave the
/// scoreboard and the hashes inconsistent with each other.
#[derive(Clone, Debug)]
pub struct BidWrite {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub price: f64,
    pub score: f64,
    pub updated_at_ms: i64,
    pub ttl_seconds: i64,
}

/// One scoreboard entry in descending-rank order.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreEntry {
    pub user_id: Uuid,
    pub score: f64,
}

/// Session activity flag cached under `session:active:{id}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityFlag {
    Active,
    Paused,
    Ended,
}

impl ActivityFlag {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Active => "1",
            Self::Paused => "0",
            Self::Ended => "ended",
        }
    }

    pub fn from_wire(v: &str) -> Option<Self> {
        match v {
            "1" => Some(Self::Active),
            "0" => Some(Self::Paused),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

/// Ranking comparator shared by every backend: descending score, and on an
/// exact score tie, reverse lexicographic user id. This matches the order a
/// sorted-set reverse range natively returns, so the in-memory backend and
/// Redis agree entry for entry.
pub fn rank_cmp(a: &ScoreEntry, b: &ScoreEntry) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b.user_id.cmp(&a.user_id))
}

/// Parses a bid/metadata hash into a typed record. Returns `None` when any
/// field is missing or unparseable; callers log and skip.
pub fn parse_bid_fields(map: &HashMap<String, String>) -> Option<BidRecord> {
    let price: f64 = map.get("price")?.parse().ok()?;
    let score: f64 = map.get("score")?.parse().ok()?;
    let updated_at_ms: i64 = map.get("updated_at")?.parse().ok()?;
    if !price.is_finite() || !score.is_finite() {
        return None;
    }
    Some(BidRecord {
        price,
        score,
        updated_at_ms,
    })
}

/// Wire encoding of a bid record, shared by the `bid:*` and `bid_metadata:*`
/// hashes.
pub fn bid_fields(price: f64, score: f64, updated_at_ms: i64) -> HashMap<String, String> {
    HashMap::from([
        ("price".to_string(), price.to_string()),
        ("score".to_string(), score.to_string()),
        ("updated_at".to_string(), updated_at_ms.to_string()),
    ])
}

#[async_trait]
pub trait HotStore: Send + Sync {
    /// Applies one accepted bid in a single pipelined round trip.
    async fn apply_bid_write(&self, write: &BidWrite) -> Result<(), AppError>;

    /// 0-based descending rank of a user on a session scoreboard.
    async fn rank_desc(&self, session_id: &Uuid, user_id: &Uuid) -> Result<Option<u64>, AppError>;

    /// One page `[start, stop]` of the descending scoreboard plus the total
    /// board size, fetched in one pipelined call.
    async fn page_desc(
        &self,
        session_id: &Uuid,
        start: u64,
        stop: u64,
    ) -> Result<(Vec<ScoreEntry>, u64), AppError>;

    /// The whole descending scoreboard (finalization only).
    async fn full_board_desc(&self, session_id: &Uuid) -> Result<Vec<ScoreEntry>, AppError>;

    /// Bid hashes for a batch of users in one pipelined multi-get. The
    /// result is positionally aligned with `user_ids`.
    async fn bid_records(
        &self,
        session_id: &Uuid,
        user_ids: &[Uuid],
    ) -> Result<Vec<Option<BidRecord>>, AppError>;

    /// Atomically drains the dirty-session set. A bid arriving mid-drain
    /// re-adds its session; that is acceptable.
    async fn snapshot_and_clear_dirty(&self) -> Result<Vec<Uuid>, AppError>;

    /// Re-adds a session to the dirty set (persist retry path).
    async fn mark_dirty(&self, session_id: &Uuid) -> Result<(), AppError>;

    /// Cursor-scans all persister metadata hashes for one session. Never a
    /// blocking keyspace walk.
    async fn scan_bid_metadata(&self, session_id: &Uuid)
    -> Result<Vec<(Uuid, BidRecord)>, AppError>;

    /// Deletes metadata hashes after their rows were durably committed.
    async fn delete_bid_metadata(
        &self,
        session_id: &Uuid,
        user_ids: &[Uuid],
    ) -> Result<(), AppError>;

    async fn get_session_params(
        &self,
        session_id: &Uuid,
    ) -> Result<Option<SessionParams>, AppError>;

    async fn put_session_params(
        &self,
        params: &SessionParams,
        ttl_seconds: i64,
    ) -> Result<(), AppError>;

    async fn get_activity(&self, session_id: &Uuid) -> Result<Option<ActivityFlag>, AppError>;

    async fn put_activity(
        &self,
        session_id: &Uuid,
        flag: ActivityFlag,
        ttl_seconds: i64,
    ) -> Result<(), AppError>;

    /// Identity cache lookup, positionally aligned with `user_ids`.
    async fn get_usernames(&self, user_ids: &[Uuid]) -> Result<Vec<Option<String>>, AppError>;

    async fn put_usernames(
        &self,
        entries: &[(Uuid, String)],
        ttl_seconds: i64,
    ) -> Result<(), AppError>;

    /// Health probe.
    async fn ping(&self) -> Result<(), AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_missing_and_garbled_fields() {
        assert_eq!(parse_bid_fields(&HashMap::new()), None);

        let mut map = bid_fields(250.0, 627.0, 1_000);
        map.insert("price".into(), "not-a-number".into());
        assert_eq!(parse_bid_fields(&map), None);

        let mut map = bid_fields(250.0, 627.0, 1_000);
        map.insert("score".into(), "NaN".into());
        assert_eq!(parse_bid_fields(&map), None);
    }

    #[test]
    fn parse_round_trips_wire_encoding() {
        let map = bid_fields(250.5, 627.25, 1_234);
        assert_eq!(
            parse_bid_fields(&map),
            Some(BidRecord {
                price: 250.5,
                score: 627.25,
                updated_at_ms: 1_234,
            })
        );
    }

    #[test]
    fn rank_cmp_orders_by_score_then_reverse_lex() {
        let low = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let high = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();

        let mut entries = vec![
            ScoreEntry {
                user_id: low,
                score: 602.0,
            },
            ScoreEntry {
                user_id: high,
                score: 602.0,
            },
            ScoreEntry {
                user_id: low,
                score: 700.0,
            },
        ];
        entries.sort_by(rank_cmp);

        assert_eq!(entries[0].score, 700.0);
        // Equal scores: the lexicographically larger id ranks first.
        assert_eq!(entries[1].user_id, high);
        assert_eq!(entries[2].user_id, low);
    }

    #[test]
    fn activity_wire_round_trip() {
        for flag in [ActivityFlag::Active, ActivityFlag::Paused, ActivityFlag::Ended] {
            assert_eq!(ActivityFlag::from_wire(flag.as_wire()), Some(flag));
        }
        assert_eq!(ActivityFlag::from_wire("bogus"), None);
    }
}
