//! Hot-store key layout. These names are stable interop surface; debugging
//! tooling and the load harness address the same keys.

use uuid::Uuid;

/// Set of session ids with bids not yet persisted.
pub const DIRTY_SESSIONS: &str = "dirty_sessions";

/// Sorted set: member = user id, score = bid score.
pub fn ranking(session_id: &Uuid) -> String {
    format!("ranking:{session_id}")
}

/// Hash `{price, score, updated_at}` backing the leaderboard read path.
pub fn bid(session_id: &Uuid, user_id: &Uuid) -> String {
    format!("bid:{session_id}:{user_id}")
}

/// Persister-facing hash, deleted only after a committed durable upsert.
pub fn bid_metadata(session_id: &Uuid, user_id: &Uuid) -> String {
    format!("bid_metadata:{session_id}:{user_id}")
}

/// Cursor-scan pattern matching every metadata hash of one session.
pub fn bid_metadata_pattern(session_id: &Uuid) -> String {
    format!("bid_metadata:{session_id}:*")
}

/// Hash of immutable per-session scoring parameters and timing.
pub fn session_params(session_id: &Uuid) -> String {
    format!("session:params:{session_id}")
}

/// Short-lived activity flag ("1" | "0" | "ended").
pub fn session_active(session_id: &Uuid) -> String {
    format!("session:active:{session_id}")
}

/// Identity-cache hash for one user.
pub fn user(user_id: &Uuid) -> String {
    format!("user:{user_id}")
}

/// Extracts the user id from a `bid_metadata:{session}:{user}` key.
pub fn user_id_from_metadata_key(key: &str) -> Option<Uuid> {
    key.rsplit(':').next().and_then(|s| Uuid::parse_str(s).ok())
}
