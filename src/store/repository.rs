use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::store::model::{AuctionSession, PersistedBid, RankingRow, UserRow};

#[async_trait]
pub trait AuctionRepository: Send + Sync {
    async fn fetch_session(&self, session_id: &Uuid) -> Result<Option<AuctionSession>>;

    async fn fetch_user(&self, user_id: &Uuid) -> Result<Option<UserRow>>;

    async fn fetch_user_by_username(&self, username: &str) -> Result<Option<UserRow>>;

    /// Bulk identity lookup; the sole durable-store touch on the read path.
    async fn fetch_usernames(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, String>>;

    /// Batched conflict upsert of one session's bids in a single
    /// transaction. Idempotent: replaying the same rows yields the same
    /// durable state.
    async fn upsert_bids(&self, session_id: &Uuid, rows: &[PersistedBid]) -> Result<()>;

    /// All persisted bids of a session, ranked (score descending, ties in
    /// reverse lexicographic user-id order). Used to rebuild a scoreboard
    /// whose hot keys are gone.
    async fn fetch_bids_desc(&self, session_id: &Uuid) -> Result<Vec<PersistedBid>>;

    /// Active sessions whose end time has passed.
    async fn sessions_ending_before(&self, now_ms: i64) -> Result<Vec<AuctionSession>>;

    /// Writes the frozen ranking, flips the session inactive and sets the
    /// final price, all in one transaction. Returns `false` without touching
    /// anything when the session is already finalized.
    async fn write_final_ranking(
        &self,
        session_id: &Uuid,
        rows: &[RankingRow],
        final_price: f64,
    ) -> Result<bool>;
}
