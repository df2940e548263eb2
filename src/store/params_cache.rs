//! Read-through cache for per-session parameters and activity.
//!
//! Parameters are immutable once a session starts, so they are cached in the
//! hot store under `session:params:{id}` for the key TTL and shared by every
//! process. The activity flag is mutable (admin pause, finalization) and
//! lives under `session:active:{id}` with a short TTL, which lets the write
//! path validate a bid without touching the durable store on the hot path.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, durable_err};
use crate::hot::{ActivityFlag, HotStore};
use crate::store::model::SessionParams;
use crate::store::repository::AuctionRepository;

/// TTL for the "1"/"0" flags; bounds how long an admin pause takes effect.
pub const ACTIVE_TTL_SECONDS: i64 = 10;
/// TTL for the "ended" sentinel; a finalized session never reactivates.
pub const ENDED_TTL_SECONDS: i64 = 300;

pub struct SessionParamsCache {
    hot: Arc<dyn HotStore>,
    repo: Arc<dyn AuctionRepository>,
}

impl SessionParamsCache {
    pub fn new(hot: Arc<dyn HotStore>, repo: Arc<dyn AuctionRepository>) -> Self {
        Self { hot, repo }
    }

    /// Scoring parameters and timing; `None` when the session does not exist.
    pub async fn params(&self, session_id: &Uuid) -> Result<Option<SessionParams>, AppError> {
        if let Some(params) = self.hot.get_session_params(session_id).await? {
            return Ok(Some(params));
        }

        let session = self
            .repo
            .fetch_session(session_id)
            .await
            .map_err(durable_err)?;

        match session {
            Some(s) => {
                self.hot
                    .put_session_params(&s.params, s.params.hot_key_ttl_seconds())
                    .await?;
                Ok(Some(s.params))
            }
            None => Ok(None),
        }
    }

    /// Current activity flag; `None` when the session does not exist.
    /// Timing windows are validated from params by the caller; this flag
    /// only answers "is the session administratively live".
    pub async fn activity(&self, session_id: &Uuid) -> Result<Option<ActivityFlag>, AppError> {
        if let Some(flag) = self.hot.get_activity(session_id).await? {
            return Ok(Some(flag));
        }

        let session = self
            .repo
            .fetch_session(session_id)
            .await
            .map_err(durable_err)?;
        let Some(s) = session else {
            return Ok(None);
        };

        let flag = if s.is_active {
            ActivityFlag::Active
        } else if Utc::now() >= s.params.end_time {
            ActivityFlag::Ended
        } else {
            ActivityFlag::Paused
        };

        let ttl = match flag {
            ActivityFlag::Ended => ENDED_TTL_SECONDS,
            _ => ACTIVE_TTL_SECONDS,
        };
        self.hot.put_activity(session_id, flag, ttl).await?;
        Ok(Some(flag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    use crate::hot::memory::MemoryHotStore;
    use crate::store::model::{AuctionSession, PersistedBid, RankingRow, UserRow};

    struct MockRepository {
        sessions: HashMap<Uuid, AuctionSession>,
        fetch_calls: Mutex<u32>,
    }

    impl MockRepository {
        fn with_session(session: AuctionSession) -> Self {
            Self {
                sessions: HashMap::from([(session.params.session_id, session)]),
                fetch_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl AuctionRepository for MockRepository {
        async fn fetch_session(&self, session_id: &Uuid) -> Result<Option<AuctionSession>> {
            *self.fetch_calls.lock() += 1;
            Ok(self.sessions.get(session_id).cloned())
        }

        async fn fetch_user(&self, _: &Uuid) -> Result<Option<UserRow>> {
            Ok(None)
        }

        async fn fetch_user_by_username(&self, _: &str) -> Result<Option<UserRow>> {
            Ok(None)
        }

        async fn fetch_usernames(&self, _: &[Uuid]) -> Result<HashMap<Uuid, String>> {
            Ok(HashMap::new())
        }

        async fn upsert_bids(&self, _: &Uuid, _: &[PersistedBid]) -> Result<()> {
            Ok(())
        }

        async fn fetch_bids_desc(&self, _: &Uuid) -> Result<Vec<PersistedBid>> {
            Ok(Vec::new())
        }

        async fn sessions_ending_before(&self, _: i64) -> Result<Vec<AuctionSession>> {
            Ok(Vec::new())
        }

        async fn write_final_ranking(&self, _: &Uuid, _: &[RankingRow], _: f64) -> Result<bool> {
            Ok(true)
        }
    }

    fn mk_session(is_active: bool, ended: bool) -> AuctionSession {
        let now = Utc::now();
        let (start, end) = if ended {
            (now - TimeDelta::seconds(120), now - TimeDelta::seconds(60))
        } else {
            (now - TimeDelta::seconds(10), now + TimeDelta::seconds(60))
        };
        AuctionSession {
            params: SessionParams {
                session_id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
                reserve_price: 200.0,
                inventory: 5,
                alpha: 0.5,
                beta: 1_000.0,
                gamma: 2.0,
                start_time: start,
                end_time: end,
            },
            is_active,
            final_price: None,
        }
    }

    #[tokio::test]
    async fn params_read_through_hits_repo_once() {
        let session = mk_session(true, false);
        let sid = session.params.session_id;
        let expected = session.params.clone();

        let repo = Arc::new(MockRepository::with_session(session));
        let cache = SessionParamsCache::new(Arc::new(MemoryHotStore::new()), repo.clone());

        assert_eq!(cache.params(&sid).await.unwrap(), Some(expected.clone()));
        assert_eq!(cache.params(&sid).await.unwrap(), Some(expected));
        assert_eq!(*repo.fetch_calls.lock(), 1);
    }

    #[tokio::test]
    async fn unknown_session_is_none_not_error() {
        let repo = Arc::new(MockRepository::with_session(mk_session(true, false)));
        let cache = SessionParamsCache::new(Arc::new(MemoryHotStore::new()), repo);

        assert_eq!(cache.params(&Uuid::new_v4()).await.unwrap(), None);
        assert_eq!(cache.activity(&Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn activity_flags_map_session_state() {
        for (is_active, ended, expected) in [
            (true, false, ActivityFlag::Active),
            (false, false, ActivityFlag::Paused),
            (false, true, ActivityFlag::Ended),
        ] {
            let session = mk_session(is_active, ended);
            let sid = session.params.session_id;
            let repo = Arc::new(MockRepository::with_session(session));
            let cache = SessionParamsCache::new(Arc::new(MemoryHotStore::new()), repo.clone());

            assert_eq!(cache.activity(&sid).await.unwrap(), Some(expected));
            // Second read is served by the status cache.
            assert_eq!(cache.activity(&sid).await.unwrap(), Some(expected));
            assert_eq!(*repo.fetch_calls.lock(), 1);
        }
    }
}
