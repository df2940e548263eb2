//! In-process hot store backend.
//!
//! Used when `HOT_STORE_URL` is unset: local development and the test
//! suites. Semantics match the Redis backend, including the equal-score tie
//! order and lazy TTL expiry, so code exercised against this backend behaves
//! the same against Redis.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::hot::{ActivityFlag, BidWrite, HotStore, ScoreEntry, rank_cmp};
use crate::store::model::{BidRecord, SessionParams};

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl_seconds: i64) -> Self {
        Self {
            value,
            expires_at: Instant::now() + Duration::from_secs(ttl_seconds.max(0) as u64),
        }
    }

    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Default)]
struct Inner {
    /// session id -> (member scores, board expiry).
    boards: HashMap<Uuid, Expiring<HashMap<Uuid, f64>>>,
    /// session id -> user id -> bid hash.
    bids: HashMap<Uuid, HashMap<Uuid, Expiring<BidRecord>>>,
    /// session id -> user id -> persister metadata hash.
    metadata: HashMap<Uuid, HashMap<Uuid, Expiring<BidRecord>>>,
    dirty: HashSet<Uuid>,
    params: HashMap<Uuid, Expiring<SessionParams>>,
    activity: HashMap<Uuid, Expiring<ActivityFlag>>,
    usernames: HashMap<Uuid, Expiring<String>>,
}

impl Inner {
    fn board_desc(&mut self, session_id: &Uuid, now: Instant) -> Vec<ScoreEntry> {
        match self.boards.get(session_id) {
            Some(board) if board.live(now) => {
                let mut entries: Vec<ScoreEntry> = board
                    .value
                    .iter()
                    .map(|(user_id, score)| ScoreEntry {
                        user_id: *user_id,
                        score: *score,
                    })
                    .collect();
                entries.sort_by(rank_cmp);
                entries
            }
            Some(_) => {
                self.boards.remove(session_id);
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct MemoryHotStore {
    inner: Mutex<Inner>,
}

impl MemoryHotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HotStore for MemoryHotStore {
    async fn apply_bid_write(&self, w: &BidWrite) -> Result<(), AppError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let expires_at = now + Duration::from_secs(w.ttl_seconds.max(0) as u64);

        let board = inner
            .boards
            .entry(w.session_id)
            .or_insert_with(|| Expiring::new(HashMap::new(), w.ttl_seconds));
        if !board.live(now) {
            board.value.clear();
        }
        board.value.insert(w.user_id, w.score);
        board.expires_at = expires_at;

        let record = BidRecord {
            price: w.price,
            score: w.score,
            updated_at_ms: w.updated_at_ms,
        };
        inner
            .bids
            .entry(w.session_id)
            .or_default()
            .insert(w.user_id, Expiring::new(record.clone(), w.ttl_seconds));
        inner
            .metadata
            .entry(w.session_id)
            .or_default()
            .insert(w.user_id, Expiring::new(record, w.ttl_seconds));
        inner.dirty.insert(w.session_id);

        Ok(())
    }

    async fn rank_desc(&self, session_id: &Uuid, user_id: &Uuid) -> Result<Option<u64>, AppError> {
        let mut inner = self.inner.lock();
        let entries = inner.board_desc(session_id, Instant::now());
        Ok(entries
            .iter()
            .position(|e| e.user_id == *user_id)
            .map(|i| i as u64))
    }

    async fn page_desc(
        &self,
        session_id: &Uuid,
        start: u64,
        stop: u64,
    ) -> Result<(Vec<ScoreEntry>, u64), AppError> {
        let mut inner = self.inner.lock();
        let entries = inner.board_desc(session_id, Instant::now());
        let total = entries.len() as u64;

        if start >= total || stop < start {
            return Ok((Vec::new(), total));
        }
        let stop = (stop + 1).min(total) as usize;
        Ok((entries[start as usize..stop].to_vec(), total))
    }

    async fn full_board_desc(&self, session_id: &Uuid) -> Result<Vec<ScoreEntry>, AppError> {
        let mut inner = self.inner.lock();
        Ok(inner.board_desc(session_id, Instant::now()))
    }

    async fn bid_records(
        &self,
        session_id: &Uuid,
        user_ids: &[Uuid],
    ) -> Result<Vec<Option<BidRecord>>, AppError> {
        let inner = self.inner.lock();
        let now = Instant::now();
        let by_user = inner.bids.get(session_id);
        Ok(user_ids
            .iter()
            .map(|uid| {
                by_user
                    .and_then(|m| m.get(uid))
                    .filter(|e| e.live(now))
                    .map(|e| e.value.clone())
            })
            .collect())
    }

    async fn snapshot_and_clear_dirty(&self) -> Result<Vec<Uuid>, AppError> {
        let mut inner = self.inner.lock();
        Ok(inner.dirty.drain().collect())
    }

    async fn mark_dirty(&self, session_id: &Uuid) -> Result<(), AppError> {
        self.inner.lock().dirty.insert(*session_id);
        Ok(())
    }

    async fn scan_bid_metadata(
        &self,
        session_id: &Uuid,
    ) -> Result<Vec<(Uuid, BidRecord)>, AppError> {
        let inner = self.inner.lock();
        let now = Instant::now();
        Ok(inner
            .metadata
            .get(session_id)
            .map(|m| {
                m.iter()
                    .filter(|(_, e)| e.live(now))
                    .map(|(uid, e)| (*uid, e.value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_bid_metadata(
        &self,
        session_id: &Uuid,
        user_ids: &[Uuid],
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock();
        if let Some(m) = inner.metadata.get_mut(session_id) {
            for uid in user_ids {
                m.remove(uid);
            }
        }
        Ok(())
    }

    async fn get_session_params(
        &self,
        session_id: &Uuid,
    ) -> Result<Option<SessionParams>, AppError> {
        let inner = self.inner.lock();
        let now = Instant::now();
        Ok(inner
            .params
            .get(session_id)
            .filter(|e| e.live(now))
            .map(|e| e.value.clone()))
    }

    async fn put_session_params(
        &self,
        params: &SessionParams,
        ttl_seconds: i64,
    ) -> Result<(), AppError> {
        self.inner
            .lock()
            .params
            .insert(params.session_id, Expiring::new(params.clone(), ttl_seconds));
        Ok(())
    }

    async fn get_activity(&self, session_id: &Uuid) -> Result<Option<ActivityFlag>, AppError> {
        let inner = self.inner.lock();
        let now = Instant::now();
        Ok(inner
            .activity
            .get(session_id)
            .filter(|e| e.live(now))
            .map(|e| e.value))
    }

    async fn put_activity(
        &self,
        session_id: &Uuid,
        flag: ActivityFlag,
        ttl_seconds: i64,
    ) -> Result<(), AppError> {
        self.inner
            .lock()
            .activity
            .insert(*session_id, Expiring::new(flag, ttl_seconds));
        Ok(())
    }

    async fn get_usernames(&self, user_ids: &[Uuid]) -> Result<Vec<Option<String>>, AppError> {
        let inner = self.inner.lock();
        let now = Instant::now();
        Ok(user_ids
            .iter()
            .map(|uid| {
                inner
                    .usernames
                    .get(uid)
                    .filter(|e| e.live(now))
                    .map(|e| e.value.clone())
            })
            .collect())
    }

    async fn put_usernames(
        &self,
        entries: &[(Uuid, String)],
        ttl_seconds: i64,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock();
        for (uid, name) in entries {
            inner
                .usernames
                .insert(*uid, Expiring::new(name.clone(), ttl_seconds));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}
