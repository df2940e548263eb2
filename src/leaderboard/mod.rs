//! Leaderboard read path.
//!
//! Everything is served from the hot store in a fixed number of pipelined
//! round trips: one for the page plus board size, one for the page's bid
//! hashes, and at most one more for the threshold entry. Display names come
//! from the identity cache, falling back to a single bulk durable lookup,
//! the only durable-store touch on this path. An identity failure degrades
//! to placeholder names; it never fails the response.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::hot::HotStore;
use crate::store::model::BidRecord;
use crate::store::params_cache::SessionParamsCache;
use crate::store::repository::AuctionRepository;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

const IDENTITY_TTL_SECONDS: i64 = 600;
const PLACEHOLDER_USERNAME: &str = "unknown";

#[derive(Clone, Debug, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u64,
    pub user_id: Uuid,
    pub username: String,
    pub price: f64,
    pub score: f64,
    pub updated_at_ms: i64,
    pub is_winner: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct LeaderboardPage {
    pub session_id: Uuid,
    pub entries: Vec<LeaderboardEntry>,
    pub page: usize,
    pub page_size: usize,
    pub total: u64,
    pub total_pages: u64,
    /// Max bid price across this page's entries and the current top entry.
    pub highest_bid: Option<f64>,
    /// Score of the K-th ranked bidder; `None` below K bidders.
    pub threshold_score: Option<f64>,
}

pub struct LeaderboardReader {
    hot: Arc<dyn HotStore>,
    repo: Arc<dyn AuctionRepository>,
    params: Arc<SessionParamsCache>,
}

impl LeaderboardReader {
    pub fn new(
        hot: Arc<dyn HotStore>,
        repo: Arc<dyn AuctionRepository>,
        params: Arc<SessionParamsCache>,
    ) -> Self {
        Self { hot, repo, params }
    }

    /// One page of the descending leaderboard. `page` is 1-based; a missing
    /// scoreboard yields an empty page, not an error.
    pub async fn page(
        &self,
        session_id: Uuid,
        page: usize,
        page_size: usize,
    ) -> Result<LeaderboardPage, AppError> {
        let page = page.max(1);
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size.min(MAX_PAGE_SIZE)
        };

        let params = self
            .params
            .params(&session_id)
            .await?
            .ok_or(AppError::SessionNotFound(session_id))?;
        let inventory = params.inventory as u64;

        let start = ((page - 1) * page_size) as u64;
        let stop = start + page_size as u64 - 1;

        let (score_entries, total) = self.hot.page_desc(&session_id, start, stop).await?;

        let user_ids: Vec<Uuid> = score_entries.iter().map(|e| e.user_id).collect();
        let records = self.hot.bid_records(&session_id, &user_ids).await?;
        let usernames = self.resolve_usernames(&user_ids).await;

        let mut highest_bid = records
            .iter()
            .flatten()
            .map(|r| r.price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |m| m.max(p))));
        if start > 0 && total > 0 {
            if let Some(top_price) = self.top_entry_price(&session_id).await? {
                highest_bid = Some(highest_bid.map_or(top_price, |m| m.max(top_price)));
            }
        }

        let threshold_score = if inventory > 0 && total >= inventory {
            let threshold_rank = inventory - 1;
            if threshold_rank >= start && threshold_rank <= stop {
                score_entries
                    .get((threshold_rank - start) as usize)
                    .map(|e| e.score)
            } else {
                self.hot
                    .page_desc(&session_id, threshold_rank, threshold_rank)
                    .await?
                    .0
                    .first()
                    .map(|e| e.score)
            }
        } else {
            None
        };

        let entries = score_entries
            .iter()
            .zip(records.iter())
            .enumerate()
            .map(|(i, (entry, record))| {
                let rank = start + i as u64 + 1;
                let record = record.clone().unwrap_or_else(|| {
                    tracing::warn!(
                        session_id = %session_id,
                        user_id = %entry.user_id,
                        "scoreboard member has no bid hash"
                    );
                    BidRecord {
                        price: 0.0,
                        score: entry.score,
                        updated_at_ms: 0,
                    }
                });
                LeaderboardEntry {
                    rank,
                    user_id: entry.user_id,
                    username: usernames
                        .get(&entry.user_id)
                        .cloned()
                        .unwrap_or_else(|| PLACEHOLDER_USERNAME.to_string()),
                    price: record.price,
                    score: entry.score,
                    updated_at_ms: record.updated_at_ms,
                    is_winner: rank <= inventory,
                }
            })
            .collect();

        Ok(LeaderboardPage {
            session_id,
            entries,
            page,
            page_size,
            total,
            total_pages: total.div_ceil(page_size as u64),
            highest_bid,
            threshold_score,
        })
    }

    async fn top_entry_price(&self, session_id: &Uuid) -> Result<Option<f64>, AppError> {
        let (top, _) = self.hot.page_desc(session_id, 0, 0).await?;
        let Some(top) = top.first() else {
            return Ok(None);
        };
        let records = self.hot.bid_records(session_id, &[top.user_id]).await?;
        Ok(records.first().and_then(|r| r.as_ref()).map(|r| r.price))
    }

    /// Best-effort identity resolution: hot identity cache first, one bulk
    /// durable lookup for the misses, placeholders on failure.
    async fn resolve_usernames(&self, user_ids: &[Uuid]) -> HashMap<Uuid, String> {
        if user_ids.is_empty() {
            return HashMap::new();
        }

        let cached = match self.hot.get_usernames(user_ids).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "identity cache read failed");
                vec![None; user_ids.len()]
            }
        };

        let mut out = HashMap::with_capacity(user_ids.len());
        let mut misses = Vec::new();
        for (uid, name) in user_ids.iter().zip(cached) {
            match name {
                Some(name) => {
                    out.insert(*uid, name);
                }
                None => misses.push(*uid),
            }
        }

        if misses.is_empty() {
            return out;
        }

        match self.repo.fetch_usernames(&misses).await {
            Ok(found) => {
                let fill: Vec<(Uuid, String)> =
                    found.iter().map(|(id, name)| (*id, name.clone())).collect();
                if let Err(e) = self.hot.put_usernames(&fill, IDENTITY_TTL_SECONDS).await {
                    tracing::warn!(error = %e, "identity cache fill failed");
                }
                out.extend(found);
            }
            Err(e) => {
                tracing::warn!(error = %e, "bulk identity lookup failed; using placeholders");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};

    use crate::hot::memory::MemoryHotStore;
    use crate::hot::{BidWrite, HotStore};
    use crate::store::model::{
        AuctionSession, PersistedBid, RankingRow, SessionParams, UserRow,
    };

    struct StubRepository {
        session: AuctionSession,
        usernames: HashMap<Uuid, String>,
        identities_fail: bool,
    }

    #[async_trait]
    impl AuctionRepository for StubRepository {
        async fn fetch_session(&self, session_id: &Uuid) -> Result<Option<AuctionSession>> {
            Ok((self.session.params.session_id == *session_id).then(|| self.session.clone()))
        }

        async fn fetch_user(&self, _: &Uuid) -> Result<Option<UserRow>> {
            Ok(None)
        }

        async fn fetch_user_by_username(&self, _: &str) -> Result<Option<UserRow>> {
            Ok(None)
        }

        async fn fetch_usernames(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
            if self.identities_fail {
                return Err(anyhow!("users table offline"));
            }
            Ok(user_ids
                .iter()
                .filter_map(|id| self.usernames.get(id).map(|n| (*id, n.clone())))
                .collect())
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

    fn mk_session(inventory: u32) -> AuctionSession {
        let now = Utc::now();
        AuctionSession {
            params: SessionParams {
                session_id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
                reserve_price: 100.0,
                inventory,
                alpha: 0.5,
                beta: 1_000.0,
                gamma: 2.0,
                start_time: now - TimeDelta::seconds(10),
                end_time: now + TimeDelta::seconds(60),
            },
            is_active: true,
            final_price: None,
        }
    }

    struct Fixture {
        reader: LeaderboardReader,
        hot: Arc<MemoryHotStore>,
        session_id: Uuid,
    }

    fn mk_reader(inventory: u32, usernames: HashMap<Uuid, String>, identities_fail: bool) -> Fixture {
        let session = mk_session(inventory);
        let session_id = session.params.session_id;
        let hot = Arc::new(MemoryHotStore::new());
        let repo = Arc::new(StubRepository {
            session,
            usernames,
            identities_fail,
        });
        let params = Arc::new(SessionParamsCache::new(hot.clone(), repo.clone()));
        Fixture {
            reader: LeaderboardReader::new(hot.clone(), repo, params),
            hot,
            session_id,
        }
    }

    async fn seed_bids(hot: &MemoryHotStore, session_id: Uuid, n: usize) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for i in 0..n {
            let uid = Uuid::new_v4();
            hot.apply_bid_write(&BidWrite {
                session_id,
                user_id: uid,
                price: 100.0 + i as f64,
                score: 500.0 + i as f64,
                updated_at_ms: i as i64,
                ttl_seconds: 3_600,
            })
            .await
            .unwrap();
            ids.push(uid);
        }
        ids
    }

    #[tokio::test]
    async fn missing_scoreboard_is_an_empty_page() {
        let f = mk_reader(5, HashMap::new(), false);
        let page = f.reader.page(f.session_id, 1, 50).await.unwrap();

        assert!(page.entries.is_empty());
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 0);
        assert_eq!(page.highest_bid, None);
        assert_eq!(page.threshold_score, None);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let f = mk_reader(5, HashMap::new(), false);
        let err = f.reader.page(Uuid::new_v4(), 1, 50).await.unwrap_err();
        assert_eq!(err.kind(), "session_not_found");
    }

    #[tokio::test]
    async fn ranks_are_contiguous_and_scores_non_increasing() {
        let f = mk_reader(3, HashMap::new(), false);
        seed_bids(&f.hot, f.session_id, 10).await;

        let page = f.reader.page(f.session_id, 1, 50).await.unwrap();
        assert_eq!(page.total, 10);
        assert_eq!(page.entries.len(), 10);

        for (i, entry) in page.entries.iter().enumerate() {
            assert_eq!(entry.rank, i as u64 + 1);
            assert_eq!(entry.is_winner, entry.rank <= 3);
            if i > 0 {
                assert!(entry.score <= page.entries[i - 1].score);
            }
        }

        // 10 bidders, K = 3: threshold is the 3rd-ranked score.
        assert_eq!(page.threshold_score, Some(page.entries[2].score));
        // Highest bid equals the top scorer's price here (price follows score).
        assert_eq!(page.highest_bid, Some(page.entries[0].price));
    }

    #[tokio::test]
    async fn threshold_is_null_below_inventory() {
        let f = mk_reader(5, HashMap::new(), false);
        seed_bids(&f.hot, f.session_id, 3).await;

        let page = f.reader.page(f.session_id, 1, 50).await.unwrap();
        assert_eq!(page.threshold_score, None);
    }

    #[tokio::test]
    async fn later_pages_report_global_highest_bid_and_threshold() {
        let f = mk_reader(2, HashMap::new(), false);
        seed_bids(&f.hot, f.session_id, 7).await;

        let page = f.reader.page(f.session_id, 2, 3).await.unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.entries.len(), 3);
        assert_eq!(page.entries[0].rank, 4);
        assert!(!page.entries[0].is_winner);

        // Top entry holds the max price even though it is not on this page.
        assert_eq!(page.highest_bid, Some(106.0));
        // Threshold (K = 2) lives on page 1; the reader fetches it anyway.
        assert_eq!(page.threshold_score, Some(505.0));
    }

    #[tokio::test]
    async fn page_size_is_clamped_to_max() {
        let f = mk_reader(2, HashMap::new(), false);
        seed_bids(&f.hot, f.session_id, 5).await;

        let page = f.reader.page(f.session_id, 1, 5_000).await.unwrap();
        assert_eq!(page.page_size, MAX_PAGE_SIZE);

        let page = f.reader.page(f.session_id, 1, 0).await.unwrap();
        assert_eq!(page.page_size, DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn snapshot_serializes_with_stable_field_names() {
        let f = mk_reader(2, HashMap::new(), false);
        seed_bids(&f.hot, f.session_id, 3).await;

        let page = f.reader.page(f.session_id, 1, 50).await.unwrap();
        let json = serde_json::to_value(&page).unwrap();

        assert_eq!(json["total"], 3);
        assert_eq!(json["page"], 1);
        assert_eq!(json["threshold_score"], json["entries"][1]["score"]);
        assert!(json["entries"][0]["is_winner"].as_bool().unwrap());
        assert!(json["highest_bid"].is_number());
    }

    #[tokio::test]
    async fn identity_failure_degrades_to_placeholders() {
        let f = mk_reader(2, HashMap::new(), true);
        seed_bids(&f.hot, f.session_id, 2).await;

        let page = f.reader.page(f.session_id, 1, 50).await.unwrap();
        assert_eq!(page.entries.len(), 2);
        for entry in &page.entries {
            assert_eq!(entry.username, PLACEHOLDER_USERNAME);
        }
    }

    #[tokio::test]
    async fn usernames_resolve_and_warm_the_identity_cache() {
        let session = mk_session(2);
        let session_id = session.params.session_id;
        let hot = Arc::new(MemoryHotStore::new());
        let ids = seed_bids(&hot, session_id, 2).await;

        // Only the first user has a durable identity.
        let repo = Arc::new(StubRepository {
            session,
            usernames: HashMap::from([(ids[0], "alice".to_string())]),
            identities_fail: false,
        });
        let params = Arc::new(SessionParamsCache::new(hot.clone(), repo.clone()));
        let f = Fixture {
            reader: LeaderboardReader::new(hot.clone(), repo, params),
            hot,
            session_id,
        };

        let page = f.reader.page(f.session_id, 1, 50).await.unwrap();
        let by_id: HashMap<Uuid, &str> = page
            .entries
            .iter()
            .map(|e| (e.user_id, e.username.as_str()))
            .collect();
        assert_eq!(by_id[&ids[0]], "alice");
        assert_eq!(by_id[&ids[1]], PLACEHOLDER_USERNAME);

        // Resolved name landed in the identity cache.
        let cached = f.hot.get_usernames(&[ids[0]]).await.unwrap();
        assert_eq!(cached[0].as_deref(), Some("alice"));
    }
}
