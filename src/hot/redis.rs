//! Redis-backed hot store.
//!
//! Owns a bounded connection pool with an exponential reconnect policy and a
//! background liveness probe. Every call carries a 10 s deadline; connection
//! errors surface to callers as `hot_store_unavailable`, deadline misses as
//! `upstream_timeout`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use fred::error::Error as FredError;
use fred::prelude::*;
use fred::types::config::TcpConfig;
use futures::TryStreamExt;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::AppError;
use crate::hot::{
    ActivityFlag, BidWrite, HotStore, ScoreEntry, bid_fields, keys, parse_bid_fields,
};
use crate::store::model::{BidRecord, SessionParams};
use crate::time::from_ms;

const HOT_DEADLINE: Duration = Duration::from_secs(10);
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

async fn deadline<T, F>(fut: F) -> Result<T, AppError>
where
    F: std::future::Future<Output = Result<T, FredError>>,
{
    match tokio::time::timeout(HOT_DEADLINE, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(AppError::HotStoreUnavailable(e.to_string())),
        Err(_) => Err(AppError::UpstreamTimeout { store: "hot_store" }),
    }
}

/// Wire encoding of the `session:params:{id}` hash.
fn params_fields(p: &SessionParams) -> HashMap<String, String> {
    HashMap::from([
        ("product_id".to_string(), p.product_id.to_string()),
        ("reserve_price".to_string(), p.reserve_price.to_string()),
        ("inventory".to_string(), p.inventory.to_string()),
        ("alpha".to_string(), p.alpha.to_string()),
        ("beta".to_string(), p.beta.to_string()),
        ("gamma".to_string(), p.gamma.to_string()),
        (
            "start_ms".to_string(),
            p.start_time.timestamp_millis().to_string(),
        ),
        (
            "end_ms".to_string(),
            p.end_time.timestamp_millis().to_string(),
        ),
    ])
}

fn parse_params_fields(session_id: &Uuid, map: &HashMap<String, String>) -> Option<SessionParams> {
    Some(SessionParams {
        session_id: *session_id,
        product_id: map.get("product_id")?.parse().ok()?,
        reserve_price: map.get("reserve_price")?.parse().ok()?,
        inventory: map.get("inventory")?.parse().ok()?,
        alpha: map.get("alpha")?.parse().ok()?,
        beta: map.get("beta")?.parse().ok()?,
        gamma: map.get("gamma")?.parse().ok()?,
        start_time: from_ms(map.get("start_ms")?.parse().ok()?),
        end_time: from_ms(map.get("end_ms")?.parse().ok()?),
    })
}

fn parse_member(member: &str) -> Option<Uuid> {
    match Uuid::parse_str(member) {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::warn!(member, "skipping non-uuid scoreboard member");
            None
        }
    }
}

pub struct RedisHotStore {
    pool: Pool,
    probe: JoinHandle<()>,
}

impl RedisHotStore {
    /// Connects a bounded pool and starts the liveness probe task.
    pub async fn connect(url: &str, max_connections: usize) -> Result<Self, AppError> {
        let config =
            Config::from_url(url).map_err(|e| AppError::HotStoreUnavailable(e.to_string()))?;

        let pool = Builder::from_config(config)
            .with_connection_config(|c| {
                c.connection_timeout = Duration::from_secs(5);
                c.tcp = TcpConfig {
                    nodelay: Some(true),
                    ..TcpConfig::default()
                };
            })
            .set_policy(ReconnectPolicy::new_exponential(0, 100, 10_000, 2))
            .build_pool(max_connections.max(1))
            .map_err(|e| AppError::HotStoreUnavailable(e.to_string()))?;

        deadline(pool.init()).await?;

        // Application-level keepalive: a periodic PING per pool keeps idle
        // connections honest and logs loss of the hot store early.
        let probe_pool = pool.clone();
        let probe = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROBE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = probe_pool.ping::<()>(None).await {
                    tracing::warn!(error = %e, "hot store health probe failed");
                }
            }
        });

        Ok(Self { pool, probe })
    }

    /// Stops the probe task and closes every pooled connection.
    pub async fn close(&self) {
        self.probe.abort();
        if let Err(e) = self.pool.quit().await {
            tracing::warn!(error = %e, "hot store pool close failed");
        }
    }
}

#[async_trait]
impl HotStore for RedisHotStore {
    async fn apply_bid_write(&self, w: &BidWrite) -> Result<(), AppError> {
        let client = self.pool.next().clone();
        let ranking_key = keys::ranking(&w.session_id);
        let bid_key = keys::bid(&w.session_id, &w.user_id);
        let meta_key = keys::bid_metadata(&w.session_id, &w.user_id);
        let member = w.user_id.to_string();
        let fields = bid_fields(w.price, w.score, w.updated_at_ms);
        let ttl = w.ttl_seconds;
        let session = w.session_id.to_string();
        let score = w.score;

        deadline(async move {
            let pipeline = client.pipeline();
            let _: () = pipeline
                .zadd(
                    ranking_key.as_str(),
                    None,
                    None,
                    false,
                    false,
                    (score, member.as_str()),
                )
                .await?;
            let _: () = pipeline.hset(bid_key.as_str(), fields.clone()).await?;
            let _: () = pipeline.hset(meta_key.as_str(), fields).await?;
            let _: () = pipeline.expire(ranking_key.as_str(), ttl, None).await?;
            let _: () = pipeline.expire(bid_key.as_str(), ttl, None).await?;
            let _: () = pipeline.expire(meta_key.as_str(), ttl, None).await?;
            let _: () = pipeline.sadd(keys::DIRTY_SESSIONS, session.as_str()).await?;
            let _: Vec<Value> = pipeline.all().await?;
            Ok(())
        })
        .await
    }

    async fn rank_desc(&self, session_id: &Uuid, user_id: &Uuid) -> Result<Option<u64>, AppError> {
        let client = self.pool.next().clone();
        let key = keys::ranking(session_id);
        let member = user_id.to_string();

        let rank: Option<i64> = deadline(async move {
            client.zrevrank(key.as_str(), member.as_str(), false).await
        })
        .await?;
        Ok(rank.and_then(|r| u64::try_from(r).ok()))
    }

    async fn page_desc(
        &self,
        session_id: &Uuid,
        start: u64,
        stop: u64,
    ) -> Result<(Vec<ScoreEntry>, u64), AppError> {
        let client = self.pool.next().clone();
        let key = keys::ranking(session_id);

        let (raw, total): (Vec<(String, f64)>, u64) = deadline(async move {
            let pipeline = client.pipeline();
            let _: () = pipeline
                .zrange(key.as_str(), start as i64, stop as i64, None, true, None, true)
                .await?;
            let _: () = pipeline.zcard(key.as_str()).await?;
            pipeline.all().await
        })
        .await?;

        let entries = raw
            .iter()
            .filter_map(|(member, score)| {
                parse_member(member).map(|user_id| ScoreEntry {
                    user_id,
                    score: *score,
                })
            })
            .collect();
        Ok((entries, total))
    }

    async fn full_board_desc(&self, session_id: &Uuid) -> Result<Vec<ScoreEntry>, AppError> {
        let (entries, _) = self.page_desc(session_id, 0, u64::MAX >> 1).await?;
        Ok(entries)
    }

    async fn bid_records(
        &self,
        session_id: &Uuid,
        user_ids: &[Uuid],
    ) -> Result<Vec<Option<BidRecord>>, AppError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.next().clone();
        let hash_keys: Vec<String> = user_ids.iter().map(|u| keys::bid(session_id, u)).collect();

        let maps: Vec<HashMap<String, String>> = deadline(async move {
            let pipeline = client.pipeline();
            for key in &hash_keys {
                let _: () = pipeline.hgetall(key.as_str()).await?;
            }
            pipeline.all().await
        })
        .await?;

        Ok(maps
            .iter()
            .map(|map| {
                if map.is_empty() {
                    return None;
                }
                let record = parse_bid_fields(map);
                if record.is_none() {
                    tracing::warn!(session_id = %session_id, "skipping malformed bid hash");
                }
                record
            })
            .collect())
    }

    async fn snapshot_and_clear_dirty(&self) -> Result<Vec<Uuid>, AppError> {
        let client = self.pool.next().clone();

        deadline(async move {
            let mut out = Vec::new();
            // SPOP is atomic per call; loop until the set is empty so one
            // snapshot drains everything present at iteration start.
            loop {
                let batch: Vec<String> = client.spop(keys::DIRTY_SESSIONS, Some(1_024)).await?;
                if batch.is_empty() {
                    break;
                }
                for raw in batch {
                    match Uuid::parse_str(&raw) {
                        Ok(id) => out.push(id),
                        Err(_) => tracing::warn!(member = %raw, "skipping non-uuid dirty marker"),
                    }
                }
            }
            Ok(out)
        })
        .await
    }

    async fn mark_dirty(&self, session_id: &Uuid) -> Result<(), AppError> {
        let client = self.pool.next().clone();
        let member = session_id.to_string();
        deadline(async move {
            let _: () = client.sadd(keys::DIRTY_SESSIONS, member.as_str()).await?;
            Ok(())
        })
        .await
    }

    async fn scan_bid_metadata(
        &self,
        session_id: &Uuid,
    ) -> Result<Vec<(Uuid, BidRecord)>, AppError> {
        let client = self.pool.next().clone();
        let pattern = keys::bid_metadata_pattern(session_id);
        let sid = *session_id;

        deadline(async move {
            let mut found = Vec::new();
            let stream = client.scan_buffered(pattern, Some(200), None);
            futures::pin_mut!(stream);
            while let Some(key) = stream.try_next().await? {
                if let Some(s) = key.as_str() {
                    found.push(s.to_string());
                }
            }
            if found.is_empty() {
                return Ok(Vec::new());
            }

            let pipeline = client.pipeline();
            for key in &found {
                let _: () = pipeline.hgetall(key.as_str()).await?;
            }
            let maps: Vec<HashMap<String, String>> = pipeline.all().await?;

            let mut out = Vec::with_capacity(found.len());
            for (key, map) in found.iter().zip(maps.iter()) {
                let Some(user_id) = keys::user_id_from_metadata_key(key) else {
                    tracing::warn!(key = %key, "skipping malformed metadata key");
                    continue;
                };
                match parse_bid_fields(map) {
                    Some(record) => out.push((user_id, record)),
                    // Key may have expired between scan and read.
                    None if map.is_empty() => {}
                    None => {
                        tracing::warn!(session_id = %sid, key = %key, "skipping malformed metadata hash");
                    }
                }
            }
            Ok(out)
        })
        .await
    }

    async fn delete_bid_metadata(
        &self,
        session_id: &Uuid,
        user_ids: &[Uuid],
    ) -> Result<(), AppError> {
        if user_ids.is_empty() {
            return Ok(());
        }
        let client = self.pool.next().clone();
        let del_keys: Vec<String> = user_ids
            .iter()
            .map(|u| keys::bid_metadata(session_id, u))
            .collect();
        deadline(async move {
            let _: () = client.del(del_keys).await?;
            Ok(())
        })
        .await
    }

    async fn get_session_params(
        &self,
        session_id: &Uuid,
    ) -> Result<Option<SessionParams>, AppError> {
        let client = self.pool.next().clone();
        let key = keys::session_params(session_id);

        let map: HashMap<String, String> =
            deadline(async move { client.hgetall(key.as_str()).await }).await?;
        if map.is_empty() {
            return Ok(None);
        }
        let parsed = parse_params_fields(session_id, &map);
        if parsed.is_none() {
            // Treat a garbled hash as a miss; the read-through repopulates it.
            tracing::warn!(session_id = %session_id, "discarding malformed session params hash");
        }
        Ok(parsed)
    }

    async fn put_session_params(
        &self,
        params: &SessionParams,
        ttl_seconds: i64,
    ) -> Result<(), AppError> {
        let client = self.pool.next().clone();
        let key = keys::session_params(&params.session_id);
        let fields = params_fields(params);

        deadline(async move {
            let pipeline = client.pipeline();
            let _: () = pipeline.hset(key.as_str(), fields).await?;
            let _: () = pipeline.expire(key.as_str(), ttl_seconds, None).await?;
            let _: Vec<Value> = pipeline.all().await?;
            Ok(())
        })
        .await
    }

    async fn get_activity(&self, session_id: &Uuid) -> Result<Option<ActivityFlag>, AppError> {
        let client = self.pool.next().clone();
        let key = keys::session_active(session_id);

        let raw: Option<String> = deadline(async move { client.get(key.as_str()).await }).await?;
        Ok(raw.as_deref().and_then(ActivityFlag::from_wire))
    }

    async fn put_activity(
        &self,
        session_id: &Uuid,
        flag: ActivityFlag,
        ttl_seconds: i64,
    ) -> Result<(), AppError> {
        let client = self.pool.next().clone();
        let key = keys::session_active(session_id);

        deadline(async move {
            let _: () = client
                .set(
                    key.as_str(),
                    flag.as_wire(),
                    Some(Expiration::EX(ttl_seconds)),
                    None,
                    false,
                )
                .await?;
            Ok(())
        })
        .await
    }

    async fn get_usernames(&self, user_ids: &[Uuid]) -> Result<Vec<Option<String>>, AppError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.next().clone();
        let hash_keys: Vec<String> = user_ids.iter().map(keys::user).collect();

        let maps: Vec<HashMap<String, String>> = deadline(async move {
            let pipeline = client.pipeline();
            for key in &hash_keys {
                let _: () = pipeline.hgetall(key.as_str()).await?;
            }
            pipeline.all().await
        })
        .await?;

        Ok(maps
            .into_iter()
            .map(|mut map| map.remove("username"))
            .collect())
    }

    async fn put_usernames(
        &self,
        entries: &[(Uuid, String)],
        ttl_seconds: i64,
    ) -> Result<(), AppError> {
        if entries.is_empty() {
            return Ok(());
        }
        let client = self.pool.next().clone();
        let rows: Vec<(String, String)> = entries
            .iter()
            .map(|(id, name)| (keys::user(id), name.clone()))
            .collect();

        deadline(async move {
            let pipeline = client.pipeline();
            for (key, name) in &rows {
                let fields = HashMap::from([("username", name.as_str())]);
                let _: () = pipeline.hset(key.as_str(), fields).await?;
                let _: () = pipeline.expire(key.as_str(), ttl_seconds, None).await?;
            }
            let _: Vec<Value> = pipeline.all().await?;
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<(), AppError> {
        let client = self.pool.next().clone();
        deadline(async move { client.ping::<()>(None).await }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn params_wire_round_trip() {
        let now = from_ms(Utc::now().timestamp_millis());
        let params = SessionParams {
            session_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            reserve_price: 200.0,
            inventory: 5,
            alpha: 0.5,
            beta: 1_000.0,
            gamma: 2.0,
            start_time: now,
            end_time: now + chrono::TimeDelta::seconds(60),
        };

        let fields = params_fields(&params);
        let parsed = parse_params_fields(&params.session_id, &fields).unwrap();
        assert_eq!(parsed, params);
    }

    #[test]
    fn garbled_params_hash_is_a_miss() {
        let mut fields = HashMap::new();
        fields.insert("alpha".to_string(), "0.5".to_string());
        assert!(parse_params_fields(&Uuid::new_v4(), &fields).is_none());
    }

    #[test]
    fn non_uuid_member_is_skipped() {
        assert!(parse_member("not-a-uuid").is_none());
        let id = Uuid::new_v4();
        assert_eq!(parse_member(&id.to_string()), Some(id));
    }
}
