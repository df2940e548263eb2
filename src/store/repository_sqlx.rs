use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::db::QUERY_DEADLINE;
use crate::store::model::{AuctionSession, PersistedBid, RankingRow, SessionParams, UserRow};
use crate::store::repository::AuctionRepository;
use crate::time::from_ms;

/// SQLx-backed implementation of AuctionRepository.
/// Responsible only for persistence and row mapping.
pub struct SqlxAuctionRepository {
    pool: AnyPool,
}

impl SqlxAuctionRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

/// Applies the durable query deadline. The timeout error stays downcastable
/// so callers can surface it as `upstream_timeout`.
async fn with_deadline<T, F>(fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(QUERY_DEADLINE, fut).await {
        Ok(res) => res,
        Err(elapsed) => Err(anyhow::Error::new(elapsed).context("durable query deadline exceeded")),
    }
}

const SESSION_COLUMNS: &str = r#"
  id, product_id, reserve_price, final_price, inventory,
  alpha, beta, gamma, start_ms, end_ms,
  CASE WHEN is_active THEN 1 ELSE 0 END AS is_active_i64
"#;

#[async_trait]
impl AuctionRepository for SqlxAuctionRepository {
    async fn fetch_session(&self, session_id: &Uuid) -> Result<Option<AuctionSession>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?;");

        let row = with_deadline(async {
            sqlx::query(&query)
                .bind(session_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .context("session fetch failed")
        })
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_session(&r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_user(&self, user_id: &Uuid) -> Result<Option<UserRow>> {
        let row = with_deadline(async {
            sqlx::query(
                r#"
SELECT id, username, email, password_hash,
  CASE WHEN is_admin THEN 1 ELSE 0 END AS is_admin_i64,
  weight
FROM users
WHERE id = ?;
"#,
            )
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("user fetch failed")
        })
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_user(&r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        let row = with_deadline(async {
            sqlx::query(
                r#"
SELECT id, username, email, password_hash,
  CASE WHEN is_admin THEN 1 ELSE 0 END AS is_admin_i64,
  weight
FROM users
WHERE username = ?;
"#,
            )
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .context("user fetch failed")
        })
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_user(&r)?)),
            None => Ok(None),
        }
    }

    async fn fetch_usernames(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; user_ids.len()].join(", ");
        let query = format!("SELECT id, username FROM users WHERE id IN ({placeholders});");

        let rows = with_deadline(async {
            let mut q = sqlx::query(&query);
            for id in user_ids {
                q = q.bind(id.to_string());
            }
            q.fetch_all(&self.pool)
                .await
                .context("bulk username fetch failed")
        })
        .await?;

        let mut out = HashMap::with_capacity(rows.len());
        for r in rows {
            let id_str: String = r.get("id");
            match Uuid::parse_str(&id_str) {
                Ok(id) => {
                    out.insert(id, r.get::<String, _>("username"));
                }
                Err(e) => {
                    // poison-row resilience: skip but don’t fail the batch
                    tracing::warn!(error = %e, "skipping malformed user row");
                }
            }
        }
        Ok(out)
    }

    async fn upsert_bids(&self, session_id: &Uuid, rows: &[PersistedBid]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        with_deadline(async {
            let mut tx = self.pool.begin().await.context("begin upsert tx failed")?;

            for row in rows {
                sqlx::query(
                    r#"
INSERT INTO bids (session_id, user_id, price, score, updated_at_ms)
VALUES (?, ?, ?, ?, ?)
ON CONFLICT(session_id, user_id) DO UPDATE SET
  price = excluded.price,
  score = excluded.score,
  updated_at_ms = excluded.updated_at_ms;
"#,
                )
                .bind(session_id.to_string())
                .bind(row.user_id.to_string())
                .bind(row.price)
                .bind(row.score)
                .bind(row.updated_at_ms)
                .execute(&mut *tx)
                .await
                .context("bid upsert failed")?;
            }

            tx.commit().await.context("commit upsert tx failed")
        })
        .await
    }

    async fn fetch_bids_desc(&self, session_id: &Uuid) -> Result<Vec<PersistedBid>> {
        let rows = with_deadline(async {
            sqlx::query(
                r#"
SELECT user_id, price, score, updated_at_ms
FROM bids
WHERE session_id = ?
ORDER BY score DESC, user_id DESC;
"#,
            )
            .bind(session_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("bid fetch failed")
        })
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let id_str: String = r.get("user_id");
            match Uuid::parse_str(&id_str) {
                Ok(user_id) => out.push(PersistedBid {
                    user_id,
                    price: r.get("price"),
                    score: r.get("score"),
                    updated_at_ms: r.get("updated_at_ms"),
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed bid row");
                }
            }
        }
        Ok(out)
    }

    async fn sessions_ending_before(&self, now_ms: i64) -> Result<Vec<AuctionSession>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE is_active = TRUE AND end_ms <= ?;"
        );

        let rows = with_deadline(async {
            sqlx::query(&query)
                .bind(now_ms)
                .fetch_all(&self.pool)
                .await
                .context("ended-session query failed")
        })
        .await?;

        let mut out = Vec::new();
        for r in rows {
            match row_to_session(&r) {
                Ok(s) => out.push(s),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed session row");
                }
            }
        }
        Ok(out)
    }

    async fn write_final_ranking(
        &self,
        session_id: &Uuid,
        rows: &[RankingRow],
        final_price: f64,
    ) -> Result<bool> {
        with_deadline(async {
            let mut tx = self.pool.begin().await.context("begin finalize tx failed")?;

            let row = sqlx::query(
                "SELECT CASE WHEN is_active THEN 1 ELSE 0 END AS is_active_i64 FROM sessions WHERE id = ?;",
            )
            .bind(session_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .context("finalize status check failed")?;

            let is_active = match row {
                Some(r) => r.get::<i64, _>("is_active_i64") == 1,
                None => return Err(anyhow!("session not found: {session_id}")),
            };

            // Already finalized: idempotent no-op.
            if !is_active {
                tx.commit().await.context("commit finalize tx failed")?;
                return Ok(false);
            }

            for row in rows {
                sqlx::query(
                    r#"
INSERT INTO rankings (session_id, user_id, rank, price, score, is_winner)
VALUES (?, ?, ?, ?, ?, ?);
"#,
                )
                .bind(session_id.to_string())
                .bind(row.user_id.to_string())
                .bind(row.rank as i64)
                .bind(row.price)
                .bind(row.score)
                .bind(row.is_winner)
                .execute(&mut *tx)
                .await
                .context("ranking insert failed")?;
            }

            sqlx::query("UPDATE sessions SET is_active = FALSE, final_price = ? WHERE id = ?;")
                .bind(final_price)
                .bind(session_id.to_string())
                .execute(&mut *tx)
                .await
                .context("session finalize update failed")?;

            tx.commit().await.context("commit finalize tx failed")?;
            Ok(true)
        })
        .await
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_session(r: &sqlx::any::AnyRow) -> Result<AuctionSession> {
    let id_str: String = r.get("id");
    let session_id = Uuid::parse_str(&id_str).context("invalid session id")?;

    let product_str: String = r.get("product_id");
    let product_id = Uuid::parse_str(&product_str).context("invalid product id")?;

    let is_active_i64: i64 = r.get("is_active_i64");
    let final_price: Option<f64> = r.try_get("final_price").unwrap_or(None);

    Ok(AuctionSession {
        params: SessionParams {
            session_id,
            product_id,
            reserve_price: r.get("reserve_price"),
            inventory: i64_to_u32(r.get("inventory")).context("invalid inventory")?,
            alpha: r.get("alpha"),
            beta: r.get("beta"),
            gamma: r.get("gamma"),
            start_time: from_ms(r.get("start_ms")),
            end_time: from_ms(r.get("end_ms")),
        },
        is_active: is_active_i64 == 1,
        final_price,
    })
}

fn row_to_user(r: &sqlx::any::AnyRow) -> Result<UserRow> {
    let id_str: String = r.get("id");
    let id = Uuid::parse_str(&id_str).context("invalid user id")?;

    let is_admin_i64: i64 = r.get("is_admin_i64");

    Ok(UserRow {
        id,
        username: r.get("username"),
        email: r.get("email"),
        password_hash: r.get("password_hash"),
        is_admin: is_admin_i64 == 1,
        weight: r.get("weight"),
    })
}

fn i64_to_u32(v: i64) -> Result<u32> {
    if v < 0 || v > u32::MAX as i64 {
        return Err(anyhow!("out of range for u32: {v}"));
    }
    Ok(v as u32)
}
