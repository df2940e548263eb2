use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Users
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  username TEXT NOT NULL UNIQUE,
  email TEXT NOT NULL,
  password_hash TEXT NOT NULL,
  is_admin BOOLEAN NOT NULL,
  weight DOUBLE PRECISION NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Auction sessions
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS sessions (
  id TEXT PRIMARY KEY,
  product_id TEXT NOT NULL,

  reserve_price DOUBLE PRECISION NOT NULL,
  final_price DOUBLE PRECISION,
  inventory INTEGER NOT NULL,

  alpha DOUBLE PRECISION NOT NULL,
  beta DOUBLE PRECISION NOT NULL,
  gamma DOUBLE PRECISION NOT NULL,

  start_ms BIGINT NOT NULL,
  end_ms BIGINT NOT NULL,
  is_active BOOLEAN NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Bids, one row per (session, user); the persister upserts into this.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS bids (
  session_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  price DOUBLE PRECISION NOT NULL,
  score DOUBLE PRECISION NOT NULL,
  updated_at_ms BIGINT NOT NULL,

  PRIMARY KEY (session_id, user_id)
);
"#,
    )
    .execute(pool)
    .await?;

    // Frozen per-session results, written once at finalization.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS rankings (
  session_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  rank INTEGER NOT NULL,
  price DOUBLE PRECISION NOT NULL,
  score DOUBLE PRECISION NOT NULL,
  is_winner BOOLEAN NOT NULL,

  PRIMARY KEY (session_id, user_id)
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_sessions_active_end ON sessions(is_active, end_ms);"#)
        .execute(pool)
        .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_bids_session ON bids(session_id);"#)
        .execute(pool)
        .await?;

    Ok(())
}
