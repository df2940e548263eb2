mod common;

use chrono::{TimeDelta, Utc};
use common::{SessionSpec, insert_session, insert_user, mk_app, principal};
use gavel::hot::HotStore;
use sqlx::Row;
use uuid::Uuid;

#[tokio::test]
async fn one_cycle_converges_durable_state_with_the_hot_store() {
    let app = mk_app().await;
    let start = Utc::now() - TimeDelta::seconds(1);
    let session_id = insert_session(&app.db.pool, &SessionSpec::open_at(start)).await;

    let mut expected: Vec<(Uuid, f64)> = Vec::new();
    for i in 0..100 {
        let user_id = insert_user(&app.db.pool, &format!("bidder{i}"), 1.0).await;
        let price = 200.0 + i as f64;
        let receipt = app
            .processor
            .submit(
                &principal(user_id, &format!("bidder{i}"), 1.0),
                session_id,
                price,
                start + TimeDelta::milliseconds(1_000 + i * 40),
            )
            .await
            .unwrap();
        expected.push((user_id, receipt.score));
    }

    let written = app.persister.drain_once().await.unwrap();
    assert_eq!(written, 100);

    let rows = sqlx::query("SELECT user_id, score FROM bids WHERE session_id = ?")
        .bind(session_id.to_string())
        .fetch_all(&app.db.pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 100);

    for (user_id, score) in &expected {
        let row = rows
            .iter()
            .find(|r| r.get::<String, _>("user_id") == user_id.to_string())
            .expect("bid row missing");
        assert_eq!(row.get::<f64, _>("score"), *score);
    }

    // Dirty set drained, metadata consumed: the next cycle writes nothing.
    assert!(app.hot.snapshot_and_clear_dirty().await.unwrap().is_empty());
    assert_eq!(app.persister.drain_once().await.unwrap(), 0);
}

#[tokio::test]
async fn rebid_after_persist_updates_the_same_row() {
    let app = mk_app().await;
    let start = Utc::now() - TimeDelta::seconds(1);
    let session_id = insert_session(&app.db.pool, &SessionSpec::open_at(start)).await;
    let user_id = insert_user(&app.db.pool, "alice", 1.0).await;
    let bidder = principal(user_id, "alice", 1.0);

    app.processor
        .submit(&bidder, session_id, 250.0, start + TimeDelta::seconds(1))
        .await
        .unwrap();
    app.persister.drain_once().await.unwrap();

    let second = app
        .processor
        .submit(&bidder, session_id, 300.0, start + TimeDelta::seconds(3))
        .await
        .unwrap();
    app.persister.drain_once().await.unwrap();

    let rows = sqlx::query("SELECT price, score FROM bids WHERE session_id = ?")
        .bind(session_id.to_string())
        .fetch_all(&app.db.pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<f64, _>("price"), 300.0);
    assert_eq!(rows[0].get::<f64, _>("score"), second.score);
}

#[tokio::test]
async fn bids_across_sessions_persist_into_their_own_rows() {
    let app = mk_app().await;
    let start = Utc::now() - TimeDelta::seconds(1);
    let s1 = insert_session(&app.db.pool, &SessionSpec::open_at(start)).await;
    let s2 = insert_session(&app.db.pool, &SessionSpec::open_at(start)).await;

    let user_id = insert_user(&app.db.pool, "alice", 1.0).await;
    let bidder = principal(user_id, "alice", 1.0);
    let at = start + TimeDelta::seconds(1);

    app.processor.submit(&bidder, s1, 250.0, at).await.unwrap();
    app.processor.submit(&bidder, s2, 275.0, at).await.unwrap();

    app.persister.drain_once().await.unwrap();

    for (sid, price) in [(s1, 250.0), (s2, 275.0)] {
        let row = sqlx::query("SELECT price FROM bids WHERE session_id = ? AND user_id = ?")
            .bind(sid.to_string())
            .bind(user_id.to_string())
            .fetch_one(&app.db.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<f64, _>("price"), price);
    }
}

#[tokio::test]
async fn leaderboard_shows_accepted_bids_before_any_persist_cycle() {
    let app = mk_app().await;
    let start = Utc::now() - TimeDelta::seconds(1);
    let session_id = insert_session(&app.db.pool, &SessionSpec::open_at(start)).await;
    let user_id = insert_user(&app.db.pool, "alice", 1.0).await;

    app.processor
        .submit(
            &principal(user_id, "alice", 1.0),
            session_id,
            250.0,
            start + TimeDelta::seconds(1),
        )
        .await
        .unwrap();

    // Visible on the board while the bids table is still empty.
    let page = app.get_leaderboard(session_id, 1, 50).await.unwrap();
    assert_eq!(page.total, 1);

    let rows = sqlx::query("SELECT user_id FROM bids WHERE session_id = ?")
        .bind(session_id.to_string())
        .fetch_all(&app.db.pool)
        .await
        .unwrap();
    assert!(rows.is_empty());
}
