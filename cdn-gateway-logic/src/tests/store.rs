use pretty_assertions::assert_eq;
use sea_orm::EntityTrait;

use super::{build_state, init_db, test_settings};
use crate::{
    queue::message::{QueueMessage, DEFAULT_QUEUE},
    repository::{consumers, messages, published_paths},
    schemas::now_naive,
};

#[tokio::test]
async fn claim_is_exclusive_and_oldest_first() {
    let db = init_db("store_claim_exclusive").await;
    let test = build_state(db.client(), test_settings());
    let broker = &test.state.broker;

    let first = broker
        .enqueue(
            QueueMessage::new("commit", DEFAULT_QUEUE, serde_json::json!({"n": 1})),
            None,
        )
        .await
        .unwrap();
    let mut newer = QueueMessage::new("commit", DEFAULT_QUEUE, serde_json::json!({"n": 2}));
    newer.body.enqueued_at = first.body.enqueued_at + 10;
    let second = broker.enqueue(newer, None).await.unwrap();

    let conn = db.client();
    let a = messages::claim_one(conn.as_ref(), DEFAULT_QUEUE, "consumer-a")
        .await
        .unwrap()
        .expect("first claim");
    let b = messages::claim_one(conn.as_ref(), DEFAULT_QUEUE, "consumer-b")
        .await
        .unwrap()
        .expect("second claim");
    let c = messages::claim_one(conn.as_ref(), DEFAULT_QUEUE, "consumer-c")
        .await
        .unwrap();

    // Oldest first, no message handed out twice, nothing left for a third.
    assert_eq!(a.id, first.id);
    assert_eq!(b.id, second.id);
    assert_eq!(a.consumer_id.as_deref(), Some("consumer-a"));
    assert!(c.is_none());

    assert_eq!(
        messages::pending_count(conn.as_ref(), "consumer-a")
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn upsert_replaces_body_and_clears_consumer() {
    let db = init_db("store_upsert_replaces").await;
    let test = build_state(db.client(), test_settings());
    let conn = db.client();

    let msg = test
        .state
        .broker
        .enqueue(
            QueueMessage::new("commit", DEFAULT_QUEUE, serde_json::json!({"attempt": 1})),
            None,
        )
        .await
        .unwrap();

    messages::claim_one(conn.as_ref(), DEFAULT_QUEUE, "consumer-a")
        .await
        .unwrap()
        .expect("claim");

    // Retry: same id enqueued again replaces the row in place.
    let mut retry = msg.clone();
    retry.body.args = serde_json::json!({"attempt": 2});
    retry.body.options.retries = 1;
    messages::upsert(conn.as_ref(), &retry).await.unwrap();

    let rows = cdn_gateway_entity::queue_messages::Entity::find()
        .all(conn.as_ref())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, msg.id);
    assert_eq!(rows[0].consumer_id, None);
    let body = messages::decode(rows[0].clone()).unwrap().body;
    assert_eq!(body.options.retries, 1);
    assert_eq!(body.args["attempt"], 2);
}

#[tokio::test]
async fn lost_messages_are_reclaimed() {
    let db = init_db("store_reclaim_lost").await;
    let test = build_state(db.client(), test_settings());
    let conn = db.client();

    let lost = test
        .state
        .broker
        .enqueue(
            QueueMessage::new("commit", DEFAULT_QUEUE, serde_json::json!({})),
            None,
        )
        .await
        .unwrap();
    let held = test
        .state
        .broker
        .enqueue(
            QueueMessage::new("commit", DEFAULT_QUEUE, serde_json::json!({})),
            None,
        )
        .await
        .unwrap();

    // One consumer actually exists, the other id is fabricated.
    consumers::register(conn.as_ref(), "alive-consumer", now_naive())
        .await
        .unwrap();
    messages::claim_one(conn.as_ref(), DEFAULT_QUEUE, "ghost-consumer")
        .await
        .unwrap()
        .expect("claim for ghost");
    messages::claim_one(conn.as_ref(), DEFAULT_QUEUE, "alive-consumer")
        .await
        .unwrap()
        .expect("claim for alive");

    let reclaimed = messages::reclaim_lost(conn.as_ref()).await.unwrap();
    assert_eq!(reclaimed, vec![lost.id]);

    let held_row = messages::get(conn.as_ref(), held.id).await.unwrap().unwrap();
    assert_eq!(held_row.consumer_id.as_deref(), Some("alive-consumer"));
}

#[tokio::test]
async fn dead_consumers_are_deleted() {
    let db = init_db("store_dead_consumers").await;
    let conn = db.client();

    let stale = now_naive() - chrono::Duration::seconds(120);
    consumers::register(conn.as_ref(), "stale-consumer", stale)
        .await
        .unwrap();
    consumers::register(conn.as_ref(), "fresh-consumer", now_naive())
        .await
        .unwrap();

    let cutoff = now_naive() - chrono::Duration::seconds(60);
    let dead = consumers::delete_dead(conn.as_ref(), cutoff).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, "stale-consumer");

    assert!(consumers::get(conn.as_ref(), "stale-consumer")
        .await
        .unwrap()
        .is_none());
    assert!(consumers::get(conn.as_ref(), "fresh-consumer")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn published_paths_upsert_is_idempotent() {
    let db = init_db("store_published_paths").await;
    let conn = db.client();

    let now = now_naive();
    published_paths::upsert_many(
        conn.as_ref(),
        "test",
        ["/content/a".to_string(), "/content/b".to_string()],
        now,
    )
    .await
    .unwrap();
    published_paths::upsert_many(conn.as_ref(), "test", ["/content/a".to_string()], now)
        .await
        .unwrap();

    let under = published_paths::under_prefix(conn.as_ref(), "test", "/content")
        .await
        .unwrap();
    assert_eq!(under.len(), 2);

    // Other environments are not visible.
    let other = published_paths::under_prefix(conn.as_ref(), "other", "/content")
        .await
        .unwrap();
    assert!(other.is_empty());
}
