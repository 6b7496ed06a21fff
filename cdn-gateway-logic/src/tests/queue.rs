use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use sea_orm::EntityTrait;
use tokio::sync::Semaphore;

use super::{build_state, build_state_with_registry, init_db, stored_message, test_settings};
use crate::{
    error::ServiceError,
    queue::{
        consumer::Consumer,
        message::{delayed_name, now_millis, QueueMessage, DEFAULT_QUEUE},
        middleware::MiddlewareChain,
        registry::{Actor, ActorOptions, Registry},
        scheduler::{self, scheduler_message_id},
        worker,
    },
    repository::{consumers, messages},
    schemas::now_naive,
    state::AppState,
};

#[tokio::test]
async fn enqueue_consume_ack_conserves_queue() {
    let db = init_db("queue_enqueue_ack").await;
    let test = build_state(db.client(), test_settings());
    let state = &test.state;

    let msg = state
        .broker
        .enqueue(
            QueueMessage::new("commit", DEFAULT_QUEUE, serde_json::json!({})),
            None,
        )
        .await
        .unwrap();

    let mut consumer = Consumer::new(
        state.db.clone(),
        state.settings.clone(),
        DEFAULT_QUEUE,
        state.broker.id(),
        false,
    );
    consumer.start().await.unwrap();

    let fetched = consumer.fetch().await.unwrap().expect("message claimed");
    assert_eq!(fetched.id, msg.id);

    // Prefetch budget of 1: no second message while one is pending.
    assert!(consumer.fetch().await.unwrap().is_none());

    assert!(consumer.ack(&fetched).await.unwrap());
    let rows = cdn_gateway_entity::queue_messages::Entity::find()
        .all(db.client().as_ref())
        .await
        .unwrap();
    assert!(rows.is_empty());

    consumer.close().await.unwrap();
    assert!(consumers::get(db.client().as_ref(), consumer.id())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn master_heartbeat_recovers_lost_messages_and_dead_consumers() {
    let db = init_db("queue_master_recovery").await;
    let mut settings = test_settings();
    // Heartbeat due immediately; anything older than 200ms is dead.
    settings.worker_keepalive_interval = Duration::from_secs(0);
    settings.worker_keepalive_timeout = Duration::from_millis(200);
    let test = build_state(db.client(), settings);
    let state = &test.state;
    let conn = db.client();

    // A message claimed by a consumer id that never registered.
    let lost = state
        .broker
        .enqueue(
            QueueMessage::new("commit", DEFAULT_QUEUE, serde_json::json!({})),
            None,
        )
        .await
        .unwrap();
    messages::claim_one(conn.as_ref(), DEFAULT_QUEUE, "ghost-consumer")
        .await
        .unwrap()
        .expect("ghost claim");

    // A consumer row that stopped heartbeating long ago.
    consumers::register(
        conn.as_ref(),
        "expired-consumer",
        now_naive() - chrono::Duration::seconds(60),
    )
    .await
    .unwrap();

    let mut master = Consumer::new(
        state.db.clone(),
        state.settings.clone(),
        DEFAULT_QUEUE,
        state.broker.id(),
        true,
    );
    master.start().await.unwrap();
    master.heartbeat().await.unwrap();

    assert!(consumers::get(conn.as_ref(), "expired-consumer")
        .await
        .unwrap()
        .is_none());

    // The lost message is unclaimed again and gets picked up by the live
    // consumer.
    let row = messages::get(conn.as_ref(), lost.id).await.unwrap().unwrap();
    assert_eq!(row.consumer_id, None);
    let reclaimed = master.fetch().await.unwrap().expect("reclaimed message");
    assert_eq!(reclaimed.id, lost.id);
}

#[tokio::test]
async fn delayed_message_waits_for_eta_then_promotes_once() {
    let db = init_db("queue_delayed_promotion").await;
    let test = build_state(db.client(), test_settings());
    let state = &test.state;
    let conn = db.client();
    let dq = delayed_name(DEFAULT_QUEUE);

    let msg = state
        .broker
        .enqueue(
            QueueMessage::new("commit", DEFAULT_QUEUE, serde_json::json!({})),
            Some(Duration::from_secs(3600)),
        )
        .await
        .unwrap();
    assert_eq!(msg.queue, dq);
    assert!(msg.body.options.eta.unwrap() > now_millis());

    let mut dq_consumer = Consumer::new(
        state.db.clone(),
        state.settings.clone(),
        &dq,
        state.broker.id(),
        false,
    );
    dq_consumer.start().await.unwrap();

    // ETA not reached: the message is put back, not delivered.
    let fetched = dq_consumer.fetch().await.unwrap().expect("claimed");
    let step = worker::promote_or_release(state, &dq_consumer, fetched).await;
    assert!(matches!(step, worker::Step::Idle));
    let row = messages::get(conn.as_ref(), msg.id).await.unwrap().unwrap();
    assert_eq!(row.queue, dq);
    assert_eq!(row.consumer_id, None);

    // Force the ETA into the past and consume again: the message moves to
    // the base queue, exactly once, and the trailing ack is a no-op.
    let mut expired = msg.clone();
    expired.body.options.eta = Some(now_millis() - 1000);
    messages::upsert(conn.as_ref(), &expired).await.unwrap();

    let fetched = dq_consumer.fetch().await.unwrap().expect("claimed again");
    let step = worker::promote_or_release(state, &dq_consumer, fetched.clone()).await;
    assert!(matches!(step, worker::Step::Busy));

    let rows = cdn_gateway_entity::queue_messages::Entity::find()
        .all(conn.as_ref())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].queue, DEFAULT_QUEUE);
    let promoted = messages::decode(rows[0].clone()).unwrap();
    assert_eq!(promoted.body.options.eta, None);

    // Acking the (stale) delayed copy must not delete the promoted row.
    assert!(!dq_consumer.ack(&fetched).await.unwrap());
    assert_eq!(
        cdn_gateway_entity::queue_messages::Entity::find()
            .all(conn.as_ref())
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn enqueue_stamps_the_current_correlation_id() {
    let db = init_db("queue_correlation_id").await;
    let test = build_state(db.client(), test_settings());
    let state = test.state.clone();

    let msg = crate::context::with_correlation_id(Some("req-123".to_string()), async move {
        state
            .broker
            .enqueue(
                QueueMessage::new("commit", DEFAULT_QUEUE, serde_json::json!({})),
                None,
            )
            .await
            .unwrap()
    })
    .await;

    assert_eq!(msg.body.options.correlation_id.as_deref(), Some("req-123"));
    let stored = super::stored_message(db.client().as_ref(), msg.id).await;
    assert_eq!(
        stored.body.options.correlation_id.as_deref(),
        Some("req-123")
    );
}

#[tokio::test]
async fn scheduler_bootstrap_is_a_singleton() {
    let db = init_db("queue_scheduler_singleton").await;
    let test = build_state(db.client(), test_settings());
    let state = &test.state;
    let conn = db.client();

    // A stray older message for the same actor gets cleaned up.
    state
        .broker
        .enqueue(
            QueueMessage::new("cleanup", DEFAULT_QUEUE, serde_json::json!({})),
            None,
        )
        .await
        .unwrap();

    scheduler::ensure_scheduled(&state.broker, state.broker.registry(), 5)
        .await
        .unwrap();
    // A second boot-up changes nothing.
    scheduler::ensure_scheduled(&state.broker, state.broker.registry(), 5)
        .await
        .unwrap();

    let rows = cdn_gateway_entity::queue_messages::Entity::find()
        .all(conn.as_ref())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, scheduler_message_id(DEFAULT_QUEUE, "cleanup"));
    assert_eq!(rows[0].queue, delayed_name(DEFAULT_QUEUE));
}

struct FlakyActor {
    invocations: Arc<AtomicU32>,
}

#[async_trait]
impl Actor for FlakyActor {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn invoke(
        &self,
        _state: Arc<AppState>,
        _msg: &QueueMessage,
    ) -> Result<(), ServiceError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Err(ServiceError::External("boom".to_string()))
    }
}

#[tokio::test]
async fn failing_actor_is_retried_then_nacked() {
    let db = init_db("queue_retry_then_nack").await;
    let settings = test_settings();

    let invocations = Arc::new(AtomicU32::new(0));
    let mut registry = Registry::new();
    let mut options = ActorOptions::from_settings(&settings);
    options.max_retries = 1;
    registry
        .declare(
            &settings,
            Arc::new(FlakyActor {
                invocations: invocations.clone(),
            }),
            options,
        )
        .unwrap();

    let test = build_state_with_registry(db.client(), settings, registry);
    let state = &test.state;
    let conn = db.client();

    let msg = state
        .broker
        .enqueue(
            QueueMessage::new("flaky", DEFAULT_QUEUE, serde_json::json!({})),
            None,
        )
        .await
        .unwrap();
    messages::claim_one(conn.as_ref(), DEFAULT_QUEUE, "consumer-a")
        .await
        .unwrap()
        .expect("claim");

    let chain = Arc::new(MiddlewareChain::standard());
    let pool = Arc::new(Semaphore::new(1));

    // First failure: retried with backoff, i.e. re-enqueued under the same
    // id on the delayed queue with the attempt counter bumped.
    let permit = pool.clone().acquire_owned().await.unwrap();
    worker::invoke_message(
        state.clone(),
        "consumer-a".to_string(),
        msg.clone(),
        chain.clone(),
        permit,
    )
    .await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    let retried = stored_message(conn.as_ref(), msg.id).await;
    assert_eq!(retried.queue, delayed_name(DEFAULT_QUEUE));
    assert_eq!(retried.body.options.retries, 1);
    assert!(retried.body.options.eta.is_some());

    // Retries exhausted: the message is dropped.
    let mut exhausted = retried.clone();
    exhausted.queue = DEFAULT_QUEUE.to_string();
    exhausted.body.options.eta = None;
    let permit = pool.clone().acquire_owned().await.unwrap();
    worker::invoke_message(
        state.clone(),
        "consumer-a".to_string(),
        exhausted,
        chain,
        permit,
    )
    .await;
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert!(messages::get(conn.as_ref(), msg.id).await.unwrap().is_none());
}

struct CountingActor {
    invocations: Arc<AtomicU32>,
}

#[async_trait]
impl Actor for CountingActor {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    async fn invoke(
        &self,
        _state: Arc<AppState>,
        _msg: &QueueMessage,
    ) -> Result<(), ServiceError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn scheduled_actor_runs_when_rule_fires_and_reenqueues_itself() {
    let db = init_db("queue_scheduled_fires").await;
    let mut settings = test_settings();
    // Fires every second: any 30s window contains a hit.
    settings.cron_cleanup = "* * * * * *".to_string();

    let invocations = Arc::new(AtomicU32::new(0));
    let mut registry = Registry::new();
    registry
        .declare(
            &settings,
            Arc::new(CountingActor {
                invocations: invocations.clone(),
            }),
            ActorOptions::from_settings(&settings).scheduled(),
        )
        .unwrap();
    let test = build_state_with_registry(db.client(), settings, registry);
    let state = &test.state;

    let mut msg = QueueMessage::new("cleanup", DEFAULT_QUEUE, serde_json::json!({}));
    msg.id = scheduler_message_id(DEFAULT_QUEUE, "cleanup");
    super::invoke_actor(state, &msg).await.unwrap();

    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    // It re-enqueued itself under its stable id with the next last_run.
    let next = stored_message(db.client().as_ref(), msg.id).await;
    assert_eq!(next.queue, delayed_name(DEFAULT_QUEUE));
    assert!(next.body.args["last_run"].as_i64().is_some());
}

#[tokio::test]
async fn scheduled_actor_skips_body_when_rule_has_not_fired() {
    let db = init_db("queue_scheduled_skips").await;
    let mut settings = test_settings();
    // Fires only in 2099: never within the evaluation window.
    settings.cron_cleanup = "0 0 0 1 1 * 2099".to_string();

    let invocations = Arc::new(AtomicU32::new(0));
    let mut registry = Registry::new();
    registry
        .declare(
            &settings,
            Arc::new(CountingActor {
                invocations: invocations.clone(),
            }),
            ActorOptions::from_settings(&settings).scheduled(),
        )
        .unwrap();
    let test = build_state_with_registry(db.client(), settings, registry);
    let state = &test.state;

    let mut msg = QueueMessage::new(
        "cleanup",
        DEFAULT_QUEUE,
        serde_json::json!({"last_run": now_millis() - 30_000}),
    );
    msg.id = scheduler_message_id(DEFAULT_QUEUE, "cleanup");
    super::invoke_actor(state, &msg).await.unwrap();

    // Body skipped, but the scheduler message is back in the system.
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    let next = stored_message(db.client().as_ref(), msg.id).await;
    assert_eq!(next.queue, delayed_name(DEFAULT_QUEUE));
}

#[tokio::test]
async fn declaring_scheduled_actor_without_rule_fails_fast() {
    let settings = test_settings();
    let mut registry = Registry::new();
    let result = registry.declare(
        &settings,
        Arc::new(FlakyActor {
            invocations: Arc::new(AtomicU32::new(0)),
        }),
        ActorOptions::from_settings(&settings).scheduled(),
    );
    assert!(result.is_err());
}
