//! Worker-process assembly: readiness check, scheduled-actor bootstrap, the
//! NOTIFY listener, one consumer loop per queue and the bounded pool of
//! in-flight actor invocations.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement};
use tokio::{
    sync::{Notify, OwnedSemaphorePermit, Semaphore},
    time::{sleep, timeout},
};

use crate::{
    error::ServiceError,
    metrics,
    queue::{
        consumer::{ack_message, backoff_delay, nack_message, Consumer},
        listener,
        message::{base_name, is_delayed, now_millis, QueueMessage},
        middleware::{InvokeContext, MiddlewareChain},
        scheduler,
    },
    repository::messages,
    state::AppState,
};

/// Runs the whole queue worker for one process. Never returns under normal
/// operation; the caller supervises restarts.
pub async fn run(state: Arc<AppState>) -> Result<(), ServiceError> {
    wait_for_schema(&state.db).await?;

    scheduler::ensure_scheduled(
        &state.broker,
        state.broker.registry(),
        state.settings.scheduler_delay,
    )
    .await?;

    let chain = Arc::new(MiddlewareChain::standard());
    let pool = Arc::new(Semaphore::new(state.settings.worker_threads.max(1)));

    let mut handles = Vec::new();

    handles.push(tokio::spawn(listener::run(
        state.db.clone(),
        state.broker.clone(),
        state.settings.listener_interval,
    )));

    // One consumer per queue (bases and their delayed variants). The first
    // declared queue's consumer is the master performing queue-wide
    // maintenance.
    for (index, queue) in state.broker.registry().all_queues().into_iter().enumerate() {
        handles.push(tokio::spawn(consumer_loop(
            state.clone(),
            queue,
            index == 0,
            chain.clone(),
            pool.clone(),
        )));
    }

    let (result, _, rest) = futures::future::select_all(handles).await;
    for handle in rest {
        handle.abort();
    }
    result.map_err(|err| ServiceError::Internal(err.into()))?;
    Err(ServiceError::External(
        "queue worker task ended unexpectedly".to_string(),
    ))
}

/// Block until the queue schema exists. The worker may boot before the
/// process responsible for migrations, so this retries with exponential
/// backoff for up to two minutes.
pub async fn wait_for_schema(db: &DatabaseConnection) -> Result<(), ServiceError> {
    let deadline = Instant::now() + Duration::from_secs(120);
    let mut delay = Duration::from_secs(1);
    loop {
        let probe = db
            .execute(Statement::from_string(
                DatabaseBackend::Postgres,
                r#"SELECT 1 FROM "queue_consumers" LIMIT 1"#,
            ))
            .await;
        match probe {
            Ok(_) => return Ok(()),
            Err(err) if Instant::now() + delay < deadline => {
                tracing::warn!(error = %err, ?delay, "queue schema not ready, waiting");
                sleep(delay).await;
                delay = delay.saturating_mul(2).min(Duration::from_secs(30));
            }
            Err(err) => {
                return Err(ServiceError::External(format!(
                    "queue schema not ready: {err}"
                )))
            }
        }
    }
}

pub(crate) enum Step {
    /// A message was handled; look again immediately.
    Busy,
    /// Nothing to do; wait for a wake-up.
    Idle,
}

async fn consumer_loop(
    state: Arc<AppState>,
    queue: String,
    master: bool,
    chain: Arc<MiddlewareChain>,
    pool: Arc<Semaphore>,
) {
    let event = state.broker.event(&queue);
    let mut consumer = Consumer::new(
        state.db.clone(),
        state.settings.clone(),
        &queue,
        state.broker.id(),
        master,
    );

    while let Err(err) = consumer.start().await {
        tracing::warn!(error = %err, queue = %queue, "consumer failed to start, retrying");
        sleep(Duration::from_secs(1)).await;
    }

    loop {
        if let Err(err) = consumer.heartbeat().await {
            tracing::warn!(error = %err, "consumer heartbeat failed");
        }

        let step = match consumer.fetch().await {
            Ok(Some(msg)) => dispatch(&state, &consumer, msg, &chain, &pool).await,
            Ok(None) => Step::Idle,
            Err(err) => {
                tracing::warn!(error = %err, queue = %queue, "consume step failed");
                Step::Idle
            }
        };

        if let Step::Idle = step {
            wait_for_event(&event).await;
        }
    }
}

async fn wait_for_event(event: &Notify) {
    let _ = timeout(Duration::from_secs(1), event.notified()).await;
}

async fn dispatch(
    state: &Arc<AppState>,
    consumer: &Consumer,
    msg: QueueMessage,
    chain: &Arc<MiddlewareChain>,
    pool: &Arc<Semaphore>,
) -> Step {
    if is_delayed(&msg.queue) {
        return promote_or_release(state, consumer, msg).await;
    }

    // Hand over to the worker pool; the polling loop never blocks on actor
    // I/O, only on pool capacity.
    let permit = match pool.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return Step::Idle,
    };
    let state = state.clone();
    let consumer_id = consumer.id().to_string();
    let chain = chain.clone();
    tokio::spawn(invoke_message(state, consumer_id, msg, chain, permit));
    Step::Busy
}

/// Handle a message claimed from a delayed queue. Once the ETA passes, the
/// message is re-enqueued onto its base queue; since enqueue is
/// merge-on-write by id, the delayed copy is promoted in place and the
/// trailing ack is a no-op. Before the ETA it is simply put back.
pub(crate) async fn promote_or_release(
    state: &Arc<AppState>,
    consumer: &Consumer,
    msg: QueueMessage,
) -> Step {
    if let Some(eta) = msg.body.options.eta {
        if eta > now_millis() {
            if let Err(err) = consumer.release(&msg).await {
                tracing::warn!(error = %err, "failed to release delayed message");
            }
            return Step::Idle;
        }
    }

    let mut promoted = msg.clone();
    promoted.queue = base_name(&msg.queue).to_string();
    promoted.body.options.eta = None;

    match state.broker.enqueue(promoted, None).await {
        Ok(_) => {
            tracing::debug!(message_id = %msg.id, "promoted delayed message");
            if let Err(err) = consumer.ack(&msg).await {
                tracing::warn!(error = %err, "failed to ack promoted message");
            }
        }
        Err(err) => {
            tracing::error!(error = %err, message_id = %msg.id, "failed to promote delayed message");
            if let Err(err) = consumer.release(&msg).await {
                tracing::warn!(error = %err, "failed to release delayed message");
            }
        }
    }
    Step::Busy
}

fn subject_of(args: &serde_json::Value) -> Option<String> {
    for key in ["publish_id", "task_id"] {
        if let Some(value) = args.get(key).and_then(|v| v.as_str()) {
            return Some(value.to_string());
        }
    }
    None
}

pub(crate) async fn invoke_message(
    state: Arc<AppState>,
    consumer_id: String,
    msg: QueueMessage,
    chain: Arc<MiddlewareChain>,
    _permit: OwnedSemaphorePermit,
) {
    let Some(registered) = state.broker.registry().get(&msg.actor).cloned() else {
        tracing::error!(actor = %msg.actor, message_id = %msg.id, "no such actor declared");
        let _ = nack_message(state.db.as_ref(), &consumer_id, &msg).await;
        return;
    };
    let options = registered.options;

    let ctx = InvokeContext {
        actor: msg.actor.clone(),
        message_id: msg.id,
        correlation_id: msg.body.options.correlation_id.clone(),
        subject: subject_of(&msg.body.args),
        time_limit: options.time_limit,
    };

    let actor = registered.actor;
    let invoke_state = state.clone();
    let invoke_msg = msg.clone();
    let result = chain
        .run(
            &ctx,
            Box::new(move || {
                Box::pin(async move { actor.invoke(invoke_state, &invoke_msg).await })
            }),
        )
        .await;

    match result {
        Ok(()) => {
            metrics::MESSAGES_PROCESSED.inc();
            if let Err(err) = ack_message(state.db.as_ref(), &consumer_id, &msg).await {
                tracing::error!(error = %err, message_id = %msg.id, "failed to ack message");
            }
        }
        Err(err) => {
            let retries = msg.body.options.retries;
            if retries < options.max_retries {
                let delay = backoff_delay(retries, options.min_backoff, options.max_backoff);
                tracing::warn!(
                    error = %err,
                    message_id = %msg.id,
                    retries,
                    ?delay,
                    "actor failed, retrying"
                );
                let mut retry = msg.clone();
                retry.body.options.retries = retries + 1;
                if let Err(err) = state.broker.enqueue(retry, Some(delay)).await {
                    tracing::error!(error = %err, message_id = %msg.id, "failed to re-enqueue, releasing");
                    let _ = messages::release(state.db.as_ref(), msg.id).await;
                }
            } else {
                metrics::MESSAGES_FAILED.inc();
                tracing::error!(error = %err, message_id = %msg.id, "actor failed, retries exhausted");
                if let Err(err) = nack_message(state.db.as_ref(), &consumer_id, &msg).await {
                    tracing::error!(error = %err, message_id = %msg.id, "failed to nack message");
                }
            }
        }
    }

    state.broker.notify_local();
}
