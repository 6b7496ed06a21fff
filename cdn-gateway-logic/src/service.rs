//! Operations invoked from the request-handling boundary. Each opens one
//! transaction so that state transitions and enqueues become visible
//! atomically; a client holding a task id is guaranteed a worker can find
//! the corresponding message.

use chrono::{Duration as ChronoDuration, NaiveDateTime, SecondsFormat, Utc};
use sea_orm::TransactionTrait;
use uuid::Uuid;

use crate::{
    actors::{cache::FlushArgs, commit::CommitArgs, deploy::DeployConfigArgs},
    error::ServiceError,
    queue::message::{QueueMessage, DEFAULT_QUEUE},
    repository::{items, publishes, tasks},
    schemas::{now_naive, CommitMode, ItemInput, PublishState},
    state::AppState,
};

fn default_deadline(state: &AppState) -> NaiveDateTime {
    now_naive() + ChronoDuration::hours(state.settings.task_deadline)
}

fn from_date_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Create a new pending publish on an environment.
pub async fn create_publish(
    state: &AppState,
    env: &str,
) -> Result<cdn_gateway_entity::publishes::Model, ServiceError> {
    state.settings.environment(env)?;
    publishes::create(state.db.as_ref(), env).await
}

/// Validate and append items to a pending publish.
pub async fn add_publish_items(
    state: &AppState,
    publish_id: Uuid,
    mut new_items: Vec<ItemInput>,
) -> Result<(), ServiceError> {
    for item in &mut new_items {
        item.validate(&state.settings)?;
    }

    let txn = state.db.begin().await?;
    let publish = publishes::get_for_update(&txn, publish_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("publish {publish_id}")))?;
    if publish.state.parse::<PublishState>()? != PublishState::Pending {
        return Err(ServiceError::Validation(format!(
            "publish {} in unexpected state, '{}'",
            publish.id, publish.state
        )));
    }

    items::insert_many(&txn, publish_id, new_items).await?;
    publishes::set_updated(&txn, publish_id, now_naive()).await?;
    txn.commit().await?;
    Ok(())
}

/// Transition a publish to COMMITTING, create its commit task and enqueue
/// the commit message, all in one transaction.
pub async fn commit_publish(
    state: &AppState,
    publish_id: Uuid,
    env: &str,
    mode: CommitMode,
) -> Result<cdn_gateway_entity::tasks::Model, ServiceError> {
    state.settings.environment(env)?;

    let txn = state.db.begin().await?;
    let publish = publishes::get_for_update(&txn, publish_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("publish {publish_id}")))?;
    if publish.env != env {
        return Err(ServiceError::NotFound(format!(
            "publish {publish_id} in environment {env:?}"
        )));
    }
    if publish.state.parse::<PublishState>()? != PublishState::Pending {
        return Err(ServiceError::Validation(format!(
            "publish {} in unexpected state, '{}'",
            publish.id, publish.state
        )));
    }

    publishes::set_state(&txn, publish_id, PublishState::Committing).await?;

    let msg = QueueMessage::new(
        "commit",
        DEFAULT_QUEUE,
        serde_json::to_value(CommitArgs {
            publish_id,
            env: env.to_string(),
            from_date: from_date_now(),
        })?,
    );
    let task = tasks::create_commit(
        &txn,
        msg.id,
        publish_id,
        mode,
        Some(default_deadline(state)),
    )
    .await?;
    state.broker.enqueue_in(&txn, msg, None).await?;
    txn.commit().await?;

    Ok(task)
}

/// Create a cache-flush task for a set of paths and enqueue its message.
pub async fn enqueue_cdn_flush(
    state: &AppState,
    env: &str,
    paths: &[String],
    deadline: Option<NaiveDateTime>,
) -> Result<cdn_gateway_entity::tasks::Model, ServiceError> {
    state.settings.environment(env)?;

    let msg = QueueMessage::new(
        "flush_cdn_cache",
        DEFAULT_QUEUE,
        serde_json::to_value(FlushArgs {
            paths: paths.to_vec(),
            env: env.to_string(),
        })?,
    );

    let txn = state.db.begin().await?;
    let task = tasks::create(
        &txn,
        msg.id,
        Some(deadline.unwrap_or_else(|| default_deadline(state))),
    )
    .await?;
    state.broker.enqueue_in(&txn, msg, None).await?;
    txn.commit().await?;
    Ok(task)
}

/// Create a deploy-config task and enqueue its message.
pub async fn enqueue_deploy_config(
    state: &AppState,
    env: &str,
    config: serde_json::Value,
) -> Result<cdn_gateway_entity::tasks::Model, ServiceError> {
    state.settings.environment(env)?;

    let msg = QueueMessage::new(
        "deploy_config",
        DEFAULT_QUEUE,
        serde_json::to_value(DeployConfigArgs {
            config,
            env: env.to_string(),
            from_date: from_date_now(),
        })?,
    );

    let txn = state.db.begin().await?;
    let task = tasks::create(&txn, msg.id, Some(default_deadline(state))).await?;
    state.broker.enqueue_in(&txn, msg, None).await?;
    txn.commit().await?;
    Ok(task)
}

pub async fn get_task(
    state: &AppState,
    task_id: Uuid,
) -> Result<cdn_gateway_entity::tasks::Model, ServiceError> {
    tasks::get(state.db.as_ref(), task_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("task {task_id}")))
}
