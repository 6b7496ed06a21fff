//! Commit worker: streams a publish's items into the CDN metadata table,
//! entry points last, rolling back on partial failure.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use cdn_gateway_entity::items;
use chrono::Duration as ChronoDuration;
use sea_orm::TransactionTrait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    actors::{autoindex::AutoindexArgs, cache::FlushArgs},
    error::ServiceError,
    external::batch::{chunked, write_batch_with_retries, BatchKind, ExternalItem},
    metrics,
    progress::ProgressLogger,
    queue::{message::QueueMessage, registry::Actor},
    repository::{self, published_paths, publishes, tasks},
    schemas::{basename, now_naive, PublishState, TaskState, ABSENT_OBJECT_KEY},
    state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitArgs {
    pub publish_id: Uuid,
    pub env: String,
    /// UTC instant stamped into every written item.
    pub from_date: String,
}

pub struct CommitActor;

#[async_trait]
impl Actor for CommitActor {
    fn name(&self) -> &'static str {
        "commit"
    }

    async fn invoke(&self, state: Arc<AppState>, msg: &QueueMessage) -> Result<(), ServiceError> {
        let args: CommitArgs = serde_json::from_value(msg.body.args.clone())?;
        let db = state.db.as_ref();

        // The commit task shares its id with the message driving it.
        let Some(task) = tasks::get(db, msg.id).await? else {
            tracing::warn!("Task {} not found", msg.id);
            return Ok(());
        };
        let task_state: TaskState = task.state.parse()?;
        if !matches!(task_state, TaskState::NotStarted | TaskState::InProgress) {
            tracing::warn!("Task {} in unexpected state, '{}'", task.id, task.state);
            return Ok(());
        }

        if let Some(commit_task) = tasks::get_commit_task(db, msg.id).await? {
            // phase1 and phase2 currently run the same protocol.
            tracing::info!(
                "Starting commit of {} (mode: {})",
                args.publish_id,
                commit_task.commit_mode
            );
        }

        let env = state.settings.environment(&args.env)?.clone();

        let Some(publish) = publishes::get(db, args.publish_id).await? else {
            tracing::warn!("Publish {} not found", args.publish_id);
            tasks::set_state(db, task.id, TaskState::Failed).await?;
            return Ok(());
        };
        let publish_state: PublishState = publish.state.parse()?;
        if publish_state != PublishState::Committing {
            tracing::warn!(
                "Publish {} in unexpected state, '{}'",
                publish.id,
                publish.state
            );
            tasks::set_state(db, task.id, TaskState::Failed).await?;
            return Ok(());
        }

        tasks::set_state(db, task.id, TaskState::InProgress).await?;

        let items = repository::items::load_all(
            db,
            publish.id,
            state.settings.batch_size.max(1) as u64,
        )
        .await?;

        let outcome = if items.is_empty() {
            Ok(())
        } else {
            write_publish(&state, &env, &items, &args).await
        };

        match outcome {
            Ok(()) => {
                let txn = state.db.begin().await?;
                publishes::set_state(&txn, publish.id, PublishState::Committed).await?;
                tasks::set_state(&txn, task.id, TaskState::Complete).await?;

                let committed: BTreeSet<String> = items
                    .iter()
                    .filter(|item| item.object_key.as_deref() != Some(ABSENT_OBJECT_KEY))
                    .map(|item| item.web_uri.clone())
                    .collect();
                published_paths::upsert_many(&txn, &args.env, committed, now_naive()).await?;

                enqueue_followups(&state, &txn, &args, &items).await?;
                txn.commit().await?;

                tracing::info!("Publish {} committed", publish.id);
            }
            Err(err) => {
                tracing::error!("Task {} encountered an error: {err}", task.id);
                publishes::set_state(db, publish.id, PublishState::Failed).await?;
                tasks::set_state(db, task.id, TaskState::Failed).await?;
            }
        }

        Ok(())
    }
}

/// Write all items for a publish. Regular items go first; entry-point items
/// are written only once every regular item is in place, so consumers never
/// observe a partially updated repository. On any failure, everything
/// already written is deleted again (best effort) before returning.
async fn write_publish(
    state: &AppState,
    env: &crate::settings::Environment,
    items: &[items::Model],
    args: &CommitArgs,
) -> Result<(), ServiceError> {
    let resolved = resolve_links(items)?;
    let (regular, entry_points) = partition(&resolved, &state.settings.entry_point_files);

    let progress = ProgressLogger::new("Writing items", resolved.len());
    let mut written: Vec<Vec<ExternalItem>> = Vec::new();

    let phases = [
        (regular, "regular"),
        (entry_points, "entry point"),
    ];

    for (phase_items, phase_name) in phases {
        if let Err(err) = write_phase(state, env, &phase_items, args, &progress, &mut written).await
        {
            tracing::error!(
                "Failed writing {} item(s) ({phase_name} phase), rolling back",
                phase_items.len()
            );
            rollback(state, env, &written).await;
            return Err(err);
        }
    }

    Ok(())
}

async fn write_phase(
    state: &AppState,
    env: &crate::settings::Environment,
    phase_items: &[ResolvedItem],
    args: &CommitArgs,
    progress: &ProgressLogger,
    written: &mut Vec<Vec<ExternalItem>>,
) -> Result<(), ServiceError> {
    // Homogeneous batches: puts for content, deletes for tombstones.
    for kind in [BatchKind::Put, BatchKind::Delete] {
        let external: Vec<ExternalItem> = phase_items
            .iter()
            .filter(|item| match kind {
                BatchKind::Put => !item.tombstone,
                BatchKind::Delete => item.tombstone,
            })
            .map(|item| item.to_external(&args.from_date))
            .collect();

        for batch in chunked(&external, state.settings.batch_size) {
            write_batch_with_retries(
                state.metadata.as_ref(),
                env,
                batch,
                kind,
                &state.settings,
                Some(progress),
            )
            .await?;
            metrics::ITEMS_WRITTEN.inc_by(batch.len() as u64);
            written.push(batch.to_vec());
        }
    }
    Ok(())
}

/// Best-effort rollback: delete every batch already written. A failing
/// delete is logged and skipped; the state transition proceeds regardless.
async fn rollback(
    state: &AppState,
    env: &crate::settings::Environment,
    written: &[Vec<ExternalItem>],
) {
    for batch in written {
        if let Err(err) = write_batch_with_retries(
            state.metadata.as_ref(),
            env,
            batch,
            BatchKind::Delete,
            &state.settings,
            None,
        )
        .await
        {
            tracing::error!(
                "Rollback failed to delete {} item(s): {err}; manual cleanup may be required",
                batch.len()
            );
        }
    }
}

async fn enqueue_followups<C: sea_orm::ConnectionTrait>(
    state: &AppState,
    txn: &C,
    args: &CommitArgs,
    items: &[items::Model],
) -> Result<(), ServiceError> {
    // Flush the edge cache for every committed path once the table writes
    // are visible.
    let flush_paths: BTreeSet<String> = items.iter().map(|item| item.web_uri.clone()).collect();
    if !flush_paths.is_empty() {
        let flush_msg = QueueMessage::new(
            "flush_cdn_cache",
            crate::queue::message::DEFAULT_QUEUE,
            serde_json::to_value(FlushArgs {
                paths: flush_paths.into_iter().collect(),
                env: args.env.clone(),
            })?,
        );
        let deadline = now_naive() + ChronoDuration::hours(state.settings.task_deadline);
        tasks::create(txn, flush_msg.id, Some(deadline)).await?;
        state.broker.enqueue_in(txn, flush_msg, None).await?;
    }

    // Repository entry points observed in the publish get their indexes
    // regenerated.
    let base_uris = repo_base_uris(items);
    if !base_uris.is_empty() && !state.settings.autoindex_filename.is_empty() {
        let autoindex_msg = QueueMessage::new(
            "autoindex_partial",
            crate::queue::message::DEFAULT_QUEUE,
            serde_json::to_value(AutoindexArgs {
                publish_id: args.publish_id,
                env: args.env.clone(),
                base_uris,
            })?,
        );
        state.broker.enqueue_in(txn, autoindex_msg, None).await?;
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedItem {
    pub web_uri: String,
    pub object_key: String,
    pub content_type: Option<String>,
    pub tombstone: bool,
}

impl ResolvedItem {
    fn to_external(&self, from_date: &str) -> ExternalItem {
        ExternalItem {
            web_uri: self.web_uri.clone(),
            from_date: from_date.to_string(),
            object_key: (!self.tombstone).then(|| self.object_key.clone()),
            content_type: self.content_type.clone(),
        }
    }
}

/// Resolve `link_to` items against their targets within the same publish.
/// A link pointing at a missing item, or at another link, fails the commit
/// before any external write happens.
pub(crate) fn resolve_links(items: &[items::Model]) -> Result<Vec<ResolvedItem>, ServiceError> {
    let by_uri: HashMap<&str, &items::Model> = items
        .iter()
        .map(|item| (item.web_uri.as_str(), item))
        .collect();

    items
        .iter()
        .map(|item| {
            let (object_key, content_type) = match &item.link_to {
                Some(link) => {
                    let target = by_uri.get(link.as_str()).ok_or_else(|| {
                        ServiceError::Validation(format!(
                            "{}: link target {link:?} is not part of the publish",
                            item.web_uri
                        ))
                    })?;
                    if target.link_to.is_some() {
                        return Err(ServiceError::Validation(format!(
                            "{}: link target {link:?} is itself a link",
                            item.web_uri
                        )));
                    }
                    (target.object_key.clone(), target.content_type.clone())
                }
                None => (item.object_key.clone(), item.content_type.clone()),
            };
            let object_key = object_key.ok_or_else(|| {
                ServiceError::Validation(format!("{}: item has no object key", item.web_uri))
            })?;
            Ok(ResolvedItem {
                web_uri: item.web_uri.clone(),
                tombstone: object_key == ABSENT_OBJECT_KEY,
                object_key,
                content_type,
            })
        })
        .collect()
}

/// Split into (regular, entry-point) items. Entry points are files whose
/// basename marks a repository root and must be written last.
pub(crate) fn partition(
    items: &[ResolvedItem],
    entry_point_files: &[String],
) -> (Vec<ResolvedItem>, Vec<ResolvedItem>) {
    let mut regular = Vec::new();
    let mut entry_points = Vec::new();
    for item in items {
        if entry_point_files.iter().any(|f| f == basename(&item.web_uri)) {
            entry_points.push(item.clone());
        } else {
            regular.push(item.clone());
        }
    }
    (regular, entry_points)
}

/// Base URIs of repositories whose entry points appear (non-tombstoned) in
/// the publish: yum repos via `repodata/repomd.xml`, Pulp file repos via
/// `PULP_MANIFEST`.
pub(crate) fn repo_base_uris(items: &[items::Model]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    for item in items {
        if item.object_key.as_deref() == Some(ABSENT_OBJECT_KEY) {
            continue;
        }
        for suffix in ["/repodata/repomd.xml", "/PULP_MANIFEST"] {
            if let Some(base) = item.web_uri.strip_suffix(suffix) {
                if !base.is_empty() {
                    seen.insert(base.to_string());
                }
            }
        }
    }
    seen.into_iter().collect()
}
