//! Deploy-config worker: writes a validated CDN config blob to the external
//! table, then works out which cached paths the change invalidates.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    actors::cache::Flusher,
    aliases::{self, Alias},
    error::ServiceError,
    queue::{message::QueueMessage, registry::Actor},
    repository::{published_paths, tasks},
    schemas::TaskState,
    state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfigArgs {
    pub config: Value,
    pub env: String,
    pub from_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteDeployArgs {
    pub task_id: Uuid,
    #[serde(default)]
    pub env: Option<String>,
    #[serde(default)]
    pub flush_paths: Option<Vec<String>>,
}

/// The alias-bearing parts of a CDN config blob. Schema enforcement happens
/// at the HTTP boundary; this only picks out what cache flushing needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CdnConfig {
    #[serde(default)]
    pub listing: HashMap<String, Value>,
    #[serde(default)]
    pub origin_alias: Vec<Alias>,
    #[serde(default)]
    pub releasever_alias: Vec<Alias>,
    #[serde(default)]
    pub rhui_alias: Vec<Alias>,
}

impl CdnConfig {
    pub fn from_value(value: &Value) -> Result<Self, ServiceError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// The aliases relevant to cache flushing.
    pub fn flush_aliases(&self) -> Vec<Alias> {
        self.releasever_alias
            .iter()
            .chain(self.rhui_alias.iter())
            .cloned()
            .collect()
    }
}

pub struct DeployConfigActor;

#[async_trait]
impl Actor for DeployConfigActor {
    fn name(&self) -> &'static str {
        "deploy_config"
    }

    async fn invoke(&self, state: Arc<AppState>, msg: &QueueMessage) -> Result<(), ServiceError> {
        let args: DeployConfigArgs = serde_json::from_value(msg.body.args.clone())?;
        let db = state.db.as_ref();
        let env = state.settings.environment(&args.env)?.clone();

        let Some(task) = tasks::get(db, msg.id).await? else {
            tracing::warn!("Task {} not found", msg.id);
            return Ok(());
        };
        let task_state: TaskState = task.state.parse()?;
        if !matches!(task_state, TaskState::NotStarted | TaskState::InProgress) {
            tracing::warn!("Task {} in unexpected state, '{}'", task.id, task.state);
            return Ok(());
        }

        // The alias set published before this deployment decides which paths
        // were being rewritten until now.
        let previous = match state.metadata.load_config(&env).await? {
            Some(value) => CdnConfig::from_value(&value)?,
            None => CdnConfig::default(),
        };
        let new_config = CdnConfig::from_value(&args.config)?;

        tasks::set_state(db, task.id, TaskState::InProgress).await?;

        tracing::info!("Task {} writing config from {}", task.id, args.from_date);
        if let Err(err) = state
            .metadata
            .write_config(&env, &args.config, &args.from_date)
            .await
        {
            tracing::error!("Task {} encountered an error: {err}", task.id);
            tasks::set_state(db, task.id, TaskState::Failed).await?;
            return Ok(());
        }

        let mut flush_paths =
            flush_paths_for_update(&state, &args.env, &previous, &new_config).await?;

        if state.settings.cdn_listing_flush {
            for path in listing_paths_for_flush(&new_config) {
                flush_paths.insert(path);
            }
        }

        // Give the config write time to propagate before flushing.
        let delay = Duration::from_secs(state.settings.config_cache_ttl * 60);
        let completion = QueueMessage::new(
            "complete_deploy_config_task",
            crate::queue::message::DEFAULT_QUEUE,
            serde_json::to_value(CompleteDeployArgs {
                task_id: task.id,
                env: Some(args.env.clone()),
                flush_paths: Some(flush_paths.into_iter().collect()),
            })?,
        );
        let sent = state.broker.enqueue(completion, Some(delay)).await?;
        tracing::debug!(
            "Sent task {} for completion via message {}",
            task.id,
            sent.id
        );

        Ok(())
    }
}

/// Paths whose cache must be flushed because an alias changed destination.
///
/// For every updated `src`, paths previously published under `src/` are
/// flushed, and paths published only under the new `dest/` are flushed at
/// their `src`-side spelling. Paths matching the alias' previous exclusion
/// patterns were never rewritten, so they are skipped.
async fn flush_paths_for_update(
    state: &AppState,
    env: &str,
    previous: &CdnConfig,
    new_config: &CdnConfig,
) -> Result<BTreeSet<String>, ServiceError> {
    let db = state.db.as_ref();
    let previous_aliases = previous.flush_aliases();
    let new_aliases = new_config.flush_aliases();

    let prev_dest: HashMap<&str, &str> = previous_aliases
        .iter()
        .map(|a| (a.src.as_str(), a.dest.as_str()))
        .collect();
    let prev_exclusions: HashMap<&str, &[String]> = previous_aliases
        .iter()
        .map(|a| (a.src.as_str(), a.exclude_paths.as_slice()))
        .collect();
    let new_dest: HashMap<&str, &str> = new_aliases
        .iter()
        .map(|a| (a.src.as_str(), a.dest.as_str()))
        .collect();

    let mut updated_prefixes: BTreeSet<String> = new_aliases
        .iter()
        .filter(|alias| prev_dest.get(alias.src.as_str()).copied() != Some(alias.dest.as_str()))
        .map(|alias| alias.src.clone())
        .collect();

    // Updated prefixes may themselves sit behind other (unchanged) aliases;
    // expand through those without re-applying any updated one.
    let aliases_to_expand: Vec<Alias> = previous_aliases
        .iter()
        .filter(|alias| !updated_prefixes.contains(&alias.src))
        .cloned()
        .collect();
    for resolved in aliases::resolve_all(updated_prefixes.clone(), &aliases_to_expand) {
        updated_prefixes.insert(resolved);
    }

    let mut flush_paths = BTreeSet::new();

    for src in &updated_prefixes {
        let exclusions = compile_exclusions(prev_exclusions.get(src.as_str()).copied());

        for published in published_paths::under_prefix(db, env, src).await? {
            if is_excluded(&published.web_uri, &exclusions) {
                continue;
            }
            tracing::info!(
                "Updated alias {} will flush cache for {}",
                src,
                published.web_uri
            );
            flush_paths.insert(published.web_uri);
        }

        // Content only ever published on the destination side of the alias
        // (e.g. kickstart trees) is flushed at its src spelling. The rewrite
        // is unbounded: every occurrence of the dest prefix is replaced.
        if let Some(dest) = new_dest.get(src.as_str()) {
            for published in published_paths::under_prefix(db, env, dest).await? {
                if is_excluded(&published.web_uri, &exclusions) {
                    continue;
                }
                let resolved_uri = published.web_uri.replace(dest, src);
                tracing::info!("Updated alias {} will flush cache for {}", src, resolved_uri);
                flush_paths.insert(resolved_uri);
            }
        }
    }

    Ok(flush_paths)
}

fn compile_exclusions(patterns: Option<&[String]>) -> Vec<Regex> {
    patterns
        .unwrap_or_default()
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(err) => {
                tracing::warn!("Ignoring unparseable exclusion {pattern:?}: {err}");
                None
            }
        })
        .collect()
}

fn is_excluded(web_uri: &str, exclusions: &[Regex]) -> bool {
    exclusions.iter().any(|re| re.is_match(web_uri))
}

/// Listing entries whose `/listing` responses may have changed.
fn listing_paths_for_flush(config: &CdnConfig) -> BTreeSet<String> {
    config
        .listing
        .keys()
        .map(|path| {
            let lpath = format!("{path}/listing");
            tracing::info!("Listing {} will flush cache for {}", path, lpath);
            lpath
        })
        .collect()
}

pub struct CompleteDeployConfigActor;

#[async_trait]
impl Actor for CompleteDeployConfigActor {
    fn name(&self) -> &'static str {
        "complete_deploy_config_task"
    }

    async fn invoke(&self, state: Arc<AppState>, msg: &QueueMessage) -> Result<(), ServiceError> {
        let args: CompleteDeployArgs = serde_json::from_value(msg.body.args.clone())?;
        let db = state.db.as_ref();

        let Some(task) = tasks::get(db, args.task_id).await? else {
            tracing::warn!("Task {} not found", args.task_id);
            return Ok(());
        };
        if task.state.parse::<TaskState>()? != TaskState::InProgress {
            tracing::warn!("Task {} in unexpected state, '{}'", task.id, task.state);
            return Ok(());
        }

        if let (Some(env), Some(flush_paths)) = (&args.env, &args.flush_paths) {
            if !flush_paths.is_empty() {
                let flusher = Flusher::new(flush_paths, &state.settings, env)?;
                flusher.run(state.purge.as_ref()).await?;
            }
        }

        tasks::set_state(db, task.id, TaskState::Complete).await?;
        tracing::info!("Task {} completed successfully", task.id);
        Ok(())
    }
}
