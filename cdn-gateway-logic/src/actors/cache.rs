//! Cache flusher: expands paths into CDN URLs and ARLs and submits them to
//! the purge API, under a cooperative task deadline.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use sea_orm::TransactionTrait;
use serde::{Deserialize, Serialize};

use crate::{
    error::ServiceError,
    external::purge::PurgeClient,
    metrics,
    queue::{message::QueueMessage, registry::Actor},
    repository::tasks,
    schemas::{now_naive, TaskState},
    settings::{Environment, Settings},
    state::AppState,
};

lazy_static! {
    static ref OSTREE_REF_RE: Regex =
        Regex::new(r".*/ostree/repo/refs/heads/.*/(base|standard)$").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushArgs {
    pub paths: Vec<String>,
    pub env: String,
}

/// Cache TTL for a path. This must match the behavior configured at the CDN
/// edge; it was originally sourced from the edge cache-purge tooling.
pub fn arl_ttl(path: &str) -> &'static str {
    if path.ends_with("/repodata/repomd.xml") || path.ends_with('/') {
        "4h"
    } else if path.ends_with("/PULP_MANIFEST")
        || path.ends_with("/listing")
        || path.contains("/repodata/")
        || OSTREE_REF_RE.is_match(path)
    {
        "10m"
    } else {
        "30d"
    }
}

pub struct Flusher<'a> {
    paths: Vec<String>,
    env: &'a Environment,
}

impl<'a> Flusher<'a> {
    pub fn new(paths: &[String], settings: &'a Settings, env: &str) -> Result<Self, ServiceError> {
        let env = settings.environment(env)?;
        Ok(Self {
            paths: paths
                .iter()
                .map(|p| p.trim_start_matches('/').to_string())
                .collect(),
            env,
        })
    }

    /// One URL per flush base and one ARL per template, for every path.
    pub fn urls_for_flush(&self) -> Vec<String> {
        let mut out = Vec::new();

        for cdn_base_url in &self.env.cache_flush_urls {
            for path in &self.paths {
                out.push(format!("{}/{}", cdn_base_url.trim_end_matches('/'), path));
            }
        }

        for arl_template in &self.env.cache_flush_arl_templates {
            for path in &self.paths {
                out.push(
                    arl_template
                        .replace("{path}", path)
                        .replace("{ttl}", arl_ttl(path)),
                );
            }
        }

        out
    }

    pub async fn run(&self, purge: &dyn PurgeClient) -> Result<(), ServiceError> {
        let urls = self.urls_for_flush();

        if !self.env.fastpurge_enabled || urls.is_empty() {
            tracing::info!("fastpurge is not enabled for {}", self.env.name);
        } else {
            for url in &urls {
                tracing::info!(url = %url, "fastpurge: flushing");
            }
            purge.purge_by_urls(self.env, &urls).await?;
            metrics::CACHE_FLUSH_URLS.inc_by(urls.len() as u64);
        }

        tracing::info!(
            "{} flush of {} URL(s) ({}, ...)",
            if self.env.fastpurge_enabled {
                "Completed"
            } else {
                "Skipped"
            },
            urls.len(),
            urls.first().map(String::as_str).unwrap_or("<empty>"),
        );
        Ok(())
    }
}

pub struct FlushCdnCacheActor;

#[async_trait]
impl Actor for FlushCdnCacheActor {
    fn name(&self) -> &'static str {
        "flush_cdn_cache"
    }

    async fn invoke(&self, state: Arc<AppState>, msg: &QueueMessage) -> Result<(), ServiceError> {
        let args: FlushArgs = serde_json::from_value(msg.body.args.clone())?;

        // Mark the task in progress so clients know we're working on it.
        // The row lock is dropped by the commit, so the task is reloaded
        // before use.
        {
            let txn = state.db.begin().await?;
            let task = tasks::get_for_update(&txn, msg.id).await?;
            if let Some(task) = task {
                if task.state.parse::<TaskState>()? == TaskState::NotStarted {
                    tasks::set_state(&txn, task.id, TaskState::InProgress).await?;
                }
            }
            txn.commit().await?;
        }

        let txn = state.db.begin().await?;
        let task = tasks::get_for_update(&txn, msg.id).await?;
        let Some(task) = task else {
            tracing::error!("Task in unexpected state <absent>");
            return Ok(());
        };
        if task.state.parse::<TaskState>()? != TaskState::InProgress {
            tracing::error!("Task in unexpected state {}", task.state);
            return Ok(());
        }

        if let Some(deadline) = task.deadline {
            if deadline < now_naive() {
                tracing::error!("Task exceeded deadline of {deadline}");
                tasks::set_state(&txn, task.id, TaskState::Failed).await?;
                txn.commit().await?;
                return Ok(());
            }
        }

        let flusher = Flusher::new(&args.paths, &state.settings, &args.env)?;
        flusher.run(state.purge.as_ref()).await?;

        tasks::set_state(&txn, task.id, TaskState::Complete).await?;
        txn.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_table_matches_edge_configuration() {
        assert_eq!(arl_ttl("path/one/repodata/repomd.xml"), "4h");
        assert_eq!(arl_ttl("some/dir/"), "4h");
        assert_eq!(arl_ttl("path/two/listing"), "10m");
        assert_eq!(arl_ttl("x/PULP_MANIFEST"), "10m");
        assert_eq!(arl_ttl("a/repodata/other.xml"), "10m");
        assert_eq!(arl_ttl("x/ostree/repo/refs/heads/fedora/base"), "10m");
        assert_eq!(arl_ttl("x/ostree/repo/refs/heads/a/b/standard"), "10m");
        assert_eq!(arl_ttl("x/ostree/repo/refs/heads/a/other"), "30d");
        assert_eq!(arl_ttl("third/path"), "30d");
    }

    #[test]
    fn urls_cover_bases_and_templates() {
        let mut settings = Settings::default();
        settings.environments.push(Environment {
            name: "test".to_string(),
            table: "test-table".to_string(),
            cache_flush_urls: vec!["https://cdn.example.com/root".to_string()],
            cache_flush_arl_templates: vec![
                "S/=/123/45/{ttl}/cdn.example.com/{path}".to_string(),
                "S/=/678/90/{ttl}/other.example.com/{path}".to_string(),
            ],
            ..Default::default()
        });

        let paths = vec![
            "/path/one/repodata/repomd.xml".to_string(),
            "path/two/listing".to_string(),
            "third/path".to_string(),
        ];
        let flusher = Flusher::new(&paths, &settings, "test").unwrap();
        let urls = flusher.urls_for_flush();

        // 1 base x 3 paths + 2 templates x 3 paths.
        assert_eq!(urls.len(), 9);
        assert!(urls.contains(&"https://cdn.example.com/root/third/path".to_string()));
        assert!(urls.contains(
            &"S/=/123/45/4h/cdn.example.com/path/one/repodata/repomd.xml".to_string()
        ));
        assert!(urls.contains(&"S/=/123/45/10m/cdn.example.com/path/two/listing".to_string()));
        assert!(urls.contains(&"S/=/678/90/30d/other.example.com/third/path".to_string()));
    }

    #[test]
    fn leading_slash_is_optional() {
        let mut settings = Settings::default();
        settings.environments.push(Environment {
            name: "test".to_string(),
            table: "t".to_string(),
            cache_flush_urls: vec!["https://cdn.example.com".to_string()],
            ..Default::default()
        });
        let flusher = Flusher::new(
            &["/a/b".to_string(), "a/c".to_string()],
            &settings,
            "test",
        )
        .unwrap();
        assert_eq!(
            flusher.urls_for_flush(),
            vec![
                "https://cdn.example.com/a/b".to_string(),
                "https://cdn.example.com/a/c".to_string(),
            ]
        );
    }
}
