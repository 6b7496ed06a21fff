use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;

use crate::{
    error::ServiceError,
    progress::ProgressLogger,
    settings::{Environment, Settings},
};

/// One row destined for the CDN metadata table. Keyed by
/// `(web_uri, from_date)`; delete requests carry only the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalItem {
    pub web_uri: String,
    pub from_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Put,
    Delete,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Put => "put",
            BatchKind::Delete => "delete",
        }
    }
}

/// Write access to the external CDN metadata table.
///
/// `write_batch` submits at most `batch_size` items and returns the subset
/// the service did not process; callers retry that subset.
#[async_trait]
pub trait MetadataTable: Send + Sync {
    async fn write_batch(
        &self,
        env: &Environment,
        items: &[ExternalItem],
        kind: BatchKind,
    ) -> Result<Vec<ExternalItem>, ServiceError>;

    async fn write_config(
        &self,
        env: &Environment,
        config: &Value,
        from_date: &str,
    ) -> Result<(), ServiceError>;

    /// The most recently deployed config, if any.
    async fn load_config(&self, env: &Environment) -> Result<Option<Value>, ServiceError>;
}

/// Split items into batches acceptable to the external API.
pub fn chunked(items: &[ExternalItem], batch_size: usize) -> impl Iterator<Item = &[ExternalItem]> {
    items.chunks(batch_size.max(1))
}

/// Write one batch, retrying unprocessed subsets and transient failures
/// with exponential backoff until `max_tries` is exhausted.
pub async fn write_batch_with_retries(
    table: &dyn MetadataTable,
    env: &Environment,
    batch: &[ExternalItem],
    kind: BatchKind,
    settings: &Settings,
    progress: Option<&ProgressLogger>,
) -> Result<(), ServiceError> {
    let mut remaining: Vec<ExternalItem> = batch.to_vec();
    let mut delay = Duration::from_millis(100);

    for attempt in 1..=settings.max_tries.max(1) {
        match table.write_batch(env, &remaining, kind).await {
            Ok(unprocessed) if unprocessed.is_empty() => {
                if let Some(progress) = progress {
                    progress.update(batch.len());
                }
                return Ok(());
            }
            Ok(unprocessed) => {
                tracing::warn!(
                    attempt,
                    unprocessed = unprocessed.len(),
                    kind = kind.as_str(),
                    table = %env.table,
                    "batch partially processed, retrying remainder"
                );
                remaining = unprocessed;
            }
            Err(err) => {
                tracing::warn!(
                    attempt,
                    error = %err,
                    kind = kind.as_str(),
                    table = %env.table,
                    "batch write failed, retrying"
                );
            }
        }

        if attempt < settings.max_tries {
            sleep(delay).await;
            delay = delay.saturating_mul(2).min(Duration::from_secs(5));
        }
    }

    Err(ServiceError::External(format!(
        "failed to {} {} item(s) on table {:?} after {} attempt(s)",
        kind.as_str(),
        batch.len(),
        env.table,
        settings.max_tries,
    )))
}
