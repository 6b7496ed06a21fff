//! Seam for repository index generation.
//!
//! Generating index pages requires reading and writing blob content, which
//! belongs to the upload-path service, not this worker. The commit worker
//! only records which repository roots changed and forwards them here.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ServiceError;

#[async_trait]
pub trait AutoindexService: Send + Sync {
    async fn build_partial_indexes(
        &self,
        env: &str,
        publish_id: Uuid,
        base_uris: &[String],
    ) -> Result<(), ServiceError>;
}

/// Default implementation: record the request and let the index-generation
/// service pick it up out of band.
pub struct LoggingAutoindex;

#[async_trait]
impl AutoindexService for LoggingAutoindex {
    async fn build_partial_indexes(
        &self,
        env: &str,
        publish_id: Uuid,
        base_uris: &[String],
    ) -> Result<(), ServiceError> {
        for base_uri in base_uris {
            tracing::info!(env, %publish_id, %base_uri, "repository eligible for autoindex");
        }
        Ok(())
    }
}
