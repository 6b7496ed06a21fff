//! Edge-cache purge API client.

use async_trait::async_trait;
use serde::Serialize;

use crate::{error::ServiceError, settings::Environment};

#[async_trait]
pub trait PurgeClient: Send + Sync {
    /// Submit URLs/ARLs for invalidation. No partial-failure semantics are
    /// surfaced beyond the response log.
    async fn purge_by_urls(&self, env: &Environment, urls: &[String]) -> Result<(), ServiceError>;
}

#[derive(Serialize)]
struct PurgeRequest<'a> {
    objects: &'a [String],
}

/// Fast-purge style HTTP client: one POST per call with the environment's
/// credentials, one response line logged per call.
pub struct FastPurgeApi {
    http: reqwest::Client,
}

impl FastPurgeApi {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(env: &Environment) -> Result<String, ServiceError> {
        let host = env.fastpurge_host.as_deref().ok_or_else(|| {
            ServiceError::Validation(format!("fastpurge_host not set for env {:?}", env.name))
        })?;
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{host}")
        };
        Ok(format!(
            "{base}/ccu/v3/delete/url/{network}",
            network = env.fastpurge_network
        ))
    }
}

impl Default for FastPurgeApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PurgeClient for FastPurgeApi {
    async fn purge_by_urls(&self, env: &Environment, urls: &[String]) -> Result<(), ServiceError> {
        let url = Self::endpoint(env)?;

        let mut request = self.http.post(&url).json(&PurgeRequest { objects: urls });
        if let Some(token) = &env.fastpurge_access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ServiceError::External(err.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::info!(%status, response = %body, "fastpurge: response");

        if !status.is_success() {
            return Err(ServiceError::External(format!(
                "purge request failed with status {status}"
            )));
        }
        Ok(())
    }
}
