//! Autoindex follow-up enqueued after a successful commit for every
//! repository entry point observed in the publish.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    queue::{message::QueueMessage, registry::Actor},
    state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoindexArgs {
    pub publish_id: Uuid,
    pub env: String,
    pub base_uris: Vec<String>,
}

pub struct AutoindexPartialActor;

#[async_trait]
impl Actor for AutoindexPartialActor {
    fn name(&self) -> &'static str {
        "autoindex_partial"
    }

    async fn invoke(&self, state: Arc<AppState>, msg: &QueueMessage) -> Result<(), ServiceError> {
        let args: AutoindexArgs = serde_json::from_value(msg.body.args.clone())?;

        if state.settings.autoindex_filename.is_empty() {
            tracing::debug!("autoindex is disabled");
            return Ok(());
        }

        tracing::info!(
            "Found {} path(s) eligible for autoindex",
            args.base_uris.len()
        );
        state
            .autoindex
            .build_partial_indexes(&args.env, args.publish_id, &args.base_uris)
            .await
    }
}
