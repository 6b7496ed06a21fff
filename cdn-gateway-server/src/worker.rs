use std::sync::Arc;

use cdn_gateway_logic::{
    external::{
        autoindex::LoggingAutoindex, dynamodb::DynamoMetadataTable, purge::FastPurgeApi,
    },
    queue,
    state::AppState,
};
use sea_orm::DatabaseConnection;
use tokio::time::sleep;

use crate::Settings;

/// Run the queue worker, restarting with a delay if it ever fails. The
/// restart rebuilds the full application state against the same connection
/// pool.
pub async fn run_worker(settings: Settings, db: DatabaseConnection) -> anyhow::Result<()> {
    let db = Arc::new(db);
    let metadata = Arc::new(DynamoMetadataTable::new());
    let purge = Arc::new(FastPurgeApi::new());
    let autoindex = Arc::new(LoggingAutoindex);
    let restart_delay = settings.gateway.restart_delay;

    loop {
        let state = AppState::build(
            db.clone(),
            settings.gateway.clone(),
            metadata.clone(),
            purge.clone(),
            autoindex.clone(),
        )?;

        if let Err(err) = queue::worker::run(state).await {
            tracing::error!(error = ?err, ?restart_delay, "queue worker failed, restarting");
        }
        sleep(restart_delay).await;
    }
}
