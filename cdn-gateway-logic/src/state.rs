//! Process-level state, initialized once at boot and passed explicitly to
//! workers and handlers.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    actors,
    error::ServiceError,
    external::{autoindex::AutoindexService, batch::MetadataTable, purge::PurgeClient},
    queue::broker::Broker,
    settings::Settings,
};

pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub settings: Settings,
    pub broker: Arc<Broker>,
    pub metadata: Arc<dyn MetadataTable>,
    pub purge: Arc<dyn PurgeClient>,
    pub autoindex: Arc<dyn AutoindexService>,
}

impl AppState {
    /// Build the full application state, declaring all actors. Fails fast on
    /// programming errors such as a scheduled actor without a cron rule.
    pub fn build(
        db: Arc<DatabaseConnection>,
        settings: Settings,
        metadata: Arc<dyn MetadataTable>,
        purge: Arc<dyn PurgeClient>,
        autoindex: Arc<dyn AutoindexService>,
    ) -> Result<Arc<Self>, ServiceError> {
        let registry = Arc::new(actors::registry(&settings)?);
        let broker = Arc::new(Broker::new(db.clone(), registry));
        Ok(Arc::new(Self {
            db,
            settings,
            broker,
            metadata,
            purge,
            autoindex,
        }))
    }
}
