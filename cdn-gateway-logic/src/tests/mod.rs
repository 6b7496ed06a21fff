//! Database-backed tests. Each test gets its own database created from the
//! migrations, plus fake external clients recording everything they are
//! asked to do.

mod deploy;
mod purge_client;
mod queue;
mod store;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use blockscout_service_launcher::test_database::TestDbGuard;
use sea_orm::DatabaseConnection;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::ServiceError,
    external::{
        autoindex::LoggingAutoindex,
        batch::{BatchKind, ExternalItem, MetadataTable},
        purge::PurgeClient,
    },
    queue::{broker::Broker, message::QueueMessage, registry::Registry},
    repository::messages,
    schemas::basename,
    settings::{Environment, Settings},
    state::AppState,
};

pub async fn init_db(test_name: &str) -> TestDbGuard {
    TestDbGuard::new::<migration::Migrator>(test_name).await
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    // Keep external retries short in tests.
    settings.max_tries = 2;
    settings.environments.push(Environment {
        name: "test".to_string(),
        table: "test-table".to_string(),
        cache_flush_urls: vec!["https://cdn.example.com/root".to_string()],
        cache_flush_arl_templates: vec![
            "S/=/123/45/{ttl}/cdn.example.com/{path}".to_string(),
            "S/=/678/90/{ttl}/other.example.com/{path}".to_string(),
        ],
        fastpurge_enabled: true,
        fastpurge_host: Some("fastpurge.example.com".to_string()),
        ..Default::default()
    });
    settings
}

#[derive(Debug, Clone)]
pub struct RecordedBatch {
    pub kind: BatchKind,
    pub items: Vec<ExternalItem>,
}

/// Metadata-table fake. Records every batch; optionally fails put batches
/// containing a repository entry point, for rollback scenarios.
#[derive(Default)]
pub struct FakeMetadataTable {
    pub batches: Mutex<Vec<RecordedBatch>>,
    pub fail_entry_point_puts: AtomicBool,
    pub config: Mutex<Option<Value>>,
    pub written_configs: Mutex<Vec<Value>>,
}

impl FakeMetadataTable {
    pub fn recorded(&self) -> Vec<RecordedBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn set_previous_config(&self, config: Value) {
        *self.config.lock().unwrap() = Some(config);
    }
}

#[async_trait]
impl MetadataTable for FakeMetadataTable {
    async fn write_batch(
        &self,
        _env: &Environment,
        items: &[ExternalItem],
        kind: BatchKind,
    ) -> Result<Vec<ExternalItem>, ServiceError> {
        let entry_point = items.iter().any(|item| {
            ["repomd.xml", "repomd.xml.asc", "PULP_MANIFEST"].contains(&basename(&item.web_uri))
        });
        if kind == BatchKind::Put && entry_point && self.fail_entry_point_puts.load(Ordering::SeqCst)
        {
            return Err(ServiceError::External("simulated write failure".to_string()));
        }

        self.batches.lock().unwrap().push(RecordedBatch {
            kind,
            items: items.to_vec(),
        });
        Ok(vec![])
    }

    async fn write_config(
        &self,
        _env: &Environment,
        config: &Value,
        _from_date: &str,
    ) -> Result<(), ServiceError> {
        self.written_configs.lock().unwrap().push(config.clone());
        Ok(())
    }

    async fn load_config(&self, _env: &Environment) -> Result<Option<Value>, ServiceError> {
        Ok(self.config.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakePurge {
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl FakePurge {
    pub fn urls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PurgeClient for FakePurge {
    async fn purge_by_urls(&self, _env: &Environment, urls: &[String]) -> Result<(), ServiceError> {
        self.calls.lock().unwrap().push(urls.to_vec());
        Ok(())
    }
}

pub struct TestState {
    pub state: Arc<AppState>,
    pub metadata: Arc<FakeMetadataTable>,
    pub purge: Arc<FakePurge>,
}

pub fn build_state(db: Arc<DatabaseConnection>, settings: Settings) -> TestState {
    let metadata = Arc::new(FakeMetadataTable::default());
    let purge = Arc::new(FakePurge::default());
    let state = AppState::build(
        db,
        settings,
        metadata.clone(),
        purge.clone(),
        Arc::new(LoggingAutoindex),
    )
    .expect("building app state");
    TestState {
        state,
        metadata,
        purge,
    }
}

/// Build state around a hand-made registry, for tests needing custom actors.
pub fn build_state_with_registry(
    db: Arc<DatabaseConnection>,
    settings: Settings,
    registry: Registry,
) -> TestState {
    let metadata = Arc::new(FakeMetadataTable::default());
    let purge = Arc::new(FakePurge::default());
    let broker = Arc::new(Broker::new(db.clone(), Arc::new(registry)));
    let state = Arc::new(AppState {
        db,
        settings,
        broker,
        metadata: metadata.clone(),
        purge: purge.clone(),
        autoindex: Arc::new(LoggingAutoindex),
    });
    TestState {
        state,
        metadata,
        purge,
    }
}

/// Load the stored message with the given id, as an actor would receive it.
pub async fn stored_message(db: &DatabaseConnection, id: Uuid) -> QueueMessage {
    let model = messages::get(db, id)
        .await
        .expect("loading message")
        .expect("message exists");
    messages::decode(model).expect("decoding message")
}

/// Invoke a declared actor the way the worker would, bypassing the queue.
pub async fn invoke_actor(
    state: &Arc<AppState>,
    msg: &QueueMessage,
) -> Result<(), ServiceError> {
    let registered = state
        .broker
        .registry()
        .get(&msg.actor)
        .unwrap_or_else(|| panic!("actor {:?} not declared", msg.actor))
        .clone();
    registered.actor.invoke(state.clone(), msg).await
}
