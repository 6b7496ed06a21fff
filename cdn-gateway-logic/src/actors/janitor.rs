//! Scheduled cleanup: fill missing timestamps, fail abandoned work, delete
//! terminal objects past the retention horizon. The service keeps no
//! persistent state beyond this horizon.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use sea_orm::{ConnectionTrait, TransactionTrait};

use crate::{
    error::ServiceError,
    queue::{message::QueueMessage, registry::Actor},
    repository::{publishes, tasks},
    schemas::{now_naive, PublishState, TaskState},
    settings::Settings,
    state::AppState,
};

pub struct Janitor<'a> {
    settings: &'a Settings,
    now: NaiveDateTime,
}

impl<'a> Janitor<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            now: now_naive(),
        }
    }

    /// All three sweeps in one transaction.
    pub async fn run<C: ConnectionTrait>(&self, db: &C) -> Result<(), ServiceError> {
        self.fix_timestamps(db).await?;
        self.fix_abandoned(db).await?;
        self.clean_old_data(db).await?;
        tracing::info!("Scheduled cleanup has completed");
        Ok(())
    }

    /// Timestamps are nullable; anything missing one is treated as updated
    /// right now.
    async fn fix_timestamps<C: ConnectionTrait>(&self, db: &C) -> Result<(), ServiceError> {
        for task in tasks::find_missing_updated(db).await? {
            tracing::warn!("Task {}: setting updated", task.id);
            tasks::set_updated(db, task.id, self.now).await?;
        }
        for publish in publishes::find_missing_updated(db).await? {
            tracing::warn!("Publish {}: setting updated", publish.id);
            publishes::set_updated(db, publish.id, self.now).await?;
        }
        Ok(())
    }

    /// Publishes and tasks which did not complete and have not been touched
    /// for a long time are marked failed. Covers clients that created a
    /// publish and crashed before committing, and internal errors that kept
    /// a task from running at all.
    async fn fix_abandoned<C: ConnectionTrait>(&self, db: &C) -> Result<(), ServiceError> {
        let threshold = self.now - ChronoDuration::hours(self.settings.publish_timeout);

        for task in tasks::find_abandoned(db, threshold).await? {
            tracing::warn!(
                "Task {}: marking as failed (last updated: {:?})",
                task.id,
                task.updated
            );
            tasks::set_state(db, task.id, TaskState::Failed).await?;
        }
        for publish in publishes::find_abandoned(db, threshold).await? {
            tracing::warn!(
                "Publish {}: marking as failed (last updated: {:?})",
                publish.id,
                publish.updated
            );
            publishes::set_state(db, publish.id, PublishState::Failed).await?;
        }
        Ok(())
    }

    /// Terminal objects past the retention horizon are deleted, items
    /// cascading with their publishes.
    async fn clean_old_data<C: ConnectionTrait>(&self, db: &C) -> Result<(), ServiceError> {
        let threshold = self.now - ChronoDuration::hours(self.settings.history_timeout);

        for task in tasks::find_terminal_before(db, threshold).await? {
            tracing::info!(
                "Task {}: cleaning old data (last updated: {:?})",
                task.id,
                task.updated
            );
            tasks::delete(db, task.id).await?;
        }
        for publish in publishes::find_terminal_before(db, threshold).await? {
            tracing::info!(
                "Publish {}: cleaning old data (last updated: {:?})",
                publish.id,
                publish.updated
            );
            publishes::delete(db, publish.id).await?;
        }
        Ok(())
    }
}

pub struct CleanupActor;

#[async_trait]
impl Actor for CleanupActor {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    async fn invoke(&self, state: Arc<AppState>, _msg: &QueueMessage) -> Result<(), ServiceError> {
        let janitor = Janitor::new(&state.settings);
        let txn = state.db.begin().await?;
        janitor.run(&txn).await?;
        txn.commit().await?;
        Ok(())
    }
}
