use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Duration as ChronoDuration;
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    queue::message::QueueMessage,
    repository::{consumers, messages},
    schemas::now_naive,
    settings::Settings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Starting,
    Running,
    Closing,
    Closed,
}

/// One consumer of one queue. While running it heartbeats, claims messages
/// under its prefetch budget, and - when it is the master - evicts dead
/// consumers and reclaims their messages.
pub struct Consumer {
    queue: String,
    consumer_id: String,
    prefetch: usize,
    master: bool,
    state: ConsumerState,
    db: Arc<DatabaseConnection>,
    settings: Settings,
    last_heartbeat: Option<Instant>,
}

impl Consumer {
    pub fn new(
        db: Arc<DatabaseConnection>,
        settings: Settings,
        queue: &str,
        broker_id: Uuid,
        master: bool,
    ) -> Self {
        Self {
            consumer_id: format!("{queue}-{broker_id}"),
            queue: queue.to_string(),
            prefetch: settings.prefetch.max(1),
            master,
            state: ConsumerState::Starting,
            db,
            settings,
            last_heartbeat: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.consumer_id
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn is_master(&self) -> bool {
        self.master
    }

    /// Record ourselves in the consumers table and start running.
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        consumers::register(self.db.as_ref(), &self.consumer_id, now_naive()).await?;
        self.state = ConsumerState::Running;
        tracing::info!("{}: consumer is running", self.consumer_id);
        Ok(())
    }

    /// Periodic consumer maintenance. Refreshes our `last_alive`; the master
    /// additionally evicts timed-out consumers and reclaims messages owned
    /// by consumers that no longer exist.
    pub async fn heartbeat(&mut self) -> Result<(), ServiceError> {
        if let Some(last) = self.last_heartbeat {
            if last.elapsed() < self.settings.worker_keepalive_interval {
                return Ok(());
            }
        }

        let txn = self.db.begin().await?;
        consumers::touch(&txn, &self.consumer_id, now_naive()).await?;

        if self.master {
            let timeout = ChronoDuration::from_std(self.settings.worker_keepalive_timeout)
                .unwrap_or_else(|_| ChronoDuration::seconds(60));
            let cutoff = now_naive() - timeout;

            for dead in consumers::delete_dead(&txn, cutoff).await? {
                tracing::warn!(
                    "Removing dead consumer {} (last alive {})",
                    dead.id,
                    dead.last_alive
                );
            }

            for id in messages::reclaim_lost(&txn).await? {
                tracing::warn!("Resetting lost message {id}");
            }
        }

        txn.commit().await?;
        self.last_heartbeat = Some(Instant::now());
        Ok(())
    }

    /// Claim at most one message, respecting the prefetch budget.
    pub async fn fetch(&mut self) -> Result<Option<QueueMessage>, ServiceError> {
        let pending = messages::pending_count(self.db.as_ref(), &self.consumer_id).await?;
        if pending >= self.prefetch as u64 {
            tracing::debug!(
                "Too many pending messages ({pending}), not consuming more"
            );
            return Ok(None);
        }

        match messages::claim_one(self.db.as_ref(), &self.queue, &self.consumer_id).await? {
            Some(model) => {
                let msg = messages::decode(model)?;
                tracing::info!("{}: consumed {}", self.consumer_id, msg.id);
                Ok(Some(msg))
            }
            None => {
                tracing::debug!("{}: did not find any messages", self.consumer_id);
                Ok(None)
            }
        }
    }

    pub async fn ack(&self, msg: &QueueMessage) -> Result<bool, ServiceError> {
        ack_message(self.db.as_ref(), &self.consumer_id, msg).await
    }

    pub async fn nack(&self, msg: &QueueMessage) -> Result<(), ServiceError> {
        nack_message(self.db.as_ref(), &self.consumer_id, msg).await
    }

    pub async fn release(&self, msg: &QueueMessage) -> Result<(), ServiceError> {
        messages::release(self.db.as_ref(), msg.id).await
    }

    /// Remove our consumer row on shutdown.
    pub async fn close(&mut self) -> Result<(), ServiceError> {
        if self.state != ConsumerState::Running {
            // Closing before start may mean the schema is not there yet;
            // there is nothing to clean up either way.
            self.state = ConsumerState::Closed;
            return Ok(());
        }
        self.state = ConsumerState::Closing;
        tracing::info!("{}: closing", self.consumer_id);
        consumers::deregister(self.db.as_ref(), &self.consumer_id).await?;
        self.state = ConsumerState::Closed;
        Ok(())
    }
}

/// Delete a processed message.
///
/// Acking a message that still carries an ETA is a no-op: the delayed copy
/// has been promoted in place (same row, same id) and the real execution
/// has not happened yet.
pub async fn ack_message<C: ConnectionTrait>(
    db: &C,
    consumer_id: &str,
    msg: &QueueMessage,
) -> Result<bool, ServiceError> {
    if msg.body.options.eta.is_some() {
        return Ok(false);
    }

    let deleted = messages::ack(db, msg.id).await?;
    if deleted {
        tracing::info!("{consumer_id}: ACK {}", msg.id);
    }
    Ok(deleted)
}

/// Drop a message whose retries are exhausted. The whole body goes into the
/// log so there is a permanent record of what failed.
pub async fn nack_message<C: ConnectionTrait>(
    db: &C,
    consumer_id: &str,
    msg: &QueueMessage,
) -> Result<(), ServiceError> {
    messages::ack(db, msg.id).await?;
    tracing::error!(
        "{consumer_id}: message failed: {}\n{}",
        msg.id,
        serde_json::to_string(&msg.body).unwrap_or_else(|_| "<unserializable>".to_string()),
    );
    Ok(())
}

/// Next retry delay: exponential in the number of completed attempts,
/// capped by `max`.
pub fn backoff_delay(retries: u32, min: Duration, max: Duration) -> Duration {
    let factor = 1u32 << retries.min(20);
    min.saturating_mul(factor).min(max)
}
