use std::{collections::HashMap, sync::Arc, time::Duration};

use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement, TransactionTrait};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{
    context,
    error::ServiceError,
    queue::{
        message::{base_name, delayed_name, now_millis, QueueMessage},
        registry::Registry,
        NOTIFY_CHANNEL,
    },
    repository::messages,
};

/// Enqueues durable messages and wakes consumers.
///
/// An enqueue may either participate in a caller-supplied transaction
/// ([`Broker::enqueue_in`]) so that the message becomes visible exactly when
/// the caller commits, or run in its own short transaction
/// ([`Broker::enqueue`]).
pub struct Broker {
    db: Arc<DatabaseConnection>,
    registry: Arc<Registry>,
    id: Uuid,
    events: HashMap<String, Arc<Notify>>,
}

impl Broker {
    pub fn new(db: Arc<DatabaseConnection>, registry: Arc<Registry>) -> Self {
        let events = registry
            .all_queues()
            .into_iter()
            .map(|queue| (queue, Arc::new(Notify::new())))
            .collect();
        Self {
            db,
            registry,
            id: Uuid::new_v4(),
            events,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn db(&self) -> &Arc<DatabaseConnection> {
        &self.db
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The wake condition for one queue's consumer.
    pub fn event(&self, queue: &str) -> Arc<Notify> {
        self.events
            .get(queue)
            .cloned()
            .unwrap_or_else(|| Arc::new(Notify::new()))
    }

    /// Wake all consumers in this process so new messages are found earlier.
    pub fn notify_local(&self) {
        for event in self.events.values() {
            event.notify_one();
        }
    }

    /// Enqueue within the caller's transaction.
    ///
    /// The message is stamped with the current correlation id; a delayed
    /// message is routed to the delayed variant of its queue with its ETA
    /// set. The NOTIFY is issued on the same transaction, so remote
    /// consumers wake exactly when the enqueue becomes visible.
    pub async fn enqueue_in<C: ConnectionTrait>(
        &self,
        db: &C,
        mut msg: QueueMessage,
        delay: Option<Duration>,
    ) -> Result<QueueMessage, ServiceError> {
        if msg.body.options.correlation_id.is_none() {
            msg.body.options.correlation_id = context::current_correlation_id();
        }

        if let Some(delay) = delay {
            msg.queue = delayed_name(&msg.queue);
            msg.body.options.eta = Some(now_millis() + delay.as_millis() as i64);
        } else {
            msg.queue = base_name(&msg.queue).to_string();
        }

        messages::upsert(db, &msg).await?;

        db.execute(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "SELECT pg_notify($1, '')",
            [NOTIFY_CHANNEL.into()],
        ))
        .await?;

        tracing::debug!(
            message_id = %msg.id,
            actor = %msg.actor,
            queue = %msg.queue,
            "enqueued message"
        );

        self.notify_local();
        Ok(msg)
    }

    /// Enqueue in a transaction of the broker's own.
    pub async fn enqueue(
        &self,
        msg: QueueMessage,
        delay: Option<Duration>,
    ) -> Result<QueueMessage, ServiceError> {
        let txn = self.db.begin().await?;
        let msg = self.enqueue_in(&txn, msg, delay).await?;
        txn.commit().await?;
        Ok(msg)
    }
}
