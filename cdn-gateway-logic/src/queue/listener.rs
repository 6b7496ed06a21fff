//! LISTEN/NOTIFY wake-ups. One dedicated connection LISTENs on the queue
//! channel and raises the per-queue wake conditions whenever a notification
//! arrives. The loop is restart-on-exception with exponential backoff.

use std::{sync::Arc, time::Duration};

use sea_orm::{sqlx, sqlx::postgres::PgListener, DatabaseConnection};
use tokio::time::{sleep, timeout};

use crate::queue::{broker::Broker, NOTIFY_CHANNEL};

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub async fn run(db: Arc<DatabaseConnection>, broker: Arc<Broker>, interval: Duration) {
    let mut backoff = MIN_BACKOFF;
    loop {
        match listen(&db, &broker, interval).await {
            Ok(()) => {
                backoff = MIN_BACKOFF;
            }
            Err(err) => {
                tracing::warn!(error = %err, ?backoff, "queue listener failed, restarting");
                sleep(backoff).await;
                backoff = backoff.saturating_mul(2).min(MAX_BACKOFF);
            }
        }
    }
}

async fn listen(
    db: &DatabaseConnection,
    broker: &Broker,
    interval: Duration,
) -> Result<(), sqlx::Error> {
    let pool = db.get_postgres_connection_pool();
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(NOTIFY_CHANNEL).await?;
    tracing::debug!(channel = NOTIFY_CHANNEL, "queue listener connected");

    loop {
        match timeout(interval, listener.try_recv()).await {
            // There is no payload; any notification just means "look again".
            Ok(Ok(Some(_notification))) => {
                tracing::debug!("queue listener notifying broker");
                broker.notify_local();
            }
            // The connection dropped and was re-established; messages may
            // have been missed in between, so wake everyone.
            Ok(Ok(None)) => {
                broker.notify_local();
            }
            Ok(Err(err)) => return Err(err),
            // Periodic wake-up with nothing received.
            Err(_elapsed) => {}
        }
    }
}
