//! Scheduled actors. Each scheduled actor is driven by a cron rule from
//! settings: a single message with a stable id keeps re-enqueueing itself,
//! and the wrapped actor body only runs when the rule has fired since the
//! previous invocation.

use std::{str::FromStr, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use cron::Schedule;
use sea_orm::TransactionTrait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    queue::{
        broker::Broker,
        message::{delayed_name, QueueMessage},
        registry::{Actor, Registry},
    },
    repository::messages,
    state::AppState,
};

/// Arbitrary constant namespace for deriving stable scheduler message ids.
const SCHEDULER_NS: Uuid = uuid::uuid!("71f64e57-40d4-48a5-b342-9d81c30e899b");

/// Stable message id for a scheduled actor. Deterministic in
/// (queue, actor), so concurrent boot-ups deduplicate to one message.
pub fn scheduler_message_id(queue: &str, actor: &str) -> Uuid {
    Uuid::new_v5(&SCHEDULER_NS, format!("{queue}-{actor}").as_bytes())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledArgs {
    /// Epoch milliseconds of the previous invocation.
    #[serde(default)]
    pub last_run: Option<i64>,
}

/// True when the rule has fired within `(since, now]`. A fire exactly at
/// `now` counts.
pub fn has_fired(schedule: &Schedule, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    schedule
        .after(&since)
        .next()
        .map(|fire| fire <= now)
        .unwrap_or(false)
}

/// Wrapper installed around actors declared with `scheduled`. Evaluation is
/// over UTC; errors from the inner actor propagate before the re-enqueue,
/// so the usual retry mechanism re-submits the same (stable) message id.
pub struct ScheduledActor {
    inner: Arc<dyn Actor>,
}

impl ScheduledActor {
    pub fn new(inner: Arc<dyn Actor>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Actor for ScheduledActor {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn queue(&self) -> &'static str {
        self.inner.queue()
    }

    async fn invoke(&self, state: Arc<AppState>, msg: &QueueMessage) -> Result<(), ServiceError> {
        let args: ScheduledArgs = serde_json::from_value(msg.body.args.clone()).unwrap_or_default();

        let rule = state
            .settings
            .cron_rule(self.name())
            .ok_or_else(|| anyhow!("scheduled actor {:?} has no cron rule", self.name()))?;
        let schedule = Schedule::from_str(rule)
            .map_err(|err| anyhow!("invalid cron rule {rule:?}: {err}"))?;

        let now = Utc::now();
        let since = args
            .last_run
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            // First invocation: no obvious 'since'; half an hour back is a
            // conservative window.
            .unwrap_or_else(|| now - ChronoDuration::minutes(30));

        if has_fired(&schedule, since, now) {
            tracing::info!(
                "Scheduled actor {} activated (rule: '{}', period: {} .. {})",
                self.name(),
                rule,
                since,
                now,
            );
            self.inner.invoke(state.clone(), msg).await?;
        } else {
            tracing::debug!(
                "Scheduled actor {}: cron '{}' did not occur within {} .. {}",
                self.name(),
                rule,
                since,
                now,
            );
        }

        // Call ourselves again soon.
        let mut next = QueueMessage::new(
            self.name(),
            self.queue(),
            serde_json::to_value(ScheduledArgs {
                last_run: Some(now.timestamp_millis()),
            })?,
        );
        next.id = scheduler_message_id(self.queue(), self.name());
        state
            .broker
            .enqueue(
                next,
                Some(std::time::Duration::from_secs(
                    state.settings.scheduler_interval * 60,
                )),
            )
            .await?;

        Ok(())
    }
}

/// At broker boot, make sure each scheduled actor has exactly one pending
/// message in the system, enqueued with the configured initial delay. Any
/// other message addressed to the same actor is removed in the same
/// transaction.
pub async fn ensure_scheduled(
    broker: &Broker,
    registry: &Registry,
    scheduler_delay_minutes: u64,
) -> Result<(), ServiceError> {
    for reg in registry.scheduled() {
        let actor = &reg.actor;
        let queue = actor.queue();
        let id = scheduler_message_id(queue, actor.name());

        let mut msg = QueueMessage::new(actor.name(), queue, serde_json::json!({}));
        msg.id = id;

        let txn = broker.db().begin().await?;
        broker
            .enqueue_in(
                &txn,
                msg,
                Some(std::time::Duration::from_secs(scheduler_delay_minutes * 60)),
            )
            .await?;
        messages::delete_other_for_actor(
            &txn,
            actor.name(),
            &[queue.to_string(), delayed_name(queue)],
            id,
        )
        .await?;
        txn.commit().await?;

        tracing::info!("Scheduled actor {} uses message {}", actor.name(), id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(rule: &str) -> Schedule {
        Schedule::from_str(rule).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn scheduler_ids_are_stable_and_distinct() {
        let a = scheduler_message_id("default", "cleanup");
        let b = scheduler_message_id("default", "cleanup");
        let c = scheduler_message_id("default", "other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn fires_when_rule_hit_in_window() {
        // "at minute 5 of hours 1,2,3" in cron-with-seconds form.
        let sched = schedule("0 5 1,2,3 * * *");
        let now = utc(2024, 3, 10, 1, 7, 0);

        // Window covering 01:05.
        assert!(has_fired(&sched, now - ChronoDuration::minutes(30), now));
        // 30 second window after the fire: nothing due.
        assert!(!has_fired(&sched, now - ChronoDuration::seconds(30), now));

        // Later the same morning at 03:07 with a two minute window: 03:05
        // fires again.
        let now = utc(2024, 3, 10, 3, 7, 0);
        assert!(has_fired(&sched, now - ChronoDuration::seconds(120), now));
    }

    #[test]
    fn tie_at_now_counts_as_fired() {
        let sched = schedule("0 5 1 * * *");
        let now = utc(2024, 3, 10, 1, 5, 0);
        assert!(has_fired(&sched, now - ChronoDuration::seconds(30), now));
    }
}
