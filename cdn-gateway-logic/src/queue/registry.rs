use std::{collections::HashMap, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    error::ServiceError,
    queue::{message::QueueMessage, scheduler::ScheduledActor},
    settings::Settings,
    state::AppState,
};

/// Per-actor execution options, resolved at declaration time.
#[derive(Debug, Clone)]
pub struct ActorOptions {
    pub time_limit: Duration,
    pub max_retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Driven by a cron rule instead of external enqueues.
    pub scheduled: bool,
}

impl ActorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            time_limit: settings.actor_time_limit,
            max_retries: settings.actor_max_retries,
            min_backoff: settings.actor_min_backoff,
            max_backoff: settings.actor_max_backoff,
            scheduled: false,
        }
    }

    pub fn scheduled(mut self) -> Self {
        self.scheduled = true;
        self
    }
}

#[async_trait]
pub trait Actor: Send + Sync {
    fn name(&self) -> &'static str;

    fn queue(&self) -> &'static str {
        crate::queue::message::DEFAULT_QUEUE
    }

    async fn invoke(&self, state: Arc<AppState>, msg: &QueueMessage) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct RegisteredActor {
    pub actor: Arc<dyn Actor>,
    pub options: ActorOptions,
}

/// All actors known to the broker, fixed at startup.
#[derive(Default)]
pub struct Registry {
    actors: HashMap<&'static str, RegisteredActor>,
    queues: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an actor. Scheduled actors are wrapped so that each
    /// invocation is gated by the actor's cron rule and re-enqueues itself;
    /// declaring one without a parseable rule in settings is a boot error.
    pub fn declare(
        &mut self,
        settings: &Settings,
        actor: Arc<dyn Actor>,
        options: ActorOptions,
    ) -> Result<(), ServiceError> {
        let name = actor.name();
        let queue = actor.queue().to_string();

        if self.actors.contains_key(name) {
            return Err(ServiceError::Validation(format!(
                "actor {name:?} declared twice"
            )));
        }

        let actor: Arc<dyn Actor> = if options.scheduled {
            let rule = settings.cron_rule(name).ok_or_else(|| {
                ServiceError::Validation(format!("scheduled actor {name:?} has no cron rule"))
            })?;
            cron::Schedule::from_str(rule).map_err(|err| {
                ServiceError::Validation(format!(
                    "scheduled actor {name:?} has invalid cron rule {rule:?}: {err}"
                ))
            })?;
            Arc::new(ScheduledActor::new(actor))
        } else {
            actor
        };

        if !self.queues.contains(&queue) {
            self.queues.push(queue);
        }
        self.actors.insert(name, RegisteredActor { actor, options });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredActor> {
        self.actors.get(name)
    }

    /// Base queues in declaration order. The first queue's consumer acts as
    /// the master.
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Base queues plus their delayed variants, in consumption order.
    pub fn all_queues(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.queues.len() * 2);
        for queue in &self.queues {
            out.push(queue.clone());
            out.push(super::message::delayed_name(queue));
        }
        out
    }

    pub fn scheduled(&self) -> impl Iterator<Item = &RegisteredActor> {
        self.actors.values().filter(|reg| reg.options.scheduled)
    }
}
