use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue used by all current actors.
pub const DEFAULT_QUEUE: &str = "default";

const DELAYED_SUFFIX: &str = ".dq";

/// Name of the delayed variant of a queue. Messages enqueued with a delay
/// wait here until their ETA passes.
pub fn delayed_name(queue: &str) -> String {
    format!("{}{}", base_name(queue), DELAYED_SUFFIX)
}

pub fn base_name(queue: &str) -> &str {
    queue.strip_suffix(DELAYED_SUFFIX).unwrap_or(queue)
}

pub fn is_delayed(queue: &str) -> bool {
    queue.ends_with(DELAYED_SUFFIX)
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageOptions {
    /// Epoch milliseconds before which a delayed message must not run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<i64>,
    /// Completed attempts so far.
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageBody {
    /// Actor arguments, decoded by the actor itself.
    pub args: serde_json::Value,
    #[serde(default)]
    pub options: MessageOptions,
    /// Epoch milliseconds at enqueue time; claims are served oldest-first.
    pub enqueued_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: Uuid,
    pub queue: String,
    pub actor: String,
    pub body: MessageBody,
}

impl QueueMessage {
    pub fn new(actor: &str, queue: &str, args: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            actor: actor.to_string(),
            body: MessageBody {
                args,
                options: MessageOptions::default(),
                enqueued_at: now_millis(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delayed_names() {
        assert_eq!(delayed_name("default"), "default.dq");
        assert_eq!(delayed_name("default.dq"), "default.dq");
        assert_eq!(base_name("default.dq"), "default");
        assert_eq!(base_name("default"), "default");
        assert!(is_delayed("default.dq"));
        assert!(!is_delayed("default"));
    }

    #[test]
    fn body_round_trips() {
        let msg = QueueMessage::new("commit", DEFAULT_QUEUE, serde_json::json!({"a": 1}));
        let value = serde_json::to_value(&msg.body).unwrap();
        let body: MessageBody = serde_json::from_value(value).unwrap();
        assert_eq!(body, msg.body);
    }

    #[test]
    fn eta_is_omitted_when_absent() {
        let msg = QueueMessage::new("commit", DEFAULT_QUEUE, serde_json::json!({}));
        let value = serde_json::to_value(&msg.body).unwrap();
        assert!(value["options"].get("eta").is_none());
    }
}
