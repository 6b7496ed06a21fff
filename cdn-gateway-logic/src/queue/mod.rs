//! The durable, Postgres-backed message queue: broker, competing consumers,
//! LISTEN/NOTIFY wake-ups and scheduled actors. The `queue_messages` table
//! is the single source of truth; no in-memory queue is authoritative.

pub mod broker;
pub mod consumer;
pub mod listener;
pub mod message;
pub mod middleware;
pub mod registry;
pub mod scheduler;
pub mod worker;

/// Postgres NOTIFY channel used to wake consumers.
pub const NOTIFY_CHANNEL: &str = "queue_wake";
