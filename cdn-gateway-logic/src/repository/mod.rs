//! Data-access boundary. Every read and write against the relational tables
//! goes through these modules; callers supply either a connection or an open
//! transaction, so enqueues and state transitions can share a caller's
//! transaction.

pub mod consumers;
pub mod items;
pub mod messages;
pub mod published_paths;
pub mod publishes;
pub mod tasks;
