//! Correlation-id propagation between the enqueuing side and actor code.
//!
//! The id is carried in a task-local so that enqueues made from inside an
//! actor inherit the id of the message being processed, and every log line
//! emitted under the actor span records it as `request_id`.

use std::future::Future;

use uuid::Uuid;

tokio::task_local! {
    static CORRELATION_ID: Option<String>;
}

/// Run `f` with the given correlation id bound to the current task.
pub async fn with_correlation_id<F>(id: Option<String>, f: F) -> F::Output
where
    F: Future,
{
    CORRELATION_ID.scope(id, f).await
}

/// The correlation id bound to the current task, if any.
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok().flatten()
}

pub fn new_correlation_id() -> String {
    Uuid::new_v4().simple().to_string()
}
