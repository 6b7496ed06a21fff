//! Invocation-side middleware chain. Every actor invocation passes through
//! a fixed list of middlewares registered at startup; each middleware wraps
//! the next stage and the concrete actor is the tail of the chain.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::Instrument;
use uuid::Uuid;

use crate::{context, error::ServiceError};

pub type InvokeResult = Result<(), ServiceError>;
pub type InvokeFuture<'a> = BoxFuture<'a, InvokeResult>;
pub type Next<'a> = Box<dyn FnOnce() -> InvokeFuture<'a> + Send + 'a>;

#[derive(Debug, Clone)]
pub struct InvokeContext {
    pub actor: String,
    pub message_id: Uuid,
    /// Correlation id carried by the message being processed.
    pub correlation_id: Option<String>,
    /// Publish or task id named by the message, used for log identity.
    pub subject: Option<String>,
    pub time_limit: Duration,
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call<'a>(&self, ctx: &'a InvokeContext, next: Next<'a>) -> InvokeResult;
}

pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(layers: Vec<Arc<dyn Middleware>>) -> Self {
        Self { layers }
    }

    /// The standard chain: restore the correlation id, open the actor log
    /// span, then enforce the actor's time limit.
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(CorrelationIdMiddleware),
            Arc::new(LogActorMiddleware),
            Arc::new(TimeLimitMiddleware),
        ])
    }

    pub fn run<'a>(&'a self, ctx: &'a InvokeContext, tail: Next<'a>) -> InvokeFuture<'a> {
        let mut next = tail;
        for layer in self.layers.iter().rev() {
            let layer = Arc::clone(layer);
            let prev = next;
            next = Box::new(move || -> InvokeFuture<'a> {
                Box::pin(async move { layer.call(ctx, prev).await })
            });
        }
        next()
    }
}

/// Restores the enqueuing side's correlation id into the task context, so
/// logs and downstream enqueues inherit it. Generates a fresh id when the
/// message carries none.
pub struct CorrelationIdMiddleware;

#[async_trait]
impl Middleware for CorrelationIdMiddleware {
    async fn call<'a>(&self, ctx: &'a InvokeContext, next: Next<'a>) -> InvokeResult {
        let id = ctx
            .correlation_id
            .clone()
            .unwrap_or_else(context::new_correlation_id);
        context::with_correlation_id(Some(id), next()).await
    }
}

/// Runs the invocation inside a span identifying the actor, so every log
/// record carries the actor name, message id and request id.
pub struct LogActorMiddleware;

#[async_trait]
impl Middleware for LogActorMiddleware {
    async fn call<'a>(&self, ctx: &'a InvokeContext, next: Next<'a>) -> InvokeResult {
        let request_id = context::current_correlation_id().unwrap_or_default();
        let span = tracing::info_span!(
            "actor",
            actor = %ctx.actor,
            message_id = %ctx.message_id,
            request_id = %request_id,
            subject = tracing::field::Empty,
        );
        if let Some(subject) = &ctx.subject {
            span.record("subject", subject.as_str());
        }
        next().instrument(span).await
    }
}

/// Hard per-actor time limit. There is no preemptive cancellation of
/// running I/O; the budget must sit comfortably above the slowest commit.
pub struct TimeLimitMiddleware;

#[async_trait]
impl Middleware for TimeLimitMiddleware {
    async fn call<'a>(&self, ctx: &'a InvokeContext, next: Next<'a>) -> InvokeResult {
        match tokio::time::timeout(ctx.time_limit, next()).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::TimeLimit(ctx.time_limit)),
        }
    }
}
