//! Job body contract and the registry mapping handler names to bodies.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
pub use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything a job body receives for one execution.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub name: String,
    pub payload: serde_json::Value,
    /// The fire slot being executed.
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Cancelled on timeout or forced shutdown. Bodies should check it at
    /// safe points and return promptly.
    pub cancel: CancellationToken,
}

/// Error returned by a job body. Recorded on the execution, never propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure(pub String);

impl JobFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for JobFailure {}

impl From<String> for JobFailure {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobFailure {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A job body.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> Result<(), JobFailure>;
}

/// Handler lookup by name, shared between the facade and the executor.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `name`.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let name = name.into();
        debug!(handler = %name, "job handler registered");
        self.handlers.insert(name, handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Adapts an async closure into a `JobHandler`.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), JobFailure>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> Result<(), JobFailure> {
        (self.0)(ctx).await
    }
}
