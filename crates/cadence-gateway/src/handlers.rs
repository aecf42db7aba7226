//! Job handlers shipped with the gateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_scheduler::{HandlerRegistry, JobContext, JobFailure, JobHandler};
use serde::Deserialize;
use tracing::info;

pub fn register_builtin(registry: &HandlerRegistry) {
    registry.register("log", Arc::new(LogHandler));
    registry.register("sleep", Arc::new(SleepHandler));
}

/// Logs the payload at info level.
pub struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    async fn run(&self, ctx: JobContext) -> Result<(), JobFailure> {
        info!(job_id = %ctx.job_id, name = %ctx.name, payload = %ctx.payload, "log job fired");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SleepPayload {
    millis: u64,
}

/// Sleeps for `{"millis": n}`, returning early with a failure when cancelled.
pub struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    async fn run(&self, ctx: JobContext) -> Result<(), JobFailure> {
        let payload: SleepPayload = serde_json::from_value(ctx.payload.clone())
            .map_err(|e| JobFailure::new(format!("invalid sleep payload: {e}")))?;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(payload.millis)) => Ok(()),
            _ = ctx.cancel.cancelled() => Err(JobFailure::new("sleep cancelled")),
        }
    }
}
