//! Store connectivity tracking.
//!
//! `Health` counts consecutive job-store failures. Past the threshold the
//! service is degraded: the scheduler loop stops claiming, facade mutations
//! are rejected and the health probe reports failure. The first successful
//! store round-trip restores normal operation.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tracing::{error, info};

use crate::error::{Result, SchedulerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// Public snapshot for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

pub struct Health {
    degraded: AtomicBool,
    consecutive_failures: AtomicU32,
    threshold: u32,
    last_error: Mutex<Option<String>>,
}

impl Health {
    pub fn new(threshold: u32) -> Self {
        Self {
            degraded: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            threshold: threshold.max(1),
            last_error: Mutex::new(None),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Returns `true` if this success lifted a degraded state.
    pub fn record_success(&self) -> bool {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let was_degraded = self.degraded.swap(false, Ordering::SeqCst);
        if was_degraded {
            info!("job store reachable again, leaving degraded mode");
        }
        was_degraded
    }

    /// Returns `true` if this failure pushed the service into degraded mode.
    pub fn record_failure(&self, err: &SchedulerError) -> bool {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(err.to_string());
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold && !self.degraded.swap(true, Ordering::SeqCst) {
            error!(failures, error = %err, "job store unreachable, entering degraded read-only mode");
            return true;
        }
        false
    }

    /// Gate for mutating operations.
    pub fn ensure_writable(&self) -> Result<()> {
        if self.is_degraded() {
            let reason = self
                .last_error
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
                .unwrap_or_else(|| "job store unavailable".to_string());
            return Err(SchedulerError::Degraded(reason));
        }
        Ok(())
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: if self.is_degraded() {
                HealthStatus::Degraded
            } else {
                HealthStatus::Ok
            },
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            last_error: self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}
