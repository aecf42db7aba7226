//! `cadence-scheduler`: persistent job scheduler and executor on Tokio and SQLite.
//!
//! # Overview
//!
//! Jobs live in a SQLite `jobs` table and every run leaves a row in
//! `job_executions`. The [`engine::SchedulerLoop`] polls for due jobs on a
//! fixed tick, claims each with a version-conditioned update and hands it to
//! the [`executor::Executor`] worker pool. The executor runs the registered
//! [`handler::JobHandler`] under a timeout, closes the execution record and
//! writes the next fire time in one transaction. A [`recovery::RecoverySweep`]
//! resets claims abandoned by crashed workers.
//!
//! Because every state change is conditioned on the stored `version`, any
//! number of instances can share one database without a lock service.
//!
//! # Schedule variants
//!
//! | Variant    | Behaviour                                          |
//! |------------|----------------------------------------------------|
//! | `Cron`     | Cron expression (5 or 6/7 fields, UTC)             |
//! | `Interval` | Repeat every N seconds, measured from the last run |
//! | `Once`     | Single fire at an absolute UTC instant             |
//!
//! # Misfire policies
//!
//! A slot older than the misfire threshold is handled by the job's policy:
//! `fire_now` runs immediately, `skip` jumps past now and writes one
//! `misfire_skipped` record, `fire_once` runs only the latest missed slot.

pub mod clock;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod handler;
pub mod health;
pub mod recovery;
pub mod runtime;
pub mod schedule;
pub mod service;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{SchedulerLoop, TickReport};
pub use error::{Result, SchedulerError};
pub use executor::{ClaimedJob, Executor, ExecutorDeps, ExecutorStats, SubmitError};
pub use handler::{CancellationToken, FnHandler, HandlerRegistry, JobContext, JobFailure, JobHandler};
pub use health::{Health, HealthSnapshot, HealthStatus};
pub use recovery::{RecoverySweep, SweepReport};
pub use runtime::Runtime;
pub use schedule::{NextFire, TriggerCalculator};
pub use service::JobService;
pub use store::{JobStore, SqliteJobStore};
pub use types::{
    ExecutionRecord, JobDefinition, JobState, JobStatusReport, MisfirePolicy, NewJob, Outcome,
    Schedule,
};
