use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Defines when and how often a job should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Cron expression. 5-field expressions fire at second 0; 6/7-field
    /// expressions carry their own seconds (and optional year) column.
    Cron { expression: String },

    /// Run repeatedly with a fixed interval in seconds.
    Interval { every_secs: u64 },

    /// Run exactly once at the given UTC instant.
    Once { at: DateTime<Utc> },
}

/// What to do with fire slots that passed while nobody was looking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfirePolicy {
    /// Fire immediately, at "now".
    #[default]
    FireNow,
    /// Drop every missed slot and wait for the next future one.
    Skip,
    /// Fire once for the most recent missed slot, discard the others.
    FireOnce,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its next_fire_time.
    Scheduled,
    /// Explicitly paused; next_fire_time is NULL.
    Paused,
    /// Claimed by a scheduler instance and executing.
    Running,
    /// Schedule exhausted (one-shot fired or max_runs reached).
    Completed,
    /// Can no longer be scheduled (handler missing or schedule unusable).
    Failed,
    /// Soft-deleted; execution history is preserved.
    Deleted,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Scheduled => "scheduled",
            JobState::Paused => "paused",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobState::Scheduled),
            "paused" => Ok(JobState::Paused),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "deleted" => Ok(JobState::Deleted),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Final result of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    MisfireSkipped,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
            Outcome::MisfireSkipped => "misfire_skipped",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            "timeout" => Ok(Outcome::Timeout),
            "misfire_skipped" => Ok(Outcome::MisfireSkipped),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// UUID v4 string, primary key.
    pub id: String,
    /// Human-readable label, unique among non-deleted jobs.
    pub name: String,
    pub schedule: Schedule,
    pub misfire_policy: MisfirePolicy,
    /// Name of the registered handler that runs this job.
    pub handler: String,
    /// Opaque data forwarded to the handler.
    pub payload: serde_json::Value,
    /// Per-job timeout; the executor default applies when unset.
    pub timeout_secs: Option<u64>,
    /// If set, the job is marked Completed after this many runs.
    pub max_runs: Option<u32>,
    /// Executions that reached a final outcome (misfire skips excluded).
    pub run_count: u32,
    pub state: JobState,
    /// While Running this still holds the slot being executed.
    pub next_fire_time: Option<DateTime<Utc>>,
    /// Id of the most recent execution record.
    pub last_execution: Option<i64>,
    /// Incremented by every conditional write.
    pub version: u64,
    /// Token of the claim currently owning the job.
    pub claim_token: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    /// Pause asked for while Running; applied when the run completes.
    pub pause_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDefinition {
    /// Snapshot of the mutable columns, used as the base of a conditional write.
    pub fn mutation(&self) -> JobMutation {
        JobMutation {
            state: self.state,
            next_fire_time: self.next_fire_time,
            run_count: self.run_count,
            claim_token: self.claim_token.clone(),
            claimed_at: self.claimed_at,
            pause_requested: self.pause_requested,
        }
    }
}

/// Input of `JobService::register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub schedule: Schedule,
    #[serde(default)]
    pub misfire_policy: MisfirePolicy,
    pub handler: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_runs: Option<u32>,
}

impl NewJob {
    pub fn new(name: impl Into<String>, schedule: Schedule, handler: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule,
            misfire_policy: MisfirePolicy::default(),
            handler: handler.into(),
            payload: serde_json::Value::Null,
            timeout_secs: None,
            max_runs: None,
        }
    }

    pub fn with_policy(mut self, policy: MisfirePolicy) -> Self {
        self.misfire_policy = policy;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }
}

/// New values for the mutable job columns. The store bumps `version` and
/// `updated_at` itself.
#[derive(Debug, Clone, PartialEq)]
pub struct JobMutation {
    pub state: JobState,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub run_count: u32,
    pub claim_token: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub pause_requested: bool,
}

impl JobMutation {
    /// Drop the claim, e.g. when a run ends or a claim is rolled back.
    pub fn release(mut self) -> Self {
        self.claim_token = None;
        self.claimed_at = None;
        self
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write landed; the job now carries this version.
    Applied { version: u64 },
    /// The stored version no longer matched; nothing was written.
    Conflict,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied { .. })
    }
}

/// A persisted execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub job_id: String,
    /// The fire slot that triggered this execution.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    /// NULL while the execution is still open.
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
    pub error_detail: Option<String>,
    /// Scheduler instance that produced the record.
    pub instance_id: String,
    /// Missed slots covered by a MisfireSkipped record.
    pub skipped_slots: u32,
}

impl ExecutionRecord {
    pub fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }
}

/// Data required to insert an execution record. Leave `finished_at` unset
/// to open it.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub job_id: String,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
    pub error_detail: Option<String>,
    pub instance_id: String,
    pub skipped_slots: u32,
}

impl NewExecution {
    /// An open record for a run that is about to start.
    pub fn open(
        job_id: &str,
        scheduled_for: Option<DateTime<Utc>>,
        started_at: DateTime<Utc>,
        instance_id: &str,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            scheduled_for,
            started_at,
            finished_at: None,
            outcome: None,
            error_detail: None,
            instance_id: instance_id.to_string(),
            skipped_slots: 0,
        }
    }

    /// An already-closed record.
    pub fn closed(
        job_id: &str,
        scheduled_for: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
        close: ExecutionClose,
        instance_id: &str,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            scheduled_for,
            started_at: at,
            finished_at: Some(close.finished_at),
            outcome: Some(close.outcome),
            error_detail: close.error_detail,
            instance_id: instance_id.to_string(),
            skipped_slots: 0,
        }
    }

    /// The single record written when a Skip policy drops missed slots.
    pub fn misfire_skipped(
        job_id: &str,
        first_missed: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
        skipped: u32,
        instance_id: &str,
    ) -> Self {
        let mut record = Self::closed(
            job_id,
            first_missed,
            at,
            ExecutionClose::new(Outcome::MisfireSkipped, at, None),
            instance_id,
        );
        record.skipped_slots = skipped;
        record
    }
}

/// Values that close an open execution record.
#[derive(Debug, Clone)]
pub struct ExecutionClose {
    pub outcome: Outcome,
    pub finished_at: DateTime<Utc>,
    pub error_detail: Option<String>,
}

impl ExecutionClose {
    pub fn new(outcome: Outcome, finished_at: DateTime<Utc>, error_detail: Option<String>) -> Self {
        Self {
            outcome,
            finished_at,
            error_detail,
        }
    }
}

/// Execution-record side effects committed together with a job write.
#[derive(Debug, Clone)]
pub enum RecordWrite {
    Insert(NewExecution),
    Close { record_id: i64, close: ExecutionClose },
}

/// `JobService::get_status` result.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job: JobDefinition,
    /// Newest first.
    pub recent: Vec<ExecutionRecord>,
}
