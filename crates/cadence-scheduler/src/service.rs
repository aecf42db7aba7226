use std::sync::Arc;

use cadence_core::{config::ServiceConfig, types::InstanceId};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    error::{Result, SchedulerError},
    executor::ExecutorDeps,
    health::HealthSnapshot,
    types::{JobDefinition, JobMutation, JobState, JobStatusReport, NewJob, WriteOutcome},
};

/// The surface the web layer talks to: job registration, lifecycle changes
/// and status queries.
///
/// Every mutation is a conditional read-modify-write against the store and
/// is retried on version conflicts, so it is safe to run next to any number
/// of scheduler loops.
#[derive(Clone)]
pub struct JobService {
    deps: ExecutorDeps,
    config: ServiceConfig,
}

impl JobService {
    pub fn new(deps: ExecutorDeps, config: ServiceConfig) -> Self {
        Self { deps, config }
    }

    /// Create a job and compute its first fire time.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn register(&self, new: NewJob) -> Result<JobDefinition> {
        self.deps.health.ensure_writable()?;
        let calculator = &self.deps.calculator;
        calculator.validate(&new.schedule)?;
        if !self.deps.registry.contains(&new.handler) {
            return Err(SchedulerError::UnknownHandler { name: new.handler });
        }

        let now = self.deps.clock.now();
        let first = calculator.next_fire_time(&new.schedule, now, new.misfire_policy, now)?;
        let Some(next_fire_time) = first.fire_at else {
            return Err(SchedulerError::InvalidSchedule(
                "schedule has no future fire time".into(),
            ));
        };

        let job = JobDefinition {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            schedule: new.schedule,
            misfire_policy: new.misfire_policy,
            handler: new.handler,
            payload: new.payload,
            timeout_secs: new.timeout_secs,
            max_runs: new.max_runs,
            run_count: 0,
            state: JobState::Scheduled,
            next_fire_time: Some(next_fire_time),
            last_execution: None,
            version: 1,
            claim_token: None,
            claimed_at: None,
            pause_requested: false,
            created_at: now,
            updated_at: now,
        };
        self.track(self.deps.store.insert(&job).await)?;
        info!(job_id = %job.id, next = %next_fire_time, "job registered");
        Ok(job)
    }

    /// Stop future fires. A running execution is never interrupted; the
    /// pause takes effect when it completes.
    #[instrument(skip(self))]
    pub async fn pause(&self, id: &str) -> Result<JobDefinition> {
        self.mutate(id, "pause", |job| match job.state {
            JobState::Scheduled => Ok(Some(JobMutation {
                state: JobState::Paused,
                next_fire_time: None,
                ..job.mutation()
            })),
            JobState::Running if !job.pause_requested => Ok(Some(JobMutation {
                pause_requested: true,
                ..job.mutation()
            })),
            JobState::Running | JobState::Paused => Ok(None),
            _ => Err(invalid(job, "pause")),
        })
        .await
    }

    /// Resume a paused job from the current time. Idempotent on a scheduled job.
    #[instrument(skip(self))]
    pub async fn resume(&self, id: &str) -> Result<JobDefinition> {
        let calculator = self.deps.calculator;
        let clock = Arc::clone(&self.deps.clock);
        self.mutate(id, "resume", move |job| match job.state {
            JobState::Paused => {
                let now = clock.now();
                let next = calculator.next_fire_time(&job.schedule, now, job.misfire_policy, now)?;
                let state = if next.fire_at.is_some() {
                    JobState::Scheduled
                } else {
                    JobState::Completed
                };
                Ok(Some(JobMutation {
                    state,
                    next_fire_time: next.fire_at,
                    ..job.mutation()
                }))
            }
            JobState::Running if job.pause_requested => Ok(Some(JobMutation {
                pause_requested: false,
                ..job.mutation()
            })),
            JobState::Running | JobState::Scheduled => Ok(None),
            _ => Err(invalid(job, "resume")),
        })
        .await
    }

    /// Soft-delete. History stays until `purge`; an in-flight execution
    /// finishes but its results are discarded.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<JobDefinition> {
        self.mutate(id, "delete", |job| {
            Ok(Some(JobMutation {
                state: JobState::Deleted,
                next_fire_time: None,
                pause_requested: false,
                ..job.mutation()
            }))
        })
        .await
    }

    /// The job (deleted ones included) with its most recent executions.
    #[instrument(skip(self))]
    pub async fn get_status(&self, id: &str) -> Result<JobStatusReport> {
        let job = self
            .track(self.deps.store.get_by_id(id).await)?
            .ok_or_else(|| not_found(id))?;
        let recent = self.track(
            self.deps
                .store
                .recent_executions(id, self.config.history_limit)
                .await,
        )?;
        Ok(JobStatusReport { job, recent })
    }

    /// All jobs that are not deleted.
    pub async fn list(&self) -> Result<Vec<JobDefinition>> {
        self.track(self.deps.store.list(false).await)
    }

    /// Physically remove a deleted job and its history.
    #[instrument(skip(self))]
    pub async fn purge(&self, id: &str) -> Result<()> {
        self.deps.health.ensure_writable()?;
        let job = self
            .track(self.deps.store.get_by_id(id).await)?
            .ok_or_else(|| not_found(id))?;
        if job.state != JobState::Deleted {
            return Err(invalid(&job, "purge"));
        }
        if !self.track(self.deps.store.purge(id).await)? {
            return Err(not_found(id));
        }
        info!(job_id = %id, "job purged");
        Ok(())
    }

    pub fn health(&self) -> HealthSnapshot {
        self.deps.health.snapshot()
    }

    /// The scheduler instance whose executions this service records.
    pub fn instance(&self) -> &InstanceId {
        &self.deps.instance
    }

    /// Conditional read-modify-write with bounded conflict retries.
    ///
    /// `plan` returns `None` for a no-op; the job is then returned unchanged.
    /// Deleted jobs are invisible to every mutation.
    async fn mutate<F>(&self, id: &str, action: &'static str, plan: F) -> Result<JobDefinition>
    where
        F: Fn(&JobDefinition) -> Result<Option<JobMutation>>,
    {
        self.deps.health.ensure_writable()?;
        let store = &self.deps.store;

        for attempt in 0..=self.config.conflict_retries {
            let job = self
                .track(store.get_by_id(id).await)?
                .filter(|job| job.state != JobState::Deleted)
                .ok_or_else(|| not_found(id))?;

            let Some(mutation) = plan(&job)? else {
                debug!(job_id = %id, action, state = %job.state, "no-op");
                return Ok(job);
            };

            match self.track(store.conditional_update(id, job.version, &mutation).await)? {
                WriteOutcome::Applied { version } => {
                    info!(job_id = %id, action, from = %job.state, to = %mutation.state, version, "job updated");
                    return Ok(JobDefinition {
                        state: mutation.state,
                        next_fire_time: mutation.next_fire_time,
                        run_count: mutation.run_count,
                        claim_token: mutation.claim_token,
                        claimed_at: mutation.claimed_at,
                        pause_requested: mutation.pause_requested,
                        version,
                        updated_at: self.deps.clock.now(),
                        ..job
                    });
                }
                WriteOutcome::Conflict => {
                    debug!(job_id = %id, action, attempt, "version conflict, retrying");
                }
            }
        }
        Err(SchedulerError::ClaimConflict { id: id.to_string() })
    }

    /// Feed store outcomes into the health tracker.
    fn track<T>(&self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                self.deps.health.record_success();
            }
            Err(e) if e.is_store_failure() => {
                self.deps.health.record_failure(e);
            }
            Err(_) => {}
        }
        result
    }
}

fn not_found(id: &str) -> SchedulerError {
    SchedulerError::JobNotFound { id: id.to_string() }
}

fn invalid(job: &JobDefinition, action: &'static str) -> SchedulerError {
    SchedulerError::InvalidTransition {
        id: job.id.clone(),
        state: job.state,
        action,
    }
}
