use std::sync::Arc;

use cadence_core::config::SchedulerConfig;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::Result,
    executor::{ClaimedJob, Executor, ExecutorDeps, SubmitError},
    types::{JobDefinition, JobMutation, JobState, MisfirePolicy, NewExecution, RecordWrite, WriteOutcome},
};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Jobs claimed and handed to the executor.
    pub claimed: usize,
    /// Claims lost to another instance.
    pub conflicts: usize,
    /// Claims rolled back because the executor queue was full.
    pub deferred: usize,
    /// Jobs whose missed slots were dropped by a Skip policy.
    pub misfires_skipped: usize,
}

/// Polls the job store for due jobs, claims them and feeds the executor.
///
/// Claims are conditional on the version read, so several loops (in this or
/// other processes) may poll the same store; each due slot is claimed once.
pub struct SchedulerLoop {
    deps: ExecutorDeps,
    executor: Arc<Executor>,
    config: SchedulerConfig,
}

impl SchedulerLoop {
    pub fn new(deps: ExecutorDeps, executor: Arc<Executor>, config: SchedulerConfig) -> Self {
        Self {
            deps,
            executor,
            config,
        }
    }

    /// Main event loop. Ticks every `tick_interval` until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(instance = %self.deps.instance, "scheduler loop started");

        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report != TickReport::default() => debug!(?report, "tick"),
                        Ok(_) => {}
                        Err(e) => error!("scheduler tick error: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Claim and dispatch every job due at the current clock time.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        let health = &self.deps.health;

        if health.is_degraded() {
            match self.deps.store.ping().await {
                Ok(()) => {
                    health.record_success();
                }
                Err(e) => {
                    health.record_failure(&e);
                    debug!("store still unreachable, not claiming");
                    return Ok(report);
                }
            }
        }

        let now = self.deps.clock.now();
        let due = match self.deps.store.find_due_before(now, self.config.batch_size).await {
            Ok(due) => {
                health.record_success();
                due
            }
            Err(e) => {
                health.record_failure(&e);
                return Err(e);
            }
        };

        for job in due {
            match self.process(job, now, &mut report).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Backpressure) => break,
                Err(e) => {
                    health.record_failure(&e);
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    async fn process(&self, job: JobDefinition, now: DateTime<Utc>, report: &mut TickReport) -> Result<Flow> {
        let Some(slot) = job.next_fire_time else {
            return Ok(Flow::Continue);
        };

        let resolved = match self.deps.calculator.resolve(&job.schedule, slot, job.misfire_policy, now) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(job_id = %job.id, "unusable schedule, failing job: {e}");
                let failed = JobMutation {
                    state: JobState::Failed,
                    next_fire_time: None,
                    ..job.mutation()
                };
                self.deps.store.conditional_update(&job.id, job.version, &failed).await?;
                return Ok(Flow::Continue);
            }
        };

        // Skip moved the slot into the future: nothing fires this tick.
        if resolved.fire_at.map_or(true, |at| at > now) {
            return self.skip_missed(&job, slot, resolved.fire_at, resolved.skipped, now, report).await;
        }

        let fire_at = resolved.fire_at.unwrap_or(now);
        let scheduled_for = match job.misfire_policy {
            MisfirePolicy::FireNow => slot,
            _ => fire_at,
        };
        if resolved.skipped > 0 {
            info!(job_id = %job.id, skipped = resolved.skipped, "firing latest missed slot only");
        }

        let claim = JobMutation {
            state: JobState::Running,
            next_fire_time: Some(scheduled_for),
            claim_token: Some(Uuid::new_v4().to_string()),
            claimed_at: Some(now),
            ..job.mutation()
        };
        let version = match self.deps.store.conditional_update(&job.id, job.version, &claim).await? {
            WriteOutcome::Applied { version } => version,
            WriteOutcome::Conflict => {
                debug!(job_id = %job.id, "claim lost to another instance");
                report.conflicts += 1;
                return Ok(Flow::Continue);
            }
        };

        let job_id = job.id.clone();
        let claimed = ClaimedJob {
            job: JobDefinition {
                state: claim.state,
                next_fire_time: claim.next_fire_time,
                claim_token: claim.claim_token.clone(),
                claimed_at: claim.claimed_at,
                version,
                updated_at: now,
                ..job
            },
            scheduled_for,
        };

        match self.executor.try_submit(claimed) {
            Ok(()) => {
                info!(job_id = %job_id, scheduled_for = %scheduled_for, "job claimed");
                report.claimed += 1;
                Ok(Flow::Continue)
            }
            Err(SubmitError::Full(claimed)) => {
                self.roll_back(&claimed, slot).await?;
                report.deferred += 1;
                warn!(job_id = %claimed.job.id, "executor queue full, deferring to next tick");
                Ok(Flow::Backpressure)
            }
            Err(SubmitError::Closed(claimed)) => {
                self.roll_back(&claimed, slot).await?;
                report.deferred += 1;
                Ok(Flow::Backpressure)
            }
        }
    }

    /// Persist a Skip resolution: advance the slot and write one
    /// MisfireSkipped record for all dropped slots.
    async fn skip_missed(
        &self,
        job: &JobDefinition,
        first_missed: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
        skipped: u32,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<Flow> {
        let mutation = JobMutation {
            state: if next.is_some() {
                JobState::Scheduled
            } else {
                JobState::Completed
            },
            next_fire_time: next,
            ..job.mutation()
        };
        let records = [RecordWrite::Insert(NewExecution::misfire_skipped(
            &job.id,
            Some(first_missed),
            now,
            skipped,
            self.deps.instance.as_str(),
        ))];
        match self
            .deps
            .store
            .conditional_update_with_records(&job.id, job.version, &mutation, &records)
            .await?
        {
            WriteOutcome::Applied { .. } => {
                info!(job_id = %job.id, skipped, next = ?next, "missed slots skipped");
                report.misfires_skipped += 1;
            }
            WriteOutcome::Conflict => {
                debug!(job_id = %job.id, "misfire skip lost to another instance");
                report.conflicts += 1;
            }
        }
        Ok(Flow::Continue)
    }

    /// Undo a claim the executor refused, restoring the original slot.
    ///
    /// A facade write may land between claim and rollback (pause request or
    /// delete); the rollback is then re-applied on the fresh row.
    async fn roll_back(&self, claimed: &ClaimedJob, slot: DateTime<Utc>) -> Result<()> {
        let store = &self.deps.store;
        let mut current = claimed.job.clone();
        for _ in 0..3 {
            let mut mutation = current.mutation().release();
            if current.state != JobState::Deleted {
                mutation.state = JobState::Scheduled;
                mutation.next_fire_time = Some(slot);
                if current.pause_requested {
                    mutation.state = JobState::Paused;
                    mutation.next_fire_time = None;
                    mutation.pause_requested = false;
                }
            }
            if store
                .conditional_update(&current.id, current.version, &mutation)
                .await?
                .is_applied()
            {
                return Ok(());
            }
            match store.get_by_id(&current.id).await? {
                Some(fresh) if fresh.claim_token == claimed.job.claim_token => current = fresh,
                _ => return Ok(()),
            }
        }
        warn!(job_id = %current.id, "claim rollback kept racing, leaving it to the recovery sweep");
        Ok(())
    }
}

enum Flow {
    Continue,
    Backpressure,
}
