//! Periodic reset of jobs whose claim outlived any plausible run.
//!
//! A claim older than the staleness threshold means the worker that held it
//! crashed or lost its store connection. The sweep closes the orphaned
//! execution record and reschedules the job from the current time.

use std::sync::Arc;

use cadence_core::config::RecoveryConfig;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::executor::ExecutorDeps;
use crate::types::{
    ExecutionClose, JobDefinition, JobState, NewExecution, Outcome, RecordWrite, WriteOutcome,
};

/// Detail written on records whose worker disappeared.
pub const ABANDONED_DETAIL: &str = "execution abandoned: worker lost";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub recovered: usize,
    pub conflicts: usize,
}

pub struct RecoverySweep {
    deps: ExecutorDeps,
    config: RecoveryConfig,
}

impl RecoverySweep {
    pub fn new(deps: ExecutorDeps, config: RecoveryConfig) -> Self {
        Self { deps, config }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            every_secs = self.config.sweep_interval_secs,
            staleness_secs = self.config.staleness_secs,
            "recovery sweep started"
        );
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.deps.health.is_degraded() {
                        continue;
                    }
                    if let Err(e) = self.sweep().await {
                        error!("recovery sweep error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("recovery sweep shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Reset every stale claim once.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.deps.clock.now();
        let staleness = chrono::Duration::from_std(self.config.staleness())
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(staleness).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = match self.deps.store.find_stale_claims(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                self.deps.health.record_failure(&e);
                return Err(e);
            }
        };

        let mut report = SweepReport::default();
        for job in stale {
            match self.recover(&job, now).await {
                Ok(true) => report.recovered += 1,
                Ok(false) => report.conflicts += 1,
                Err(e) => {
                    self.deps.health.record_failure(&e);
                    warn!(job_id = %job.id, "could not recover stale job: {e}");
                }
            }
        }
        if report.recovered > 0 {
            info!(recovered = report.recovered, "stale claims reset");
        }
        Ok(report)
    }

    async fn recover(&self, job: &JobDefinition, now: DateTime<Utc>) -> Result<bool> {
        let store = &self.deps.store;
        let instance = self.deps.instance.as_str();
        let mut records = Vec::new();

        if let Some(open) = store.open_execution(&job.id).await? {
            records.push(RecordWrite::Close {
                record_id: open.id,
                close: ExecutionClose::new(Outcome::Failure, now, Some(ABANDONED_DETAIL.into())),
            });
        }

        let mut mutation = job.mutation().release();
        if job.state == JobState::Running {
            let (state, next, skipped) = self.reschedule(job, now);
            mutation.state = state;
            mutation.next_fire_time = next;
            if mutation.state == JobState::Scheduled && job.pause_requested {
                mutation.state = JobState::Paused;
                mutation.next_fire_time = None;
            }
            mutation.pause_requested = false;
            if skipped > 0 {
                records.push(RecordWrite::Insert(NewExecution::misfire_skipped(
                    &job.id,
                    job.next_fire_time,
                    now,
                    skipped,
                    instance,
                )));
            }
        }

        match store
            .conditional_update_with_records(&job.id, job.version, &mutation, &records)
            .await?
        {
            WriteOutcome::Applied { .. } => {
                warn!(
                    job_id = %job.id,
                    claimed_at = ?job.claimed_at,
                    state = %mutation.state,
                    next = ?mutation.next_fire_time,
                    "recovered job from stale claim"
                );
                Ok(true)
            }
            WriteOutcome::Conflict => {
                debug!(job_id = %job.id, "stale job changed while recovering, skipping");
                Ok(false)
            }
        }
    }

    /// Policy-dependent restart of a crashed run. The interrupted slot is due
    /// again, so it is resolved against `now` like any other missed slot.
    fn reschedule(&self, job: &JobDefinition, now: DateTime<Utc>) -> (JobState, Option<DateTime<Utc>>, u32) {
        let Some(slot) = job.next_fire_time.or(job.claimed_at) else {
            return (JobState::Scheduled, Some(now), 0);
        };
        match self
            .deps
            .calculator
            .resolve(&job.schedule, slot, job.misfire_policy, now)
        {
            Ok(next) => match next.fire_at {
                Some(at) => (JobState::Scheduled, Some(at), next.skipped),
                None => (JobState::Completed, None, next.skipped),
            },
            Err(e) => {
                warn!(job_id = %job.id, "unusable schedule during recovery: {e}");
                (JobState::Failed, None, 0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::handler::HandlerRegistry;
    use crate::health::Health;
    use crate::schedule::TriggerCalculator;
    use crate::store::{JobStore, SqliteJobStore};
    use crate::types::{MisfirePolicy, Schedule};
    use cadence_core::InstanceId;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn sweep_at(store: Arc<SqliteJobStore>, now: DateTime<Utc>) -> RecoverySweep {
        let deps = ExecutorDeps {
            store,
            registry: Arc::new(HandlerRegistry::new()),
            calculator: TriggerCalculator::default(),
            clock: Arc::new(ManualClock::new(now)),
            health: Arc::new(Health::new(3)),
            instance: InstanceId::from("sweeper"),
        };
        RecoverySweep::new(
            deps,
            RecoveryConfig {
                sweep_interval_secs: 30,
                staleness_secs: 600,
            },
        )
    }

    async fn stuck_job(store: &SqliteJobStore, policy: MisfirePolicy, claimed_at: DateTime<Utc>) {
        let job = JobDefinition {
            id: "stuck".into(),
            name: "stuck".into(),
            schedule: Schedule::Interval { every_secs: 60 },
            misfire_policy: policy,
            handler: "noop".into(),
            payload: serde_json::Value::Null,
            timeout_secs: None,
            max_runs: None,
            run_count: 0,
            state: JobState::Scheduled,
            next_fire_time: Some(claimed_at),
            last_execution: None,
            version: 1,
            claim_token: None,
            claimed_at: None,
            pause_requested: false,
            created_at: t(0),
            updated_at: t(0),
        };
        store.insert(&job).await.unwrap();
        let mut claim = job.mutation();
        claim.state = JobState::Running;
        claim.claim_token = Some("dead-worker".into());
        claim.claimed_at = Some(claimed_at);
        store.conditional_update("stuck", 1, &claim).await.unwrap();
        store
            .insert_execution_record(&NewExecution::open("stuck", Some(claimed_at), claimed_at, "gone"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fresh_claims_are_left_alone() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        stuck_job(&store, MisfirePolicy::FireNow, t(0)).await;

        let report = sweep_at(store.clone(), t(300)).sweep().await.unwrap();
        assert_eq!(report, SweepReport::default());
        let job = store.get_by_id("stuck").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Running);
    }

    #[tokio::test]
    async fn stale_claim_is_reset_and_record_closed() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        stuck_job(&store, MisfirePolicy::FireNow, t(0)).await;

        let report = sweep_at(store.clone(), t(660)).sweep().await.unwrap();
        assert_eq!(report.recovered, 1);

        let job = store.get_by_id("stuck").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Scheduled);
        assert_eq!(job.next_fire_time, Some(t(660)));
        assert!(job.claim_token.is_none());

        let history = store.recent_executions("stuck", 5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, Some(Outcome::Failure));
        assert_eq!(history[0].error_detail.as_deref(), Some(ABANDONED_DETAIL));
    }

    #[tokio::test]
    async fn skip_policy_writes_one_misfire_record() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        stuck_job(&store, MisfirePolicy::Skip, t(0)).await;

        sweep_at(store.clone(), t(650)).sweep().await.unwrap();

        let job = store.get_by_id("stuck").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Scheduled);
        // intervals restart from now once slots are dropped
        assert_eq!(job.next_fire_time, Some(t(710)));

        let history = store.recent_executions("stuck", 5).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].outcome, Some(Outcome::MisfireSkipped));
        assert_eq!(history[0].skipped_slots, 11);
        assert_eq!(history[1].outcome, Some(Outcome::Failure));
    }

    #[tokio::test]
    async fn deleted_job_only_loses_its_claim() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        stuck_job(&store, MisfirePolicy::FireNow, t(0)).await;
        let running = store.get_by_id("stuck").await.unwrap().unwrap();
        let mut deleted = running.mutation();
        deleted.state = JobState::Deleted;
        deleted.next_fire_time = None;
        store
            .conditional_update("stuck", running.version, &deleted)
            .await
            .unwrap();

        let report = sweep_at(store.clone(), t(660)).sweep().await.unwrap();
        assert_eq!(report.recovered, 1);

        let job = store.get_by_id("stuck").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Deleted);
        assert!(job.claim_token.is_none());
        assert!(job.next_fire_time.is_none());
        assert!(store.open_execution("stuck").await.unwrap().is_none());
    }
}
