//! Worker pool that runs claimed jobs.
//!
//! Claimed jobs enter a bounded queue; a dispatcher hands them to at most
//! `workers` concurrent tasks (semaphore permits). Each run is recorded as an
//! execution record and the job is rescheduled in the same transaction that
//! closes the record.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_core::config::ExecutorConfig;
use cadence_core::InstanceId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::Result;
use crate::handler::{HandlerRegistry, JobContext};
use crate::health::Health;
use crate::schedule::TriggerCalculator;
use crate::store::JobStore;
use crate::types::{
    ExecutionClose, JobDefinition, JobMutation, JobState, NewExecution, Outcome, RecordWrite,
    WriteOutcome,
};

/// A job this instance has claimed and must run.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// Snapshot taken right after the claim (state Running, claimed version).
    pub job: JobDefinition,
    /// The slot being fired.
    pub scheduled_for: DateTime<Utc>,
}

impl ClaimedJob {
    pub fn claim_token(&self) -> Option<&str> {
        self.job.claim_token.as_deref()
    }
}

/// Why `try_submit` handed a job back.
#[derive(Debug)]
pub enum SubmitError {
    /// Queue at capacity; the caller should roll the claim back and retry later.
    Full(ClaimedJob),
    /// The executor is shutting down.
    Closed(ClaimedJob),
}

/// Counters since start.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExecutorStats {
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub in_flight: usize,
}

/// Shared collaborators of the executor, the loop and the sweep.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<HandlerRegistry>,
    pub calculator: TriggerCalculator,
    pub clock: Arc<dyn Clock>,
    pub health: Arc<Health>,
    pub instance: InstanceId,
}

pub struct Executor {
    inner: Arc<Inner>,
    tx: mpsc::Sender<ClaimedJob>,
    stop: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    deps: ExecutorDeps,
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    accepting: AtomicBool,
    /// Cancelled when the shutdown grace period runs out.
    force: CancellationToken,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl Executor {
    /// Build the pool and spawn its dispatcher. Must be called inside a Tokio runtime.
    pub fn new(deps: ExecutorDeps, config: ExecutorConfig) -> Self {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let inner = Arc::new(Inner {
            deps,
            semaphore: Arc::new(Semaphore::new(workers)),
            config,
            tracker: TaskTracker::new(),
            accepting: AtomicBool::new(true),
            force: CancellationToken::new(),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        });
        let stop = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&inner), rx, stop.clone()));
        info!(workers, "executor started");

        Self {
            inner,
            tx,
            stop,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queue a claimed job without waiting.
    pub fn try_submit(&self, claimed: ClaimedJob) -> std::result::Result<(), SubmitError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(SubmitError::Closed(claimed));
        }
        self.tx.try_send(claimed).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => SubmitError::Full(job),
            mpsc::error::TrySendError::Closed(job) => SubmitError::Closed(job),
        })
    }

    pub fn stats(&self) -> ExecutorStats {
        let workers = self.inner.config.workers.max(1);
        ExecutorStats {
            succeeded: self.inner.succeeded.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
            timed_out: self.inner.timed_out.load(Ordering::SeqCst),
            in_flight: workers - self.inner.semaphore.available_permits(),
        }
    }

    /// Stop accepting work, roll back queued claims, give in-flight runs the
    /// grace period, then force-cancel whatever is left.
    ///
    /// Force-cancelled runs get their record closed as Timeout; their job
    /// stays Running until the recovery sweep resets it.
    pub async fn shutdown(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.stop.cancel();

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                error!("executor dispatcher panicked: {e}");
            }
        }

        self.inner.tracker.close();
        let grace = self.inner.config.shutdown_grace();
        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.inner.tracker.len(),
                "shutdown grace period elapsed, cancelling remaining jobs"
            );
            self.inner.force.cancel();
            self.inner.tracker.wait().await;
        }
        info!("executor stopped");
    }

    #[cfg(test)]
    async fn execute_now(&self, claimed: ClaimedJob) {
        self.inner.execute(claimed).await
    }
}

async fn dispatch(inner: Arc<Inner>, mut rx: mpsc::Receiver<ClaimedJob>, stop: CancellationToken) {
    loop {
        let claimed = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = rx.recv() => match next {
                Some(claimed) => claimed,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                inner.release_claim(claimed).await;
                break;
            }
            permit = Arc::clone(&inner.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    inner.release_claim(claimed).await;
                    break;
                }
            },
        };

        let worker = Arc::clone(&inner);
        inner.tracker.spawn(async move {
            worker.execute(claimed).await;
            drop(permit);
        });
    }

    // Claims that never reached a worker go back to Scheduled.
    rx.close();
    while let Some(claimed) = rx.recv().await {
        inner.release_claim(claimed).await;
    }
    debug!("executor dispatcher exited");
}

/// Version conflicts tolerated by one completion write before it gives up.
const MAX_COMPLETION_CONFLICTS: u32 = 32;

/// How a completed run maps onto the job's next state.
enum Plan {
    /// The body ran, or the run was recorded as failed before starting.
    Ran { finished_at: DateTime<Utc> },
    /// The run never started; keep the current slot.
    Release,
}

impl Inner {
    async fn execute(&self, claimed: ClaimedJob) {
        let job = &claimed.job;
        let store = &self.deps.store;
        let instance = self.deps.instance.as_str();

        let Some(handler) = self.deps.registry.get(&job.handler) else {
            warn!(
                job_id = %job.id,
                handler = %job.handler,
                "no handler registered on this instance, recording failure"
            );
            let now = self.deps.clock.now();
            let record = NewExecution::closed(
                &job.id,
                Some(claimed.scheduled_for),
                now,
                ExecutionClose::new(
                    Outcome::Failure,
                    now,
                    Some(format!("no handler registered for '{}'", job.handler)),
                ),
                instance,
            );
            self.failed.fetch_add(1, Ordering::SeqCst);
            self.complete(
                &claimed,
                Some(RecordWrite::Insert(record)),
                Plan::Ran { finished_at: now },
            )
            .await;
            return;
        };

        let started_at = self.deps.clock.now();
        let open = NewExecution::open(&job.id, Some(claimed.scheduled_for), started_at, instance);
        let Some(record_id) = self
            .retry_store("open execution record", &job.id, || {
                store.insert_execution_record(&open)
            })
            .await
        else {
            return;
        };

        let cancel = self.force.child_token();
        let ctx = JobContext {
            job_id: job.id.clone(),
            name: job.name.clone(),
            payload: job.payload.clone(),
            scheduled_for: Some(claimed.scheduled_for),
            cancel: cancel.clone(),
        };
        let timeout = job
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.default_timeout());

        info!(job_id = %job.id, name = %job.name, record_id, "job started");
        let mut body = tokio::spawn(async move { handler.run(ctx).await });

        let (outcome, detail) = tokio::select! {
            biased;
            _ = self.force.cancelled() => {
                self.reap(body).await;
                self.timed_out.fetch_add(1, Ordering::SeqCst);
                let close = ExecutionClose::new(
                    Outcome::Timeout,
                    self.deps.clock.now(),
                    Some("cancelled by shutdown".to_string()),
                );
                if let Err(e) = store.close_execution_record(record_id, &close).await {
                    error!(job_id = %job.id, record_id, "could not close record on shutdown: {e}");
                }
                warn!(job_id = %job.id, "job cancelled by shutdown, left running for recovery");
                return;
            }
            joined = &mut body => match joined {
                Ok(Ok(())) => (Outcome::Success, None),
                Ok(Err(failure)) => (Outcome::Failure, Some(failure.to_string())),
                Err(e) if e.is_panic() => (Outcome::Failure, Some("job body panicked".to_string())),
                Err(e) => (Outcome::Failure, Some(format!("job body aborted: {e}"))),
            },
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                self.reap(body).await;
                (Outcome::Timeout, Some(format!("exceeded timeout of {}s", timeout.as_secs())))
            }
        };

        match outcome {
            Outcome::Success => self.succeeded.fetch_add(1, Ordering::SeqCst),
            Outcome::Timeout => self.timed_out.fetch_add(1, Ordering::SeqCst),
            _ => self.failed.fetch_add(1, Ordering::SeqCst),
        };

        let finished_at = self.deps.clock.now();
        info!(
            job_id = %job.id,
            %outcome,
            error = detail.as_deref().unwrap_or(""),
            "job finished"
        );
        let close = ExecutionClose::new(outcome, finished_at, detail);
        self.complete(
            &claimed,
            Some(RecordWrite::Close { record_id, close }),
            Plan::Ran { finished_at },
        )
        .await;
    }

    /// Give a cancelled body its grace period, then abort it.
    async fn reap(&self, mut body: JoinHandle<std::result::Result<(), crate::handler::JobFailure>>) {
        if tokio::time::timeout(self.config.cancel_grace(), &mut body)
            .await
            .is_err()
        {
            body.abort();
        }
    }

    /// Hand an unstarted claim back to the scheduler.
    async fn release_claim(&self, claimed: ClaimedJob) {
        debug!(job_id = %claimed.job.id, "releasing unstarted claim");
        self.complete(&claimed, None, Plan::Release).await;
    }

    /// Write the post-run job state (and record side effect) conditioned on
    /// the current version.
    ///
    /// Store failures back off exponentially and share the `persist_retries`
    /// budget; version conflicts re-read immediately under their own bound.
    async fn complete(&self, claimed: &ClaimedJob, record: Option<RecordWrite>, plan: Plan) {
        let store = &self.deps.store;
        let id = claimed.job.id.as_str();
        let records: Vec<RecordWrite> = record.into_iter().collect();
        let attempts = self.config.persist_retries.max(1);
        let mut backoff = self.config.persist_backoff();
        let mut failures = 0u32;
        let mut conflicts = 0u32;

        while failures < attempts && conflicts < MAX_COMPLETION_CONFLICTS {
            let fresh = match store.get_by_id(id).await {
                Ok(fresh) => {
                    self.deps.health.record_success();
                    fresh
                }
                Err(e) => {
                    failures += 1;
                    self.deps.health.record_failure(&e);
                    warn!(job_id = %id, attempt = failures, "completion read failed: {e}");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    continue;
                }
            };

            let owned = fresh
                .as_ref()
                .is_some_and(|f| f.claim_token.as_deref() == claimed.claim_token());
            let Some(fresh) = fresh.filter(|_| owned) else {
                info!(job_id = %id, "claim no longer owned, discarding results");
                self.discard(&records).await;
                return;
            };

            let mutation = self.next_mutation(&fresh, &plan);
            match store
                .conditional_update_with_records(id, fresh.version, &mutation, &records)
                .await
            {
                Ok(WriteOutcome::Applied { version }) => {
                    debug!(job_id = %id, version, state = %mutation.state, "job rescheduled");
                    return;
                }
                Ok(WriteOutcome::Conflict) => {
                    conflicts += 1;
                    debug!(job_id = %id, conflicts, "completion write raced, re-reading");
                }
                Err(e) => {
                    failures += 1;
                    self.deps.health.record_failure(&e);
                    warn!(job_id = %id, attempt = failures, "completion write failed: {e}");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }

        error!(
            job_id = %id,
            failures,
            conflicts,
            "ALERT: could not persist job completion, leaving it running for the recovery sweep"
        );
    }

    fn next_mutation(&self, fresh: &JobDefinition, plan: &Plan) -> JobMutation {
        let base = fresh.mutation().release();
        if fresh.state == JobState::Deleted {
            return base;
        }

        let mut next = match plan {
            Plan::Release => JobMutation {
                state: JobState::Scheduled,
                ..base
            },
            Plan::Ran { finished_at } => {
                let run_count = base.run_count + 1;
                let exhausted = fresh.max_runs.is_some_and(|max| run_count >= max);
                let (state, next_fire_time) = if exhausted {
                    (JobState::Completed, None)
                } else {
                    match self.deps.calculator.next_fire_time(
                        &fresh.schedule,
                        *finished_at,
                        fresh.misfire_policy,
                        self.deps.clock.now(),
                    ) {
                        Ok(next) => {
                            if next.skipped > 0 {
                                debug!(job_id = %fresh.id, skipped = next.skipped, "slots missed during run");
                            }
                            match next.fire_at {
                                Some(at) => (JobState::Scheduled, Some(at)),
                                None => (JobState::Completed, None),
                            }
                        }
                        Err(e) => {
                            warn!(job_id = %fresh.id, "cannot reschedule: {e}");
                            (JobState::Failed, None)
                        }
                    }
                };
                JobMutation {
                    state,
                    next_fire_time,
                    run_count,
                    ..base
                }
            }
        };

        if next.state == JobState::Scheduled && next.pause_requested {
            next.state = JobState::Paused;
            next.next_fire_time = None;
            next.pause_requested = false;
        }
        next
    }

    /// Close any open record of a run whose job moved on without us.
    async fn discard(&self, records: &[RecordWrite]) {
        for write in records {
            if let RecordWrite::Close { record_id, close } = write {
                if let Err(e) = self.deps.store.close_execution_record(*record_id, close).await {
                    error!(record_id, "could not close discarded execution record: {e}");
                }
            }
        }
    }

    async fn retry_store<T, F, Fut>(&self, what: &str, job_id: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.config.persist_retries.max(1);
        let mut backoff = self.config.persist_backoff();
        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Some(value),
                Err(e) => {
                    self.deps.health.record_failure(&e);
                    warn!(job_id, attempt, "{what} failed: {e}");
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        error!(job_id, attempts, "ALERT: {what} failed, leaving job running for the recovery sweep");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::handler::{FnHandler, JobFailure};
    use crate::store::SqliteJobStore;
    use crate::types::{MisfirePolicy, Schedule};
    use chrono::TimeZone;

    struct Fixture {
        store: Arc<SqliteJobStore>,
        clock: ManualClock,
        executor: Executor,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
    }

    fn fixture(config: ExecutorConfig) -> Fixture {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        let clock = ManualClock::new(t0());
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("ok", Arc::new(FnHandler(|_ctx: JobContext| async { Ok(()) })));
        registry.register(
            "fail",
            Arc::new(FnHandler(|_ctx: JobContext| async { Err(JobFailure::new("kaput")) })),
        );
        registry.register(
            "hang",
            Arc::new(FnHandler(|ctx: JobContext| async move {
                ctx.cancel.cancelled().await;
                Err(JobFailure::new("cancelled"))
            })),
        );
        let deps = ExecutorDeps {
            store: store.clone(),
            registry,
            calculator: TriggerCalculator::default(),
            clock: Arc::new(clock.clone()),
            health: Arc::new(Health::new(3)),
            instance: InstanceId::from("test-node"),
        };
        Fixture {
            store,
            clock,
            executor: Executor::new(deps, config),
        }
    }

    /// Insert a job and claim it the way the scheduler loop does.
    async fn claimed(store: &SqliteJobStore, handler: &str, schedule: Schedule) -> ClaimedJob {
        let job = JobDefinition {
            id: format!("job-{handler}"),
            name: format!("name-{handler}"),
            schedule,
            misfire_policy: MisfirePolicy::FireNow,
            handler: handler.to_string(),
            payload: serde_json::Value::Null,
            timeout_secs: Some(1),
            max_runs: None,
            run_count: 0,
            state: JobState::Scheduled,
            next_fire_time: Some(t0()),
            last_execution: None,
            version: 1,
            claim_token: None,
            claimed_at: None,
            pause_requested: false,
            created_at: t0(),
            updated_at: t0(),
        };
        store.insert(&job).await.unwrap();
        let mut claim = job.mutation();
        claim.state = JobState::Running;
        claim.claim_token = Some("token".into());
        claim.claimed_at = Some(t0());
        let WriteOutcome::Applied { version } =
            store.conditional_update(&job.id, 1, &claim).await.unwrap()
        else {
            panic!("claim failed");
        };
        let job = store.get_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(job.version, version);
        ClaimedJob {
            job,
            scheduled_for: t0(),
        }
    }

    #[tokio::test]
    async fn success_reschedules_from_finish_time() {
        let fx = fixture(ExecutorConfig::default());
        let job = claimed(&fx.store, "ok", Schedule::Interval { every_secs: 5 }).await;
        fx.clock.advance(chrono::Duration::milliseconds(200));

        fx.executor.execute_now(job).await;

        let stored = fx.store.get_by_id("job-ok").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Scheduled);
        assert_eq!(
            stored.next_fire_time,
            Some(t0() + chrono::Duration::milliseconds(5_200))
        );
        assert_eq!(stored.run_count, 1);
        assert!(stored.claim_token.is_none());

        let history = fx.store.recent_executions("job-ok", 5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, Some(Outcome::Success));
        assert_eq!(stored.last_execution, Some(history[0].id));
        assert_eq!(fx.executor.stats().succeeded, 1);
    }

    #[tokio::test]
    async fn failure_keeps_job_scheduled() {
        let fx = fixture(ExecutorConfig::default());
        let job = claimed(&fx.store, "fail", Schedule::Interval { every_secs: 60 }).await;

        fx.executor.execute_now(job).await;

        let stored = fx.store.get_by_id("job-fail").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Scheduled);
        assert_eq!(stored.next_fire_time, Some(t0() + chrono::Duration::seconds(60)));
        let history = fx.store.recent_executions("job-fail", 5).await.unwrap();
        assert_eq!(history[0].outcome, Some(Outcome::Failure));
        assert_eq!(history[0].error_detail.as_deref(), Some("kaput"));
    }

    #[tokio::test]
    async fn timeout_cancels_body_and_records_timeout() {
        let fx = fixture(ExecutorConfig {
            cancel_grace_ms: 50,
            ..Default::default()
        });
        let job = claimed(&fx.store, "hang", Schedule::Interval { every_secs: 60 }).await;

        fx.executor.execute_now(job).await;

        let history = fx.store.recent_executions("job-hang", 5).await.unwrap();
        assert_eq!(history[0].outcome, Some(Outcome::Timeout));
        let stored = fx.store.get_by_id("job-hang").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Scheduled);
        assert_eq!(fx.executor.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn one_shot_completes() {
        let fx = fixture(ExecutorConfig::default());
        let job = claimed(&fx.store, "ok", Schedule::Once { at: t0() }).await;

        fx.executor.execute_now(job).await;

        let stored = fx.store.get_by_id("job-ok").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert!(stored.next_fire_time.is_none());
    }

    #[tokio::test]
    async fn missing_handler_records_failure_and_reschedules() {
        let fx = fixture(ExecutorConfig::default());
        let mut job = claimed(&fx.store, "ok", Schedule::Interval { every_secs: 5 }).await;
        job.job.handler = "vanished".into();

        fx.executor.execute_now(job).await;

        let stored = fx.store.get_by_id("job-ok").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Scheduled);
        assert_eq!(stored.next_fire_time, Some(t0() + chrono::Duration::seconds(5)));
        assert!(stored.claim_token.is_none());
        let history = fx.store.recent_executions("job-ok", 5).await.unwrap();
        assert_eq!(history[0].outcome, Some(Outcome::Failure));
        assert_eq!(
            history[0].error_detail.as_deref(),
            Some("no handler registered for 'vanished'")
        );
        assert!(!history[0].is_open());
        assert_eq!(fx.executor.stats().failed, 1);
    }

    #[tokio::test]
    async fn deleted_while_running_discards_results() {
        let fx = fixture(ExecutorConfig::default());
        let job = claimed(&fx.store, "ok", Schedule::Interval { every_secs: 5 }).await;

        let current = fx.store.get_by_id("job-ok").await.unwrap().unwrap();
        let mut deleted = current.mutation();
        deleted.state = JobState::Deleted;
        deleted.next_fire_time = None;
        fx.store
            .conditional_update("job-ok", current.version, &deleted)
            .await
            .unwrap();

        fx.executor.execute_now(job).await;

        let stored = fx.store.get_by_id("job-ok").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Deleted);
        assert!(stored.next_fire_time.is_none());
        assert_eq!(stored.run_count, 0);
        assert!(stored.claim_token.is_none());
        assert!(fx.store.open_execution("job-ok").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pause_requested_during_run_lands_paused() {
        let fx = fixture(ExecutorConfig::default());
        let job = claimed(&fx.store, "ok", Schedule::Interval { every_secs: 5 }).await;

        let current = fx.store.get_by_id("job-ok").await.unwrap().unwrap();
        let mut pause = current.mutation();
        pause.pause_requested = true;
        fx.store
            .conditional_update("job-ok", current.version, &pause)
            .await
            .unwrap();

        fx.executor.execute_now(job).await;

        let stored = fx.store.get_by_id("job-ok").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Paused);
        assert!(stored.next_fire_time.is_none());
        assert!(!stored.pause_requested);
    }

    #[tokio::test]
    async fn full_queue_hands_job_back() {
        let fx = fixture(ExecutorConfig {
            workers: 1,
            queue_capacity: 1,
            ..Default::default()
        });
        let blocker = claimed(&fx.store, "hang", Schedule::Interval { every_secs: 60 }).await;
        let mut extra = blocker.clone();
        extra.job.id = "other".into();

        // one running, one waiting for the permit, one queued: the next is refused
        fx.executor.try_submit(blocker.clone()).unwrap();
        let mut refused = None;
        for _ in 0..3 {
            if let Err(e) = fx.executor.try_submit(extra.clone()) {
                refused = Some(e);
                break;
            }
        }
        assert!(matches!(refused, Some(SubmitError::Full(_))));
    }

    #[tokio::test]
    async fn shutdown_force_cancels_and_leaves_job_running() {
        let fx = fixture(ExecutorConfig {
            shutdown_grace_secs: 0,
            cancel_grace_ms: 50,
            default_timeout_secs: 600,
            ..Default::default()
        });
        let mut job = claimed(&fx.store, "hang", Schedule::Interval { every_secs: 60 }).await;
        job.job.timeout_secs = None;
        fx.executor.try_submit(job).unwrap();

        // wait until the record is open, i.e. the body is running
        for _ in 0..100 {
            if fx.store.open_execution("job-hang").await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        fx.executor.shutdown().await;

        let stored = fx.store.get_by_id("job-hang").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Running);
        let history = fx.store.recent_executions("job-hang", 5).await.unwrap();
        assert_eq!(history[0].outcome, Some(Outcome::Timeout));
        assert_eq!(history[0].error_detail.as_deref(), Some("cancelled by shutdown"));

        // a stopped executor refuses new work
        let again = claimed(&fx.store, "ok", Schedule::Interval { every_secs: 5 }).await;
        assert!(matches!(fx.executor.try_submit(again), Err(SubmitError::Closed(_))));
    }
}
