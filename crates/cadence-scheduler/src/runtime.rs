use std::sync::Arc;

use cadence_core::{CadenceConfig, InstanceId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    engine::SchedulerLoop,
    executor::{Executor, ExecutorDeps, ExecutorStats},
    handler::HandlerRegistry,
    health::Health,
    recovery::RecoverySweep,
    schedule::TriggerCalculator,
    service::JobService,
    store::JobStore,
};

/// A running scheduler instance: loop, sweep and worker pool sharing one
/// job store.
pub struct Runtime {
    service: JobService,
    executor: Arc<Executor>,
    instance: InstanceId,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Start on the system clock.
    pub fn start(store: Arc<dyn JobStore>, registry: Arc<HandlerRegistry>, config: &CadenceConfig) -> Self {
        Self::start_with_clock(store, registry, config, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        config: &CadenceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let instance = config
            .scheduler
            .instance_id
            .clone()
            .map(InstanceId::from)
            .unwrap_or_default();
        let deps = ExecutorDeps {
            store,
            registry,
            calculator: TriggerCalculator::new(config.scheduler.misfire_threshold()),
            clock,
            health: Arc::new(Health::new(config.scheduler.max_store_failures)),
            instance: instance.clone(),
        };

        let executor = Arc::new(Executor::new(deps.clone(), config.executor.clone()));
        let scheduler = Arc::new(SchedulerLoop::new(
            deps.clone(),
            Arc::clone(&executor),
            config.scheduler.clone(),
        ));
        let sweep = Arc::new(RecoverySweep::new(deps.clone(), config.recovery.clone()));
        let service = JobService::new(deps, config.service.clone());

        if config.recovery.staleness_secs <= config.executor.default_timeout_secs {
            warn!(
                staleness_secs = config.recovery.staleness_secs,
                default_timeout_secs = config.executor.default_timeout_secs,
                "recovery staleness does not exceed the job timeout; live runs may be reset"
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(scheduler.run(shutdown_rx.clone())),
            tokio::spawn(sweep.run(shutdown_rx)),
        ];
        info!(instance = %instance, "scheduler runtime started");

        Self {
            service,
            executor,
            instance,
            shutdown_tx,
            tasks,
        }
    }

    pub fn service(&self) -> &JobService {
        &self.service
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    /// Stop claiming, then drain the executor.
    pub async fn stop(self) {
        info!(instance = %self.instance, "scheduler runtime stopping");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("scheduler task panicked: {e}");
            }
        }
        self.executor.shutdown().await;
        info!(instance = %self.instance, "scheduler runtime stopped");
    }
}
