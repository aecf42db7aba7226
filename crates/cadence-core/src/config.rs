use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000; // ±1 s scheduling precision
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub rates: RatesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduler loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Delay between two polls of the job store.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Upper bound on due jobs fetched per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// A due slot older than this (relative to now) counts as a misfire.
    #[serde(default = "default_misfire_threshold_ms")]
    pub misfire_threshold_ms: u64,
    /// Consecutive store failures before the service degrades to read-only.
    #[serde(default = "default_max_store_failures")]
    pub max_store_failures: u32,
    /// Fixed instance identifier. A fresh UUIDv7 is generated when unset.
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn misfire_threshold(&self) -> Duration {
        Duration::from_millis(self.misfire_threshold_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            batch_size: default_batch_size(),
            misfire_threshold_ms: default_misfire_threshold_ms(),
            max_store_failures: default_max_store_failures(),
            instance_id: None,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Number of job bodies allowed to run concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Claimed jobs waiting for a free worker. A full queue pushes back on the loop.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Timeout applied to jobs that do not set their own.
    #[serde(default = "default_job_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Time a cancelled job body gets to return before it is aborted.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Attempts for the completion write before giving up.
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,
    /// Initial backoff between completion write attempts (doubles each retry).
    #[serde(default = "default_persist_backoff_ms")]
    pub persist_backoff_ms: u64,
    /// How long shutdown waits for in-flight jobs before forcing cancellation.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl ExecutorConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn persist_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            default_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            cancel_grace_ms: default_cancel_grace_ms(),
            persist_retries: default_persist_retries(),
            persist_backoff_ms: default_persist_backoff_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Recovery sweep settings.
///
/// `staleness_secs` must stay above the largest job timeout, otherwise the
/// sweep would reset jobs that are still legitimately running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
}

impl RecoveryConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            staleness_secs: default_staleness_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Execution records returned with a job status.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Attempts for a facade read-modify-write that keeps losing version races.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

/// Exchange-rate refresh job shipped with the gateway.
///
/// The job is only seeded when `api_url` is set. `{apiKey}` and `{code}` in
/// the URL are substituted per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesConfig {
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Base currency assigned to newly tracked codes.
    #[serde(default = "default_rates_base")]
    pub base: String,
    #[serde(default = "default_rates_refresh_cron")]
    pub refresh_cron: String,
    #[serde(default = "default_rates_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl RatesConfig {
    pub fn is_enabled(&self) -> bool {
        !self.api_url.trim().is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            base: default_rates_base(),
            refresh_cron: default_rates_refresh_cron(),
            request_timeout_secs: default_rates_request_timeout_secs(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}
fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_batch_size() -> usize {
    100
}
fn default_misfire_threshold_ms() -> u64 {
    1_000
}
fn default_max_store_failures() -> u32 {
    5
}
fn default_workers() -> usize {
    DEFAULT_WORKERS
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_job_timeout_secs() -> u64 {
    DEFAULT_JOB_TIMEOUT_SECS
}
fn default_cancel_grace_ms() -> u64 {
    500
}
fn default_persist_retries() -> u32 {
    3
}
fn default_persist_backoff_ms() -> u64 {
    100
}
fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_staleness_secs() -> u64 {
    DEFAULT_JOB_TIMEOUT_SECS * 2
}
fn default_history_limit() -> usize {
    20
}
fn default_conflict_retries() -> u32 {
    3
}
fn default_rates_base() -> String {
    "USD".to_string()
}
fn default_rates_refresh_cron() -> String {
    // top of every hour
    "0 0 * * * ?".to_string()
}
fn default_rates_request_timeout_secs() -> u64 {
    30
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CADENCE_EXECUTOR__WORKERS=8`. A missing file is not an error: every
    /// field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(CadenceConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CADENCE_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
