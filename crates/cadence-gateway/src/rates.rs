//! Exchange-rate tracking.
//!
//! Tracked currencies live in a SQLite `currencies` table. The
//! `refresh_rates` job handler pulls the latest rate for each of them from an
//! external API, writes it back and keeps the freshest values in an in-memory
//! cache that `GET /api/currencies/{code}` serves from.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use cadence_core::config::RatesConfig;
use cadence_scheduler::{
    HandlerRegistry, JobContext, JobDefinition, JobFailure, JobHandler, JobService, MisfirePolicy,
    NewJob, Schedule, SchedulerError,
};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const REFRESH_HANDLER: &str = "refresh_rates";
pub const REFRESH_JOB_NAME: &str = "refresh-exchange-rates";

#[derive(Debug, Error)]
pub enum RatesError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid currency code: '{0}'")]
    InvalidCode(String),

    #[error("Database lock poisoned")]
    Poisoned,
}

impl RatesError {
    pub fn code(&self) -> &'static str {
        match self {
            RatesError::Database(_) | RatesError::Poisoned => "DATABASE_ERROR",
            RatesError::Http(_) => "UPSTREAM_ERROR",
            RatesError::InvalidCode(_) => "INVALID_CURRENCY",
        }
    }
}

pub type Result<T> = std::result::Result<T, RatesError>;

/// A tracked currency pair and its last fetched rate (0 until the first refresh).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Currency {
    pub id: i64,
    pub base: String,
    pub code: String,
    pub exchange_rate: f64,
}

/// Currency table plus the rate cache.
pub struct RateBook {
    conn: Mutex<Connection>,
    cache: DashMap<String, Currency>,
    base: String,
}

impl RateBook {
    pub fn new(conn: Connection, base: &str) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS currencies (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                base          TEXT    NOT NULL,
                code          TEXT    NOT NULL,
                exchange_rate REAL    NOT NULL DEFAULT 0,
                UNIQUE (base, code)
            ) STRICT;
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache: DashMap::new(),
            base: base.to_ascii_uppercase(),
        })
    }

    pub fn open_in_memory(base: &str) -> Result<Self> {
        Self::new(Connection::open_in_memory()?, base)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RatesError::Poisoned)
    }

    pub fn list(&self) -> Result<Vec<Currency>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, base, code, exchange_rate FROM currencies ORDER BY id")?;
        let rows = stmt
            .query_map([], row_to_currency)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Start tracking `code` against the configured base. Adding a code twice
    /// returns the existing row.
    pub fn add(&self, code: &str) -> Result<Currency> {
        let code = normalize_code(code)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO currencies (base, code) VALUES (?1, ?2)
             ON CONFLICT (base, code) DO NOTHING",
            params![self.base, code],
        )?;
        let currency = conn.query_row(
            "SELECT id, base, code, exchange_rate FROM currencies WHERE base = ?1 AND code = ?2",
            params![self.base, code],
            row_to_currency,
        )?;
        Ok(currency)
    }

    /// Latest refreshed rate for `code`, if a refresh has seen it.
    pub fn cached(&self, code: &str) -> Option<Currency> {
        let code = code.to_ascii_uppercase();
        self.cache.get(&code).map(|entry| entry.value().clone())
    }

    /// Persist a fetched rate and publish it to the cache.
    pub fn record(&self, currency: &Currency, rate: f64) -> Result<Currency> {
        let conn = self.conn()?;
        let updated = conn
            .query_row(
                "UPDATE currencies SET exchange_rate = ?1 WHERE id = ?2
                 RETURNING id, base, code, exchange_rate",
                params![rate, currency.id],
                row_to_currency,
            )
            .optional()?;
        let updated = updated.unwrap_or_else(|| Currency {
            exchange_rate: rate,
            ..currency.clone()
        });
        self.cache.insert(updated.code.clone(), updated.clone());
        Ok(updated)
    }
}

fn row_to_currency(row: &rusqlite::Row<'_>) -> rusqlite::Result<Currency> {
    Ok(Currency {
        id: row.get(0)?,
        base: row.get(1)?,
        code: row.get(2)?,
        exchange_rate: row.get(3)?,
    })
}

fn normalize_code(code: &str) -> Result<String> {
    let code = code.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code.to_ascii_uppercase())
    } else {
        Err(RatesError::InvalidCode(code.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ExchangeRateResponse {
    #[serde(default)]
    rates: HashMap<String, f64>,
}

/// HTTP client for the exchange-rate API.
pub struct RateFetcher {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl RateFetcher {
    pub fn new(config: &RatesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn url_for(&self, code: &str) -> String {
        self.api_url
            .replace("{apiKey}", &self.api_key)
            .replace("{code}", code)
    }

    /// Current rate for `code`. An API answer without that rate (or a
    /// non-success status) yields 1.0; transport failures are errors.
    pub async fn fetch(&self, code: &str) -> Result<f64> {
        let resp = self.client.get(self.url_for(code)).send().await?;

        let status = resp.status();
        if !status.is_success() {
            warn!(code, status = status.as_u16(), "exchange-rate API error, using 1.0");
            return Ok(1.0);
        }

        let body: ExchangeRateResponse = resp.json().await?;
        match body.rates.get(code) {
            Some(rate) => Ok(*rate),
            None => {
                debug!(code, "rate missing from API response, using 1.0");
                Ok(1.0)
            }
        }
    }
}

/// Job body behind `refresh_rates`: fetch and store a rate for every tracked currency.
pub struct RefreshRatesHandler {
    book: Arc<RateBook>,
    fetcher: RateFetcher,
}

impl RefreshRatesHandler {
    pub fn new(book: Arc<RateBook>, fetcher: RateFetcher) -> Self {
        Self { book, fetcher }
    }
}

#[async_trait]
impl JobHandler for RefreshRatesHandler {
    async fn run(&self, ctx: JobContext) -> std::result::Result<(), JobFailure> {
        let currencies = self
            .book
            .list()
            .map_err(|e| JobFailure::new(format!("cannot list currencies: {e}")))?;

        for currency in &currencies {
            let rate = tokio::select! {
                rate = self.fetcher.fetch(&currency.code) => rate.map_err(|e| {
                    JobFailure::new(format!(
                        "failed to fetch exchange rate for currency: {}: {e}",
                        currency.code
                    ))
                })?,
                _ = ctx.cancel.cancelled() => return Err(JobFailure::new("rate refresh cancelled")),
            };
            self.book
                .record(currency, rate)
                .map_err(|e| JobFailure::new(format!("cannot store rate for {}: {e}", currency.code)))?;
        }

        info!(job_id = %ctx.job_id, refreshed = currencies.len(), "exchange rates refreshed");
        Ok(())
    }
}

pub fn register(registry: &HandlerRegistry, book: Arc<RateBook>, fetcher: RateFetcher) {
    registry.register(REFRESH_HANDLER, Arc::new(RefreshRatesHandler::new(book, fetcher)));
}

/// Register the periodic refresh job unless it already exists. Returns the
/// job when this call created it.
pub async fn ensure_refresh_job(
    jobs: &JobService,
    config: &RatesConfig,
) -> std::result::Result<Option<JobDefinition>, SchedulerError> {
    if !config.is_enabled() {
        return Ok(None);
    }
    if jobs.list().await?.iter().any(|job| job.name == REFRESH_JOB_NAME) {
        return Ok(None);
    }

    let new = NewJob::new(
        REFRESH_JOB_NAME,
        Schedule::Cron {
            expression: config.refresh_cron.clone(),
        },
        REFRESH_HANDLER,
    )
    .with_policy(MisfirePolicy::FireOnce);
    match jobs.register(new).await {
        Ok(job) => {
            info!(job_id = %job.id, cron = %config.refresh_cron, "exchange-rate refresh job registered");
            Ok(Some(job))
        }
        // another instance won the race
        Err(SchedulerError::DuplicateName { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
