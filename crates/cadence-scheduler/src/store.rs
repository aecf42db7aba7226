//! Job persistence: the `JobStore` repository contract and its SQLite
//! implementation.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::types::{
    ExecutionClose, ExecutionRecord, JobDefinition, JobMutation, JobState, NewExecution,
    Outcome, RecordWrite, WriteOutcome,
};

/// Repository contract consumed by the scheduler core.
///
/// Every operation is atomic at row granularity; the `conditional_*` writes
/// only land when the stored `version` still equals `expected_version`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Cheap connectivity probe.
    async fn ping(&self) -> Result<()>;

    async fn insert(&self, job: &JobDefinition) -> Result<()>;

    async fn get_by_id(&self, id: &str) -> Result<Option<JobDefinition>>;

    /// All jobs ordered by creation time.
    async fn list(&self, include_deleted: bool) -> Result<Vec<JobDefinition>>;

    /// Scheduled jobs due at or before `at`, earliest first (ties by id).
    async fn find_due_before(&self, at: DateTime<Utc>, limit: usize) -> Result<Vec<JobDefinition>>;

    /// Running (or deleted-while-running) jobs claimed before `claimed_before`.
    async fn find_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<Vec<JobDefinition>>;

    async fn conditional_update(
        &self,
        id: &str,
        expected_version: u64,
        mutation: &JobMutation,
    ) -> Result<WriteOutcome> {
        self.conditional_update_with_records(id, expected_version, mutation, &[])
            .await
    }

    /// Conditional job write plus execution-record side effects, committed in
    /// one transaction. The job's `last_execution` points at the last record
    /// touched.
    async fn conditional_update_with_records(
        &self,
        id: &str,
        expected_version: u64,
        mutation: &JobMutation,
        records: &[RecordWrite],
    ) -> Result<WriteOutcome>;

    /// Insert a record and return its id. Fails when the job already has an
    /// open record and `record` is open too.
    async fn insert_execution_record(&self, record: &NewExecution) -> Result<i64>;

    /// Close an open record. Returns `false` if it was not open.
    async fn close_execution_record(&self, record_id: i64, close: &ExecutionClose) -> Result<bool>;

    async fn open_execution(&self, job_id: &str) -> Result<Option<ExecutionRecord>>;

    /// Most recent records first.
    async fn recent_executions(&self, job_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>>;

    /// Physically remove a deleted job and its history. Returns `false` if
    /// no deleted job with this id exists.
    async fn purge(&self, id: &str) -> Result<bool>;
}

const JOB_COLUMNS: &str = "id, name, schedule, misfire_policy, handler, payload, timeout_secs,
     max_runs, run_count, state, next_fire_time, last_execution, version,
     claim_token, claimed_at, pause_requested, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, job_id, scheduled_for, started_at, finished_at, outcome,
     error_detail, instance_id, skipped_slots";

/// SQLite-backed store.
///
/// Wraps a single connection in a `Mutex`; clones share it. Separate
/// processes (or separate stores opened on the same file) coordinate purely
/// through the version column.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::Internal("job store connection mutex poisoned".into()))
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn ping(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    async fn insert(&self, job: &JobDefinition) -> Result<()> {
        let conn = self.conn()?;
        let schedule_json = serde_json::to_string(&job.schedule)?;
        let policy_json = serde_json::to_string(&job.misfire_policy)?;
        let payload_json = serde_json::to_string(&job.payload)?;

        let result = conn.execute(
            &format!(
                "INSERT INTO jobs ({JOB_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)"
            ),
            rusqlite::params![
                job.id,
                job.name,
                schedule_json,
                policy_json,
                job.handler,
                payload_json,
                job.timeout_secs.map(|s| s as i64),
                job.max_runs,
                job.run_count,
                job.state.to_string(),
                job.next_fire_time.map(fmt_ts),
                job.last_execution,
                job.version as i64,
                job.claim_token,
                job.claimed_at.map(fmt_ts),
                job.pause_requested,
                fmt_ts(job.created_at),
                fmt_ts(job.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, Some(msg)))
                if e.code == ErrorCode::ConstraintViolation
                    && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    && msg.contains("jobs.name") =>
            {
                Err(SchedulerError::DuplicateName {
                    name: job.name.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<JobDefinition>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                [id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    async fn list(&self, include_deleted: bool) -> Result<Vec<JobDefinition>> {
        let conn = self.conn()?;
        let sql = if include_deleted {
            format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at, id")
        } else {
            format!("SELECT {JOB_COLUMNS} FROM jobs WHERE state <> 'deleted' ORDER BY created_at, id")
        };
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    async fn find_due_before(&self, at: DateTime<Utc>, limit: usize) -> Result<Vec<JobDefinition>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE state = 'scheduled' AND next_fire_time IS NOT NULL AND next_fire_time <= ?1
             ORDER BY next_fire_time, id
             LIMIT ?2"
        ))?;
        let jobs = stmt
            .query_map(rusqlite::params![fmt_ts(at), limit as i64], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    async fn find_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<Vec<JobDefinition>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE state IN ('running', 'deleted')
               AND claim_token IS NOT NULL AND claimed_at < ?1
             ORDER BY claimed_at, id"
        ))?;
        let jobs = stmt
            .query_map([fmt_ts(claimed_before)], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    async fn conditional_update_with_records(
        &self,
        id: &str,
        expected_version: u64,
        mutation: &JobMutation,
        records: &[RecordWrite],
    ) -> Result<WriteOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = fmt_ts(Utc::now());

        let n = tx.execute(
            "UPDATE jobs SET state = ?1, next_fire_time = ?2, run_count = ?3,
                    claim_token = ?4, claimed_at = ?5, pause_requested = ?6,
                    version = version + 1, updated_at = ?7
             WHERE id = ?8 AND version = ?9",
            rusqlite::params![
                mutation.state.to_string(),
                mutation.next_fire_time.map(fmt_ts),
                mutation.run_count,
                mutation.claim_token,
                mutation.claimed_at.map(fmt_ts),
                mutation.pause_requested,
                now,
                id,
                expected_version as i64,
            ],
        )?;
        if n == 0 {
            debug!(job_id = %id, expected_version, "conditional update lost the version race");
            return Ok(WriteOutcome::Conflict);
        }

        let mut last_record = None;
        for write in records {
            match write {
                RecordWrite::Insert(record) => {
                    last_record = Some(insert_record(&tx, record)?);
                }
                RecordWrite::Close { record_id, close } => {
                    close_record(&tx, *record_id, close)?;
                    last_record = Some(*record_id);
                }
            }
        }
        if let Some(record_id) = last_record {
            tx.execute(
                "UPDATE jobs SET last_execution = ?1 WHERE id = ?2",
                rusqlite::params![record_id, id],
            )?;
        }

        tx.commit()?;
        Ok(WriteOutcome::Applied {
            version: expected_version + 1,
        })
    }

    async fn insert_execution_record(&self, record: &NewExecution) -> Result<i64> {
        let conn = self.conn()?;
        insert_record(&conn, record)
    }

    async fn close_execution_record(&self, record_id: i64, close: &ExecutionClose) -> Result<bool> {
        let conn = self.conn()?;
        close_record(&conn, record_id, close)
    }

    async fn open_execution(&self, job_id: &str) -> Result<Option<ExecutionRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {EXECUTION_COLUMNS} FROM job_executions
                     WHERE job_id = ?1 AND finished_at IS NULL"
                ),
                [job_id],
                row_to_execution,
            )
            .optional()?;
        Ok(record)
    }

    async fn recent_executions(&self, job_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions
             WHERE job_id = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;
        let records = stmt
            .query_map(rusqlite::params![job_id, limit as i64], row_to_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn purge(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted: bool = tx
            .query_row(
                "SELECT COUNT(*) FROM jobs WHERE id = ?1 AND state = 'deleted'",
                [id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)?;
        if !deleted {
            return Ok(false);
        }
        tx.execute("DELETE FROM job_executions WHERE job_id = ?1", [id])?;
        tx.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(true)
    }
}

fn insert_record(conn: &Connection, record: &NewExecution) -> Result<i64> {
    conn.execute(
        "INSERT INTO job_executions
         (job_id, scheduled_for, started_at, finished_at, outcome, error_detail,
          instance_id, skipped_slots)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        rusqlite::params![
            record.job_id,
            record.scheduled_for.map(fmt_ts),
            fmt_ts(record.started_at),
            record.finished_at.map(fmt_ts),
            record.outcome.map(|o| o.to_string()),
            record.error_detail,
            record.instance_id,
            record.skipped_slots,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn close_record(conn: &Connection, record_id: i64, close: &ExecutionClose) -> Result<bool> {
    let n = conn.execute(
        "UPDATE job_executions SET finished_at = ?1, outcome = ?2, error_detail = ?3
         WHERE id = ?4 AND finished_at IS NULL",
        rusqlite::params![
            fmt_ts(close.finished_at),
            close.outcome.to_string(),
            close.error_detail,
            record_id,
        ],
    )?;
    Ok(n > 0)
}

/// Fixed-width UTC timestamp; lexicographic order equals chronological order.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| parse_ts(idx, &s))
        .transpose()
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<JobDefinition> {
    let created: String = row.get(16)?;
    let updated: String = row.get(17)?;
    Ok(JobDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        schedule: parse_json(row, 2)?,
        misfire_policy: parse_json(row, 3)?,
        handler: row.get(4)?,
        payload: parse_json(row, 5)?,
        timeout_secs: row.get::<_, Option<i64>>(6)?.map(|s| s.max(0) as u64),
        max_runs: row.get(7)?,
        run_count: row.get(8)?,
        state: parse_enum::<JobState>(row, 9)?,
        next_fire_time: parse_opt_ts(row, 10)?,
        last_execution: row.get(11)?,
        version: row.get::<_, i64>(12)? as u64,
        claim_token: row.get(13)?,
        claimed_at: parse_opt_ts(row, 14)?,
        pause_requested: row.get(15)?,
        created_at: parse_ts(16, &created)?,
        updated_at: parse_ts(17, &updated)?,
    })
}

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let started: String = row.get(3)?;
    let outcome = row
        .get::<_, Option<String>>(5)?
        .map(|s| {
            s.parse::<Outcome>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into()))
        })
        .transpose()?;
    Ok(ExecutionRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        scheduled_for: parse_opt_ts(row, 2)?,
        started_at: parse_ts(3, &started)?,
        finished_at: parse_opt_ts(row, 4)?,
        outcome,
        error_detail: row.get(6)?,
        instance_id: row.get(7)?,
        skipped_slots: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MisfirePolicy, Schedule};
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn job(id: &str, name: &str, next: i64) -> JobDefinition {
        JobDefinition {
            id: id.to_string(),
            name: name.to_string(),
            schedule: Schedule::Interval { every_secs: 5 },
            misfire_policy: MisfirePolicy::Skip,
            handler: "log".into(),
            payload: serde_json::json!({"greeting": "hi"}),
            timeout_secs: Some(30),
            max_runs: None,
            run_count: 0,
            state: JobState::Scheduled,
            next_fire_time: Some(at(next)),
            last_execution: None,
            version: 1,
            claim_token: None,
            claimed_at: None,
            pause_requested: false,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    fn running(mut m: JobMutation, token: &str, claimed: i64) -> JobMutation {
        m.state = JobState::Running;
        m.claim_token = Some(token.into());
        m.claimed_at = Some(at(claimed));
        m
    }

    #[tokio::test]
    async fn insert_and_fetch_preserves_fields() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let original = job("a", "alpha", 5);
        store.insert(&original).await.unwrap();

        let fetched = store.get_by_id("a").await.unwrap().unwrap();
        assert_eq!(fetched, original);
        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn live_names_are_unique() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store.insert(&job("a", "alpha", 5)).await.unwrap();
        let err = store.insert(&job("b", "alpha", 5)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateName { .. }));

        // once deleted, the name can be reused
        let mut m = job("a", "alpha", 5).mutation();
        m.state = JobState::Deleted;
        m.next_fire_time = None;
        store.conditional_update("a", 1, &m).await.unwrap();
        store.insert(&job("b", "alpha", 5)).await.unwrap();
    }

    #[tokio::test]
    async fn id_collision_is_not_reported_as_duplicate_name() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store.insert(&job("a", "alpha", 5)).await.unwrap();
        let err = store.insert(&job("a", "beta", 5)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Database(_)), "{err:?}");
        assert_eq!(err.code(), "DATABASE_ERROR");
    }

    #[tokio::test]
    async fn due_jobs_come_earliest_first_with_id_tiebreak() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store.insert(&job("c", "gamma", 3)).await.unwrap();
        store.insert(&job("b", "beta", 1)).await.unwrap();
        store.insert(&job("a", "alpha", 3)).await.unwrap();
        store.insert(&job("z", "later", 60)).await.unwrap();

        let due = store.find_due_before(at(10), 10).await.unwrap();
        let ids: Vec<_> = due.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);

        let limited = store.find_due_before(at(10), 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn conditional_update_requires_matching_version() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let j = job("a", "alpha", 5);
        store.insert(&j).await.unwrap();

        let claim = running(j.mutation(), "t1", 5);
        let first = store.conditional_update("a", 1, &claim).await.unwrap();
        assert_eq!(first, WriteOutcome::Applied { version: 2 });

        let second = store.conditional_update("a", 1, &claim).await.unwrap();
        assert_eq!(second, WriteOutcome::Conflict);

        let stored = store.get_by_id("a").await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Running);
        assert_eq!(stored.version, 2);
        assert_eq!(stored.claim_token.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn only_one_open_record_per_job() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store.insert(&job("a", "alpha", 5)).await.unwrap();

        let open = NewExecution::open("a", Some(at(5)), at(5), "node");
        let id = store.insert_execution_record(&open).await.unwrap();
        assert!(store.insert_execution_record(&open).await.is_err());

        let close = ExecutionClose::new(Outcome::Success, at(6), None);
        assert!(store.close_execution_record(id, &close).await.unwrap());
        // closing twice is a no-op
        assert!(!store.close_execution_record(id, &close).await.unwrap());
        assert!(store.open_execution("a").await.unwrap().is_none());

        store.insert_execution_record(&open).await.unwrap();
    }

    #[tokio::test]
    async fn records_and_job_commit_together() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let j = job("a", "alpha", 5);
        store.insert(&j).await.unwrap();
        let record_id = store
            .insert_execution_record(&NewExecution::open("a", Some(at(5)), at(5), "node"))
            .await
            .unwrap();

        let mut done = j.mutation().release();
        done.next_fire_time = Some(at(11));
        done.run_count = 1;
        let close = RecordWrite::Close {
            record_id,
            close: ExecutionClose::new(Outcome::Success, at(6), None),
        };

        // stale version: neither the job nor the record may change
        let lost = store
            .conditional_update_with_records("a", 7, &done, std::slice::from_ref(&close))
            .await
            .unwrap();
        assert_eq!(lost, WriteOutcome::Conflict);
        assert!(store.open_execution("a").await.unwrap().is_some());

        let won = store
            .conditional_update_with_records("a", 1, &done, &[close])
            .await
            .unwrap();
        assert!(won.is_applied());
        let stored = store.get_by_id("a").await.unwrap().unwrap();
        assert_eq!(stored.last_execution, Some(record_id));
        assert_eq!(stored.next_fire_time, Some(at(11)));
        assert!(store.open_execution("a").await.unwrap().is_none());

        let history = store.recent_executions("a", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, Some(Outcome::Success));
    }

    #[tokio::test]
    async fn stale_claims_are_found_by_claim_age() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        for (id, name) in [("a", "alpha"), ("b", "beta")] {
            store.insert(&job(id, name, 5)).await.unwrap();
        }
        store
            .conditional_update("a", 1, &running(job("a", "alpha", 5).mutation(), "t", 10))
            .await
            .unwrap();
        store
            .conditional_update("b", 1, &running(job("b", "beta", 5).mutation(), "t", 100))
            .await
            .unwrap();

        let stale = store.find_stale_claims(at(50)).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "a");
    }

    #[tokio::test]
    async fn purge_only_removes_deleted_jobs() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let j = job("a", "alpha", 5);
        store.insert(&j).await.unwrap();
        store
            .insert_execution_record(&NewExecution::misfire_skipped("a", Some(at(5)), at(9), 2, "n"))
            .await
            .unwrap();

        assert!(!store.purge("a").await.unwrap());

        let mut m = j.mutation();
        m.state = JobState::Deleted;
        store.conditional_update("a", 1, &m).await.unwrap();
        assert!(store.purge("a").await.unwrap());
        assert!(store.get_by_id("a").await.unwrap().is_none());
        assert!(store.recent_executions("a", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_backed_stores_share_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadence.db");
        let a = SqliteJobStore::new(Connection::open(&path).unwrap()).unwrap();
        let b = SqliteJobStore::new(Connection::open(&path).unwrap()).unwrap();

        a.insert(&job("a", "alpha", 5)).await.unwrap();
        let seen = b.get_by_id("a").await.unwrap().unwrap();

        let claim = running(seen.mutation(), "from-b", 5);
        assert!(b.conditional_update("a", seen.version, &claim).await.unwrap().is_applied());
        let claim = running(seen.mutation(), "from-a", 5);
        assert_eq!(
            a.conditional_update("a", seen.version, &claim).await.unwrap(),
            WriteOutcome::Conflict
        );
    }
}
