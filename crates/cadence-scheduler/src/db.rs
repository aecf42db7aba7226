use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` and `job_executions` tables (idempotent). Timestamps
/// are fixed-width RFC 3339 strings so text comparison orders them
/// chronologically.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id              TEXT    NOT NULL PRIMARY KEY,
            name            TEXT    NOT NULL,
            schedule        TEXT    NOT NULL,   -- JSON-encoded Schedule enum
            misfire_policy  TEXT    NOT NULL,
            handler         TEXT    NOT NULL,
            payload         TEXT    NOT NULL,   -- opaque JSON payload
            timeout_secs    INTEGER,
            max_runs        INTEGER,            -- NULL means unlimited
            run_count       INTEGER NOT NULL DEFAULT 0,
            state           TEXT    NOT NULL DEFAULT 'scheduled',
            next_fire_time  TEXT,               -- NULL when paused or terminal
            last_execution  INTEGER,
            version         INTEGER NOT NULL DEFAULT 1,
            claim_token     TEXT,
            claimed_at      TEXT,
            pause_requested INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        ) STRICT;

        -- Polling: WHERE state = 'scheduled' AND next_fire_time <= ? ORDER BY next_fire_time, id
        CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs (state, next_fire_time, id);

        -- Names are unique among live jobs only; deleted jobs keep theirs for history.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_live_name
            ON jobs (name) WHERE state <> 'deleted';

        CREATE TABLE IF NOT EXISTS job_executions (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id         TEXT    NOT NULL REFERENCES jobs (id) ON DELETE CASCADE,
            scheduled_for  TEXT,
            started_at     TEXT    NOT NULL,
            finished_at    TEXT,               -- NULL while running
            outcome        TEXT,
            error_detail   TEXT,
            instance_id    TEXT    NOT NULL,
            skipped_slots  INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_job_executions_job ON job_executions (job_id, id);

        -- At most one open execution per job.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_job_executions_open
            ON job_executions (job_id) WHERE finished_at IS NULL;
        ",
    )?;
    Ok(())
}
