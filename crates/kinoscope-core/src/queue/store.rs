//! Durable queue storage
//!
//! Jobs and repeatable (cron) jobs persist in SQLite so deliveries survive
//! restarts. Delivery is at-least-once: a claimed job whose worker dies is
//! re-queued by the stale-claim sweep.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::cron;
use super::types::{Job, JobOptions, JobState};
use crate::error::{Error, Result};

/// Retry delays are capped at one hour regardless of attempt count.
const MAX_BACKOFF_MS: u64 = 3_600_000;

/// Active claims older than this are considered abandoned.
const STALE_CLAIM_SECS: i64 = 1_800;

/// Outcome of an enqueue
#[derive(Debug, Clone)]
pub struct EnqueueResult {
    /// Id of the (possibly pre-existing) job
    pub id: String,
    /// `true` when a non-terminal job with the same id already existed
    pub deduplicated: bool,
}

/// A persisted repeatable job definition
#[derive(Debug, Clone)]
pub struct RepeatableJob {
    /// Stable id (e.g. `discover:{channel}`)
    pub id: String,
    /// Target queue
    pub queue: String,
    /// Job name
    pub name: String,
    /// JSON payload
    pub payload: serde_json::Value,
    /// 5-field cron pattern
    pub cron_pattern: String,
    /// Next firing time
    pub next_run_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct JobRow {
    id: String,
    queue: String,
    name: String,
    payload: String,
    priority: i64,
    attempts_made: i64,
    max_attempts: i64,
    backoff_base_ms: i64,
    run_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: row.id,
            queue: row.queue,
            name: row.name,
            payload: serde_json::from_str(&row.payload)?,
            attempts_made: row.attempts_made as u32,
            max_attempts: row.max_attempts as u32,
            backoff_base_ms: row.backoff_base_ms as u64,
            priority: row.priority as i32,
            run_at: row.run_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct RepeatableRow {
    id: String,
    queue: String,
    name: String,
    payload: String,
    cron_pattern: String,
    next_run_at: DateTime<Utc>,
}

impl TryFrom<RepeatableRow> for RepeatableJob {
    type Error = Error;

    fn try_from(row: RepeatableRow) -> Result<Self> {
        Ok(RepeatableJob {
            id: row.id,
            queue: row.queue,
            name: row.name,
            payload: serde_json::from_str(&row.payload)?,
            cron_pattern: row.cron_pattern,
            next_run_at: row.next_run_at,
        })
    }
}

/// SQLite-backed queue store shared by every worker
pub struct QueueStore {
    pool: Pool<Sqlite>,
}

impl QueueStore {
    /// Open (creating if needed) a queue store at the given path.
    pub async fn from_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::InvalidConfig(format!("failed to create directory: {e}")))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory queue store (tests).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(Error::Database)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                name TEXT NOT NULL,
                payload TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'queued',
                priority INTEGER NOT NULL DEFAULT 0,
                attempts_made INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                backoff_base_ms INTEGER NOT NULL DEFAULT 30000,
                remove_on_complete BOOLEAN NOT NULL DEFAULT TRUE,
                remove_on_fail BOOLEAN NOT NULL DEFAULT FALSE,
                last_error TEXT,
                run_at TIMESTAMP NOT NULL,
                claimed_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repeatable_jobs (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                name TEXT NOT NULL,
                payload TEXT NOT NULL,
                cron_pattern TEXT NOT NULL,
                next_run_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(queue, state, run_at, priority)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------

    /// Enqueue a job.
    ///
    /// With a stable `job_id`, a second enqueue while a job with that id is
    /// queued or active collapses into the existing one.
    pub async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: &serde_json::Value,
        opts: JobOptions,
    ) -> Result<EnqueueResult> {
        let id = opts
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let run_at = now + ChronoDuration::milliseconds(opts.delay_ms as i64);

        // A terminal row with the same stable id must not block re-enqueue.
        sqlx::query("DELETE FROM jobs WHERE id = ? AND state IN ('completed', 'failed')")
            .bind(&id)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue, name, payload, state, priority, attempts_made,
                max_attempts, backoff_base_ms, remove_on_complete, remove_on_fail,
                run_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, 'queued', ?, 0, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(queue)
        .bind(name)
        .bind(payload.to_string())
        .bind(i64::from(opts.priority))
        .bind(i64::from(opts.attempts))
        .bind(opts.backoff_base_ms as i64)
        .bind(opts.remove_on_complete)
        .bind(opts.remove_on_fail)
        .bind(run_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let deduplicated = result.rows_affected() == 0;
        if deduplicated {
            debug!(job_id = %id, queue, "enqueue collapsed into pending job");
        }
        Ok(EnqueueResult { id, deduplicated })
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    /// Claim up to `limit` due jobs from a queue, oldest-first within
    /// priority. Claimed jobs move to `active`.
    pub async fn claim_due(&self, queue: &str, limit: u32) -> Result<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT id, queue, name, payload, priority, attempts_made,
                   max_attempts, backoff_base_ms, run_at, created_at
            FROM jobs
            WHERE queue = ? AND state = 'queued' AND run_at <= ?
            ORDER BY priority DESC, run_at ASC
            LIMIT ?
            "#,
        )
        .bind(queue)
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await?;

        for row in &rows {
            sqlx::query(
                "UPDATE jobs SET state = 'active', claimed_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(now)
            .bind(now)
            .bind(&row.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Finish a job successfully.
    pub async fn complete(&self, job: &Job) -> Result<()> {
        sqlx::query("UPDATE jobs SET state = 'completed', updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM jobs WHERE id = ? AND remove_on_complete = TRUE")
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rate-limit signal: return the job to the queue after `delay` without
    /// touching the attempt counter.
    pub async fn defer(&self, job: &Job, delay: Duration) -> Result<()> {
        let run_at = Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64);
        sqlx::query(
            "UPDATE jobs SET state = 'queued', run_at = ?, claimed_at = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(run_at)
        .bind(Utc::now())
        .bind(&job.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed delivery.
    ///
    /// Retryable failures with budget left re-queue with exponential
    /// backoff; everything else goes terminal. Returns the resulting state.
    pub async fn fail(&self, job: &Job, message: &str, retryable: bool) -> Result<JobState> {
        let attempts = job.attempts_made + 1;
        let now = Utc::now();

        if !retryable || attempts >= job.max_attempts {
            sqlx::query(
                "UPDATE jobs SET state = 'failed', attempts_made = ?, last_error = ?, updated_at = ? WHERE id = ?",
            )
            .bind(i64::from(attempts))
            .bind(message)
            .bind(now)
            .bind(&job.id)
            .execute(&self.pool)
            .await?;
            sqlx::query("DELETE FROM jobs WHERE id = ? AND remove_on_fail = TRUE")
                .bind(&job.id)
                .execute(&self.pool)
                .await?;
            return Ok(JobState::Failed);
        }

        let backoff_ms = job
            .backoff_base_ms
            .saturating_mul(1_u64 << (attempts - 1).min(20))
            .min(MAX_BACKOFF_MS);
        let run_at = now + ChronoDuration::milliseconds(backoff_ms as i64);

        sqlx::query(
            r#"
            UPDATE jobs SET
                state = 'queued', attempts_made = ?, last_error = ?,
                run_at = ?, claimed_at = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(i64::from(attempts))
        .bind(message)
        .bind(run_at)
        .bind(now)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;
        Ok(JobState::Queued)
    }

    /// Re-queue active jobs whose claim has gone stale (crashed worker).
    pub async fn requeue_stale_claims(&self) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::seconds(STALE_CLAIM_SECS);
        let result = sqlx::query(
            "UPDATE jobs SET state = 'queued', claimed_at = NULL, updated_at = ? WHERE state = 'active' AND claimed_at < ?",
        )
        .bind(Utc::now())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        let requeued = result.rows_affected();
        if requeued > 0 {
            warn!(requeued, "re-queued stale job claims");
        }
        Ok(requeued)
    }

    /// Fetch a job by id, if it still exists.
    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT id, queue, name, payload, priority, attempts_made,
                   max_attempts, backoff_base_ms, run_at, created_at
            FROM jobs WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    /// Current persisted state of a job, if the row still exists.
    pub async fn state_of(&self, id: &str) -> Result<Option<JobState>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT state FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(s,)| JobState::parse(&s)))
    }

    /// Number of queued + active jobs in a queue.
    pub async fn pending_count(&self, queue: &str) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs WHERE queue = ? AND state IN ('queued', 'active')",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u32)
    }

    // ------------------------------------------------------------------
    // Repeatable jobs
    // ------------------------------------------------------------------

    /// Create or update a repeatable job keyed by its stable id.
    pub async fn upsert_repeatable(
        &self,
        id: &str,
        queue: &str,
        name: &str,
        payload: &serde_json::Value,
        cron_pattern: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let next_run_at = cron::next_occurrence(cron_pattern, now)
            .ok_or_else(|| Error::InvalidConfig(format!("invalid cron pattern: {cron_pattern}")))?;

        sqlx::query(
            r#"
            INSERT INTO repeatable_jobs (
                id, queue, name, payload, cron_pattern, next_run_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                queue = excluded.queue,
                name = excluded.name,
                payload = excluded.payload,
                cron_pattern = excluded.cron_pattern,
                next_run_at = excluded.next_run_at
            "#,
        )
        .bind(id)
        .bind(queue)
        .bind(name)
        .bind(payload.to_string())
        .bind(cron_pattern)
        .bind(next_run_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a repeatable job.
    pub async fn remove_repeatable(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM repeatable_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// List every repeatable job.
    pub async fn list_repeatable(&self) -> Result<Vec<RepeatableJob>> {
        let rows: Vec<RepeatableRow> =
            sqlx::query_as("SELECT id, queue, name, payload, cron_pattern, next_run_at FROM repeatable_jobs ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Force every repeatable schedule due (test time travel).
    #[cfg(test)]
    pub(super) async fn force_repeatables_due(&self) -> Result<()> {
        sqlx::query("UPDATE repeatable_jobs SET next_run_at = ?")
            .bind(Utc::now() - ChronoDuration::seconds(1))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fire every due repeatable: enqueue a concrete job and advance
    /// `next_run_at`. Returns how many fired.
    pub async fn tick_repeatables(&self) -> Result<u32> {
        let now = Utc::now();
        let rows: Vec<RepeatableRow> = sqlx::query_as(
            "SELECT id, queue, name, payload, cron_pattern, next_run_at FROM repeatable_jobs WHERE next_run_at <= ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut fired = 0;
        for row in rows {
            let repeatable: RepeatableJob = row.try_into()?;
            self.enqueue(
                &repeatable.queue,
                &repeatable.name,
                &repeatable.payload,
                JobOptions::default(),
            )
            .await?;

            let next = cron::next_occurrence(&repeatable.cron_pattern, now)
                .unwrap_or(now + ChronoDuration::hours(1));
            sqlx::query("UPDATE repeatable_jobs SET next_run_at = ? WHERE id = ?")
                .bind(next)
                .bind(&repeatable.id)
                .execute(&self.pool)
                .await?;
            fired += 1;
        }
        Ok(fired)
    }
}
