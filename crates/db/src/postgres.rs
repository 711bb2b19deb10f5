//! PostgreSQL-backed [`JobStore`].
//!
//! Status transitions are single conditional `UPDATE`s, so the status
//! check and the write cannot interleave with a concurrent cancel.

use async_trait::async_trait;
use jobline_core::status::{JobStatus, LogLevel};
use jobline_core::types::JobId;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

use crate::models::{Job, JobListQuery, JobLog};
use crate::store::{JobStore, StoreError, StoreResult};
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, status, input, result, retry_count, \
    created_at, started_at, completed_at";

/// Column list for `job_logs` queries.
const LOG_COLUMNS: &str = "id, job_id, level, message, timestamp";

/// Postgres error code for a foreign key violation.
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Postgres error code for a unique constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Surfaces as [`StoreError::Corrupt`] through `From<sqlx::Error>`.
fn decode_err(e: jobline_core::error::CoreError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

impl<'r> FromRow<'r, PgRow> for Job {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Job {
            id: row.try_get("id")?,
            status: status.parse().map_err(decode_err)?,
            input: row.try_get("input")?,
            result: row.try_get("result")?,
            retry_count: row.try_get("retry_count")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for JobLog {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let level: String = row.try_get("level")?;
        Ok(JobLog {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            level: level.parse().map_err(decode_err)?,
            message: row.try_get("message")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

fn has_code(e: &sqlx::Error, code: &str) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some(code))
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO jobs \
                 (id, status, input, result, retry_count, created_at, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.input)
        .bind(&job.result)
        .bind(job.retry_count)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if has_code(&e, UNIQUE_VIOLATION) {
                StoreError::Duplicate(job.id)
            } else {
                StoreError::from(e)
            }
        })?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<Job>> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn update(&self, job: &Job) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, result = $3, retry_count = $4, \
                 started_at = $5, completed_at = $6 \
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.result)
        .bind(job.retry_count)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(job.id));
        }
        Ok(())
    }

    async fn delete(&self, id: JobId) -> StoreResult<bool> {
        // job_logs rows go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, query: &JobListQuery) -> StoreResult<Vec<Job>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs \
             ORDER BY created_at DESC, id DESC \
             LIMIT $1 OFFSET $2"
        );
        let jobs = sqlx::query_as::<_, Job>(&sql)
            .bind(query.limit())
            .bind(query.offset())
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<Job>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status IN ($1, $2) \
             ORDER BY created_at ASC"
        );
        let jobs = sqlx::query_as::<_, Job>(&sql)
            .bind(JobStatus::Pending.as_str())
            .bind(JobStatus::Running.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    async fn append_log(
        &self,
        job_id: JobId,
        level: LogLevel,
        message: &str,
    ) -> StoreResult<JobLog> {
        let sql = format!(
            "INSERT INTO job_logs (job_id, level, message, timestamp) \
             VALUES ($1, $2, $3, GREATEST( \
                 clock_timestamp(), \
                 (SELECT MAX(timestamp) FROM job_logs WHERE job_id = $1))) \
             RETURNING {LOG_COLUMNS}"
        );
        sqlx::query_as::<_, JobLog>(&sql)
            .bind(job_id)
            .bind(level.as_str())
            .bind(message)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if has_code(&e, FOREIGN_KEY_VIOLATION) {
                    StoreError::NotFound(job_id)
                } else {
                    StoreError::from(e)
                }
            })
    }

    async fn list_logs(&self, job_id: JobId) -> StoreResult<Vec<JobLog>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM job_logs \
             WHERE job_id = $1 \
             ORDER BY timestamp ASC, id ASC"
        );
        let logs = sqlx::query_as::<_, JobLog>(&sql)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(logs)
    }

    async fn mark_started(&self, id: JobId) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, started_at = COALESCE(started_at, NOW()) \
             WHERE id = $1 AND status IN ($3, $4)",
        )
        .bind(id)
        .bind(JobStatus::Running.as_str())
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, id: JobId, result: &serde_json::Value) -> StoreResult<bool> {
        let outcome = sqlx::query(
            "UPDATE jobs \
             SET status = $2, result = $3, completed_at = NOW() \
             WHERE id = $1 AND status = $4",
        )
        .bind(id)
        .bind(JobStatus::Success.as_str())
        .bind(result)
        .bind(JobStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    async fn fail(&self, id: JobId) -> StoreResult<bool> {
        self.finish(id, JobStatus::Failed).await
    }

    async fn cancel(&self, id: JobId) -> StoreResult<bool> {
        self.finish(id, JobStatus::Cancelled).await
    }

    async fn record_retry(&self, id: JobId) -> StoreResult<Option<i32>> {
        let count: Option<i32> = sqlx::query_scalar(
            "UPDATE jobs SET retry_count = retry_count + 1 \
             WHERE id = $1 AND status IN ($2, $3) \
             RETURNING retry_count",
        )
        .bind(id)
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Running.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(count)
    }

    async fn health_check(&self) -> StoreResult<()> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}

impl PgJobStore {
    /// Move an unfinished job to a terminal, non-success status.
    async fn finish(&self, id: JobId, status: JobStatus) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, completed_at = NOW() \
             WHERE id = $1 AND status IN ($3, $4)",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
