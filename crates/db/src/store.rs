//! The record-store contract consumed by the orchestration engine.
//!
//! Besides plain CRUD the trait exposes conditional status transitions.
//! Each one checks the current status and writes the new one as a single
//! atomic step, which is what keeps a late completion signal from
//! overwriting a `CANCELLED` job.

use async_trait::async_trait;
use jobline_core::status::LogLevel;
use jobline_core::types::JobId;

use crate::models::{Job, JobListQuery, JobLog};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already exists: {0}")]
    Duplicate(JobId),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A stored value could not be decoded, e.g. an unknown status string.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Decode(source) => StoreError::Corrupt(source.to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                StoreError::Corrupt(format!("column {index}: {source}"))
            }
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job record.
    async fn create(&self, job: &Job) -> StoreResult<()>;

    async fn get(&self, id: JobId) -> StoreResult<Option<Job>>;

    /// Overwrite every mutable column of an existing job.
    async fn update(&self, job: &Job) -> StoreResult<()>;

    /// Delete a job and its logs. Returns `false` if it did not exist.
    async fn delete(&self, id: JobId) -> StoreResult<bool>;

    /// Page of jobs, newest first.
    async fn list(&self, query: &JobListQuery) -> StoreResult<Vec<Job>>;

    /// All `PENDING` and `RUNNING` jobs, oldest first.
    async fn list_unfinished(&self) -> StoreResult<Vec<Job>>;

    /// Append a log line. Timestamps never go backwards within one job.
    async fn append_log(&self, job_id: JobId, level: LogLevel, message: &str)
        -> StoreResult<JobLog>;

    /// Logs for one job in append order.
    async fn list_logs(&self, job_id: JobId) -> StoreResult<Vec<JobLog>>;

    /// `PENDING|RUNNING -> RUNNING`, setting `started_at` if unset.
    async fn mark_started(&self, id: JobId) -> StoreResult<bool>;

    /// `RUNNING -> SUCCESS` with the result payload.
    async fn complete(&self, id: JobId, result: &serde_json::Value) -> StoreResult<bool>;

    /// `PENDING|RUNNING -> FAILED`.
    async fn fail(&self, id: JobId) -> StoreResult<bool>;

    /// `PENDING|RUNNING -> CANCELLED`.
    async fn cancel(&self, id: JobId) -> StoreResult<bool>;

    /// Increment `retry_count` of an unfinished job, returning the new
    /// value, or `None` if the job is missing or terminal.
    async fn record_retry(&self, id: JobId) -> StoreResult<Option<i32>>;

    async fn health_check(&self) -> StoreResult<()>;
}
