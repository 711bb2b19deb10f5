//! Job and job log entities.

use chrono::Utc;
use jobline_core::status::{JobStatus, LogLevel};
use jobline_core::types::{new_job_id, JobId, Timestamp};
use serde::{Deserialize, Serialize};

/// Maximum page size for job listing.
pub const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
pub const DEFAULT_LIMIT: i64 = 10;

/// A row from the `jobs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Submission payload, never modified after creation.
    pub input: serde_json::Value,
    /// Present only once the job reached `SUCCESS`.
    pub result: Option<serde_json::Value>,
    /// Execution-level redeliveries attempted so far.
    pub retry_count: i32,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl Job {
    /// A fresh `PENDING` job for the given payload.
    pub fn new_pending(input: serde_json::Value) -> Self {
        Self {
            id: new_job_id(),
            status: JobStatus::Pending,
            input,
            result: None,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A row from the `job_logs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLog {
    pub id: i64,
    pub job_id: JobId,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: Timestamp,
}

/// Query parameters for job listing (`?offset=&limit=`, `skip` accepted
/// as an alias of `offset`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    #[serde(default, alias = "skip")]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl JobListQuery {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
        }
    }

    /// Effective limit: defaults to 10, clamped to `1..=100`.
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    /// Effective offset, never negative.
    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
