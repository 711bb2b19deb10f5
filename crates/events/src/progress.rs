//! Latest step progress per running job.
//!
//! Progress is ephemeral: it is kept in memory only and dropped when the
//! job finishes. The job log carries the durable checkpoint trail.

use std::collections::HashMap;

use jobline_core::progress::Progress;
use jobline_core::types::JobId;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct ProgressBoard {
    entries: RwLock<HashMap<JobId, Progress>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, job_id: JobId, progress: Progress) {
        self.entries.write().await.insert(job_id, progress);
    }

    pub async fn get(&self, job_id: JobId) -> Option<Progress> {
        self.entries.read().await.get(&job_id).cloned()
    }

    pub async fn clear(&self, job_id: JobId) {
        self.entries.write().await.remove(&job_id);
    }
}
