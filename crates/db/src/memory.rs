//! Process-local [`JobStore`] used when no `DATABASE_URL` is configured
//! and by the test suites.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use jobline_core::status::{JobStatus, LogLevel, UNFINISHED_STATUSES};
use jobline_core::types::JobId;
use tokio::sync::RwLock;

use crate::models::{Job, JobListQuery, JobLog};
use crate::store::{JobStore, StoreError, StoreResult};

struct Entry {
    job: Job,
    /// Insertion order, breaks `created_at` ties.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Entry>,
    logs: HashMap<JobId, Vec<JobLog>>,
    next_seq: u64,
    next_log_id: i64,
}

impl Inner {
    /// Move the job to `to` and apply `apply`, if the status state
    /// machine allows the move from the current status.
    fn transition(&mut self, id: JobId, to: JobStatus, apply: impl FnOnce(&mut Job)) -> bool {
        match self.jobs.get_mut(&id) {
            Some(entry) if entry.job.status.can_transition_to(to) => {
                entry.job.status = to;
                apply(&mut entry.job);
                true
            }
            _ => false,
        }
    }
}

#[derive(Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            job.id,
            Entry {
                job: job.clone(),
                seq,
            },
        );
        Ok(())
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<Job>> {
        let inner = self.inner.read().await;
        Ok(inner.jobs.get(&id).map(|e| e.job.clone()))
    }

    async fn update(&self, job: &Job) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .jobs
            .get_mut(&job.id)
            .ok_or(StoreError::NotFound(job.id))?;
        entry.job = job.clone();
        Ok(())
    }

    async fn delete(&self, id: JobId) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        inner.logs.remove(&id);
        Ok(inner.jobs.remove(&id).is_some())
    }

    async fn list(&self, query: &JobListQuery) -> StoreResult<Vec<Job>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<&Entry> = inner.jobs.values().collect();
        entries.sort_by(|a, b| {
            b.job
                .created_at
                .cmp(&a.job.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(entries
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .map(|e| e.job.clone())
            .collect())
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<Job>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<&Entry> = inner
            .jobs
            .values()
            .filter(|e| UNFINISHED_STATUSES.contains(&e.job.status))
            .collect();
        entries.sort_by(|a, b| a.job.created_at.cmp(&b.job.created_at).then(a.seq.cmp(&b.seq)));
        Ok(entries.into_iter().map(|e| e.job.clone()).collect())
    }

    async fn append_log(
        &self,
        job_id: JobId,
        level: LogLevel,
        message: &str,
    ) -> StoreResult<JobLog> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&job_id) {
            return Err(StoreError::NotFound(job_id));
        }
        inner.next_log_id += 1;
        let id = inner.next_log_id;

        let logs = inner.logs.entry(job_id).or_default();
        let now = Utc::now();
        let timestamp = match logs.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        let log = JobLog {
            id,
            job_id,
            level,
            message: message.to_string(),
            timestamp,
        };
        logs.push(log.clone());
        Ok(log)
    }

    async fn list_logs(&self, job_id: JobId) -> StoreResult<Vec<JobLog>> {
        let inner = self.inner.read().await;
        Ok(inner.logs.get(&job_id).cloned().unwrap_or_default())
    }

    async fn mark_started(&self, id: JobId) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.transition(id, JobStatus::Running, |job| {
            job.started_at.get_or_insert_with(Utc::now);
        }))
    }

    async fn complete(&self, id: JobId, result: &serde_json::Value) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.transition(id, JobStatus::Success, |job| {
            job.result = Some(result.clone());
            job.completed_at = Some(Utc::now());
        }))
    }

    async fn fail(&self, id: JobId) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.transition(id, JobStatus::Failed, |job| {
            job.completed_at = Some(Utc::now());
        }))
    }

    async fn cancel(&self, id: JobId) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.transition(id, JobStatus::Cancelled, |job| {
            job.completed_at = Some(Utc::now());
        }))
    }

    async fn record_retry(&self, id: JobId) -> StoreResult<Option<i32>> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .jobs
            .get_mut(&id)
            .filter(|entry| !entry.job.is_terminal())
            .map(|entry| {
                entry.job.retry_count += 1;
                entry.job.retry_count
            }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    async fn store_with_job() -> (InMemoryJobStore, Job) {
        let store = InMemoryJobStore::new();
        let job = Job::new_pending(json!({"duration": 2}));
        store.create(&job).await.unwrap();
        (store, job)
    }

    #[tokio::test]
    async fn create_then_get_returns_same_record() {
        let (store, job) = store_with_job().await;
        let fetched = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched, job);
        assert_matches!(store.create(&job).await, Err(StoreError::Duplicate(id)) if id == job.id);
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let (store, job) = store_with_job().await;
        assert!(store.mark_started(job.id).await.unwrap());
        assert!(store.cancel(job.id).await.unwrap());

        assert!(!store.complete(job.id, &json!({"ok": true})).await.unwrap());
        assert!(!store.fail(job.id).await.unwrap());
        assert!(!store.mark_started(job.id).await.unwrap());
        assert!(!store.cancel(job.id).await.unwrap());
        assert_eq!(store.record_retry(job.id).await.unwrap(), None);

        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.result.is_none());
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn complete_requires_running() {
        let (store, job) = store_with_job().await;
        assert!(!store.complete(job.id, &json!({})).await.unwrap());

        store.mark_started(job.id).await.unwrap();
        assert!(store.complete(job.id, &json!({"n": 1})).await.unwrap());

        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.result, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn transitions_follow_the_status_state_machine() {
        use JobStatus::*;

        for from in [Pending, Running, Success, Failed, Cancelled] {
            for to in [Running, Success, Failed, Cancelled] {
                let (store, mut job) = store_with_job().await;
                job.status = from;
                store.update(&job).await.unwrap();

                let moved = match to {
                    Running => store.mark_started(job.id).await,
                    Success => store.complete(job.id, &json!({})).await,
                    Failed => store.fail(job.id).await,
                    Cancelled => store.cancel(job.id).await,
                    Pending => unreachable!(),
                }
                .unwrap();

                assert_eq!(moved, from.can_transition_to(to), "{from} -> {to}");
                let status = store.get(job.id).await.unwrap().unwrap().status;
                assert_eq!(status, if moved { to } else { from }, "{from} -> {to}");
            }
        }
    }

    #[tokio::test]
    async fn restart_keeps_first_started_at() {
        let (store, job) = store_with_job().await;
        store.mark_started(job.id).await.unwrap();
        let first = store.get(job.id).await.unwrap().unwrap().started_at;

        assert!(store.mark_started(job.id).await.unwrap());
        assert_eq!(store.get(job.id).await.unwrap().unwrap().started_at, first);
    }

    #[tokio::test]
    async fn retry_count_increments() {
        let (store, job) = store_with_job().await;
        assert_eq!(store.record_retry(job.id).await.unwrap(), Some(1));
        assert_eq!(store.record_retry(job.id).await.unwrap(), Some(2));
        assert_eq!(store.get(job.id).await.unwrap().unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn logs_keep_append_order() {
        let (store, job) = store_with_job().await;
        for (level, msg) in [
            (LogLevel::Info, "first"),
            (LogLevel::Warning, "second"),
            (LogLevel::Error, "third"),
        ] {
            store.append_log(job.id, level, msg).await.unwrap();
        }

        let logs = store.list_logs(job.id).await.unwrap();
        let messages: Vec<&str> = logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
        assert!(logs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(logs.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn append_log_for_unknown_job_fails() {
        let store = InMemoryJobStore::new();
        let id = jobline_core::types::new_job_id();
        assert_matches!(
            store.append_log(id, LogLevel::Info, "orphan").await,
            Err(StoreError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paged() {
        let store = InMemoryJobStore::new();
        let mut ids = Vec::new();
        for i in 0..15 {
            let job = Job::new_pending(json!({"n": i}));
            ids.push(job.id);
            store.create(&job).await.unwrap();
        }

        let page = store.list(&JobListQuery::default()).await.unwrap();
        assert_eq!(page.len(), 10);
        let expected: Vec<JobId> = ids.iter().rev().take(10).copied().collect();
        assert_eq!(page.iter().map(|j| j.id).collect::<Vec<_>>(), expected);

        let rest = store.list(&JobListQuery::new(10, 10)).await.unwrap();
        assert_eq!(rest.len(), 5);
        assert_eq!(rest.last().map(|j| j.id), Some(ids[0]));
    }

    #[tokio::test]
    async fn list_unfinished_skips_terminal_jobs() {
        let store = InMemoryJobStore::new();
        let a = Job::new_pending(json!({}));
        let b = Job::new_pending(json!({}));
        let c = Job::new_pending(json!({}));
        for job in [&a, &b, &c] {
            store.create(job).await.unwrap();
        }
        store.mark_started(b.id).await.unwrap();
        store.fail(c.id).await.unwrap();

        let unfinished: Vec<JobId> = store
            .list_unfinished()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(unfinished, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn delete_removes_logs() {
        let (store, job) = store_with_job().await;
        store.append_log(job.id, LogLevel::Info, "hello").await.unwrap();

        assert!(store.delete(job.id).await.unwrap());
        assert!(store.get(job.id).await.unwrap().is_none());
        assert!(store.list_logs(job.id).await.unwrap().is_empty());
        assert!(!store.delete(job.id).await.unwrap());
    }

    #[tokio::test]
    async fn update_of_missing_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let job = Job::new_pending(json!({}));
        assert_matches!(store.update(&job).await, Err(StoreError::NotFound(_)));
    }
}
