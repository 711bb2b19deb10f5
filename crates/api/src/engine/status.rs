//! Status distributor: point-in-time reads and live status streams.
//!
//! Streams re-read the store every `poll_interval` and also wake early
//! when the event bus announces a change for the watched job. A snapshot
//! is therefore never staler than one poll interval, and usually fresher.
//! The store stays authoritative: events only trigger a read.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use jobline_core::error::CoreError;
use jobline_core::progress::Progress;
use jobline_core::status::JobStatus;
use jobline_core::types::{JobId, Timestamp};
use jobline_db::models::{Job, JobListQuery, JobLog};
use jobline_db::JobStore;
use jobline_events::{EventBus, JobEvent, ProgressBoard};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Interval, MissedTickBehavior};

use super::EngineResult;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One emission of a status stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub task_id: JobId,
    pub status: JobStatus,
    /// Job result on `SUCCESS`, live progress while `RUNNING`, else null.
    pub result: Option<serde_json::Value>,
}

/// Full status of one job as served by the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub task_id: JobId,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub progress: Option<Progress>,
    pub retry_count: i32,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<JobLog>>,
}

impl JobStatusView {
    fn new(job: Job, progress: Option<Progress>, logs: Option<Vec<JobLog>>) -> Self {
        Self {
            task_id: job.id,
            status: job.status,
            result: job.result,
            progress,
            retry_count: job.retry_count,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            logs,
        }
    }
}

#[derive(Clone)]
pub struct StatusDistributor {
    store: Arc<dyn JobStore>,
    event_bus: Arc<EventBus>,
    progress: Arc<ProgressBoard>,
    poll_interval: Duration,
}

impl StatusDistributor {
    pub fn new(
        store: Arc<dyn JobStore>,
        event_bus: Arc<EventBus>,
        progress: Arc<ProgressBoard>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            event_bus,
            progress,
            // `tokio::time::interval` panics on zero.
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Job record with its logs. `NotFound` if absent.
    pub async fn get_status(&self, job_id: JobId) -> EngineResult<JobStatusView> {
        let job = self.find(job_id).await?;
        let logs = self.store.list_logs(job_id).await?;
        let progress = self.live_progress(&job).await;
        Ok(JobStatusView::new(job, progress, Some(logs)))
    }

    /// Page of jobs, newest first, without logs.
    pub async fn list_statuses(&self, query: &JobListQuery) -> EngineResult<Vec<JobStatusView>> {
        let jobs = self.store.list(query).await?;
        let mut views = Vec::with_capacity(jobs.len());
        for job in jobs {
            let progress = self.live_progress(&job).await;
            views.push(JobStatusView::new(job, progress, None));
        }
        Ok(views)
    }

    /// Logs of one job in append order. `NotFound` if the job is absent.
    pub async fn get_logs(&self, job_id: JobId) -> EngineResult<Vec<JobLog>> {
        self.find(job_id).await?;
        Ok(self.store.list_logs(job_id).await?)
    }

    /// Current snapshot, `None` if the job does not exist.
    pub async fn snapshot(&self, job_id: JobId) -> EngineResult<Option<StatusSnapshot>> {
        let Some(job) = self.store.get(job_id).await? else {
            return Ok(None);
        };
        let result = match job.status {
            JobStatus::Success => job.result.clone(),
            JobStatus::Running => self
                .progress
                .get(job_id)
                .await
                .and_then(|p| serde_json::to_value(p).ok()),
            _ => None,
        };
        Ok(Some(StatusSnapshot {
            task_id: job.id,
            status: job.status,
            result,
        }))
    }

    /// Lazy stream of snapshots for `job_id`.
    ///
    /// The first snapshot is emitted immediately. The stream ends after a
    /// terminal snapshot, or without emitting if the job does not exist
    /// (or is deleted mid-stream). Each call starts an independent pass.
    pub fn stream_status(&self, job_id: JobId) -> impl Stream<Item = StatusSnapshot> + Send + 'static {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let state = StreamState {
            distributor: self.clone(),
            job_id,
            events: Some(self.event_bus.subscribe()),
            ticker,
            finished: false,
        };

        futures::stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            state.wait_for_change().await;

            let snapshot = match state.distributor.snapshot(state.job_id).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(job_id = %state.job_id, error = %e, "Status stream read failed, closing");
                    return None;
                }
            };
            state.finished = snapshot.status.is_terminal();
            Some((snapshot, state))
        })
    }

    async fn find(&self, job_id: JobId) -> EngineResult<Job> {
        Ok(self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::job_not_found(job_id))?)
    }

    async fn live_progress(&self, job: &Job) -> Option<Progress> {
        if job.status == JobStatus::Running {
            self.progress.get(job.id).await
        } else {
            None
        }
    }
}

struct StreamState {
    distributor: StatusDistributor,
    job_id: JobId,
    /// `None` once the bus is closed; polling alone continues.
    events: Option<broadcast::Receiver<JobEvent>>,
    ticker: Interval,
    finished: bool,
}

impl StreamState {
    /// Resolve on the next poll tick or on a bus event for this job.
    async fn wait_for_change(&mut self) {
        loop {
            let closed = tokio::select! {
                _ = self.ticker.tick() => return,
                event = next_event(&mut self.events) => match event {
                    Ok(event) if event.job_id == self.job_id => return,
                    Ok(_) => false,
                    // Missed events may include ours.
                    Err(RecvError::Lagged(_)) => return,
                    Err(RecvError::Closed) => true,
                },
            };
            if closed {
                self.events = None;
            }
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<JobEvent>>,
) -> Result<JobEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use jobline_db::InMemoryJobStore;
    use serde_json::json;

    use super::*;
    use crate::engine::EngineError;

    fn distributor(store: Arc<InMemoryJobStore>) -> (StatusDistributor, Arc<EventBus>, Arc<ProgressBoard>) {
        let bus = Arc::new(EventBus::default());
        let board = Arc::new(ProgressBoard::new());
        let dist = StatusDistributor::new(store, bus.clone(), board.clone(), Duration::from_secs(1));
        (dist, bus, board)
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (dist, _, _) = distributor(Arc::new(InMemoryJobStore::new()));
        let id = jobline_core::types::new_job_id();
        let err = dist.get_status(id).await.unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::NotFound { .. })));
        assert!(dist.get_logs(id).await.is_err());
        assert_eq!(dist.stream_status(id).count().await, 0);
    }

    #[tokio::test]
    async fn running_snapshot_carries_progress() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = Job::new_pending(json!({}));
        store.create(&job).await.unwrap();
        store.mark_started(job.id).await.unwrap();
        let (dist, _, board) = distributor(store);

        board.update(job.id, Progress::new(2, 5, "Processing chunk 2/5...")).await;
        let snap = dist.snapshot(job.id).await.unwrap().unwrap();
        assert_eq!(snap.status, JobStatus::Running);
        assert_eq!(snap.result.unwrap()["current"], 2);

        let view = dist.get_status(job.id).await.unwrap();
        assert_eq!(view.progress.map(|p| p.total), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_ends_after_terminal_snapshot() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = Job::new_pending(json!({}));
        store.create(&job).await.unwrap();
        let (dist, _, _) = distributor(store.clone());

        let mut stream = Box::pin(dist.stream_status(job.id));
        assert_eq!(stream.next().await.unwrap().status, JobStatus::Pending);

        store.mark_started(job.id).await.unwrap();
        assert_eq!(stream.next().await.unwrap().status, JobStatus::Running);

        store.complete(job.id, &json!({"done": true})).await.unwrap();
        let last = stream.next().await.unwrap();
        assert_eq!(last.status, JobStatus::Success);
        assert_eq!(last.result, Some(json!({"done": true})));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_still_streams() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = Job::new_pending(json!({}));
        store.create(&job).await.unwrap();
        store.cancel(job.id).await.unwrap();
        let dist = StatusDistributor::new(
            store,
            Arc::new(EventBus::default()),
            Arc::new(ProgressBoard::new()),
            Duration::ZERO,
        );

        let snapshots: Vec<StatusSnapshot> = dist.stream_status(job.id).collect().await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].status, JobStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn bus_event_wakes_stream_before_poll() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = Job::new_pending(json!({}));
        store.create(&job).await.unwrap();
        let (dist, bus, _) = distributor(store.clone());

        let mut stream = Box::pin(dist.stream_status(job.id));
        stream.next().await.unwrap();

        let started = tokio::time::Instant::now();
        store.cancel(job.id).await.unwrap();
        bus.publish(JobEvent::status_changed(job.id, JobStatus::Cancelled));

        let snap = stream.next().await.unwrap();
        assert_eq!(snap.status, JobStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(stream.next().await.is_none());
    }
}
