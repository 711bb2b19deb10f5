//! Job dispatcher: submission, delivery queue and worker pool.
//!
//! Submitted jobs are persisted as `PENDING` and pushed onto an
//! in-process delivery queue. `worker_concurrency` worker tasks pull from
//! the queue and hand each delivery to the [`ExecutionHarness`] in its own
//! task, so a panicking execution is observed as a lost worker instead of
//! taking the worker down with it.
//!
//! A delivery is acknowledged only once the harness reports an outcome.
//! Failed deliveries are re-enqueued after a backoff; unfinished jobs left
//! in the store by a previous process are re-enqueued by
//! [`Dispatcher::recover`].

use std::collections::HashMap;
use std::sync::Arc;

use jobline_core::error::CoreError;
use jobline_core::resilience::RetryPolicy;
use jobline_core::status::{JobStatus, LogLevel};
use jobline_core::types::JobId;
use jobline_db::models::Job;
use jobline_db::JobStore;
use jobline_events::{EventBus, JobEvent};
use jobline_pipeline::JobKind;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::harness::{ExecutionHarness, ExecutionOutcome};
use super::EngineResult;

/// Log line written when a job is accepted.
pub const SUBMITTED_MESSAGE: &str = "Task submitted";

/// Failure reason recorded when an execution panics.
pub const WORKER_LOST_MESSAGE: &str = "Worker lost";

/// One hand-off of a job to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub job_id: JobId,
    /// 1 for the first delivery, incremented on every redelivery.
    pub attempt: u32,
}

impl Delivery {
    pub fn first(job_id: JobId) -> Self {
        Self { job_id, attempt: 1 }
    }
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    harness: Arc<ExecutionHarness>,
    event_bus: Arc<EventBus>,
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    /// Cancellation tokens of executions currently in flight.
    in_flight: Mutex<HashMap<JobId, CancellationToken>>,
    concurrency: usize,
    redelivery_backoff: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        harness: Arc<ExecutionHarness>,
        event_bus: Arc<EventBus>,
        concurrency: usize,
        redelivery_backoff: RetryPolicy,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            store,
            harness,
            event_bus,
            sender,
            receiver: Mutex::new(receiver),
            in_flight: Mutex::new(HashMap::new()),
            concurrency: concurrency.max(1),
            redelivery_backoff,
        }
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Validate, persist as `PENDING` and enqueue a new job.
    ///
    /// Returns as soon as the job is durable; execution happens on the
    /// worker pool.
    pub async fn submit(&self, input: serde_json::Value) -> EngineResult<Job> {
        let kind = JobKind::from_input(&input)?;

        let job = Job::new_pending(input);
        self.store.create(&job).await?;
        self.store
            .append_log(job.id, LogLevel::Info, SUBMITTED_MESSAGE)
            .await?;
        self.event_bus
            .publish(JobEvent::status_changed(job.id, JobStatus::Pending));

        tracing::info!(job_id = %job.id, task_type = kind.task_type(), "Job submitted");
        self.enqueue(Delivery::first(job.id));
        Ok(job)
    }

    /// Cancel a pending or running job and signal its worker.
    ///
    /// `NotFound` for unknown ids, `Conflict` if the job already finished.
    pub async fn cancel(&self, job_id: JobId) -> EngineResult<()> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::job_not_found(job_id))?;
        if job.is_terminal() {
            return Err(already_finished(job.status).into());
        }

        // Stop the worker first so it cannot checkpoint after the
        // CANCELLED write.
        if let Some(token) = self.in_flight.lock().await.get(&job_id) {
            token.cancel();
        }

        if !self.harness.cancel(job_id).await? {
            // Finished between the read and the conditional write.
            let status = self
                .store
                .get(job_id)
                .await?
                .map(|j| j.status)
                .unwrap_or(job.status);
            return Err(already_finished(status).into());
        }
        Ok(())
    }

    /// Re-enqueue unfinished jobs left in the store by a previous process.
    ///
    /// `PENDING` jobs are enqueued as they are. A `RUNNING` job lost its
    /// worker, so it goes through the same redelivery ceiling as a
    /// panicked execution: it is counted and enqueued under the ceiling
    /// and failed past it. Returns the number of jobs enqueued.
    ///
    /// Call once at startup, before [`run`](Self::run).
    pub async fn recover(&self) -> EngineResult<usize> {
        let unfinished = self.store.list_unfinished().await?;
        let mut enqueued = 0;
        for job in &unfinished {
            if job.status == JobStatus::Running {
                let outcome = self
                    .harness
                    .handle_failure(job.id, WORKER_LOST_MESSAGE)
                    .await?;
                if outcome != ExecutionOutcome::Redeliver {
                    tracing::warn!(
                        job_id = %job.id,
                        retry_count = job.retry_count,
                        ?outcome,
                        "Interrupted job not re-enqueued",
                    );
                    continue;
                }
            }
            tracing::info!(job_id = %job.id, status = %job.status, "Re-enqueueing unfinished job");
            self.enqueue(Delivery::first(job.id));
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Run the worker pool until `shutdown` is triggered.
    ///
    /// In-flight executions are cancelled on shutdown; their jobs stay
    /// unfinished in the store and are picked up again by
    /// [`recover`](Self::recover) on the next start, which counts the
    /// interruption as one redelivery.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(workers = self.concurrency, "Job dispatcher started");

        let mut workers = tokio::task::JoinSet::new();
        for worker_id in 0..self.concurrency {
            let dispatcher = Arc::clone(&self);
            let shutdown = shutdown.clone();
            workers.spawn(async move { dispatcher.worker_loop(worker_id, shutdown).await });
        }
        while workers.join_next().await.is_some() {}

        tracing::info!("Job dispatcher shut down");
    }

    // -----------------------------------------------------------------------
    // Worker internals
    // -----------------------------------------------------------------------

    fn enqueue(&self, delivery: Delivery) {
        // The receiver lives as long as `self`.
        if self.sender.send(delivery).is_err() {
            tracing::error!(job_id = %delivery.job_id, "Delivery queue closed, job not enqueued");
        }
    }

    async fn next_delivery(&self) -> Option<Delivery> {
        self.receiver.lock().await.recv().await
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, shutdown: CancellationToken) {
        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = self.next_delivery() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };
            self.execute(worker_id, delivery, &shutdown).await;
        }
        tracing::debug!(worker_id, "Worker stopped");
    }

    async fn execute(self: &Arc<Self>, worker_id: usize, delivery: Delivery, shutdown: &CancellationToken) {
        let job_id = delivery.job_id;
        let token = shutdown.child_token();
        self.in_flight.lock().await.insert(job_id, token.clone());

        tracing::debug!(job_id = %job_id, worker_id, attempt = delivery.attempt, "Delivery picked up");

        let harness = Arc::clone(&self.harness);
        let handle = tokio::spawn(async move { harness.run(job_id, &token).await });
        let joined = handle.await;

        self.in_flight.lock().await.remove(&job_id);

        let outcome = match joined {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                tracing::error!(job_id = %job_id, error = %e, "Execution aborted by store error");
                self.harness.handle_failure(job_id, &e.to_string()).await
            }
            Err(join_err) if join_err.is_panic() => {
                tracing::error!(job_id = %job_id, worker_id, "Execution panicked, treating worker as lost");
                self.harness.handle_failure(job_id, WORKER_LOST_MESSAGE).await
            }
            Err(_) => Ok(ExecutionOutcome::Cancelled),
        };

        match outcome {
            Ok(ExecutionOutcome::Redeliver) => self.schedule_redelivery(delivery, shutdown),
            Ok(outcome) => {
                tracing::debug!(job_id = %job_id, ?outcome, "Delivery acknowledged");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Could not record delivery failure");
            }
        }
    }

    /// Re-enqueue after the backoff on a detached task, freeing the worker.
    fn schedule_redelivery(self: &Arc<Self>, delivery: Delivery, shutdown: &CancellationToken) {
        let delay = self.redelivery_backoff.backoff(delivery.attempt);
        let next = Delivery {
            job_id: delivery.job_id,
            attempt: delivery.attempt + 1,
        };
        tracing::info!(
            job_id = %next.job_id,
            attempt = next.attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling redelivery",
        );

        let dispatcher = Arc::clone(self);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => dispatcher.enqueue(next),
            }
        });
    }
}

fn already_finished(status: JobStatus) -> CoreError {
    CoreError::Conflict(format!(
        "Job is already {status} and cannot be cancelled"
    ))
}
