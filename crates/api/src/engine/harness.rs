//! Execution harness: runs one delivery of a job.
//!
//! Every lifecycle write goes through an explicit method here
//! ([`start`](ExecutionHarness::start), [`checkpoint`](ExecutionHarness::checkpoint),
//! [`complete`](ExecutionHarness::complete), [`fail`](ExecutionHarness::fail),
//! [`on_retry_attempt`](ExecutionHarness::on_retry_attempt),
//! [`cancel`](ExecutionHarness::cancel)). Each one is a conditional store
//! transition followed by a log line and a bus event, so a write that
//! loses a race (for example `complete` after a cancel) changes nothing.

use std::sync::Arc;

use jobline_core::progress::{should_log_checkpoint, Progress};
use jobline_core::resilience::{GuardError, ResilienceGuard};
use jobline_core::status::{JobStatus, LogLevel};
use jobline_core::types::JobId;
use jobline_db::JobStore;
use jobline_events::{EventBus, JobEvent, ProgressBoard};
use jobline_pipeline::{ExternalRequest, ExternalService, JobKind, PipelineConfig};
use tokio_util::sync::CancellationToken;

use super::EngineResult;

/// Log line written when a workload finishes all its steps.
pub const COMPLETE_MESSAGE: &str = "Task processing complete";

/// Log line written when a job is cancelled.
pub const CANCELLED_MESSAGE: &str = "Task cancelled";

/// How one delivery ended. Everything except `Redeliver` acknowledges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    Failed,
    /// The cancellation token fired; no terminal status was written.
    Cancelled,
    /// Nothing to do: the job is missing or already terminal.
    Skipped,
    /// A business-logic failure under the redelivery ceiling.
    Redeliver,
}

pub struct ExecutionHarness {
    store: Arc<dyn JobStore>,
    guard: Arc<ResilienceGuard>,
    external: Arc<dyn ExternalService>,
    event_bus: Arc<EventBus>,
    progress: Arc<ProgressBoard>,
    pipeline: PipelineConfig,
    max_redeliveries: i32,
}

impl ExecutionHarness {
    pub fn new(
        store: Arc<dyn JobStore>,
        guard: Arc<ResilienceGuard>,
        external: Arc<dyn ExternalService>,
        event_bus: Arc<EventBus>,
        progress: Arc<ProgressBoard>,
        pipeline: PipelineConfig,
        max_redeliveries: i32,
    ) -> Self {
        Self {
            store,
            guard,
            external,
            event_bus,
            progress,
            pipeline,
            max_redeliveries,
        }
    }

    /// Run one delivery of `job_id` until it finishes or `cancel` fires.
    ///
    /// Business-logic errors never escape: they become `Redeliver` or
    /// `Failed`. Only store failures are returned as errors.
    pub async fn run(
        &self,
        job_id: JobId,
        cancel: &CancellationToken,
    ) -> EngineResult<ExecutionOutcome> {
        if cancel.is_cancelled() {
            return Ok(ExecutionOutcome::Cancelled);
        }

        let Some(job) = self.store.get(job_id).await? else {
            tracing::warn!(job_id = %job_id, "Delivery for unknown job, skipping");
            return Ok(ExecutionOutcome::Skipped);
        };
        if job.is_terminal() {
            tracing::debug!(job_id = %job_id, status = %job.status, "Job already finished, skipping");
            return Ok(ExecutionOutcome::Skipped);
        }

        // Validated at submission; only a record edited behind our back fails here.
        let kind = match JobKind::from_input(&job.input) {
            Ok(kind) => kind,
            Err(e) => {
                self.fail(job_id, &e.to_string()).await?;
                return Ok(ExecutionOutcome::Failed);
            }
        };

        if !self.start(job_id).await? {
            return Ok(ExecutionOutcome::Skipped);
        }

        let mut workload = kind.workload(&self.pipeline);
        let total = workload.total_steps();
        self.log(job_id, LogLevel::Info, &workload.start_message())
            .await?;
        tracing::info!(
            job_id = %job_id,
            task_type = kind.task_type(),
            total_steps = total,
            retry_count = job.retry_count,
            "Job execution started",
        );

        for step in 1..=total {
            if cancel.is_cancelled() {
                return Ok(self.stopped(job_id));
            }

            let report = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.stopped(job_id)),
                report = workload.execute_step(step) => report,
            };
            let report = match report {
                Ok(report) => report,
                Err(e) => return self.handle_failure(job_id, &e.to_string()).await,
            };
            if cancel.is_cancelled() {
                return Ok(self.stopped(job_id));
            }

            let logged = self
                .checkpoint(job_id, Progress::new(step, total, report.message))
                .await?;

            if let (true, Some(request)) = (logged, report.external) {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(self.stopped(job_id)),
                    written = self.call_external(job_id, &request) => written?,
                }
            }
        }

        let result = match workload.into_result() {
            Ok(result) => result,
            Err(e) => return self.handle_failure(job_id, &e.to_string()).await,
        };

        if self.complete(job_id, &result).await? {
            Ok(ExecutionOutcome::Succeeded)
        } else {
            tracing::info!(job_id = %job_id, "Job left RUNNING before completion, result discarded");
            Ok(ExecutionOutcome::Skipped)
        }
    }

    fn stopped(&self, job_id: JobId) -> ExecutionOutcome {
        tracing::info!(job_id = %job_id, "Execution stopped by cancellation");
        ExecutionOutcome::Cancelled
    }

    /// Redeliver under the ceiling, otherwise fail the job with `reason`.
    ///
    /// Used both for business-logic errors and for lost workers.
    pub async fn handle_failure(
        &self,
        job_id: JobId,
        reason: &str,
    ) -> EngineResult<ExecutionOutcome> {
        let Some(job) = self.store.get(job_id).await? else {
            return Ok(ExecutionOutcome::Skipped);
        };
        if job.is_terminal() {
            return Ok(ExecutionOutcome::Skipped);
        }

        if job.retry_count < self.max_redeliveries {
            if self.on_retry_attempt(job_id, reason).await? {
                return Ok(ExecutionOutcome::Redeliver);
            }
            return Ok(ExecutionOutcome::Skipped);
        }

        if self.fail(job_id, reason).await? {
            Ok(ExecutionOutcome::Failed)
        } else {
            Ok(ExecutionOutcome::Skipped)
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// `PENDING|RUNNING -> RUNNING`. `false` if the job is missing or
    /// terminal.
    pub async fn start(&self, job_id: JobId) -> EngineResult<bool> {
        let started = self.store.mark_started(job_id).await?;
        if started {
            self.event_bus
                .publish(JobEvent::status_changed(job_id, JobStatus::Running));
        }
        Ok(started)
    }

    /// Record step progress of a `RUNNING` job. Returns `true` when this
    /// step is a logged checkpoint.
    ///
    /// Writes nothing once the job has left `RUNNING`.
    pub async fn checkpoint(&self, job_id: JobId, progress: Progress) -> EngineResult<bool> {
        if !self.is_running(job_id).await? {
            return Ok(false);
        }
        let logged = should_log_checkpoint(progress.current, progress.total);
        if logged {
            self.log(job_id, LogLevel::Info, &progress.message).await?;
        }
        self.progress.update(job_id, progress.clone()).await;

        // A terminal write in between has already cleared the board.
        if !self.is_running(job_id).await? {
            self.progress.clear(job_id).await;
            return Ok(false);
        }
        self.event_bus.publish(JobEvent::progress(job_id, progress));
        Ok(logged)
    }

    /// `RUNNING -> SUCCESS` with `result`.
    pub async fn complete(&self, job_id: JobId, result: &serde_json::Value) -> EngineResult<bool> {
        let completed = self.store.complete(job_id, result).await?;
        if completed {
            self.log(job_id, LogLevel::Info, COMPLETE_MESSAGE).await?;
            self.finished(job_id, JobStatus::Success).await;
            tracing::info!(job_id = %job_id, "Job completed");
        }
        Ok(completed)
    }

    /// `PENDING|RUNNING -> FAILED` with an ERROR log carrying `error`.
    pub async fn fail(&self, job_id: JobId, error: &str) -> EngineResult<bool> {
        let failed = self.store.fail(job_id).await?;
        if failed {
            self.log(job_id, LogLevel::Error, error).await?;
            self.finished(job_id, JobStatus::Failed).await;
            tracing::error!(job_id = %job_id, error, "Job failed");
        }
        Ok(failed)
    }

    /// Count one redelivery and log why. The status stays unchanged.
    pub async fn on_retry_attempt(&self, job_id: JobId, error: &str) -> EngineResult<bool> {
        let Some(retry_count) = self.store.record_retry(job_id).await? else {
            return Ok(false);
        };
        self.log(job_id, LogLevel::Warning, &format!("Retrying task: {error}"))
            .await?;
        tracing::warn!(job_id = %job_id, retry_count, error, "Job will be redelivered");
        Ok(true)
    }

    /// `PENDING|RUNNING -> CANCELLED`. Signalling the in-flight worker is
    /// the dispatcher's job.
    pub async fn cancel(&self, job_id: JobId) -> EngineResult<bool> {
        let cancelled = self.store.cancel(job_id).await?;
        if cancelled {
            self.log(job_id, LogLevel::Info, CANCELLED_MESSAGE).await?;
            self.finished(job_id, JobStatus::Cancelled).await;
            tracing::info!(job_id = %job_id, "Job cancelled");
        }
        Ok(cancelled)
    }

    async fn finished(&self, job_id: JobId, status: JobStatus) {
        self.progress.clear(job_id).await;
        self.event_bus
            .publish(JobEvent::status_changed(job_id, status));
    }

    async fn is_running(&self, job_id: JobId) -> EngineResult<bool> {
        let job = self.store.get(job_id).await?;
        Ok(matches!(job, Some(job) if job.status == JobStatus::Running))
    }

    async fn log(&self, job_id: JobId, level: LogLevel, message: &str) -> EngineResult<()> {
        self.store.append_log(job_id, level, message).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Guarded external call
    // -----------------------------------------------------------------------

    /// Call the external service through the guard. The outcome is logged
    /// and never fails the job.
    async fn call_external(&self, job_id: JobId, request: &ExternalRequest) -> EngineResult<()> {
        match self.guard.call(|| self.external.perform(request)).await {
            Ok(receipt) => {
                self.log(
                    job_id,
                    LogLevel::Info,
                    &format!("External service success: {}", receipt.external_id),
                )
                .await
            }
            Err(GuardError::CircuitOpen) => {
                tracing::warn!(job_id = %job_id, dependency = self.guard.name(), "External call skipped, circuit open");
                self.log(
                    job_id,
                    LogLevel::Warning,
                    "External service skipped (Circuit Breaker OPEN)",
                )
                .await
            }
            Err(GuardError::Exhausted { source, .. } | GuardError::Rejected(source)) => {
                tracing::error!(job_id = %job_id, error = %source, "External call failed");
                self.log(
                    job_id,
                    LogLevel::Error,
                    &format!("External service failed after retries: {source}"),
                )
                .await
            }
        }
    }
}
