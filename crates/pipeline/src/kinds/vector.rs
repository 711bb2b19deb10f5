//! Simulated vector indexing: one chunk per second of `duration`, each
//! chunk eligible for a call to the external index.

use std::time::Duration;

use jobline_core::error::CoreError;
use serde::{Deserialize, Serialize};

use super::{JobError, StepReport};
use crate::external::ExternalRequest;

/// Upper bound on `duration`, in steps.
pub const MAX_DURATION: u32 = 3600;

fn default_duration() -> u32 {
    10
}

fn default_metadata() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorTask {
    #[serde(default)]
    pub vector_data: Vec<f64>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
    /// Number of processing steps.
    #[serde(default = "default_duration")]
    pub duration: u32,
}

impl VectorTask {
    pub(crate) fn validate(&self) -> Result<(), CoreError> {
        if self.duration > MAX_DURATION {
            return Err(CoreError::Validation(format!(
                "duration must be at most {MAX_DURATION}, got {}",
                self.duration
            )));
        }
        if !self.metadata.is_object() {
            return Err(CoreError::Validation(
                "metadata must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct VectorWorkload {
    task: VectorTask,
    step_delay: Duration,
    completed: u32,
}

impl VectorWorkload {
    pub fn new(task: VectorTask, step_delay: Duration) -> Self {
        Self {
            task,
            step_delay,
            completed: 0,
        }
    }

    pub fn total_steps(&self) -> u32 {
        self.task.duration
    }

    pub async fn execute_step(&mut self, step: u32) -> Result<StepReport, JobError> {
        if step != self.completed + 1 || step > self.total_steps() {
            return Err(JobError::OutOfOrder { step });
        }
        tokio::time::sleep(self.step_delay).await;
        self.completed = step;

        let request = ExternalRequest {
            data: self.task.vector_data.clone(),
            metadata: self.task.metadata.clone(),
        };
        Ok(
            StepReport::new(format!("Processing chunk {step}/{}...", self.total_steps()))
                .with_external(request),
        )
    }

    pub fn into_result(self) -> serde_json::Value {
        serde_json::json!({
            "processed_vectors": self.task.vector_data.len(),
            "processed_chunks": self.completed,
            "status": "indexed",
            "metadata_processed": self.task.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn task(duration: u32) -> VectorTask {
        VectorTask {
            vector_data: vec![0.5, 0.25],
            metadata: json!({"collection": "docs"}),
            duration,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn steps_report_progress_and_request_external_call() {
        let mut workload = VectorWorkload::new(task(3), Duration::from_secs(1));
        let started = tokio::time::Instant::now();

        let report = workload.execute_step(1).await.unwrap();
        assert_eq!(report.message, "Processing chunk 1/3...");
        assert_eq!(report.external.map(|r| r.data), Some(vec![0.5, 0.25]));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn result_summarises_run() {
        let mut workload = VectorWorkload::new(task(2), Duration::from_secs(1));
        workload.execute_step(1).await.unwrap();
        workload.execute_step(2).await.unwrap();

        assert_eq!(
            workload.into_result(),
            json!({
                "processed_vectors": 2,
                "processed_chunks": 2,
                "status": "indexed",
                "metadata_processed": {"collection": "docs"},
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn skipping_a_step_is_an_error() {
        let mut workload = VectorWorkload::new(task(3), Duration::ZERO);
        assert_matches!(
            workload.execute_step(2).await,
            Err(JobError::OutOfOrder { step: 2 })
        );
        assert_matches!(
            workload.execute_step(4).await,
            Err(JobError::OutOfOrder { step: 4 })
        );
    }

    #[test]
    fn oversized_duration_is_rejected() {
        assert_matches!(task(MAX_DURATION + 1).validate(), Err(CoreError::Validation(_)));
        assert!(task(0).validate().is_ok());
    }
}
