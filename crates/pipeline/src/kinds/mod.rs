//! Job kinds and their step-wise workloads.
//!
//! A submission payload names its kind in `task_type`
//! (`"vector_processing"` when absent). [`JobKind::from_input`] validates
//! the payload at submission time; [`JobKind::workload`] turns it into a
//! [`Workload`] that the harness advances one step at a time, which gives
//! it a checkpoint and a cancellation point between steps.

pub mod scrape;
pub mod vector;

use std::time::Duration;

use jobline_core::error::CoreError;
use serde::de::DeserializeOwned;

use crate::external::ExternalRequest;

pub use scrape::{ScrapeTask, ScrapeWorkload};
pub use vector::{VectorTask, VectorWorkload};

/// Task type assumed when the payload does not name one.
pub const DEFAULT_TASK_TYPE: &str = "vector_processing";

/// Business-logic failure inside a workload. Triggers redelivery.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Scrape failed: {0}")]
    Fetch(String),

    #[error("Invalid job input: {0}")]
    Input(String),

    #[error("Step {step} called out of order")]
    OutOfOrder { step: u32 },
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Simulated work per step.
    pub step_delay: Duration,
    /// Timeout for outbound page fetches.
    pub http_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_secs(1),
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// What one finished step reports back to the harness.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub message: String,
    /// External call the step would like made on a checkpoint step.
    pub external: Option<ExternalRequest>,
}

impl StepReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            external: None,
        }
    }

    pub fn with_external(mut self, request: ExternalRequest) -> Self {
        self.external = Some(request);
        self
    }
}

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    VectorProcessing(VectorTask),
    WebScrape(ScrapeTask),
}

impl JobKind {
    /// Parse and validate a submission payload.
    pub fn from_input(input: &serde_json::Value) -> Result<Self, CoreError> {
        if !input.is_object() {
            return Err(CoreError::Validation(
                "Task payload must be a JSON object".to_string(),
            ));
        }
        let task_type = match input.get("task_type") {
            None | Some(serde_json::Value::Null) => DEFAULT_TASK_TYPE,
            Some(serde_json::Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(CoreError::Validation(format!(
                    "task_type must be a string, got {other}"
                )))
            }
        };

        let kind = match task_type {
            "vector_processing" => JobKind::VectorProcessing(parse(input)?),
            "web_scrape" => JobKind::WebScrape(parse(input)?),
            other => {
                return Err(CoreError::Validation(format!("Unknown task_type: {other}")));
            }
        };
        kind.validate()?;
        Ok(kind)
    }

    pub fn task_type(&self) -> &'static str {
        match self {
            JobKind::VectorProcessing(_) => "vector_processing",
            JobKind::WebScrape(_) => "web_scrape",
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        match self {
            JobKind::VectorProcessing(task) => task.validate(),
            JobKind::WebScrape(task) => task.validate(),
        }
    }

    /// Fresh workload starting at step 1.
    pub fn workload(&self, config: &PipelineConfig) -> Workload {
        match self {
            JobKind::VectorProcessing(task) => {
                Workload::Vector(VectorWorkload::new(task.clone(), config.step_delay))
            }
            JobKind::WebScrape(task) => Workload::Scrape(ScrapeWorkload::new(task.clone(), config)),
        }
    }
}

fn parse<T: DeserializeOwned>(input: &serde_json::Value) -> Result<T, CoreError> {
    serde_json::from_value(input.clone())
        .map_err(|e| CoreError::Validation(format!("Invalid task payload: {e}")))
}

// ---------------------------------------------------------------------------
// Workload
// ---------------------------------------------------------------------------

/// One in-progress execution of a job kind.
pub enum Workload {
    Vector(VectorWorkload),
    Scrape(ScrapeWorkload),
}

impl Workload {
    pub fn total_steps(&self) -> u32 {
        match self {
            Workload::Vector(w) => w.total_steps(),
            Workload::Scrape(w) => w.total_steps(),
        }
    }

    /// Line logged before the first step.
    pub fn start_message(&self) -> String {
        match self {
            Workload::Vector(_) => "Task started processing".to_string(),
            Workload::Scrape(w) => format!("Starting scrape for {}", w.url()),
        }
    }

    /// Run step `step` (1-based). Steps must be run in order.
    pub async fn execute_step(&mut self, step: u32) -> Result<StepReport, JobError> {
        match self {
            Workload::Vector(w) => w.execute_step(step).await,
            Workload::Scrape(w) => w.execute_step(step).await,
        }
    }

    /// Result payload once every step has run.
    pub fn into_result(self) -> Result<serde_json::Value, JobError> {
        match self {
            Workload::Vector(w) => Ok(w.into_result()),
            Workload::Scrape(w) => w.into_result(),
        }
    }
}
