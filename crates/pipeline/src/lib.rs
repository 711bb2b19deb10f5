//! Job business logic.
//!
//! - [`kinds`]: the closed set of job kinds, parsed from the submission
//!   payload and run one step at a time by the execution harness.
//! - [`external`]: the unreliable downstream dependency called on
//!   checkpoint steps, plus a mock that fails at a configurable rate.

pub mod external;
pub mod kinds;

pub use external::{
    ExternalError, ExternalReceipt, ExternalRequest, ExternalService, MockExternalService,
};
pub use kinds::{JobError, JobKind, PipelineConfig, StepReport, Workload};
