//! Job orchestration engine.
//!
//! - [`harness`]: runs one delivery of a job step by step and owns every
//!   lifecycle write (start, checkpoint, complete, fail, retry, cancel).
//! - [`dispatcher`]: accepts submissions, feeds the delivery queue to a
//!   bounded worker pool and handles redelivery and cancellation.
//! - [`status`]: point-in-time and streamed status reads.

pub mod dispatcher;
pub mod harness;
pub mod status;

use std::sync::Arc;

use jobline_core::error::CoreError;
use jobline_core::resilience::ResilienceGuard;
use jobline_db::{JobStore, StoreError};
use jobline_events::{EventBus, ProgressBoard};
use jobline_pipeline::ExternalService;

use crate::config::EngineConfig;

pub use dispatcher::{Delivery, Dispatcher};
pub use harness::{ExecutionHarness, ExecutionOutcome};
pub use status::{JobStatusView, StatusDistributor, StatusSnapshot};

/// Name of the guarded dependency in logs.
pub const EXTERNAL_SERVICE_NAME: &str = "external-service";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Every engine component wired to one store, bus and guard.
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn JobStore>,
    pub event_bus: Arc<EventBus>,
    pub progress: Arc<ProgressBoard>,
    pub guard: Arc<ResilienceGuard>,
    pub harness: Arc<ExecutionHarness>,
    pub dispatcher: Arc<Dispatcher>,
    pub status: StatusDistributor,
}

impl Engine {
    pub fn new(
        store: Arc<dyn JobStore>,
        external: Arc<dyn ExternalService>,
        config: &EngineConfig,
    ) -> Self {
        let event_bus = Arc::new(EventBus::default());
        let progress = Arc::new(ProgressBoard::new());
        let guard = Arc::new(ResilienceGuard::new(
            EXTERNAL_SERVICE_NAME,
            config.guard.clone(),
        ));

        let harness = Arc::new(ExecutionHarness::new(
            Arc::clone(&store),
            Arc::clone(&guard),
            external,
            Arc::clone(&event_bus),
            Arc::clone(&progress),
            config.pipeline.clone(),
            config.max_redeliveries,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&harness),
            Arc::clone(&event_bus),
            config.worker_concurrency,
            config.redelivery_backoff.clone(),
        ));
        let status = StatusDistributor::new(
            Arc::clone(&store),
            Arc::clone(&event_bus),
            Arc::clone(&progress),
            config.status_poll_interval,
        );

        Self {
            store,
            event_bus,
            progress,
            guard,
            harness,
            dispatcher,
            status,
        }
    }
}
