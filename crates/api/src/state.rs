use std::sync::Arc;

use jobline_db::JobStore;
use tokio_util::sync::CancellationToken;

use crate::engine::{Dispatcher, Engine, StatusDistributor};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is behind an `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Job record store.
    pub store: Arc<dyn JobStore>,
    /// Submission and cancellation entry point.
    pub dispatcher: Arc<Dispatcher>,
    /// Status reads and streams.
    pub status: StatusDistributor,
    /// Process-wide shutdown signal; open status streams close on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(engine: &Engine, shutdown: CancellationToken) -> Self {
        Self {
            store: Arc::clone(&engine.store),
            dispatcher: Arc::clone(&engine.dispatcher),
            status: engine.status.clone(),
            shutdown,
        }
    }
}
