//! Downstream dependency contract and a flaky in-process stand-in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jobline_core::resilience::Transient;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default probability that a mock call fails.
pub const DEFAULT_FAILURE_RATE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExternalError {
    /// Timeout or refused connection; worth retrying.
    #[error("Connection to external service timed out")]
    Unavailable,

    /// The service understood the request and refused it.
    #[error("External service rejected the request: {0}")]
    Rejected(String),
}

impl Transient for ExternalError {
    fn is_transient(&self) -> bool {
        matches!(self, ExternalError::Unavailable)
    }
}

/// Payload handed to the external service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalRequest {
    pub data: Vec<f64>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalReceipt {
    pub status: String,
    pub processed_count: usize,
    pub external_id: String,
}

#[async_trait]
pub trait ExternalService: Send + Sync {
    async fn perform(&self, request: &ExternalRequest) -> Result<ExternalReceipt, ExternalError>;
}

// ---------------------------------------------------------------------------
// MockExternalService
// ---------------------------------------------------------------------------

/// Simulated vector-index service with random latency and transient
/// failures.
///
/// The failure rate can be changed while the service is shared, which
/// lets tests force the circuit breaker open and closed again.
pub struct MockExternalService {
    /// `f64` bits of the failure probability.
    failure_rate: AtomicU64,
    min_latency: Duration,
    max_latency: Duration,
}

impl MockExternalService {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: AtomicU64::new(failure_rate.clamp(0.0, 1.0).to_bits()),
            min_latency: Duration::from_millis(100),
            max_latency: Duration::from_millis(500),
        }
    }

    /// Replace the default 100-500 ms latency window.
    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency = min;
        self.max_latency = max.max(min);
        self
    }

    pub fn failure_rate(&self) -> f64 {
        f64::from_bits(self.failure_rate.load(Ordering::Relaxed))
    }

    pub fn set_failure_rate(&self, rate: f64) {
        self.failure_rate
            .store(rate.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl Default for MockExternalService {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_RATE)
    }
}

#[async_trait]
impl ExternalService for MockExternalService {
    async fn perform(&self, request: &ExternalRequest) -> Result<ExternalReceipt, ExternalError> {
        // ThreadRng is !Send; draw everything before the first await.
        let (latency, roll, suffix) = {
            let mut rng = rand::rng();
            let latency_ms = rng.random_range(
                self.min_latency.as_millis() as u64..=self.max_latency.as_millis() as u64,
            );
            (
                Duration::from_millis(latency_ms),
                rng.random::<f64>(),
                rng.random_range(1000..=9999u32),
            )
        };

        tokio::time::sleep(latency).await;

        if roll < self.failure_rate() {
            return Err(ExternalError::Unavailable);
        }
        Ok(ExternalReceipt {
            status: "success".to_string(),
            processed_count: request.data.len(),
            external_id: format!("ext-{suffix}"),
        })
    }
}
