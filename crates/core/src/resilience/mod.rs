//! Retry plus circuit-breaker protection for one unreliable dependency.
//!
//! A [`ResilienceGuard`] is created once per protected dependency and
//! shared (via `Arc`) by every caller. Each [`ResilienceGuard::call`]
//! first asks the [`CircuitBreaker`] for admission, then runs the
//! operation under the [`RetryPolicy`]. Only the final outcome of the
//! retry loop is reported to the breaker.

pub mod breaker;
pub mod retry;

use std::future::Future;

pub use breaker::{
    Admission, BreakerConfig, CircuitBreaker, CircuitOpenError, CircuitSnapshot, CircuitState,
};
pub use retry::RetryPolicy;

/// Classifies errors the guard may retry.
pub trait Transient {
    /// `true` for failures worth another attempt (timeouts, refused
    /// connections); `false` for failures that will not go away.
    fn is_transient(&self) -> bool;
}

/// Why a guarded call did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E: std::error::Error + 'static> {
    /// The breaker refused the call; the operation was not invoked.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// A non-transient error, propagated without retrying.
    #[error("non-retryable failure: {0}")]
    Rejected(#[source] E),
}

impl<E: std::error::Error + 'static> GuardError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardError::CircuitOpen)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GuardConfig {
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
}

pub struct ResilienceGuard {
    name: String,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ResilienceGuard {
    /// `name` identifies the protected dependency in log output.
    pub fn new(name: impl Into<String>, config: GuardConfig) -> Self {
        Self {
            name: name.into(),
            retry: config.retry,
            breaker: CircuitBreaker::new(config.breaker),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn circuit(&self) -> CircuitSnapshot {
        self.breaker.snapshot().await
    }

    /// Invoke `operation` with retry and circuit-breaker protection.
    ///
    /// `operation` is called once per attempt; it is never called when
    /// the breaker refuses admission.
    pub async fn call<T, E, F, Fut>(&self, mut operation: F) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::error::Error + 'static,
    {
        let admission = match self.breaker.try_acquire().await {
            Ok(admission) => admission,
            Err(CircuitOpenError) => {
                tracing::debug!(dependency = %self.name, "Call refused, circuit open");
                return Err(GuardError::CircuitOpen);
            }
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    self.breaker.record_success().await;
                    if admission == Admission::Trial {
                        tracing::info!(dependency = %self.name, "Trial call succeeded");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => {
                    self.breaker.record_failure().await;
                    tracing::warn!(
                        dependency = %self.name,
                        error = %e,
                        "Non-retryable failure",
                    );
                    return Err(GuardError::Rejected(e));
                }
                Err(e) if attempt >= max_attempts => {
                    self.breaker.record_failure().await;
                    tracing::warn!(
                        dependency = %self.name,
                        attempts = attempt,
                        error = %e,
                        "Retries exhausted",
                    );
                    return Err(GuardError::Exhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.retry.backoff(attempt);
                    tracing::debug!(
                        dependency = %self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
