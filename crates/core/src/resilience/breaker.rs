//! Circuit breaker state machine.
//!
//! ```text
//! CLOSED --(threshold consecutive failures)--> OPEN
//! OPEN --(reset_timeout elapsed, next call)--> HALF_OPEN
//! HALF_OPEN --(trial succeeds)--> CLOSED
//! HALF_OPEN --(trial fails)--> OPEN
//! ```
//!
//! All state lives behind one mutex so concurrent callers observe and
//! apply transitions atomically. The lock is never held across the
//! guarded operation itself.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Returned when a call is refused without invoking the dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a trial call.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// How a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Regular call while the circuit is closed.
    Normal,
    /// The single recovery trial while half-open.
    Trial,
}

/// Point-in-time copy of the breaker state.
#[derive(Debug, Clone)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_started_at: Option<Instant>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_started_at: None,
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Decide whether a call may proceed.
    ///
    /// An open circuit whose timeout has elapsed moves to half-open and
    /// admits exactly one trial. While that trial is outstanding every
    /// other caller is refused; a trial outstanding for longer than
    /// `reset_timeout` is considered abandoned and replaced.
    pub async fn try_acquire(&self) -> Result<Admission, CircuitOpenError> {
        let mut s = self.inner.lock().await;
        let now = Instant::now();

        match s.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let opened_at = s.opened_at.unwrap_or(now);
                if now.duration_since(opened_at) < self.config.reset_timeout {
                    return Err(CircuitOpenError);
                }
                s.state = CircuitState::HalfOpen;
                s.trial_started_at = Some(now);
                tracing::info!("Circuit breaker half-open, admitting trial call");
                Ok(Admission::Trial)
            }
            CircuitState::HalfOpen => match s.trial_started_at {
                Some(started) if now.duration_since(started) < self.config.reset_timeout => {
                    Err(CircuitOpenError)
                }
                _ => {
                    s.trial_started_at = Some(now);
                    Ok(Admission::Trial)
                }
            },
        }
    }

    /// A guarded call succeeded: close the circuit and reset the counter.
    pub async fn record_success(&self) {
        let mut s = self.inner.lock().await;
        if s.state != CircuitState::Closed {
            tracing::info!("Circuit breaker closed after successful call");
        }
        s.state = CircuitState::Closed;
        s.consecutive_failures = 0;
        s.opened_at = None;
        s.trial_started_at = None;
    }

    /// A guarded call failed (after its own retries).
    pub async fn record_failure(&self) {
        let mut s = self.inner.lock().await;
        s.consecutive_failures = s.consecutive_failures.saturating_add(1);

        let trip = match s.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => s.consecutive_failures >= self.config.failure_threshold,
            // Call admitted before the trip; the timer keeps running.
            CircuitState::Open => false,
        };

        if trip {
            s.state = CircuitState::Open;
            s.opened_at = Some(Instant::now());
            s.trial_started_at = None;
            tracing::warn!(
                consecutive_failures = s.consecutive_failures,
                reset_timeout_secs = self.config.reset_timeout.as_secs(),
                "Circuit breaker opened",
            );
        }
    }

    pub async fn snapshot(&self) -> CircuitSnapshot {
        let s = self.inner.lock().await;
        CircuitSnapshot {
            state: s.state,
            consecutive_failures: s.consecutive_failures,
            opened_at: s.opened_at,
        }
    }
}
