use std::str::FromStr;
use std::time::Duration;

use jobline_core::error::CoreError;
use jobline_core::resilience::{BreakerConfig, GuardConfig, RetryPolicy};
use jobline_pipeline::external::DEFAULT_FAILURE_RATE;
use jobline_pipeline::PipelineConfig;

/// Read `key` from the environment, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoreError::Validation(format!("{key} is invalid ({raw:?}): {e}"))),
        Err(_) => Ok(default),
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    pub fn from_env() -> Result<Self, CoreError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host,
            port: env_or("PORT", 3000)?,
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30)?,
        })
    }
}

/// Tunables of the orchestration engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker tasks pulling from the delivery queue.
    pub worker_concurrency: usize,
    /// Execution-level redeliveries before a job is failed.
    pub max_redeliveries: i32,
    /// How often a status stream re-reads the store.
    pub status_poll_interval: Duration,
    /// Wait before a failed delivery is re-enqueued (per attempt).
    pub redelivery_backoff: RetryPolicy,
    /// Retry and circuit-breaker settings for the external service.
    pub guard: GuardConfig,
    pub pipeline: PipelineConfig,
    /// Failure probability of the mock external service.
    pub external_failure_rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            max_redeliveries: 3,
            status_poll_interval: Duration::from_secs(1),
            redelivery_backoff: RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(10),
                jitter: false,
            },
            guard: GuardConfig::default(),
            pipeline: PipelineConfig::default(),
            external_failure_rate: DEFAULT_FAILURE_RATE,
        }
    }
}

impl EngineConfig {
    /// Load engine settings from environment variables with defaults.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `WORKER_CONCURRENCY`         | `4`     |
    /// | `MAX_REDELIVERIES`           | `3`     |
    /// | `STATUS_POLL_INTERVAL_MS`    | `1000`  |
    /// | `STEP_DELAY_MS`              | `1000`  |
    /// | `EXTERNAL_FAILURE_RATE`      | `0.3`   |
    /// | `GUARD_MAX_ATTEMPTS`         | `5`     |
    /// | `GUARD_BASE_DELAY_MS`        | `2000`  |
    /// | `GUARD_MAX_DELAY_MS`         | `10000` |
    /// | `GUARD_JITTER`               | `false` |
    /// | `BREAKER_FAILURE_THRESHOLD`  | `5`     |
    /// | `BREAKER_RESET_TIMEOUT_SECS` | `60`    |
    /// | `REDELIVERY_BASE_DELAY_MS`   | `1000`  |
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();

        let worker_concurrency: usize = env_or("WORKER_CONCURRENCY", defaults.worker_concurrency)?;
        if worker_concurrency == 0 {
            return Err(CoreError::Validation(
                "WORKER_CONCURRENCY must be at least 1".into(),
            ));
        }
        let max_redeliveries: i32 = env_or("MAX_REDELIVERIES", defaults.max_redeliveries)?;
        if max_redeliveries < 0 {
            return Err(CoreError::Validation(
                "MAX_REDELIVERIES must not be negative".into(),
            ));
        }
        let external_failure_rate: f64 =
            env_or("EXTERNAL_FAILURE_RATE", defaults.external_failure_rate)?;
        if !(0.0..=1.0).contains(&external_failure_rate) {
            return Err(CoreError::Validation(
                "EXTERNAL_FAILURE_RATE must be between 0 and 1".into(),
            ));
        }

        let millis = |key: &str, default: u64| env_or(key, default).map(Duration::from_millis);

        let status_poll_interval = millis("STATUS_POLL_INTERVAL_MS", 1000)?;
        if status_poll_interval.is_zero() {
            return Err(CoreError::Validation(
                "STATUS_POLL_INTERVAL_MS must be at least 1".into(),
            ));
        }

        Ok(Self {
            worker_concurrency,
            max_redeliveries,
            status_poll_interval,
            redelivery_backoff: RetryPolicy {
                base_delay: millis("REDELIVERY_BASE_DELAY_MS", 1000)?,
                ..defaults.redelivery_backoff
            },
            guard: GuardConfig {
                retry: RetryPolicy {
                    max_attempts: env_or("GUARD_MAX_ATTEMPTS", 5)?,
                    base_delay: millis("GUARD_BASE_DELAY_MS", 2000)?,
                    max_delay: millis("GUARD_MAX_DELAY_MS", 10_000)?,
                    jitter: env_or("GUARD_JITTER", false)?,
                },
                breaker: BreakerConfig {
                    failure_threshold: env_or("BREAKER_FAILURE_THRESHOLD", 5)?,
                    reset_timeout: Duration::from_secs(env_or("BREAKER_RESET_TIMEOUT_SECS", 60)?),
                },
            },
            pipeline: PipelineConfig {
                step_delay: millis("STEP_DELAY_MS", 1000)?,
                ..defaults.pipeline
            },
            external_failure_rate,
        })
    }
}
