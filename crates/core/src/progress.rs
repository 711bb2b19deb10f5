//! Checkpoint progress data and log cadence.
//!
//! Every step of a running job produces a [`Progress`] value. Only a
//! fraction of them are written to the job log; [`should_log_checkpoint`]
//! decides which.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Approximate number of checkpoint log lines written per job run.
pub const CHECKPOINT_LOG_LINES: u32 = 5;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// In-flight progress of one job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Steps completed so far (1-based once the first step finishes).
    pub current: u32,
    /// Total number of steps in this run.
    pub total: u32,
    /// Human-readable description of the last completed step.
    pub message: String,
}

impl Progress {
    pub fn new(current: u32, total: u32, message: impl Into<String>) -> Self {
        Self {
            current,
            total,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cadence
// ---------------------------------------------------------------------------

/// Number of steps between two logged checkpoints.
///
/// Roughly `total / 5`, never less than one step.
pub fn checkpoint_interval(total: u32) -> u32 {
    (total / CHECKPOINT_LOG_LINES).max(1)
}

/// Whether the checkpoint for 1-based step `current` goes to the job log.
///
/// The first step is always logged, then every [`checkpoint_interval`]
/// steps after it.
pub fn should_log_checkpoint(current: u32, total: u32) -> bool {
    if current == 0 {
        return false;
    }
    (current - 1) % checkpoint_interval(total) == 0
}
