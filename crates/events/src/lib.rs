//! In-process job notifications.
//!
//! - [`EventBus`]: broadcast hub for [`JobEvent`]s (status changes and
//!   step progress), used to wake status streams early.
//! - [`ProgressBoard`]: latest [`Progress`](jobline_core::progress::Progress)
//!   per running job, read by status queries.

pub mod bus;
pub mod progress;

pub use bus::{EventBus, JobEvent, JobEventKind};
pub use progress::ProgressBoard;
