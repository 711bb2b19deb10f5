//! Domain building blocks shared by every jobline crate.
//!
//! Nothing in here touches the database or the network: ids, the job
//! status machine, checkpoint cadence and the resilience guard that
//! protects calls to unreliable dependencies.

pub mod error;
pub mod progress;
pub mod resilience;
pub mod status;
pub mod types;
