//! netsched - persistent multi-queue job scheduler.
//!
//! Jobs are submitted to named queues, handed out to polling workers under
//! an affinity policy, and their results recorded. Each queue keeps its
//! records in its own SQLite database and mirrors status, affinity and
//! run deadlines in memory.

pub mod config;
pub mod error;
pub mod protocol;
pub mod query;
pub mod queue;
pub mod telemetry;

pub use error::{Result, SchedError};
