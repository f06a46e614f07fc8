//! Queue module - persistent job queues with affinity scheduling.
//!
//! ## Module Organization
//!
//! - `manager.rs` - Core `Queue` struct, mounting, access checks, listeners
//! - `registry.rs` - `QueueRegistry`: named queues, create/delete/configure
//! - `types/` - JobSet, StatusIndex, Timeline, AffinityIndex, WorkerAffinity
//! - `sqlite/` - Per-queue job store and the registry database
//! - `background/` - Watchdog and reaper passes, background loop
//! - `retry.rs` - Bounded retry of contended transactions
//! - `notifier.rs` - Listener registry and UDP notifications
//!
//! ### Core operations
//!
//! - `submit.rs` - Submit and batch submit
//! - `dispatch.rs` - Scheduler tiers, get_job, put_result_get_job
//! - `result.rs` - put_result, job_failed, return_job
//! - `job_ops.rs` - Cancel, reschedule, heartbeat, progress, inspection, erase
//! - `select.rs` - Query evaluation and field projection

mod background;
mod dispatch;
mod job_ops;
mod manager;
pub mod notifier;
mod registry;
mod result;
pub mod retry;
mod select;
pub mod sqlite;
mod submit;
pub mod types;

#[cfg(test)]
mod tests;

pub use background::PurgeReport;
pub use manager::Queue;
pub use registry::{validate_queue_name, QueueRegistry, SYS_DB_FILE};
pub use select::Projection;
