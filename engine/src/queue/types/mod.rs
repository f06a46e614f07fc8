//! In-memory indexes and bookkeeping types for a queue.
//!
//! Module organization:
//! - `jobset.rs` - Ordered job-id set with bitmap-style algebra
//! - `status.rs` - StatusIndex and the rollback guard for transitions
//! - `timeline.rs` - Expiration timeline for running jobs
//! - `affinity.rs` - Affinity token dictionary and per-token job sets
//! - `workers.rs` - Worker affinity associations, candidate cache, blacklist
//! - `metrics.rs` - Per-queue atomic counters
//! - `time.rs` - Second-resolution clock and timestamp formatting

mod affinity;
mod jobset;
mod metrics;
mod status;
mod time;
mod timeline;
mod workers;

pub use affinity::AffinityIndex;
pub use jobset::JobSet;
pub use metrics::{QueueMetrics, QueueStats};
pub use status::{StatusGuard, StatusIndex};
pub use time::{format_timestamp, now_secs};
pub use timeline::Timeline;
pub use workers::WorkerAffinity;
