//! Queue tests - modular organization.
//!
//! - core: submit, results, payload limits, access control
//! - scheduler: dispatch tiers, affinity, blacklist, job exchange
//! - lifecycle: cancel, retries, return, reschedule, heartbeats, erase
//! - watchdog: run-timeout detection
//! - reaper: expired record deletion and affinity compaction
//! - query: selection and projection
//! - registry: queue creation, deletion, reconfiguration, remount
//! - notify: listener and submitter datagrams

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use super::*;
use crate::config::{QueueParams, SchedulerConfig};
use crate::error::SchedError;
use crate::protocol::{
    Client, DispatchedJob, JobStatus, ObservedStatus, QueueKind, SubmitRequest,
};
use crate::queue::types::now_secs;

mod lifecycle;
mod query;

pub(super) const QUEUE: &str = "test";
pub(super) const CLASS: &str = "default";

pub(super) struct TestEnv {
    pub registry: Arc<QueueRegistry>,
    pub queue: Arc<Queue>,
    pub now: u64,
    pub dir: TempDir,
}

/// Configuration with one class and one static queue stored under `dir`.
pub(super) fn config_in(dir: &Path, params: QueueParams) -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.storage.data_dir = dir.to_path_buf();
    config.storage.synchronous = 0; // OFF for test speed
    config.classes.insert(CLASS.to_string(), params);
    config.queues.insert(QUEUE.to_string(), CLASS.to_string());
    config
}

pub(super) fn setup() -> TestEnv {
    setup_with(|_| {})
}

pub(super) fn setup_with(tweak: impl FnOnce(&mut QueueParams)) -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut params = QueueParams::default();
    tweak(&mut params);
    let registry = QueueRegistry::open(config_in(dir.path(), params)).expect("Failed to open registry");
    let queue = registry.queue(QUEUE).expect("Static queue not mounted");
    TestEnv {
        registry,
        queue,
        now: now_secs(),
        dir,
    }
}

pub(super) fn submitter() -> Client {
    Client::new("submit-host")
}

pub(super) fn worker(node: &str) -> Client {
    Client::new("node-host").with_node_id(node)
}

pub(super) fn submit_at(q: &Queue, input: &str, now: u64) -> u64 {
    q.submit_batch_at(&submitter(), &[SubmitRequest::new(input)], now)
        .unwrap()
}

pub(super) fn submit_req_at(q: &Queue, req: SubmitRequest, now: u64) -> u64 {
    q.submit_batch_at(&submitter(), &[req], now).unwrap()
}

pub(super) fn dispatch_at(q: &Queue, node: &str, prefs: &[&str], now: u64) -> Option<DispatchedJob> {
    q.get_job_at(&worker(node), prefs, now).unwrap()
}

pub(super) fn record(q: &Queue, id: u64) -> crate::protocol::JobRecord {
    q.load_job(id).unwrap().expect("job record missing")
}
