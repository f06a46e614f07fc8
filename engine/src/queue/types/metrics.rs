//! Per-queue counters, updated with relaxed atomics on every transition.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct QueueMetrics {
    pub submitted: AtomicU64,
    pub dispatched: AtomicU64,
    pub done: AtomicU64,
    pub failed: AtomicU64,
    pub canceled: AtomicU64,
    pub returned: AtomicU64,
    pub timed_out: AtomicU64,
    pub purged: AtomicU64,
    run_time_sum: AtomicU64,
    run_time_count: AtomicU64,
}

/// Point-in-time copy of [`QueueMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub dispatched: u64,
    pub done: u64,
    pub failed: u64,
    pub canceled: u64,
    pub returned: u64,
    pub timed_out: u64,
    pub purged: u64,
    /// Mean run time of completed jobs in seconds
    pub avg_run_time: f64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn record_submit(&self, count: u64) {
        self.submitted.fetch_add(count, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_done(&self, run_time: u64) {
        self.done.fetch_add(1, Ordering::Relaxed);
        self.run_time_sum.fetch_add(run_time, Ordering::Relaxed);
        self.run_time_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_fail(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_cancel(&self) {
        self.canceled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_return(&self) {
        self.returned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_purge(&self, count: u64) {
        self.purged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueStats {
        let count = self.run_time_count.load(Ordering::Relaxed);
        let avg_run_time = if count > 0 {
            self.run_time_sum.load(Ordering::Relaxed) as f64 / count as f64
        } else {
            0.0
        };
        QueueStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            avg_run_time,
        }
    }
}
