//! Run-timeout detection.

use tracing::{error, info};

use super::super::manager::Queue;
use super::super::result::StoreOutcome;
use super::super::sqlite::jobs;
use super::super::types::now_secs;
use crate::protocol::JobStatus;

enum WatchOutcome {
    Demoted,
    /// Deadline was extended, re-check at this instant
    NotDue(u64),
    Other(StoreOutcome),
}

impl Queue {
    /// Return overdue running jobs to Pending. Returns how many were demoted.
    pub fn check_execution_timeout(&self) -> usize {
        self.check_execution_timeout_at(now_secs())
    }

    pub(crate) fn check_execution_timeout_at(&self, now: u64) -> usize {
        let due = self.timeline.lock().extract_due(now);
        if due.is_empty() {
            return 0;
        }
        let params = self.params.read().clone();
        let threshold = self.store.overflow_threshold();
        let mut demoted = 0;

        for id in due {
            // Finished jobs leave stale entries behind.
            let Some(guard) = self
                .status
                .transition(id, &[JobStatus::Running], JobStatus::Pending)
            else {
                continue;
            };

            let outcome = self.transact(|tx| {
                let Some(mut job) = jobs::load_job(tx, id)? else {
                    return Ok(WatchOutcome::Other(StoreOutcome::Missing));
                };
                if job.status != JobStatus::Running {
                    return Ok(WatchOutcome::Other(StoreOutcome::Ignored(job.status)));
                }
                let run_timeout = job.effective_run_timeout(&params);
                let expires = job.time_run.saturating_add(run_timeout);
                if run_timeout > 0 && expires > now {
                    return Ok(WatchOutcome::NotDue(expires));
                }
                job.status = JobStatus::Pending;
                job.time_done = 0;
                jobs::update_job(tx, &job, threshold)?;
                Ok(WatchOutcome::Demoted)
            });

            match outcome {
                Ok(WatchOutcome::Demoted) => {
                    guard.commit_returned();
                    self.metrics.record_timeout();
                    demoted += 1;
                    info!(queue = %self.name, job_id = id, "Job run timeout, returned to Pending");
                }
                Ok(WatchOutcome::NotDue(expires)) => {
                    drop(guard);
                    self.timeline.lock().add(id, expires);
                }
                Ok(WatchOutcome::Other(other)) => self.settle_mismatch(guard, other),
                Err(e) => {
                    drop(guard);
                    error!(queue = %self.name, job_id = id, error = %e, "Run timeout check failed");
                    self.timeline.lock().add(id, now);
                }
            }
        }

        if demoted > 0 {
            self.notify_listeners_at(now, false);
        }
        demoted
    }
}
