//! Job operations: cancel, reschedule, heartbeat, progress, inspection, erase.

use tracing::{debug, info};

use super::manager::Queue;
use super::result::StoreOutcome;
use super::sqlite::jobs;
use super::types::{now_secs, JobSet};
use crate::error::Result;
use crate::protocol::{Client, JobDescr, JobStatus, ObservedStatus};

impl Queue {
    /// Cancel a Pending or Running job. Cancelling a job that is already
    /// terminal, or unknown, does nothing.
    pub fn cancel(&self, client: &Client, job_id: u64) -> Result<()> {
        self.ensure_alive()?;
        self.check_submitter(client)?;

        let Some(guard) = self.status.transition(
            job_id,
            &[JobStatus::Pending, JobStatus::Running],
            JobStatus::Canceled,
        ) else {
            debug!(queue = %self.name, job_id, "Cancel of terminal or unknown job ignored");
            return Ok(());
        };

        let now = now_secs();
        let threshold = self.store.overflow_threshold();
        let outcome = self.transact(|tx| {
            let Some(mut job) = jobs::load_job(tx, job_id)? else {
                return Ok(StoreOutcome::Missing);
            };
            if job.status.is_terminal() {
                return Ok(StoreOutcome::Ignored(job.status));
            }
            job.status = JobStatus::Canceled;
            job.time_done = now;
            jobs::update_job(tx, &job, threshold)?;
            Ok(StoreOutcome::Stored(job))
        })?;

        match outcome {
            StoreOutcome::Stored(_) => {
                guard.commit();
                self.timeline.lock().remove(job_id);
                self.metrics.record_cancel();
                info!(queue = %self.name, job_id, "Job canceled");
            }
            other => self.settle_mismatch(guard, other),
        }
        Ok(())
    }

    /// Put a job back to Pending whatever its status. Run attempts and
    /// blacklists are left alone.
    pub fn force_reschedule(&self, job_id: u64) -> Result<()> {
        self.ensure_alive()?;
        let Some(guard) = self.status.force(job_id, JobStatus::Pending) else {
            debug!(queue = %self.name, job_id, "Reschedule of unknown job ignored");
            return Ok(());
        };

        let threshold = self.store.overflow_threshold();
        let outcome = self.transact(|tx| {
            let Some(mut job) = jobs::load_job(tx, job_id)? else {
                return Ok(StoreOutcome::Missing);
            };
            job.status = JobStatus::Pending;
            job.time_done = 0;
            jobs::update_job(tx, &job, threshold)?;
            Ok(StoreOutcome::Stored(job))
        })?;

        match outcome {
            StoreOutcome::Stored(_) => {
                guard.commit();
                self.timeline.lock().remove(job_id);
                info!(queue = %self.name, job_id, "Job rescheduled");
                self.notify_listeners_at(now_secs(), false);
            }
            other => self.settle_mismatch(guard, other),
        }
        Ok(())
    }

    /// Push a running job's deadline to `extra_secs` from now.
    pub fn job_delay_expiration(&self, client: &Client, job_id: u64, extra_secs: u64) -> Result<()> {
        self.job_delay_expiration_at(client, job_id, extra_secs, now_secs())
    }

    pub(crate) fn job_delay_expiration_at(
        &self,
        client: &Client,
        job_id: u64,
        extra_secs: u64,
        now: u64,
    ) -> Result<()> {
        self.ensure_alive()?;
        self.check_worker(client)?;
        if self.status.status_of(job_id) != Some(JobStatus::Running) {
            debug!(queue = %self.name, job_id, "Expiration delay for non-running job ignored");
            return Ok(());
        }

        let threshold = self.store.overflow_threshold();
        let outcome = self.transact(|tx| {
            let Some(mut job) = jobs::load_job(tx, job_id)? else {
                return Ok(StoreOutcome::Missing);
            };
            if job.status != JobStatus::Running {
                return Ok(StoreOutcome::Ignored(job.status));
            }
            job.run_timeout = now.saturating_sub(job.time_run).saturating_add(extra_secs);
            jobs::update_job(tx, &job, threshold)?;
            Ok(StoreOutcome::Stored(job))
        })?;

        match outcome {
            StoreOutcome::Stored(_) => {
                let mut timeline = self.timeline.lock();
                // The job may have finished while the transaction ran.
                if self.status.status_of(job_id) == Some(JobStatus::Running) {
                    timeline.add(job_id, now.saturating_add(extra_secs));
                }
                debug!(queue = %self.name, job_id, extra_secs, "Run deadline extended");
            }
            StoreOutcome::Missing | StoreOutcome::Deleted(_) => self.job_vanished(job_id),
            StoreOutcome::Ignored(status) => {
                debug!(queue = %self.name, job_id, status = %status, "Expiration delay ignored")
            }
        }
        Ok(())
    }

    /// Store a progress message for a job.
    pub fn put_progress_msg(&self, client: &Client, job_id: u64, msg: &str) -> Result<()> {
        self.ensure_alive()?;
        self.check_worker(client)?;
        self.check_output("progress message", msg)?;
        if self.status.status_of(job_id).is_none() {
            return Ok(());
        }
        let threshold = self.store.overflow_threshold();
        let found = self.transact(|tx| {
            let Some(mut job) = jobs::load_job(tx, job_id)? else {
                return Ok(false);
            };
            job.progress_msg = msg.to_string();
            jobs::update_job(tx, &job, threshold)
        })?;
        if !found {
            self.job_vanished(job_id);
        }
        Ok(())
    }

    /// Status as clients see it, `Returned` included.
    pub fn get_status(&self, job_id: u64) -> Option<ObservedStatus> {
        self.status.observed(job_id)
    }

    /// Full description of a job.
    ///
    /// With `expected` set, `None` is returned unless the job currently has
    /// that status.
    pub fn get_job_descr(
        &self,
        job_id: u64,
        expected: Option<ObservedStatus>,
    ) -> Result<Option<JobDescr>> {
        self.ensure_alive()?;
        let Some(status) = self.status.observed(job_id) else {
            return Ok(None);
        };
        if expected.map_or(false, |e| e != status) {
            return Ok(None);
        }
        let Some(record) = self.load_job(job_id)? else {
            self.job_vanished(job_id);
            return Ok(None);
        };
        let affinity = self
            .affinity
            .read()
            .token(record.aff_id)
            .map(str::to_string);
        Ok(Some(JobDescr {
            status,
            affinity,
            record,
        }))
    }

    /// Number of jobs with `status`, optionally restricted to one affinity.
    pub fn count_status(&self, status: ObservedStatus, affinity: Option<&str>) -> usize {
        let set = self.status.snapshot_observed(status);
        match affinity {
            None => set.len(),
            Some(token) => {
                let affinity = self.affinity.read();
                affinity
                    .token_id(token)
                    .and_then(|id| affinity.jobs_of(id))
                    .map_or(0, |jobs| jobs.intersection_len(&set))
            }
        }
    }

    /// Erase a job logically. It disappears from every index at once; the
    /// reaper deletes the record later. Returns false for an unknown job.
    pub fn drop_job(&self, job_id: u64) -> Result<bool> {
        self.ensure_alive()?;
        if self.status.status_of(job_id).is_none() {
            return Ok(false);
        }
        self.transact(|tx| jobs::mark_erased(tx, job_id))?;
        self.forget_jobs(&JobSet::from_range(job_id, job_id));
        self.erased.lock().insert(job_id);
        info!(queue = %self.name, job_id, "Job erased");
        Ok(true)
    }
}
