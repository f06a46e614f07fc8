//! Result and failure operations for dispatched jobs.
//!
//! Contains `put_result`, `job_failed` and `return_job`, plus the storage
//! half of a result submission shared with the job exchange.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::manager::Queue;
use super::sqlite::jobs;
use super::types::{now_secs, JobSet, StatusGuard};
use crate::error::{Result, SchedError};
use crate::protocol::{Client, JobRecord, JobStatus};

/// What the storage half of a status change found.
pub(crate) enum StoreOutcome {
    /// Record is gone (already reaped)
    Missing,
    /// Stored status did not allow the change
    Ignored(JobStatus),
    Stored(JobRecord),
    /// Record was erased as part of the change
    Deleted(JobRecord),
}

/// Write a job's result, or erase the record when `delete_done` is set.
pub(crate) fn store_result(
    conn: &Connection,
    id: u64,
    ret_code: i32,
    output: &str,
    delete_done: bool,
    now: u64,
    threshold: usize,
) -> std::result::Result<StoreOutcome, rusqlite::Error> {
    let Some(mut job) = jobs::load_job(conn, id)? else {
        return Ok(StoreOutcome::Missing);
    };
    if !matches!(job.status, JobStatus::Running | JobStatus::Pending) {
        return Ok(StoreOutcome::Ignored(job.status));
    }
    job.status = JobStatus::Done;
    job.ret_code = ret_code;
    job.output = output.to_string();
    job.time_done = now;

    if delete_done {
        jobs::delete_job(conn, id)?;
        Ok(StoreOutcome::Deleted(job))
    } else {
        jobs::update_job(conn, &job, threshold)?;
        Ok(StoreOutcome::Stored(job))
    }
}

impl Queue {
    pub(crate) fn check_output(&self, what: &'static str, data: &str) -> Result<()> {
        let limit = self.params.read().max_output_size;
        if data.len() > limit {
            return Err(SchedError::DataTooLong {
                what,
                len: data.len(),
                limit,
            });
        }
        Ok(())
    }

    /// Record a job's result and mark it Done.
    ///
    /// A result for a job that no longer exists is dropped silently; a
    /// result for a job already in a terminal state is ignored.
    pub fn put_result(&self, client: &Client, job_id: u64, ret_code: i32, output: &str) -> Result<()> {
        self.put_result_at(client, job_id, ret_code, output, now_secs())
    }

    pub(crate) fn put_result_at(
        &self,
        client: &Client,
        job_id: u64,
        ret_code: i32,
        output: &str,
        now: u64,
    ) -> Result<()> {
        self.ensure_alive()?;
        self.check_worker(client)?;
        self.check_output("output", output)?;

        let Some(guard) = self.begin_result(job_id) else {
            return Ok(());
        };
        let delete_done = self.params.read().delete_done;
        let threshold = self.store.overflow_threshold();
        let outcome = self.transact(|tx| {
            store_result(tx, job_id, ret_code, output, delete_done, now, threshold)
        })?;
        self.finish_result(guard, outcome, now);
        Ok(())
    }

    /// Claim the status change for a result, if the job can accept one.
    pub(crate) fn begin_result(&self, job_id: u64) -> Option<StatusGuard<'_>> {
        let guard = self.status.transition(
            job_id,
            &[JobStatus::Running, JobStatus::Pending],
            JobStatus::Done,
        );
        if guard.is_none() {
            match self.status.status_of(job_id) {
                Some(status) => {
                    debug!(queue = %self.name, job_id, status = %status, "Result ignored")
                }
                None => debug!(queue = %self.name, job_id, "Result for unknown job dropped"),
            }
        }
        guard
    }

    /// Apply the in-memory side effects of a stored result.
    pub(crate) fn finish_result(&self, mut guard: StatusGuard<'_>, outcome: StoreOutcome, now: u64) {
        let job_id = guard.id();
        match outcome {
            StoreOutcome::Missing => {
                guard.commit_keep_label();
                debug!(queue = %self.name, job_id, "Result for reaped job dropped");
                self.forget_jobs(&JobSet::from_range(job_id, job_id));
            }
            StoreOutcome::Ignored(status) => {
                warn!(
                    queue = %self.name,
                    job_id,
                    status = %status,
                    "Status index disagrees with store, result ignored"
                );
                guard.retarget(status);
                guard.commit_keep_label();
            }
            StoreOutcome::Stored(job) => {
                guard.commit();
                self.timeline.lock().remove(job_id);
                self.record_completion(&job, now);
            }
            StoreOutcome::Deleted(job) => {
                guard.commit();
                self.forget_jobs(&JobSet::from_range(job_id, job_id));
                self.record_completion(&job, now);
            }
        }
    }

    fn record_completion(&self, job: &JobRecord, now: u64) {
        let run_time = if job.time_run > 0 {
            now.saturating_sub(job.time_run)
        } else {
            0
        };
        self.metrics.record_done(run_time);
        debug!(queue = %self.name, job_id = job.id, ret_code = job.ret_code, "Job done");
        self.notify_submitter(job, now);
    }

    /// Report that a running job failed on the calling worker.
    ///
    /// While the job has retries left it goes back to Pending (labelled
    /// Returned) and the worker is blacklisted for it; otherwise it fails.
    pub fn job_failed(
        &self,
        client: &Client,
        job_id: u64,
        err_msg: &str,
        output: &str,
        ret_code: i32,
    ) -> Result<()> {
        self.job_failed_at(client, job_id, err_msg, output, ret_code, now_secs())
    }

    pub(crate) fn job_failed_at(
        &self,
        client: &Client,
        job_id: u64,
        err_msg: &str,
        output: &str,
        ret_code: i32,
        now: u64,
    ) -> Result<()> {
        self.ensure_alive()?;
        self.check_worker(client)?;
        self.check_output("output", output)?;
        self.check_output("error message", err_msg)?;

        let Some(mut guard) =
            self.status
                .transition(job_id, &[JobStatus::Running], JobStatus::Pending)
        else {
            debug!(queue = %self.name, job_id, "Failure report for non-running job ignored");
            return Ok(());
        };

        let (failed_retries, blacklist_time) = {
            let params = self.params.read();
            (params.failed_retries, params.blacklist_time)
        };
        let threshold = self.store.overflow_threshold();
        let outcome = self.transact(|tx| {
            let Some(mut job) = jobs::load_job(tx, job_id)? else {
                return Ok(StoreOutcome::Missing);
            };
            if job.status != JobStatus::Running {
                return Ok(StoreOutcome::Ignored(job.status));
            }
            job.err_msg = err_msg.to_string();
            job.output = output.to_string();
            job.ret_code = ret_code;
            if job.run_counter <= failed_retries {
                job.status = JobStatus::Pending;
            } else {
                job.status = JobStatus::Failed;
                job.time_done = now;
            }
            jobs::update_job(tx, &job, threshold)?;
            Ok(StoreOutcome::Stored(job))
        })?;

        match outcome {
            StoreOutcome::Stored(job) if job.status == JobStatus::Pending => {
                guard.commit_returned();
                self.timeline.lock().remove(job_id);
                if blacklist_time > 0 {
                    self.workers
                        .lock()
                        .blacklist(&client.key(), job_id, now.saturating_add(blacklist_time));
                }
                self.metrics.record_return();
                info!(
                    queue = %self.name,
                    job_id,
                    worker = %client.key(),
                    run_counter = job.run_counter,
                    "Job failed, returned for retry"
                );
                self.notify_listeners_at(now, false);
            }
            StoreOutcome::Stored(job) => {
                guard.retarget(JobStatus::Failed);
                guard.commit();
                self.timeline.lock().remove(job_id);
                self.metrics.record_fail();
                info!(
                    queue = %self.name,
                    job_id,
                    worker = %client.key(),
                    run_counter = job.run_counter,
                    error = %err_msg,
                    "Job failed"
                );
                self.notify_submitter(&job, now);
            }
            other => self.settle_mismatch(guard, other),
        }
        Ok(())
    }

    /// Voluntarily give a running job back. The attempt is not counted.
    pub fn return_job(&self, client: &Client, job_id: u64) -> Result<()> {
        self.ensure_alive()?;
        self.check_worker(client)?;

        let Some(guard) =
            self.status
                .transition(job_id, &[JobStatus::Running], JobStatus::Pending)
        else {
            debug!(queue = %self.name, job_id, "Return of non-running job ignored");
            return Ok(());
        };

        let threshold = self.store.overflow_threshold();
        let outcome = self.transact(|tx| {
            let Some(mut job) = jobs::load_job(tx, job_id)? else {
                return Ok(StoreOutcome::Missing);
            };
            if job.status != JobStatus::Running {
                return Ok(StoreOutcome::Ignored(job.status));
            }
            job.status = JobStatus::Pending;
            job.run_counter = job.run_counter.saturating_sub(1);
            jobs::update_job(tx, &job, threshold)?;
            Ok(StoreOutcome::Stored(job))
        })?;

        match outcome {
            StoreOutcome::Stored(_) => {
                guard.commit_returned();
                self.timeline.lock().remove(job_id);
                self.metrics.record_return();
                debug!(queue = %self.name, job_id, worker = %client.key(), "Job returned");
                self.notify_listeners_at(now_secs(), false);
            }
            other => self.settle_mismatch(guard, other),
        }
        Ok(())
    }

    /// Reconcile the index after the store refused a change.
    pub(crate) fn settle_mismatch(&self, mut guard: StatusGuard<'_>, outcome: StoreOutcome) {
        let job_id = guard.id();
        match outcome {
            StoreOutcome::Missing | StoreOutcome::Deleted(_) => {
                guard.commit_keep_label();
                self.job_vanished(job_id);
            }
            StoreOutcome::Ignored(status) => {
                warn!(
                    queue = %self.name,
                    job_id,
                    status = %status,
                    "Status index disagrees with store, following store"
                );
                guard.retarget(status);
                guard.commit_keep_label();
            }
            StoreOutcome::Stored(job) => {
                guard.retarget(job.status);
                guard.commit();
            }
        }
    }
}
