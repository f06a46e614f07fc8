//! Dispatch operations: the affinity-aware scheduler and the job exchange.
//!
//! Candidate selection runs through four tiers, stopping at the first hit:
//!
//! 1. Sticky affinity: jobs of the tokens this worker is associated with.
//! 2. Vacant pool: Pending jobs not pinned to a token any worker claims.
//! 3. Unrestricted pool: any Pending job.
//! 4. Nothing to do.
//!
//! Every tier excludes the worker's blacklist. Within a tier the lowest id
//! wins. A claimed candidate is moved to Running in the status index before
//! the storage transaction, so concurrent callers never pick the same job.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::manager::Queue;
use super::result::store_result;
use super::sqlite::jobs;
use super::types::{now_secs, StatusGuard};
use crate::config::QueueParams;
use crate::error::Result;
use crate::protocol::{Client, DispatchedJob, JobRecord, JobStatus};

const EXPIRED_MSG: &str = "Job expired and cannot be scheduled.";
const TOO_MANY_ATTEMPTS_MSG: &str = "Too many run attempts.";

/// What the storage half of a dispatch found.
pub(crate) enum DispatchOutcome {
    Running(JobRecord),
    /// Failed at pickup: expired or out of run attempts
    Rejected(JobRecord),
    NotPending(JobStatus),
    Gone,
}

fn dispatch_rejection(job: &JobRecord, params: &QueueParams, now: u64) -> Option<&'static str> {
    if job.is_expired_for_dispatch(params, now) {
        return Some(EXPIRED_MSG);
    }
    if params.max_run_attempts > 0 && job.run_counter >= params.max_run_attempts {
        return Some(TOO_MANY_ATTEMPTS_MSG);
    }
    None
}

/// Move a claimed job to Running in storage.
pub(crate) fn store_dispatch(
    conn: &Connection,
    id: u64,
    worker: &str,
    params: &QueueParams,
    now: u64,
    threshold: usize,
) -> std::result::Result<DispatchOutcome, rusqlite::Error> {
    let Some(mut job) = jobs::load_job(conn, id)? else {
        return Ok(DispatchOutcome::Gone);
    };
    if job.status != JobStatus::Pending {
        return Ok(DispatchOutcome::NotPending(job.status));
    }
    if let Some(reason) = dispatch_rejection(&job, params, now) {
        job.status = JobStatus::Failed;
        job.time_done = now;
        job.err_msg = reason.to_string();
        jobs::update_job(conn, &job, threshold)?;
        return Ok(DispatchOutcome::Rejected(job));
    }
    job.status = JobStatus::Running;
    job.time_run = now;
    job.run_timeout = 0;
    job.run_counter += 1;
    job.push_worker(worker.to_string());
    jobs::update_job(conn, &job, threshold)?;
    Ok(DispatchOutcome::Running(job))
}

impl Queue {
    /// Hand the next eligible job to a worker.
    ///
    /// `affinity_prefs` lists tokens the worker would like to stick to.
    /// Returns `None` when nothing is available.
    pub fn get_job(&self, client: &Client, affinity_prefs: &[&str]) -> Result<Option<DispatchedJob>> {
        self.get_job_at(client, affinity_prefs, now_secs())
    }

    pub(crate) fn get_job_at(
        &self,
        client: &Client,
        affinity_prefs: &[&str],
        now: u64,
    ) -> Result<Option<DispatchedJob>> {
        self.ensure_alive()?;
        self.check_worker(client)?;
        let worker = client.key();
        self.register_preferences(&worker, affinity_prefs, now);
        self.dispatch_loop(&worker, now)
    }

    /// Report a result and fetch the next job in one transaction.
    ///
    /// The result half never fails because of the job's state: a reaped job
    /// drops the result, a terminal one ignores it. If the fetched candidate
    /// turns out ineligible, selection continues as in `get_job`.
    pub fn put_result_get_job(
        &self,
        client: &Client,
        job_id: u64,
        ret_code: i32,
        output: &str,
        affinity_prefs: &[&str],
    ) -> Result<Option<DispatchedJob>> {
        self.put_result_get_job_at(client, job_id, ret_code, output, affinity_prefs, now_secs())
    }

    pub(crate) fn put_result_get_job_at(
        &self,
        client: &Client,
        job_id: u64,
        ret_code: i32,
        output: &str,
        affinity_prefs: &[&str],
        now: u64,
    ) -> Result<Option<DispatchedJob>> {
        self.ensure_alive()?;
        self.check_worker(client)?;
        self.check_output("output", output)?;
        let worker = client.key();
        self.register_preferences(&worker, affinity_prefs, now);

        let result_guard = self.begin_result(job_id);
        let fetch_guard = self.pick_candidate(&worker, now);
        if result_guard.is_none() && fetch_guard.is_none() {
            return Ok(None);
        }

        let params = self.params.read().clone();
        let threshold = self.store.overflow_threshold();
        let has_result = result_guard.is_some();
        let fetch_id = fetch_guard.as_ref().map(StatusGuard::id);

        let (stored, fetched) = self.transact(|tx| {
            let stored = if has_result {
                Some(store_result(
                    tx,
                    job_id,
                    ret_code,
                    output,
                    params.delete_done,
                    now,
                    threshold,
                )?)
            } else {
                None
            };
            let fetched = match fetch_id {
                Some(id) => Some(store_dispatch(tx, id, &worker, &params, now, threshold)?),
                None => None,
            };
            Ok((stored, fetched))
        })?;

        if let (Some(guard), Some(outcome)) = (result_guard, stored) {
            self.finish_result(guard, outcome, now);
        }
        match (fetch_guard, fetched) {
            (Some(guard), Some(outcome)) => {
                if let Some(job) = self.finish_dispatch(guard, outcome, &worker, &params, now) {
                    return Ok(Some(job));
                }
                self.dispatch_loop(&worker, now)
            }
            _ => Ok(None),
        }
    }

    /// Remember which known affinity tokens a worker prefers.
    fn register_preferences(&self, worker: &str, prefs: &[&str], now: u64) {
        let affinity = self.affinity.read();
        let mut workers = self.workers.lock();
        workers.touch(worker, now);
        for token in prefs {
            if let Some(aff_id) = affinity.token_id(token) {
                workers.associate(worker, aff_id);
            }
        }
    }

    fn dispatch_loop(&self, worker: &str, now: u64) -> Result<Option<DispatchedJob>> {
        let params = self.params.read().clone();
        let threshold = self.store.overflow_threshold();
        for _ in 0..self.retry_bound.max(1) {
            let Some(guard) = self.pick_candidate(worker, now) else {
                return Ok(None);
            };
            let id = guard.id();
            let outcome =
                self.transact(|tx| store_dispatch(tx, id, worker, &params, now, threshold))?;
            if let Some(job) = self.finish_dispatch(guard, outcome, worker, &params, now) {
                return Ok(Some(job));
            }
        }
        debug!(queue = %self.name, worker = %worker, "Dispatch attempts exhausted");
        Ok(None)
    }

    /// Select and claim the next candidate for `worker`.
    pub(crate) fn pick_candidate(&self, worker: &str, now: u64) -> Option<StatusGuard<'_>> {
        let affinity = self.affinity.read();
        let mut workers = self.workers.lock();
        let blacklist = workers.blacklisted(worker, now);

        // Tier 1: sticky affinity
        let mine = workers.affinities(worker);
        if !mine.is_empty() {
            if let Some(cached) = workers.cached_candidates(worker) {
                if let Some(guard) = self.status.claim_pending(cached.iter()) {
                    return Some(guard);
                }
            }
            let mut candidates = affinity.union_of(mine.iter().copied());
            self.status.retain_status(&mut candidates, JobStatus::Pending);
            candidates.subtract(&blacklist);
            let guard = self.status.claim_pending(candidates.iter());
            workers.store_candidates(worker, candidates);
            if guard.is_some() {
                return guard;
            }
        }

        // Tier 2: jobs not pinned to any claimed affinity
        let claimed = workers.claimed_affinities();
        let mut exclude = affinity.union_of(claimed.iter().copied());
        exclude.union_with(&blacklist);
        if let Some(guard) = self.status.claim_first_pending(&exclude) {
            return Some(guard);
        }

        // Tier 3: the whole backlog
        self.status.claim_first_pending(&blacklist)
    }

    /// Apply the in-memory side effects of a dispatch attempt. Returns the
    /// job when it was handed out, `None` when the caller should pick again.
    pub(crate) fn finish_dispatch(
        &self,
        mut guard: StatusGuard<'_>,
        outcome: DispatchOutcome,
        worker: &str,
        params: &QueueParams,
        now: u64,
    ) -> Option<DispatchedJob> {
        let id = guard.id();
        match outcome {
            DispatchOutcome::Running(job) => {
                guard.commit();
                let run_timeout = job.effective_run_timeout(params);
                if run_timeout > 0 {
                    self.timeline
                        .lock()
                        .add(id, now.saturating_add(run_timeout));
                }
                let token = {
                    let affinity = self.affinity.read();
                    let mut workers = self.workers.lock();
                    workers.drop_candidate(worker, id);
                    if job.aff_id != 0 {
                        workers.associate(worker, job.aff_id);
                    }
                    affinity.token(job.aff_id).map(str::to_string)
                };
                self.metrics.record_dispatch();
                debug!(
                    queue = %self.name,
                    job_id = id,
                    worker = %worker,
                    run_counter = job.run_counter,
                    "Job dispatched"
                );
                Some(DispatchedJob {
                    id,
                    input: job.input,
                    mask: job.mask,
                    affinity: token,
                })
            }
            DispatchOutcome::Rejected(job) => {
                guard.retarget(JobStatus::Failed);
                guard.commit();
                self.workers.lock().drop_candidate(worker, id);
                self.metrics.record_fail();
                info!(queue = %self.name, job_id = id, reason = %job.err_msg, "Job failed at dispatch");
                self.notify_submitter(&job, now);
                None
            }
            DispatchOutcome::NotPending(status) => {
                warn!(
                    queue = %self.name,
                    job_id = id,
                    status = %status,
                    "Status index disagrees with store, following store"
                );
                guard.retarget(status);
                guard.commit();
                None
            }
            DispatchOutcome::Gone => {
                guard.commit_keep_label();
                self.job_vanished(id);
                None
            }
        }
    }
}
