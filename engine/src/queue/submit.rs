//! Submit operations for adding jobs to a queue.
//!
//! Contains `submit` and `submit_batch`. A batch reserves one contiguous id
//! range in a single transaction.

use std::sync::atomic::Ordering;

use tracing::debug;

use super::manager::Queue;
use super::sqlite::{affinity as affinity_store, jobs};
use super::types::now_secs;
use crate::error::{Result, SchedError};
use crate::protocol::{Client, JobRecord, JobStatus, SubmitRequest};

impl Queue {
    /// Submit one job. Returns its id.
    pub fn submit(&self, client: &Client, req: SubmitRequest) -> Result<u64> {
        self.submit_batch_at(client, std::slice::from_ref(&req), now_secs())
    }

    /// Submit several jobs. Returns the first id; the rest follow it
    /// consecutively in request order.
    pub fn submit_batch(&self, client: &Client, reqs: &[SubmitRequest]) -> Result<u64> {
        self.submit_batch_at(client, reqs, now_secs())
    }

    pub(crate) fn submit_batch_at(
        &self,
        client: &Client,
        reqs: &[SubmitRequest],
        now: u64,
    ) -> Result<u64> {
        self.ensure_alive()?;
        if reqs.is_empty() {
            return Err(SchedError::InvalidArgument(
                "batch must contain at least one job".to_string(),
            ));
        }
        self.check_submitter(client)?;

        let (max_input, notif_timeout) = {
            let params = self.params.read();
            (params.max_input_size, params.notif_timeout)
        };
        if let Some(req) = reqs.iter().find(|r| r.input.len() > max_input) {
            return Err(SchedError::DataTooLong {
                what: "input",
                len: req.input.len(),
                limit: max_input,
            });
        }

        let was_empty = self.status.count(JobStatus::Pending) == 0;
        let count = reqs.len() as u64;
        let threshold = self.store.overflow_threshold();

        let (first, postings) = self.transact(|tx| {
            let first = jobs::next_id_batch(tx, count)?;
            let mut postings: Vec<(u64, String, u64)> = Vec::new();
            for (offset, req) in reqs.iter().enumerate() {
                let id = first + offset as u64;
                let aff_id = match req.affinity.as_deref().filter(|t| !t.is_empty()) {
                    Some(token) => {
                        let (aff_id, _) = affinity_store::resolve_token(tx, token)?;
                        affinity_store::add_postings(tx, aff_id, id, id)?;
                        postings.push((aff_id, token.to_string(), id));
                        aff_id
                    }
                    None => 0,
                };
                jobs::insert_job(tx, &JobRecord::new(id, req, aff_id, now), threshold)?;
            }
            Ok((first, postings))
        })?;
        let last = first + count - 1;

        // Affinity before status, so a job is never Pending without its token.
        if !postings.is_empty() {
            let mut affinity = self.affinity.write();
            let mut workers = self.workers.lock();
            for (aff_id, token, job_id) in &postings {
                if affinity.token(*aff_id).is_none() {
                    affinity.register_token(*aff_id, token);
                }
                affinity.add_job(*aff_id, *job_id);
                workers.invalidate_affinity(*aff_id);
            }
        }
        self.status.insert_range(first, last, JobStatus::Pending);
        self.empty_since.store(0, Ordering::Relaxed);
        self.metrics.record_submit(count);

        debug!(
            queue = %self.name,
            first_id = first,
            count,
            submitter = %client.host,
            "Jobs submitted"
        );

        if was_empty && notif_timeout > 0 {
            self.notify_listeners_at(now, true);
        }
        Ok(first)
    }
}
