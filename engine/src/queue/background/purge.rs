//! Reaper: expired record deletion and index compaction.

use tracing::{debug, info};

use super::super::manager::Queue;
use super::super::sqlite::{affinity as affinity_store, jobs};
use super::super::types::{now_secs, JobSet};
use crate::error::Result;
use crate::protocol::JobStatus;

/// Statuses scanned for expired records, in scan order.
const PURGE_ORDER: [JobStatus; 4] = [
    JobStatus::Failed,
    JobStatus::Canceled,
    JobStatus::Done,
    JobStatus::Pending,
];

/// What one reaper pass removed from a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Records past their lifetime
    pub expired: usize,
    /// Logically erased records physically deleted
    pub erased: usize,
    /// Workers forgotten after going silent
    pub workers: usize,
    /// Affinity tokens no job references any more
    pub affinities: usize,
}

impl Queue {
    /// Run one reaper pass with the given limits.
    pub fn purge(&self, batch_size: usize, max_deletes: usize) -> Result<PurgeReport> {
        self.purge_at(now_secs(), batch_size, max_deletes)
    }

    pub(crate) fn purge_at(
        &self,
        now: u64,
        batch_size: usize,
        max_deletes: usize,
    ) -> Result<PurgeReport> {
        let batch_size = batch_size.max(1);
        let mut report = PurgeReport {
            expired: self.purge_expired(now, batch_size, max_deletes)?,
            ..Default::default()
        };
        report.erased = self.purge_erased(batch_size)?;
        report.workers = self.prune_workers(now);
        report.affinities = self.compact_affinity()?;

        let total = report.expired + report.erased;
        if total > 0 {
            self.metrics.record_purge(total as u64);
            info!(
                queue = %self.name,
                expired = report.expired,
                erased = report.erased,
                affinities = report.affinities,
                "Purged jobs"
            );
        }
        Ok(report)
    }

    fn purge_expired(&self, now: u64, batch_size: usize, max_deletes: usize) -> Result<usize> {
        let params = self.params.read().clone();
        let mut deleted_total = 0;

        'statuses: for status in PURGE_ORDER {
            let candidates = self.status.snapshot(status);
            let mut after = None;
            loop {
                let budget = max_deletes.saturating_sub(deleted_total);
                if budget == 0 {
                    break 'statuses;
                }
                let limit = batch_size.min(budget);
                let batch = candidates.batch_after(after, limit);
                let Some(&last) = batch.last() else {
                    break;
                };
                after = Some(last);

                let deleted = self.transact(|tx| {
                    let mut deleted = Vec::new();
                    for &id in &batch {
                        let Some(job) = jobs::load_job(tx, id)? else {
                            continue;
                        };
                        if job.status == status && job.purge_deadline(&params) < now {
                            jobs::delete_job(tx, id)?;
                            deleted.push(id);
                        }
                    }
                    Ok(deleted)
                })?;

                let count = deleted.len();
                if count > 0 {
                    self.forget_jobs(&deleted.into_iter().collect());
                    deleted_total += count;
                }
                // Ids are scanned oldest first: a short batch means caught up.
                if count < limit {
                    break;
                }
            }
        }
        Ok(deleted_total)
    }

    fn purge_erased(&self, batch_size: usize) -> Result<usize> {
        let batch = self.erased.lock().batch_after(None, batch_size);
        if batch.is_empty() {
            return Ok(0);
        }
        self.transact(|tx| {
            for &id in &batch {
                jobs::purge_erased(tx, id)?;
            }
            Ok(())
        })?;
        let done: JobSet = batch.into_iter().collect();
        self.erased.lock().subtract(&done);
        debug!(queue = %self.name, count = done.len(), "Erased jobs deleted");
        Ok(done.len())
    }

    /// Forget workers silent for longer than `wnode_timeout`. Their
    /// affinity claims go back to the vacant pool.
    fn prune_workers(&self, now: u64) -> usize {
        let wnode_timeout = self.params.read().wnode_timeout;
        if wnode_timeout == 0 {
            return 0;
        }
        let pruned = self.workers.lock().prune_idle(now.saturating_sub(wnode_timeout));
        if pruned > 0 {
            debug!(queue = %self.name, workers = pruned, "Idle workers forgotten");
        }
        pruned
    }

    /// Drop postings of deleted jobs and tokens nothing refers to.
    fn compact_affinity(&self) -> Result<usize> {
        let candidates: Vec<u64> = {
            let affinity = self.affinity.read();
            let workers = self.workers.lock();
            affinity
                .empty_tokens()
                .into_iter()
                .filter(|id| !workers.is_claimed(*id))
                .collect()
        };

        let removed = self.transact(|tx| {
            let dangling = affinity_store::remove_dangling_postings(tx)?;
            if dangling > 0 {
                debug!(queue = %self.name, postings = dangling, "Dangling affinity postings removed");
            }
            affinity_store::delete_unused_tokens(tx, &candidates)
        })?;

        if !removed.is_empty() {
            let mut affinity = self.affinity.write();
            let mut workers = self.workers.lock();
            for &aff_id in &removed {
                affinity.drop_token(aff_id);
                workers.forget_affinity(aff_id);
            }
        }
        Ok(removed.len())
    }
}
