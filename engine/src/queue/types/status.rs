//! In-memory status index: one job set per status.
//!
//! The index is the authoritative answer to "what is the current status of
//! job N". Mutations go through [`StatusGuard`]: the change is applied to
//! the index immediately (so concurrent schedulers cannot pick the same job)
//! and rolled back on drop unless the caller commits after the storage
//! transaction succeeded.

use parking_lot::RwLock;

use super::jobset::JobSet;
use crate::protocol::{JobStatus, ObservedStatus};

#[derive(Default)]
struct StatusSets {
    by_status: [JobSet; 5],
    /// Pending jobs carrying the transient `Returned` label
    returned: JobSet,
}

impl StatusSets {
    fn status_of(&self, id: u64) -> Option<JobStatus> {
        JobStatus::ALL
            .into_iter()
            .find(|s| self.by_status[s.index()].contains(id))
    }

    fn move_job(&mut self, id: u64, from: JobStatus, to: JobStatus) {
        self.by_status[from.index()].remove(id);
        self.by_status[to.index()].insert(id);
    }
}

#[derive(Default)]
pub struct StatusIndex {
    sets: RwLock<StatusSets>,
}

impl StatusIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a job that is already persisted with `status`.
    pub fn insert(&self, id: u64, status: JobStatus) {
        let mut sets = self.sets.write();
        if let Some(old) = sets.status_of(id) {
            sets.by_status[old.index()].remove(id);
        }
        sets.by_status[status.index()].insert(id);
    }

    pub fn insert_range(&self, first: u64, last: u64, status: JobStatus) {
        let range = JobSet::from_range(first, last);
        self.sets.write().by_status[status.index()].union_with(&range);
    }

    pub fn remove_all(&self, ids: &JobSet) {
        let mut sets = self.sets.write();
        for set in sets.by_status.iter_mut() {
            set.subtract(ids);
        }
        sets.returned.subtract(ids);
    }

    pub fn status_of(&self, id: u64) -> Option<JobStatus> {
        self.sets.read().status_of(id)
    }

    pub fn observed(&self, id: u64) -> Option<ObservedStatus> {
        let sets = self.sets.read();
        let status = sets.status_of(id)?;
        Some(ObservedStatus::new(status, sets.returned.contains(id)))
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.sets.read().by_status[status.index()].len()
    }

    pub fn total(&self) -> usize {
        self.sets.read().by_status.iter().map(JobSet::len).sum()
    }

    pub fn snapshot(&self, status: JobStatus) -> JobSet {
        self.sets.read().by_status[status.index()].clone()
    }

    /// Jobs matching an observed status (`Returned` included).
    pub fn snapshot_observed(&self, status: ObservedStatus) -> JobSet {
        let sets = self.sets.read();
        match status {
            ObservedStatus::Returned => sets.returned.clone(),
            ObservedStatus::Pending => {
                let mut pending = sets.by_status[JobStatus::Pending.index()].clone();
                pending.subtract(&sets.returned);
                pending
            }
            other => sets.by_status[other.persisted().index()].clone(),
        }
    }

    /// Every tracked job.
    pub fn all_jobs(&self) -> JobSet {
        let sets = self.sets.read();
        let mut all = JobSet::new();
        for set in sets.by_status.iter() {
            all.union_with(set);
        }
        all
    }

    /// Move `id` to `to` if its current status is one of `from`.
    pub fn transition(&self, id: u64, from: &[JobStatus], to: JobStatus) -> Option<StatusGuard<'_>> {
        let mut sets = self.sets.write();
        let prior = sets.status_of(id)?;
        if !from.contains(&prior) {
            return None;
        }
        Some(Self::apply(&mut sets, self, id, prior, to))
    }

    /// Move `id` to `to` whatever its current status.
    pub fn force(&self, id: u64, to: JobStatus) -> Option<StatusGuard<'_>> {
        let mut sets = self.sets.write();
        let prior = sets.status_of(id)?;
        Some(Self::apply(&mut sets, self, id, prior, to))
    }

    /// Claim the first candidate that is still Pending, moving it to Running.
    pub fn claim_pending<I>(&self, candidates: I) -> Option<StatusGuard<'_>>
    where
        I: IntoIterator<Item = u64>,
    {
        let mut sets = self.sets.write();
        let id = candidates
            .into_iter()
            .find(|id| sets.by_status[JobStatus::Pending.index()].contains(*id))?;
        Some(Self::apply(
            &mut sets,
            self,
            id,
            JobStatus::Pending,
            JobStatus::Running,
        ))
    }

    /// Claim the lowest Pending job not in `exclude`, moving it to Running.
    pub fn claim_first_pending(&self, exclude: &JobSet) -> Option<StatusGuard<'_>> {
        let mut sets = self.sets.write();
        let id = sets.by_status[JobStatus::Pending.index()]
            .iter()
            .find(|id| !exclude.contains(*id))?;
        Some(Self::apply(
            &mut sets,
            self,
            id,
            JobStatus::Pending,
            JobStatus::Running,
        ))
    }

    /// Keep only the ids of `set` currently in `status`.
    pub fn retain_status(&self, set: &mut JobSet, status: JobStatus) {
        let sets = self.sets.read();
        set.retain(|id| sets.by_status[status.index()].contains(id));
    }

    fn apply<'a>(
        sets: &mut StatusSets,
        index: &'a StatusIndex,
        id: u64,
        prior: JobStatus,
        to: JobStatus,
    ) -> StatusGuard<'a> {
        let prior_returned = sets.returned.contains(id);
        sets.move_job(id, prior, to);
        StatusGuard {
            index,
            id,
            prior,
            prior_returned,
            target: to,
            done: false,
        }
    }
}

/// Pending status change on the index, reverted on drop unless committed.
pub struct StatusGuard<'a> {
    index: &'a StatusIndex,
    id: u64,
    prior: JobStatus,
    prior_returned: bool,
    target: JobStatus,
    done: bool,
}

impl StatusGuard<'_> {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Redirect the pending change to another status.
    pub fn retarget(&mut self, to: JobStatus) {
        if to == self.target {
            return;
        }
        let mut sets = self.index.sets.write();
        if sets.by_status[self.target.index()].contains(self.id) {
            sets.move_job(self.id, self.target, to);
            self.target = to;
        }
    }

    /// Keep the change and clear the `Returned` label.
    pub fn commit(mut self) {
        self.done = true;
        self.index.sets.write().returned.remove(self.id);
    }

    /// Keep the change, labelling the job `Returned`.
    pub fn commit_returned(mut self) {
        self.done = true;
        let mut sets = self.index.sets.write();
        if self.target == JobStatus::Pending
            && sets.by_status[JobStatus::Pending.index()].contains(self.id)
        {
            sets.returned.insert(self.id);
        }
    }

    /// Keep the change, leaving the label as it was.
    pub fn commit_keep_label(mut self) {
        self.done = true;
    }
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut sets = self.index.sets.write();
        // Someone else moved the job meanwhile: their change wins.
        if !sets.by_status[self.target.index()].contains(self.id) {
            return;
        }
        sets.move_job(self.id, self.target, self.prior);
        if self.prior_returned {
            sets.returned.insert(self.id);
        }
    }
}
