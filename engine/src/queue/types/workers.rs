//! Per-worker scheduling state: affinity associations, candidate cache and
//! blacklist.

use std::collections::{HashMap, HashSet};

use super::jobset::JobSet;

#[derive(Default)]
pub struct WorkerState {
    /// Affinity tokens this worker is associated with
    pub affinities: HashSet<u64>,
    /// Cached sticky-affinity candidates
    candidates: JobSet,
    stale: bool,
    /// job id -> blacklisted until
    blacklist: HashMap<u64, u64>,
    pub last_seen: u64,
}

#[derive(Default)]
pub struct WorkerAffinity {
    workers: HashMap<String, WorkerState>,
}

impl WorkerAffinity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&mut self, worker: &str, now: u64) {
        let state = self.workers.entry(worker.to_string()).or_default();
        state.last_seen = now;
    }

    /// Associate `worker` with an affinity token. Returns true if new.
    pub fn associate(&mut self, worker: &str, aff_id: u64) -> bool {
        let state = self.workers.entry(worker.to_string()).or_default();
        let added = state.affinities.insert(aff_id);
        if added {
            state.stale = true;
        }
        added
    }

    pub fn affinities(&self, worker: &str) -> Vec<u64> {
        self.workers
            .get(worker)
            .map(|s| s.affinities.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Tokens claimed by any worker.
    pub fn claimed_affinities(&self) -> HashSet<u64> {
        self.workers
            .values()
            .flat_map(|s| s.affinities.iter().copied())
            .collect()
    }

    pub fn is_claimed(&self, aff_id: u64) -> bool {
        self.workers.values().any(|s| s.affinities.contains(&aff_id))
    }

    /// Cached candidates, unless the cache is stale or exhausted.
    pub fn cached_candidates(&self, worker: &str) -> Option<&JobSet> {
        self.workers
            .get(worker)
            .filter(|s| !s.stale && !s.candidates.is_empty())
            .map(|s| &s.candidates)
    }

    pub fn store_candidates(&mut self, worker: &str, candidates: JobSet) {
        let state = self.workers.entry(worker.to_string()).or_default();
        state.candidates = candidates;
        state.stale = false;
    }

    pub fn drop_candidate(&mut self, worker: &str, job_id: u64) {
        if let Some(state) = self.workers.get_mut(worker) {
            state.candidates.remove(job_id);
        }
    }

    /// Mark caches stale for every worker associated with `aff_id`.
    pub fn invalidate_affinity(&mut self, aff_id: u64) {
        for state in self.workers.values_mut() {
            if state.affinities.contains(&aff_id) {
                state.stale = true;
            }
        }
    }

    pub fn blacklist(&mut self, worker: &str, job_id: u64, until: u64) {
        let state = self.workers.entry(worker.to_string()).or_default();
        state.blacklist.insert(job_id, until);
        state.candidates.remove(job_id);
    }

    /// Jobs `worker` must not be offered at `now`. Expired entries are pruned.
    pub fn blacklisted(&mut self, worker: &str, now: u64) -> JobSet {
        match self.workers.get_mut(worker) {
            Some(state) => {
                state.blacklist.retain(|_, until| *until > now);
                state.blacklist.keys().copied().collect()
            }
            None => JobSet::new(),
        }
    }

    /// Forget deleted jobs everywhere.
    pub fn forget_jobs(&mut self, deleted: &JobSet) {
        for state in self.workers.values_mut() {
            state.candidates.subtract(deleted);
            state.blacklist.retain(|id, _| !deleted.contains(*id));
        }
    }

    /// Drop affinity tokens that no longer exist.
    pub fn forget_affinity(&mut self, aff_id: u64) {
        for state in self.workers.values_mut() {
            state.affinities.remove(&aff_id);
        }
    }

    /// Remove workers not seen since `before`. Returns how many were removed.
    pub fn prune_idle(&mut self, before: u64) -> usize {
        let count = self.workers.len();
        self.workers.retain(|_, s| s.last_seen >= before);
        count - self.workers.len()
    }
}
