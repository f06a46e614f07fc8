//! Affinity token dictionary and per-token job sets (in-memory mirror of
//! the persisted affinity tables).

use std::collections::HashMap;

use super::jobset::JobSet;

#[derive(Default)]
pub struct AffinityIndex {
    by_token: HashMap<String, u64>,
    tokens: HashMap<u64, String>,
    jobs: HashMap<u64, JobSet>,
}

impl AffinityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_token(&mut self, aff_id: u64, token: &str) {
        self.by_token.insert(token.to_string(), aff_id);
        self.tokens.insert(aff_id, token.to_string());
    }

    pub fn token_id(&self, token: &str) -> Option<u64> {
        self.by_token.get(token).copied()
    }

    pub fn token(&self, aff_id: u64) -> Option<&str> {
        self.tokens.get(&aff_id).map(String::as_str)
    }

    pub fn add_job(&mut self, aff_id: u64, job_id: u64) {
        self.jobs.entry(aff_id).or_default().insert(job_id);
    }

    pub fn jobs_of(&self, aff_id: u64) -> Option<&JobSet> {
        self.jobs.get(&aff_id)
    }

    /// Union of the job sets of the given tokens.
    pub fn union_of<I>(&self, aff_ids: I) -> JobSet
    where
        I: IntoIterator<Item = u64>,
    {
        let mut all = JobSet::new();
        for aff_id in aff_ids {
            if let Some(set) = self.jobs.get(&aff_id) {
                all.union_with(set);
            }
        }
        all
    }

    /// Drop deleted jobs from every token's set.
    pub fn remove_jobs(&mut self, deleted: &JobSet) {
        for set in self.jobs.values_mut() {
            set.subtract(deleted);
        }
    }

    /// Tokens whose job set is empty.
    pub fn empty_tokens(&self) -> Vec<u64> {
        self.tokens
            .keys()
            .filter(|id| self.jobs.get(*id).map_or(true, JobSet::is_empty))
            .copied()
            .collect()
    }

    pub fn drop_token(&mut self, aff_id: u64) {
        if let Some(token) = self.tokens.remove(&aff_id) {
            // The token may have been re-created under a new id meanwhile.
            if self.by_token.get(&token) == Some(&aff_id) {
                self.by_token.remove(&token);
            }
        }
        self.jobs.remove(&aff_id);
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}
