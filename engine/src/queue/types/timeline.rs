//! Expiration timeline for running jobs.

use std::collections::{BTreeSet, HashMap};

/// Ordered (expiration, job id) pairs. Expirations are rounded up to the
/// slot width so that nearby deadlines are processed together.
pub struct Timeline {
    entries: BTreeSet<(u64, u64)>,
    by_job: HashMap<u64, u64>,
    precision: u64,
}

impl Timeline {
    pub fn new(precision: u64) -> Self {
        Self {
            entries: BTreeSet::new(),
            by_job: HashMap::new(),
            precision: precision.max(1),
        }
    }

    pub fn set_precision(&mut self, precision: u64) {
        self.precision = precision.max(1);
    }

    #[inline]
    fn slot(&self, at: u64) -> u64 {
        at.div_ceil(self.precision) * self.precision
    }

    /// Insert or move a job's entry.
    pub fn add(&mut self, id: u64, expires_at: u64) {
        let slot = self.slot(expires_at);
        if let Some(old) = self.by_job.insert(id, slot) {
            self.entries.remove(&(old, id));
        }
        self.entries.insert((slot, id));
    }

    pub fn remove(&mut self, id: u64) -> bool {
        match self.by_job.remove(&id) {
            Some(slot) => self.entries.remove(&(slot, id)),
            None => false,
        }
    }

    /// Remove and return every job whose slot is at or before `now`.
    pub fn extract_due(&mut self, now: u64) -> Vec<u64> {
        let later = self.entries.split_off(&(now.saturating_add(1), 0));
        let due = std::mem::replace(&mut self.entries, later);
        due.into_iter()
            .map(|(_, id)| {
                self.by_job.remove(&id);
                id
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_due_in_order() {
        let mut t = Timeline::new(1);
        t.add(3, 30);
        t.add(1, 10);
        t.add(2, 20);

        assert_eq!(t.extract_due(20), vec![1, 2]);
        assert!(t.extract_due(29).is_empty());
        assert_eq!(t.extract_due(100), vec![3]);
        assert!(t.extract_due(u64::MAX).is_empty());
    }

    #[test]
    fn test_move_and_remove() {
        let mut t = Timeline::new(1);
        t.add(1, 10);
        t.add(1, 50);
        assert!(t.extract_due(10).is_empty());
        assert!(t.remove(1));
        assert!(!t.remove(1));
        assert!(t.extract_due(u64::MAX).is_empty());
    }

    #[test]
    fn test_precision_rounds_up() {
        let mut t = Timeline::new(10);
        t.add(1, 11);
        assert!(t.extract_due(19).is_empty());
        assert_eq!(t.extract_due(20), vec![1]);
    }
}
