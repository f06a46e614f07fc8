//! Ordered set of job ids with bitmap-style set algebra.
//!
//! Iteration is always ascending, so "any set bit" resolves to the lowest id.

use std::collections::btree_set;
use std::collections::BTreeSet;
use std::iter::FromIterator;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSet(BTreeSet<u64>);

impl JobSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Contiguous range `first..=last`.
    pub fn from_range(first: u64, last: u64) -> Self {
        Self((first..=last).collect())
    }

    #[inline]
    pub fn insert(&mut self, id: u64) -> bool {
        self.0.insert(id)
    }

    #[inline]
    pub fn remove(&mut self, id: u64) -> bool {
        self.0.remove(&id)
    }

    #[inline]
    pub fn contains(&self, id: u64) -> bool {
        self.0.contains(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().copied()
    }

    /// Up to `limit` ids greater than `after`, ascending.
    pub fn batch_after(&self, after: Option<u64>, limit: usize) -> Vec<u64> {
        match after {
            Some(a) => self
                .0
                .range((std::ops::Bound::Excluded(a), std::ops::Bound::Unbounded))
                .take(limit)
                .copied()
                .collect(),
            None => self.0.iter().take(limit).copied().collect(),
        }
    }

    pub fn retain<F: FnMut(u64) -> bool>(&mut self, mut keep: F) {
        self.0.retain(|id| keep(*id));
    }

    pub fn union_with(&mut self, other: &JobSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn intersect_with(&mut self, other: &JobSet) {
        self.0.retain(|id| other.0.contains(id));
    }

    pub fn subtract(&mut self, other: &JobSet) {
        if other.is_empty() {
            return;
        }
        self.0.retain(|id| !other.0.contains(id));
    }

    pub fn xor_with(&mut self, other: &JobSet) {
        for id in other.iter() {
            if !self.0.remove(&id) {
                self.0.insert(id);
            }
        }
    }

    pub fn intersection_len(&self, other: &JobSet) -> usize {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.iter().filter(|id| large.contains(*id)).count()
    }
}

impl FromIterator<u64> for JobSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for JobSet {
    type Item = u64;
    type IntoIter = btree_set::IntoIter<u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[u64]) -> JobSet {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_set_algebra() {
        let mut a = set(&[1, 2, 3, 4]);
        a.intersect_with(&set(&[2, 4, 6]));
        assert_eq!(a, set(&[2, 4]));

        let mut b = set(&[1, 2, 3]);
        b.subtract(&set(&[2]));
        assert_eq!(b, set(&[1, 3]));

        let mut c = set(&[1, 2]);
        c.xor_with(&set(&[2, 3]));
        assert_eq!(c, set(&[1, 3]));

        let mut d = set(&[5]);
        d.union_with(&set(&[1, 9]));
        assert_eq!(d.iter().next(), Some(1));
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn test_batch_after() {
        let s = JobSet::from_range(1, 10);
        assert_eq!(s.batch_after(None, 3), vec![1, 2, 3]);
        assert_eq!(s.batch_after(Some(8), 5), vec![9, 10]);
        assert!(s.batch_after(Some(10), 5).is_empty());
    }

    #[test]
    fn test_intersection_len() {
        let s = JobSet::from_range(4, 6);
        assert_eq!(set(&[1, 2, 3]).intersection_len(&s), 0);
        assert_eq!(set(&[5, 6, 7, 8]).intersection_len(&s), 2);
    }
}
