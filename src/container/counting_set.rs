//! Distributed multiset of keys

use std::hash::Hash;

use super::DistMap;
use crate::comm::Comm;

/// Counts how many times each key was inserted, across all ranks
#[derive(Clone)]
pub struct CountingSet<K> {
    counts: DistMap<K, usize>,
}

impl<K> CountingSet<K>
where
    K: Hash + Eq + Ord + Clone + Send + Sync + 'static,
{
    /// Collective: creates an empty set
    pub fn new<C: Comm>(comm: &C) -> Self {
        Self {
            counts: DistMap::new(comm),
        }
    }

    /// Increments the count of `key` on its owner
    pub fn async_insert<C: Comm>(&self, comm: &C, key: K) {
        self.counts.async_visit(comm, key, |_, count| *count += 1);
    }

    /// Collective: number of distinct keys
    pub fn size<C: Comm>(&self, comm: &C) -> usize {
        self.counts.size(comm)
    }

    /// Collective: the `k` most frequent keys with their counts.
    ///
    /// Higher counts first; ties broken by ascending key.
    pub fn gather_topk<C: Comm>(&self, comm: &C, k: usize) -> Vec<(K, usize)> {
        self.counts
            .gather_topk(comm, k, |a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
    }

    /// Collective: every distinct key, ascending
    pub fn gather_keys<C: Comm>(&self, comm: &C) -> Vec<K> {
        let mut keys: Vec<K> = self
            .counts
            .gather_all(comm)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        keys.sort_unstable();
        keys
    }
}
