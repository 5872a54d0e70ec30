//! Unbounded hash staging cache
//!
//! Entries accumulate in a hash table until it holds `capacity` keys, at
//! which point the whole table is flushed. Individual entries are only
//! flushed early when they approach overflow.

use rustc_hash::FxHashMap;

use super::{admit, CacheStats, FlushTarget, StagingCache};
use crate::config::CacheKind;
use crate::matrix::Coord;

/// Hash-table cache flushed all at once at a size ceiling
pub struct HashCache {
    entries: FxHashMap<Coord, u64>,
    capacity: usize,
    threshold: u64,
    stats: CacheStats,
}

impl HashCache {
    /// Creates a cache flushed at `capacity` entries, with values flushed
    /// individually once they reach `threshold`
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, threshold: u64) -> Self {
        assert!(capacity > 0, "hash cache capacity must be positive");
        Self {
            entries: FxHashMap::default(),
            capacity,
            threshold,
            stats: CacheStats::default(),
        }
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is resident
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StagingCache for HashCache {
    fn insert(&mut self, target: &mut dyn FlushTarget, key: Coord, value: u64) {
        if !admit(target, &mut self.stats, key, value, self.threshold) {
            return;
        }

        if let Some(sum) = self.entries.get_mut(&key) {
            // Both terms are below the threshold, itself at most u64::MAX / 2
            *sum += value;
            self.stats.local_accumulates += 1;
            if *sum >= self.threshold {
                let sum = *sum;
                self.entries.remove(&key);
                target.accumulate(key, sum);
                self.stats.overflow_flushes += 1;
                self.stats.flushed_entries += 1;
            }
            return;
        }

        self.entries.insert(key, value);
        if self.entries.len() >= self.capacity {
            self.flush_all(target);
        }
    }

    fn flush_all(&mut self, target: &mut dyn FlushTarget) {
        self.stats.full_flushes += 1;
        self.stats.flushed_entries += self.entries.len() as u64;
        for (key, sum) in self.entries.drain() {
            target.accumulate(key, sum);
        }
    }

    fn stats(&self) -> CacheStats {
        self.stats
    }

    fn kind(&self) -> CacheKind {
        CacheKind::Hash
    }
}
