//! Staging caches for partial products
//!
//! Every design deduplicates repeated `(row, col) += value` updates on the
//! local rank before they become remote visits to the accumulator. They
//! share one contract: after [`StagingCache::flush_all`], the target has
//! received exactly the sum of every inserted value for every key, split
//! into however many partial flushes the design needed.

pub mod hash;
#[cfg(unix)]
pub mod shm;
pub mod slot;

use rustc_hash::FxHashMap;

use crate::comm::Comm;
use crate::config::{CacheConfig, CacheKind};
use crate::container::DistMap;
use crate::error::Result;
use crate::matrix::{Coord, Product};

pub use hash::HashCache;
pub use slot::{Slot, SlotCache};

/// Receiver of flushed partial sums
pub trait FlushTarget {
    /// Adds `value` to the accumulated product at `key`
    fn accumulate(&mut self, key: Coord, value: u64);
}

/// Flushes into a distributed accumulator with one remote visit per entry
pub struct MapTarget<'a, C> {
    comm: &'a C,
    map: &'a DistMap<Coord, Product>,
}

impl<'a, C: Comm> MapTarget<'a, C> {
    /// Targets `map` from the rank of `comm`
    pub fn new(comm: &'a C, map: &'a DistMap<Coord, Product>) -> Self {
        Self { comm, map }
    }
}

impl<C: Comm> FlushTarget for MapTarget<'_, C> {
    fn accumulate(&mut self, key: Coord, value: u64) {
        self.map
            .async_visit(self.comm, key, move |_, product| product.absorb(value));
    }
}

impl FlushTarget for FxHashMap<Coord, u64> {
    fn accumulate(&mut self, key: Coord, value: u64) {
        let sum = self.entry(key).or_insert(0);
        *sum = sum.saturating_add(value);
    }
}

/// Records every flush in order
impl FlushTarget for Vec<(Coord, u64)> {
    fn accumulate(&mut self, key: Coord, value: u64) {
        self.push((key, value));
    }
}

/// Per-rank cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Nonzero values offered to the cache
    pub inserts: u64,
    /// Inserts absorbed into an entry already resident
    pub local_accumulates: u64,
    /// Residents displaced by a colliding key
    pub evictions: u64,
    /// Entries flushed early to stay clear of overflow
    pub overflow_flushes: u64,
    /// Partial sums handed to the flush target
    pub flushed_entries: u64,
    /// Calls to flush everything, including ceiling-triggered ones
    pub full_flushes: u64,
}

impl CacheStats {
    /// Adds another rank's counters to these
    pub fn merge(&mut self, other: &CacheStats) {
        self.inserts += other.inserts;
        self.local_accumulates += other.local_accumulates;
        self.evictions += other.evictions;
        self.overflow_flushes += other.overflow_flushes;
        self.flushed_entries += other.flushed_entries;
        self.full_flushes += other.full_flushes;
    }
}

/// A staging cache design
pub trait StagingCache: Send {
    /// Stages `value` for `key`, flushing whatever the design requires
    fn insert(&mut self, target: &mut dyn FlushTarget, key: Coord, value: u64);

    /// Flushes every resident entry and leaves the cache empty.
    ///
    /// For the shared-memory design this covers only the calling rank's
    /// own region; every rank on the node must call it.
    fn flush_all(&mut self, target: &mut dyn FlushTarget);

    /// Counters accumulated since construction
    fn stats(&self) -> CacheStats;

    /// The design of this cache
    fn kind(&self) -> CacheKind;
}

/// Handles the values no design stores: zeros are dropped and values at
/// or above `threshold` go straight to the target.
///
/// Returns whether the value still needs staging.
pub(crate) fn admit(
    target: &mut dyn FlushTarget,
    stats: &mut CacheStats,
    key: Coord,
    value: u64,
    threshold: u64,
) -> bool {
    if value == 0 {
        return false;
    }
    stats.inserts += 1;
    if value >= threshold {
        target.accumulate(key, value);
        stats.overflow_flushes += 1;
        stats.flushed_entries += 1;
        return false;
    }
    true
}

/// Builds the cache design named by `config`
///
/// Collective for the shared-memory design: every rank must call it in
/// the same order.
///
/// # Errors
///
/// Returns the configuration error, or any shared-memory failure.
pub fn create_cache<C: Comm>(comm: &C, config: &CacheConfig) -> Result<Box<dyn StagingCache>> {
    config.validate()?;
    match config.kind {
        CacheKind::Hash => Ok(Box::new(HashCache::new(
            config.hash_capacity,
            config.overflow_threshold,
        ))),
        CacheKind::Slot => Ok(Box::new(SlotCache::new(
            config.slots,
            config.overflow_threshold,
        ))),
        #[cfg(unix)]
        CacheKind::Shared(discipline) => shm::create(comm, config, discipline),
        #[cfg(not(unix))]
        CacheKind::Shared(_) => {
            let _ = comm;
            Err(crate::error::Error::Unsupported(
                "shared-memory staging cache requires a unix target",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_drops_zero_and_bypasses_large() {
        let mut flushed: Vec<(Coord, u64)> = Vec::new();
        let mut stats = CacheStats::default();
        let key = Coord::new(1, 2);

        assert!(!admit(&mut flushed, &mut stats, key, 0, 100));
        assert_eq!(stats.inserts, 0);

        assert!(admit(&mut flushed, &mut stats, key, 99, 100));
        assert!(flushed.is_empty());

        assert!(!admit(&mut flushed, &mut stats, key, 100, 100));
        assert_eq!(flushed, vec![(key, 100)]);
        assert_eq!(stats.overflow_flushes, 1);
        assert_eq!(stats.inserts, 2);
    }

    #[test]
    fn test_create_cache_rejects_invalid_config() {
        use crate::comm::LocalWorld;
        let ok = LocalWorld::new(1).run(|comm| {
            let config = CacheConfig::for_kind(CacheKind::Slot).with_slots(0);
            create_cache(&comm, &config).is_err()
        });
        assert_eq!(ok, vec![true]);
    }

    #[test]
    fn test_stats_merge() {
        let mut total = CacheStats::default();
        let one = CacheStats {
            inserts: 3,
            evictions: 1,
            ..CacheStats::default()
        };
        total.merge(&one);
        total.merge(&one);
        assert_eq!(total.inserts, 6);
        assert_eq!(total.evictions, 2);
    }
}
