//! Direct-mapped slot cache with collision eviction
//!
//! Each key hashes to exactly one slot. A colliding key evicts the
//! resident to the flush target and takes its place, so memory stays
//! fixed no matter how skewed the input is. The slot rules here are
//! shared with the shared-memory design.

use aligned_vec::AVec;

use super::{admit, CacheStats, FlushTarget, StagingCache};
use crate::config::CacheKind;
use crate::matrix::Coord;
use crate::utils::stable_hash;

/// Value word of an unoccupied slot.
///
/// A resident is the sum of two values below a threshold of at most
/// `u64::MAX / 2`, so it stays under [`BUSY`] and never collides with
/// either sentinel.
pub const EMPTY: u64 = u64::MAX;

/// Value word of a slot claimed by an in-progress update in shared memory
pub const BUSY: u64 = u64::MAX - 1;

/// One cache slot. Plain old data with a fixed layout so it can live in
/// shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Slot {
    /// Destination coordinate of the resident entry
    pub key: Coord,
    /// Accumulated value, or [`EMPTY`]
    pub value: u64,
}

impl Slot {
    /// The unoccupied slot
    pub const VACANT: Slot = Slot {
        key: Coord::new(0, 0),
        value: EMPTY,
    };

    /// Whether nothing is resident
    pub fn is_vacant(&self) -> bool {
        self.value == EMPTY
    }
}

/// Slot of `key` in a table of `n_slots`
pub fn slot_of(key: &Coord, n_slots: usize) -> usize {
    (stable_hash(key) % n_slots as u64) as usize
}

/// Flushes the resident of `slot` and leaves it vacant
pub(crate) fn evict(slot: &mut Slot, target: &mut dyn FlushTarget, stats: &mut CacheStats) {
    debug_assert!(
        slot.value > 0 && slot.value < BUSY,
        "occupied slot holds impossible value {}",
        slot.value
    );
    target.accumulate(slot.key, slot.value);
    stats.flushed_entries += 1;
    *slot = Slot::VACANT;
}

/// Stages an admitted `value` for `key` in `slot`.
///
/// Occupies a vacant slot, accumulates into a matching one, or evicts a
/// different resident first. A resident that reaches `threshold` is
/// flushed before anything else can be added to it.
pub(crate) fn stage(
    slot: &mut Slot,
    key: Coord,
    value: u64,
    threshold: u64,
    target: &mut dyn FlushTarget,
    stats: &mut CacheStats,
) {
    debug_assert!(value > 0 && value < threshold);

    if slot.is_vacant() {
        *slot = Slot { key, value };
    } else if slot.key == key {
        slot.value += value;
        stats.local_accumulates += 1;
    } else {
        evict(slot, target, stats);
        stats.evictions += 1;
        *slot = Slot { key, value };
    }

    if slot.value >= threshold {
        evict(slot, target, stats);
        stats.overflow_flushes += 1;
    }
}

/// Fixed-size, process-local slot table
pub struct SlotCache {
    slots: AVec<Slot>,
    threshold: u64,
    stats: CacheStats,
}

impl SlotCache {
    /// Creates a table of `n_slots` vacant slots
    ///
    /// # Panics
    ///
    /// Panics if `n_slots` is zero.
    pub fn new(n_slots: usize, threshold: u64) -> Self {
        assert!(n_slots > 0, "slot cache needs at least one slot");
        Self {
            slots: AVec::from_iter(64, (0..n_slots).map(|_| Slot::VACANT)),
            threshold,
            stats: CacheStats::default(),
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_vacant()).count()
    }
}

impl StagingCache for SlotCache {
    fn insert(&mut self, target: &mut dyn FlushTarget, key: Coord, value: u64) {
        if !admit(target, &mut self.stats, key, value, self.threshold) {
            return;
        }
        let idx = slot_of(&key, self.slots.len());
        stage(
            &mut self.slots[idx],
            key,
            value,
            self.threshold,
            target,
            &mut self.stats,
        );
    }

    fn flush_all(&mut self, target: &mut dyn FlushTarget) {
        self.stats.full_flushes += 1;
        for slot in self.slots.iter_mut() {
            if !slot.is_vacant() {
                evict(slot, target, &mut self.stats);
            }
        }
    }

    fn stats(&self) -> CacheStats {
        self.stats
    }

    fn kind(&self) -> CacheKind {
        CacheKind::Slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    #[test]
    fn test_collision_evicts_resident() {
        // One slot: every pair of distinct keys collides
        let mut cache = SlotCache::new(1, u64::MAX / 2);
        let mut target: Vec<(Coord, u64)> = Vec::new();
        let a = Coord::new(0, 1);
        let b = Coord::new(5, 7);

        cache.insert(&mut target, a, 3);
        cache.insert(&mut target, a, 4);
        cache.insert(&mut target, b, 9);
        assert_eq!(target, vec![(a, 7)]);

        cache.flush_all(&mut target);
        assert_eq!(target, vec![(a, 7), (b, 9)]);
        assert_eq!(cache.occupied(), 0);

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.local_accumulates, 1);
        assert_eq!(stats.flushed_entries, 2);
    }

    #[test]
    fn test_zero_is_not_stored() {
        let mut cache = SlotCache::new(4, u64::MAX / 2);
        let mut target: Vec<(Coord, u64)> = Vec::new();
        cache.insert(&mut target, Coord::new(1, 1), 0);
        assert_eq!(cache.occupied(), 0);
        cache.flush_all(&mut target);
        assert!(target.is_empty());
    }

    #[test]
    fn test_overflow_guard_flushes_eagerly() {
        let threshold = u64::MAX / 2;
        let big = u64::MAX / 4 + 1;
        let mut cache = SlotCache::new(8, threshold);
        let mut target: Vec<(Coord, u64)> = Vec::new();
        let key = Coord::new(2, 2);

        cache.insert(&mut target, key, big);
        assert!(target.is_empty());
        cache.insert(&mut target, key, big);
        // Flushed before a third addition could overflow
        assert_eq!(target, vec![(key, 2 * big)]);
        assert_eq!(cache.occupied(), 0);

        cache.insert(&mut target, key, big);
        cache.flush_all(&mut target);
        let total: u64 = target.iter().map(|(_, v)| v).sum::<u64>();
        assert_eq!(total, u64::MAX / 4 * 3 + 3);
        assert_eq!(cache.stats().overflow_flushes, 1);
    }

    #[test]
    fn test_conserves_sums_under_pressure() {
        let mut cache = SlotCache::new(3, u64::MAX / 2);
        let mut flushed: FxHashMap<Coord, u64> = FxHashMap::default();
        let mut expected: FxHashMap<Coord, u64> = FxHashMap::default();

        for i in 0..200u64 {
            let key = Coord::new(i % 7, i % 5);
            cache.insert(&mut flushed, key, i + 1);
            *expected.entry(key).or_insert(0) += i + 1;
        }
        cache.flush_all(&mut flushed);
        assert_eq!(flushed, expected);
    }

    #[test]
    fn test_slot_layout() {
        assert_eq!(std::mem::size_of::<Slot>(), 24);
        assert!(Slot::VACANT.is_vacant());
    }
}
