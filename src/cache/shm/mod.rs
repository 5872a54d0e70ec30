//! Node-wide staging cache in POSIX shared memory
//!
//! Every rank creates one slot region; ranks on the same node map all of
//! their siblings' regions, so a key is staged in one slot for the whole
//! node no matter which rank produced it. Flushes still go to the
//! distributed accumulator. Each rank flushes only its own region.

pub mod discipline;
pub mod region;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::slot::{evict, stage};
use crate::cache::{admit, CacheStats, FlushTarget, StagingCache};
use crate::comm::{all_gather, node_gather, Comm};
use crate::config::{CacheConfig, CacheKind, SyncDiscipline};
use crate::error::{Error, Result};
use crate::matrix::Coord;
use crate::utils::stable_hash;

pub use discipline::{AtomicSlots, ProcessMutex, SlotDiscipline};
pub use region::{Region, ShmSegment};

static SEGMENT_SEQ: AtomicU64 = AtomicU64::new(0);

fn segment_name(prefix: &str, rank: usize) -> String {
    let seq = SEGMENT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("/{}{}_{}_{}", prefix, std::process::id(), seq, rank)
}

/// Collective: succeeds only if `result` is `Ok` on every rank, so no
/// rank goes on to a barrier its peers will never reach
fn agree<C: Comm, T>(comm: &C, stage: &'static str, result: Result<T>) -> Result<T> {
    let verdicts = all_gather(comm, result.is_ok());
    let value = result?;
    match verdicts.iter().position(|ok| !ok) {
        Some(rank) => Err(Error::PeerFailed { rank, stage }),
        None => Ok(value),
    }
}

/// Shared-memory slot cache synchronized by discipline `D`
pub struct ShmCache<C: Comm, D: SlotDiscipline> {
    comm: C,
    local_id: usize,
    regions: Vec<Region>,
    n_slots: usize,
    threshold: u64,
    stats: CacheStats,
    _discipline: PhantomData<D>,
}

impl<C: Comm, D: SlotDiscipline> ShmCache<C, D> {
    /// Collective: creates this rank's region, maps every sibling's and
    /// waits until all regions on the node are stamped vacant.
    ///
    /// # Errors
    ///
    /// Any failing OS call, on this rank or a peer, fails construction on
    /// every rank.
    pub fn new(comm: &C, config: &CacheConfig) -> Result<Self> {
        let _span = tracing::debug_span!(
            "shm_cache.init",
            rank = comm.rank(),
            discipline = D::KIND.name()
        )
        .entered();
        let layout = comm.layout();
        let n_slots = config.slots;

        let name = segment_name(&config.shm_prefix, comm.rank());
        let created = Region::create(&name, n_slots, D::TAG).and_then(|region| {
            D::init(&region)?;
            Ok(region)
        });
        let mut own = agree(comm, "region create", created)?;

        let names = node_gather(comm, own.segment().name().to_string());
        let opened: Result<Vec<Region>> = names
            .iter()
            .enumerate()
            .filter(|(local_id, _)| *local_id != layout.local_id)
            .map(|(_, sibling)| Region::open(sibling, n_slots, D::TAG))
            .collect();
        let mut regions = agree(comm, "sibling open", opened)?;

        agree(comm, "region unlink", own.unlink())?;
        own.stamp_vacant();
        regions.insert(layout.local_id, own);
        comm.barrier();

        tracing::debug!(
            rank = comm.rank(),
            siblings = layout.local_size,
            slots = n_slots,
            "shared staging cache ready"
        );
        Ok(Self {
            comm: comm.clone(),
            local_id: layout.local_id,
            regions,
            n_slots,
            threshold: config.overflow_threshold,
            stats: CacheStats::default(),
            _discipline: PhantomData,
        })
    }

    /// Region index and slot index of `key`.
    ///
    /// The region is chosen by the hash modulo the node width and the slot
    /// by the remaining quotient, so the two choices are independent.
    fn address(&self, key: &Coord) -> (usize, usize) {
        let h = stable_hash(key);
        let width = self.regions.len() as u64;
        (
            (h % width) as usize,
            ((h / width) % self.n_slots as u64) as usize,
        )
    }

    /// Number of ranks sharing this cache
    pub fn node_width(&self) -> usize {
        self.regions.len()
    }
}

impl<C: Comm, D: SlotDiscipline> StagingCache for ShmCache<C, D> {
    fn insert(&mut self, target: &mut dyn FlushTarget, key: Coord, value: u64) {
        if !admit(target, &mut self.stats, key, value, self.threshold) {
            return;
        }
        let (region, idx) = self.address(&key);
        let threshold = self.threshold;
        let stats = &mut self.stats;
        D::with_slot(&self.regions[region], idx, |slot| {
            stage(slot, key, value, threshold, target, stats)
        });
    }

    fn flush_all(&mut self, target: &mut dyn FlushTarget) {
        self.stats.full_flushes += 1;
        let own = &self.regions[self.local_id];
        let stats = &mut self.stats;
        for idx in 0..self.n_slots {
            D::with_slot(own, idx, |slot| {
                if !slot.is_vacant() {
                    evict(slot, target, stats);
                }
            });
        }
    }

    fn stats(&self) -> CacheStats {
        self.stats
    }

    fn kind(&self) -> CacheKind {
        CacheKind::Shared(D::KIND)
    }
}

impl<C: Comm, D: SlotDiscipline> Drop for ShmCache<C, D> {
    fn drop(&mut self) {
        // Siblings may still be touching this region
        if !std::thread::panicking() {
            self.comm.barrier();
        }
        D::destroy(&self.regions[self.local_id]);
    }
}

/// Collective: builds the shared cache for `discipline`
pub(crate) fn create<C: Comm>(
    comm: &C,
    config: &CacheConfig,
    discipline: SyncDiscipline,
) -> Result<Box<dyn StagingCache>> {
    Ok(match discipline {
        SyncDiscipline::AtomicSlots => Box::new(ShmCache::<C, AtomicSlots>::new(comm, config)?),
        SyncDiscipline::ProcessMutex => Box::new(ShmCache::<C, ProcessMutex>::new(comm, config)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalWorld;
    use rustc_hash::FxHashMap;

    #[test]
    fn test_segment_names_are_unique() {
        let a = segment_name("t", 0);
        let b = segment_name("t", 0);
        assert_ne!(a, b);
        assert!(a.starts_with("/t"));
    }

    #[test]
    fn test_node_siblings_share_slots() {
        // Both ranks insert the same key; the node stages it once
        let results = LocalWorld::new(2).with_ranks_per_node(2).run(|comm| {
            let config = CacheConfig::for_kind(CacheKind::Shared(SyncDiscipline::AtomicSlots))
                .with_slots(64);
            let mut cache = ShmCache::<_, AtomicSlots>::new(&comm, &config).unwrap();
            assert_eq!(cache.node_width(), 2);

            let mut flushed: FxHashMap<Coord, u64> = FxHashMap::default();
            cache.insert(&mut flushed, Coord::new(4, 4), 5 + comm.rank() as u64);
            comm.barrier();
            cache.flush_all(&mut flushed);
            comm.barrier();
            (flushed, cache.stats())
        });

        let total: u64 = results.iter().flat_map(|(f, _)| f.values()).sum();
        assert_eq!(total, 11);
        // Exactly one rank held the slot and flushed it in one piece
        let flushes: u64 = results.iter().map(|(_, s)| s.flushed_entries).sum();
        assert_eq!(flushes, 1);
        let accumulates: u64 = results.iter().map(|(_, s)| s.local_accumulates).sum();
        assert_eq!(accumulates, 1);
    }

    #[test]
    fn test_ranks_on_separate_nodes_do_not_share() {
        let results = LocalWorld::new(2).with_ranks_per_node(1).run(|comm| {
            let config = CacheConfig::for_kind(CacheKind::Shared(SyncDiscipline::ProcessMutex))
                .with_slots(8);
            let mut cache = ShmCache::<_, ProcessMutex>::new(&comm, &config).unwrap();
            let mut flushed: Vec<(Coord, u64)> = Vec::new();
            cache.insert(&mut flushed, Coord::new(1, 1), 2);
            comm.barrier();
            cache.flush_all(&mut flushed);
            (cache.node_width(), flushed)
        });
        for (width, flushed) in results {
            assert_eq!(width, 1);
            assert_eq!(flushed, vec![(Coord::new(1, 1), 2)]);
        }
    }

    #[test]
    fn test_invalid_prefix_fails_on_every_rank() {
        let results = LocalWorld::new(2).with_ranks_per_node(2).run(|comm| {
            let mut config =
                CacheConfig::for_kind(CacheKind::Shared(SyncDiscipline::AtomicSlots));
            // Bypasses validation to exercise the OS failure path
            config.shm_prefix = "nested/dir".to_string();
            ShmCache::<_, AtomicSlots>::new(&comm, &config).is_err()
        });
        assert_eq!(results, vec![true, true]);
    }
}
