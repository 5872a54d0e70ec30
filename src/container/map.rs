//! Hash-partitioned distributed map

use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::hash::Hash;
use std::sync::Arc;

use crate::comm::{all_gather, Comm, Handle};
use crate::utils::stable_hash;

type Partition<K, V> = Mutex<FxHashMap<K, V>>;

/// A map whose keys are partitioned across ranks by a stable hash.
///
/// Updates are visitors shipped to the owning rank; they run in arrival
/// order, one at a time per partition. Cloning shares the partition.
pub struct DistMap<K, V> {
    local: Arc<Partition<K, V>>,
    handle: Handle<Partition<K, V>>,
}

impl<K, V> Clone for DistMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            local: self.local.clone(),
            handle: self.handle,
        }
    }
}

impl<K, V> DistMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Default + Clone + Send + Sync + 'static,
{
    /// Collective: creates an empty map
    pub fn new<C: Comm>(comm: &C) -> Self {
        let local = Arc::new(Mutex::new(FxHashMap::default()));
        let handle = comm.registry().register(local.clone());
        comm.barrier();
        Self { local, handle }
    }

    /// Rank that owns `key` in a world of `size` ranks
    pub fn owner(key: &K, size: usize) -> usize {
        (stable_hash(key) % size as u64) as usize
    }

    /// Runs `visitor` on the owner's entry for `key`, creating it with
    /// `V::default()` if absent. Never runs inline.
    pub fn async_visit<C, F>(&self, comm: &C, key: K, visitor: F)
    where
        C: Comm,
        F: FnOnce(&K, &mut V) + Send + 'static,
    {
        let handle = self.handle;
        let dest = Self::owner(&key, comm.size());
        comm.async_exec(dest, move |c| {
            let partition = c.registry().resolve(handle);
            let mut partition = partition.lock();
            let value = partition.entry(key.clone()).or_default();
            visitor(&key, value);
        });
    }

    /// Locked access to this rank's partition
    pub fn local(&self) -> MutexGuard<'_, FxHashMap<K, V>> {
        self.local.lock()
    }

    /// Number of keys in this rank's partition
    pub fn local_len(&self) -> usize {
        self.local.lock().len()
    }

    /// Collective: number of keys across all ranks, after every pending
    /// visit has landed
    pub fn size<C: Comm>(&self, comm: &C) -> usize {
        comm.barrier();
        all_gather(comm, self.local_len()).into_iter().sum()
    }

    /// Collective: waits for pending visits, then calls `f` on every
    /// local entry
    pub fn for_all<C, F>(&self, comm: &C, mut f: F)
    where
        C: Comm,
        F: FnMut(&K, &V),
    {
        comm.barrier();
        for (k, v) in self.local.lock().iter() {
            f(k, v);
        }
    }

    /// Collective: the `k` best entries under `cmp` (smallest first),
    /// replicated on every rank
    pub fn gather_topk<C, F>(&self, comm: &C, k: usize, cmp: F) -> Vec<(K, V)>
    where
        C: Comm,
        F: Fn(&(K, V), &(K, V)) -> Ordering,
    {
        comm.barrier();
        let mut local: Vec<(K, V)> = self
            .local
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        local.sort_by(&cmp);
        local.truncate(k);

        let mut merged = all_gather(comm, local).concat();
        merged.sort_by(&cmp);
        merged.truncate(k);
        merged
    }

    /// Collective: every entry of the map, replicated on every rank.
    /// Order is unspecified.
    pub fn gather_all<C: Comm>(&self, comm: &C) -> Vec<(K, V)> {
        comm.barrier();
        let local: Vec<(K, V)> = self
            .local
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all_gather(comm, local).concat()
    }
}
