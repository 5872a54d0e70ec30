//! Distributed array with a collective global sort

use parking_lot::{RwLock, RwLockReadGuard};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

use crate::comm::{all_gather, Comm, Handle};

type Shard<T> = RwLock<Vec<T>>;

/// An array partitioned across ranks.
///
/// Each rank owns one local shard. After [`DistArray::sort`], shards are
/// contiguous slices of the global order: everything on rank `p` sorts at
/// or before everything on rank `q > p`.
pub struct DistArray<T> {
    local: Arc<Shard<T>>,
    handle: Handle<Shard<T>>,
}

impl<T> Clone for DistArray<T> {
    fn clone(&self) -> Self {
        Self {
            local: self.local.clone(),
            handle: self.handle,
        }
    }
}

impl<T> DistArray<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Collective: wraps each rank's `local` items as its shard
    pub fn from_local<C: Comm>(comm: &C, local: Vec<T>) -> Self {
        let local = Arc::new(RwLock::new(local));
        let handle = comm.registry().register(local.clone());
        // No rank may address the shard before every rank has registered it
        comm.barrier();
        Self { local, handle }
    }

    /// Read access to this rank's shard
    pub fn local(&self) -> RwLockReadGuard<'_, Vec<T>> {
        self.local.read()
    }

    /// Number of items in this rank's shard
    pub fn local_size(&self) -> usize {
        self.local.read().len()
    }

    /// Handle that resolves to the shard of whichever rank executes
    pub fn handle(&self) -> Handle<Shard<T>> {
        self.handle
    }

    /// Collective: total number of items across all ranks
    pub fn global_size<C: Comm>(&self, comm: &C) -> usize {
        all_gather(comm, self.local_size()).into_iter().sum()
    }

    /// Collective: every rank receives the concatenation of all shards in
    /// rank order
    pub fn gather_all<C: Comm>(&self, comm: &C) -> Vec<T> {
        let local = self.local.read().clone();
        all_gather(comm, local).concat()
    }
}

impl<T> DistArray<T>
where
    T: Ord + Clone + Send + Sync + 'static,
{
    /// Collective: sorts the array globally.
    ///
    /// Sample sort: each rank sorts its shard, contributes evenly spaced
    /// samples, and all ranks derive the same `size - 1` splitters from
    /// the gathered samples. Items are then shipped to the rank whose
    /// splitter interval contains them and re-sorted there. Equal items
    /// always land on the same rank.
    pub fn sort<C: Comm>(&self, comm: &C) {
        let start = Instant::now();
        let size = comm.size();

        let mut data = std::mem::take(&mut *self.local.write());
        data.par_sort_unstable();

        let samples: Vec<T> = if data.is_empty() {
            Vec::new()
        } else {
            (0..size).map(|i| data[i * data.len() / size].clone()).collect()
        };
        let mut pool: Vec<T> = all_gather(comm, samples).concat();
        pool.sort_unstable();
        let splitters: Vec<T> = if pool.is_empty() {
            Vec::new()
        } else {
            (1..size).map(|i| pool[i * pool.len() / size].clone()).collect()
        };

        let mut buckets: Vec<Vec<T>> = (0..size).map(|_| Vec::new()).collect();
        for item in data {
            let dest = splitters.partition_point(|s| *s <= item);
            buckets[dest].push(item);
        }

        let handle = self.handle;
        for (dest, bucket) in buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            comm.async_exec(dest, move |c| {
                c.registry().resolve(handle).write().extend(bucket);
            });
        }
        comm.barrier();

        self.local.write().par_sort_unstable();

        if comm.rank0() {
            tracing::info!(elapsed = ?start.elapsed(), "distributed array sort");
        }
        tracing::debug!(rank = comm.rank(), local = self.local_size(), "sorted shard");
    }
}
