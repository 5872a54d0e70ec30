//! # Distributed SpGEMM driver
//!
//! Each rank walks its shard of the unsorted left operand. For an edge
//! `(i, k, v)` it visits row `k` of the sorted right operand; on every
//! owner of that row the visitor multiplies `v` into each `(k, j, w)` and
//! stages `v * w` at `(i, j)` in the owner's staging cache. After a
//! barrier every rank flushes its cache, and after a second barrier the
//! accumulator holds the complete product.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{create_cache, CacheStats, MapTarget, StagingCache};
use crate::comm::{all_gather, Comm, Handle};
use crate::config::SpGemmConfig;
use crate::container::{CountingSet, DistArray, DistMap};
use crate::error::Result;
use crate::matrix::{Coord, Edge, Product, SortedMatrix};

/// Destination rows and columns excluded from the product
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopKFilter {
    rows: FxHashSet<u64>,
    cols: FxHashSet<u64>,
}

impl TopKFilter {
    /// Excludes every coordinate in one of `rows` or one of `cols`
    pub fn new(rows: impl IntoIterator<Item = u64>, cols: impl IntoIterator<Item = u64>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
            cols: cols.into_iter().collect(),
        }
    }

    /// Collective: excludes the `k` most frequent keys of each counting set
    pub fn from_counts<C: Comm>(
        comm: &C,
        rows: &CountingSet<u64>,
        cols: &CountingSet<u64>,
        k: usize,
    ) -> Self {
        let top_rows = rows.gather_topk(comm, k);
        let top_cols = cols.gather_topk(comm, k);
        Self::new(
            top_rows.into_iter().map(|(r, _)| r),
            top_cols.into_iter().map(|(c, _)| c),
        )
    }

    /// Whether `(row, col)` is dropped
    pub fn excludes(&self, row: u64, col: u64) -> bool {
        self.rows.contains(&row) || self.cols.contains(&col)
    }

    /// Excluded rows
    pub fn rows(&self) -> &FxHashSet<u64> {
        &self.rows
    }

    /// Excluded columns
    pub fn cols(&self) -> &FxHashSet<u64> {
        &self.cols
    }
}

/// Collective: counts edges per row
pub fn count_rows<C: Comm>(comm: &C, edges: &DistArray<Edge>) -> CountingSet<u64> {
    let counts = CountingSet::new(comm);
    for edge in edges.local().iter() {
        counts.async_insert(comm, edge.row);
    }
    comm.barrier();
    counts
}

/// Collective: counts edges per column
pub fn count_cols<C: Comm>(comm: &C, edges: &DistArray<Edge>) -> CountingSet<u64> {
    let counts = CountingSet::new(comm);
    for edge in edges.local().iter() {
        counts.async_insert(comm, edge.col);
    }
    comm.barrier();
    counts
}

/// Collective: the `k` coordinates reached by the most flushes.
///
/// Ties are broken by ascending coordinate.
pub fn top_pushes<C: Comm>(
    comm: &C,
    accumulator: &DistMap<Coord, Product>,
    k: usize,
) -> Vec<(Coord, Product)> {
    accumulator.gather_topk(comm, k, |a, b| {
        b.1.pushes.cmp(&a.1.pushes).then_with(|| a.0.cmp(&b.0))
    })
}

/// Per-rank state reached by remote visitors through a handle
struct MultiplyState {
    cache: Mutex<Box<dyn StagingCache>>,
    filter: Option<TopKFilter>,
    accumulator: DistMap<Coord, Product>,
}

impl MultiplyState {
    fn stage_products<C: Comm>(&self, comm: &C, row: u64, value: u64, run: &[Edge]) {
        let mut cache = self.cache.lock();
        let mut target = MapTarget::new(comm, &self.accumulator);
        for edge in run {
            if let Some(filter) = &self.filter {
                if filter.excludes(row, edge.col) {
                    continue;
                }
            }
            cache.insert(
                &mut target,
                Coord::new(row, edge.col),
                value.saturating_mul(edge.value),
            );
        }
    }

    fn flush<C: Comm>(&self, comm: &C) {
        let mut target = MapTarget::new(comm, &self.accumulator);
        self.cache.lock().flush_all(&mut target);
    }
}

/// What one rank did during a multiply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiplyReport {
    /// Edges of the left operand on this rank
    pub local_edges: usize,
    /// Row visits dispatched from this rank, one per owner
    pub visits: usize,
    /// This rank's staging cache counters
    pub cache: CacheStats,
    /// Time until the local dispatch loop finished
    pub dispatch: Duration,
    /// Time spent flushing after the first barrier
    pub flush: Duration,
}

/// A multiply bound to one accumulator and one staging cache per rank
pub struct SpGemm<C: Comm> {
    comm: C,
    config: SpGemmConfig,
    state: Arc<MultiplyState>,
    handle: Handle<MultiplyState>,
}

impl<C: Comm> SpGemm<C> {
    /// Collective: builds each rank's staging cache and registers the
    /// state remote visitors update
    ///
    /// # Errors
    ///
    /// Returns configuration errors and any cache construction failure.
    pub fn new(
        comm: &C,
        accumulator: &DistMap<Coord, Product>,
        config: SpGemmConfig,
        filter: Option<TopKFilter>,
    ) -> Result<Self> {
        config.validate()?;
        let config = SpGemmConfig {
            cache: config.effective_cache(),
            ..config
        };
        let cache = create_cache(comm, &config.cache)?;
        let state = Arc::new(MultiplyState {
            cache: Mutex::new(cache),
            filter,
            accumulator: accumulator.clone(),
        });
        let handle = comm.registry().register(state.clone());
        comm.barrier();

        Ok(Self {
            comm: comm.clone(),
            config,
            state,
            handle,
        })
    }

    /// Collective: accumulates `a * b` into the accumulator.
    ///
    /// On return every rank's cache has been flushed and the accumulator is
    /// complete.
    pub fn multiply(&self, a: &DistArray<Edge>, b: &SortedMatrix) -> MultiplyReport {
        let comm = &self.comm;
        let _span = tracing::info_span!("spgemm", rank = comm.rank()).entered();
        let start = Instant::now();

        // Own copy so no shard lock is held while draining messages
        let edges: Vec<Edge> = a.local().clone();
        let handle = self.handle;
        let poll_interval = self.config.poll_interval;
        let mut visits = 0;

        for (n, edge) in edges.iter().enumerate() {
            let (row, value) = (edge.row, edge.value);
            visits += b.index().lookup(edge.col).len();
            b.async_visit_row(comm, edge.col, move |c: &C, run: &[Edge]| {
                c.registry().resolve(handle).stage_products(c, row, value, run);
            });
            if poll_interval > 0 && (n + 1) % poll_interval == 0 {
                comm.poll();
            }
        }
        let dispatch = start.elapsed();
        comm.barrier();

        let flush_start = Instant::now();
        self.state.flush(comm);
        let flush = flush_start.elapsed();
        comm.barrier();

        let report = MultiplyReport {
            local_edges: edges.len(),
            visits,
            cache: self.cache_stats(),
            dispatch,
            flush,
        };
        tracing::debug!(
            rank = comm.rank(),
            local_edges = report.local_edges,
            visits = report.visits,
            inserts = report.cache.inserts,
            local_accumulates = report.cache.local_accumulates,
            evictions = report.cache.evictions,
            flushed = report.cache.flushed_entries,
            "multiply finished on rank"
        );
        if comm.rank0() {
            tracing::info!(
                elapsed = ?start.elapsed(),
                flush = ?report.flush,
                cache = %self.config.cache.kind,
                "spgemm complete"
            );
        }
        report
    }

    /// The accumulator being filled
    pub fn accumulator(&self) -> &DistMap<Coord, Product> {
        &self.state.accumulator
    }

    /// This rank's staging cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.state.cache.lock().stats()
    }

    /// Configuration in use, with the cache as actually built
    pub fn config(&self) -> &SpGemmConfig {
        &self.config
    }
}

impl<C: Comm> Drop for SpGemm<C> {
    fn drop(&mut self) {
        self.comm.registry().release(self.handle);
    }
}

/// Collective: multiplies `a` by the sorted `b` into `accumulator`.
///
/// When `config.top_k` is set, the `k` busiest rows of `a` and columns of
/// `b` are filtered out of the product.
///
/// # Errors
///
/// Returns configuration errors and any cache construction failure.
///
/// # Examples
///
/// ```
/// use sorted_coo::{spgemm, Coord, DistArray, DistMap, Edge, LocalWorld, SortedMatrix, SpGemmConfig};
///
/// let results = LocalWorld::new(1).run(|comm| {
///     let a = DistArray::from_local(&comm, vec![Edge::new(0, 1, 2), Edge::new(2, 3, 1)]);
///     let b = SortedMatrix::from_local(&comm, vec![Edge::new(1, 2, 5), Edge::new(3, 0, 4)]).unwrap();
///     let c = DistMap::new(&comm);
///     spgemm(&comm, &a, &b, &c, &SpGemmConfig::default()).unwrap();
///     let mut product: Vec<(Coord, u64)> =
///         c.gather_all(&comm).into_iter().map(|(k, p)| (k, p.sum)).collect();
///     product.sort();
///     product
/// });
///
/// assert_eq!(results[0], vec![(Coord::new(0, 2), 10), (Coord::new(2, 0), 4)]);
/// ```
pub fn spgemm<C: Comm>(
    comm: &C,
    a: &DistArray<Edge>,
    b: &SortedMatrix,
    accumulator: &DistMap<Coord, Product>,
    config: &SpGemmConfig,
) -> Result<MultiplyReport> {
    config.validate()?;
    let filter = match config.top_k {
        Some(k) => {
            let rows = count_rows(comm, a);
            let cols = count_cols(comm, b.edges());
            Some(TopKFilter::from_counts(comm, &rows, &cols, k))
        }
        None => None,
    };
    let driver = SpGemm::new(comm, accumulator, config.clone(), filter)?;
    Ok(driver.multiply(a, b))
}

/// Collective: sums every rank's cache counters
pub fn total_stats<C: Comm>(comm: &C, report: &MultiplyReport) -> CacheStats {
    let mut total = CacheStats::default();
    for stats in all_gather(comm, report.cache) {
        total.merge(&stats);
    }
    total
}
