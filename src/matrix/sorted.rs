//! Globally sorted matrix with row-level remote visitation

use std::sync::Arc;
use std::time::Instant;

use super::{Edge, RowOwnershipIndex};
use crate::comm::Comm;
use crate::container::DistArray;
use crate::error::Result;

/// A coordinate-format matrix sorted across ranks, plus its replicated
/// row-ownership index.
#[derive(Clone)]
pub struct SortedMatrix {
    edges: DistArray<Edge>,
    index: Arc<RowOwnershipIndex>,
}

impl SortedMatrix {
    /// Collective: sorts `edges` globally and builds the row index
    pub fn new<C: Comm>(comm: &C, edges: DistArray<Edge>) -> Result<Self> {
        let start = Instant::now();
        edges.sort(comm);
        let index = RowOwnershipIndex::build(comm, &edges)?;

        if comm.rank0() {
            tracing::info!(elapsed = ?start.elapsed(), "sorted matrix ready");
        }
        tracing::debug!(rank = comm.rank(), local_edges = edges.local_size(), "sorted slice");

        Ok(Self {
            edges,
            index: Arc::new(index),
        })
    }

    /// Collective: wraps each rank's edges and sorts them
    pub fn from_local<C: Comm>(comm: &C, local: Vec<Edge>) -> Result<Self> {
        Self::new(comm, DistArray::from_local(comm, local))
    }

    /// The replicated row-ownership index
    pub fn index(&self) -> &RowOwnershipIndex {
        &self.index
    }

    /// The underlying sorted array
    pub fn edges(&self) -> &DistArray<Edge> {
        &self.edges
    }

    /// Number of edges in this rank's slice
    pub fn local_size(&self) -> usize {
        self.edges.local_size()
    }

    /// Dispatches `visitor` to every rank that owns `row`.
    ///
    /// On each owner the visitor runs once with that rank's whole run of
    /// edges in `row`, which is never empty. Nothing runs inline and
    /// nothing is dispatched for a row without owners.
    pub fn async_visit_row<C, F>(&self, comm: &C, row: u64, visitor: F)
    where
        C: Comm,
        F: FnOnce(&C, &[Edge]) + Clone + Send + 'static,
    {
        let handle = self.edges.handle();
        for &owner in self.index.lookup(row) {
            let visitor = visitor.clone();
            comm.async_exec(owner, move |c| {
                let slice = c.registry().resolve(handle);
                let slice = slice.read();
                let run = row_run(&slice, row);
                debug_assert!(!run.is_empty(), "rank {} listed as owner of empty row {}", c.rank(), row);
                if !run.is_empty() {
                    visitor(c, run);
                }
            });
        }
    }
}

/// The maximal run of `edges` (sorted) whose row equals `row`
pub fn row_run(edges: &[Edge], row: u64) -> &[Edge] {
    let begin = edges.partition_point(|e| e.row < row);
    let len = edges[begin..].partition_point(|e| e.row == row);
    &edges[begin..begin + len]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalWorld;
    use parking_lot::Mutex;

    #[test]
    fn test_row_run() {
        let edges = vec![
            Edge::new(0, 1, 1),
            Edge::new(2, 0, 1),
            Edge::new(2, 5, 1),
            Edge::new(3, 3, 1),
        ];
        assert_eq!(row_run(&edges, 2), &edges[1..3]);
        assert!(row_run(&edges, 1).is_empty());
        assert!(row_run(&edges, 9).is_empty());
    }

    #[test]
    fn test_visit_row_reaches_every_owner() {
        let results = LocalWorld::new(3).run(|comm| {
            // Row 5 is spread over all ranks before the sort
            let local = (0..4).map(|c| Edge::new(5, comm.rank() as u64 * 4 + c, 1)).collect();
            let matrix = SortedMatrix::from_local(&comm, local).unwrap();

            let seen = Arc::new(Mutex::new(Vec::new()));
            let handle = comm.registry().register(seen.clone());
            comm.barrier();

            if comm.rank0() {
                matrix.async_visit_row(&comm, 5, move |c, run: &[Edge]| {
                    c.registry().resolve(handle).lock().extend_from_slice(run);
                });
                // No owners, nothing sent
                matrix.async_visit_row(&comm, 4, move |_, _: &[Edge]| panic!("visited row 4"));
            }
            comm.barrier();

            let seen = seen.lock().clone();
            seen
        });

        let mut all: Vec<Edge> = results.concat();
        all.sort();
        assert_eq!(all, (0..12).map(|c| Edge::new(5, c, 1)).collect::<Vec<_>>());
    }
}
