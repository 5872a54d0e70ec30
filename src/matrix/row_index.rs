//! Row-ownership index of a globally sorted matrix
//!
//! Maps an absolute row number to the ranks whose local slice holds at
//! least one edge of that row. The table is replicated on every rank so
//! lookups during the multiply never leave the process.

use std::collections::TryReserveError;
use std::time::Instant;

use crate::comm::{all_gather, Comm};
use crate::container::{CountingSet, DistArray};
use crate::error::{Error, Result};
use crate::matrix::Edge;
use crate::utils::{exclusive_scan, try_zeroed};

/// Inclusive `(min_row, max_row)` span of one rank's sorted slice
pub type RowRange = (u64, u64);

/// CSR-style row to owners table.
///
/// Owners of `row` are `owner_ranks[row_ptrs[row]..row_ptrs[row + 1]]`,
/// ascending. Every row from 0 to the largest populated row has a slot,
/// including rows below the smallest populated row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOwnershipIndex {
    row_ptrs: Vec<usize>,
    owner_ranks: Vec<usize>,
}

impl RowOwnershipIndex {
    /// Collective: builds the index of a globally sorted edge array.
    ///
    /// Each rank reports the row span of its slice, gathered on rank 0 and
    /// broadcast back, together with the set of rows that hold any edge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RowOutOfRange`] if the largest row cannot be
    /// addressed on this platform.
    pub fn build<C: Comm>(comm: &C, edges: &DistArray<Edge>) -> Result<Self> {
        let _span = tracing::debug_span!("row_index.build", rank = comm.rank()).entered();
        let start = Instant::now();

        let populated = CountingSet::new(comm);
        let range = {
            let local = edges.local();
            let mut previous = None;
            for edge in local.iter() {
                if previous != Some(edge.row) {
                    populated.async_insert(comm, edge.row);
                    previous = Some(edge.row);
                }
            }
            match (local.first(), local.last()) {
                (Some(first), Some(last)) => Some((first.row, last.row)),
                _ => None,
            }
        };

        let ranges = all_gather(comm, range);
        let rows = populated.gather_keys(comm);
        let index = Self::from_parts(&ranges, &rows)?;

        if comm.rank0() {
            tracing::info!(
                elapsed = ?start.elapsed(),
                rows = index.num_rows(),
                populated = rows.len(),
                "row index built"
            );
        }
        Ok(index)
    }

    /// Builds the index from per-rank row spans (in rank order, `None` for
    /// a rank with no edges) and the ascending list of populated rows.
    ///
    /// A rank owns a populated row when the row lies inside its span.
    /// Rows that are not populated get no owner even when they lie inside
    /// some span.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RowOutOfRange`] if the largest populated row cannot
    /// be used as an offset or the offsets array for it cannot be
    /// allocated.
    pub fn from_parts(ranges: &[Option<RowRange>], populated_rows: &[u64]) -> Result<Self> {
        debug_assert!(
            populated_rows.windows(2).all(|w| w[0] < w[1]),
            "populated rows must be strictly ascending"
        );

        let Some(&max_row) = populated_rows.last() else {
            return Ok(Self {
                row_ptrs: vec![0],
                owner_ranks: Vec::new(),
            });
        };
        let n_rows = usize::try_from(max_row)
            .ok()
            .and_then(|r| r.checked_add(1))
            .ok_or(Error::RowOutOfRange { row: max_row })?;
        let too_large = move |_: TryReserveError| Error::RowOutOfRange { row: max_row };

        // Populated rows covered by each rank's span
        let covered = |range: &RowRange| {
            let (lo, hi) = *range;
            let begin = populated_rows.partition_point(|&r| r < lo);
            let end = populated_rows.partition_point(|&r| r <= hi);
            &populated_rows[begin..end.max(begin)]
        };

        let mut counts = try_zeroed(n_rows).map_err(too_large)?;
        for range in ranges.iter().flatten() {
            for &row in covered(range) {
                counts[row as usize] += 1;
            }
        }

        let row_ptrs = exclusive_scan(&counts).map_err(too_large)?;
        drop(counts);
        let mut cursor = Vec::new();
        cursor.try_reserve_exact(n_rows).map_err(too_large)?;
        cursor.extend_from_slice(&row_ptrs[..n_rows]);
        let mut owner_ranks = vec![0usize; row_ptrs[n_rows]];
        for (rank, range) in ranges.iter().enumerate() {
            let Some(range) = range else { continue };
            for &row in covered(range) {
                let slot = &mut cursor[row as usize];
                owner_ranks[*slot] = rank;
                *slot += 1;
            }
        }

        Ok(Self {
            row_ptrs,
            owner_ranks,
        })
    }

    /// Ranks owning `row`, ascending. Empty for rows beyond the table.
    pub fn lookup(&self, row: u64) -> &[usize] {
        let Ok(row) = usize::try_from(row) else {
            return &[];
        };
        match (self.row_ptrs.get(row), self.row_ptrs.get(row + 1)) {
            (Some(&begin), Some(&end)) => &self.owner_ranks[begin..end],
            _ => &[],
        }
    }

    /// Number of row slots, i.e. largest populated row plus one
    pub fn num_rows(&self) -> usize {
        self.row_ptrs.len() - 1
    }

    /// Offsets into [`owner_ranks`](Self::owner_ranks), one per row plus one
    pub fn row_ptrs(&self) -> &[usize] {
        &self.row_ptrs
    }

    /// Packed owner lists
    pub fn owner_ranks(&self) -> &[usize] {
        &self.owner_ranks
    }
}
