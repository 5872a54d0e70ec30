//! Single-process reference SpGEMM
//!
//! A slow but obviously correct product used as the oracle for the
//! distributed multiply. Arithmetic saturates the same way the
//! distributed accumulator does.

use rustc_hash::FxHashMap;
use sprs::CsMat;

use crate::matrix::Edge;
use crate::utils::{from_sprs_csr, to_sprs_csr};

/// Multiplies two CSR matrices row by row with a hash accumulator
///
/// # Panics
///
/// Panics if the inner dimensions differ or either input is not CSR.
pub fn reference_spgemm(a: &CsMat<u64>, b: &CsMat<u64>) -> CsMat<u64> {
    assert_eq!(
        a.cols(),
        b.rows(),
        "Matrix dimensions must be compatible for multiplication"
    );
    assert!(a.is_csr() && b.is_csr(), "reference_spgemm expects CSR inputs");

    let n_rows = a.rows();
    let n_cols = b.cols();

    let mut row_ptr = Vec::with_capacity(n_rows + 1);
    let mut col_idx = Vec::new();
    let mut values = Vec::new();
    row_ptr.push(0);

    for a_row in a.outer_iterator() {
        let mut accum: FxHashMap<usize, u64> = FxHashMap::default();

        for (k, &a_val) in a_row.iter() {
            let Some(b_row) = b.outer_view(k) else { continue };
            for (j, &b_val) in b_row.iter() {
                let slot = accum.entry(j).or_insert(0);
                *slot = slot.saturating_add(a_val.saturating_mul(b_val));
            }
        }

        let mut row_entries: Vec<_> = accum.into_iter().filter(|&(_, v)| v != 0).collect();
        row_entries.sort_unstable_by_key(|&(col, _)| col);
        for (j, val) in row_entries {
            col_idx.push(j);
            values.push(val);
        }
        row_ptr.push(col_idx.len());
    }

    CsMat::new((n_rows, n_cols), row_ptr, col_idx, values)
}

/// Product of two edge lists, as sorted edges without zeros.
///
/// Both operands are sized to fit every edge given; duplicates are
/// summed.
pub fn reference_product(a: &[Edge], b: &[Edge]) -> Vec<Edge> {
    let extent = |edges: &[Edge], f: fn(&Edge) -> u64| {
        edges.iter().map(|e| f(e) as usize + 1).max().unwrap_or(0)
    };
    let inner = extent(a, |e| e.col).max(extent(b, |e| e.row));
    let a = to_sprs_csr(a, (extent(a, |e| e.row), inner));
    let b = to_sprs_csr(b, (inner, extent(b, |e| e.col)));
    from_sprs_csr(&reference_spgemm(&a, &b))
}
