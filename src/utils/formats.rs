//! Utilities for converting between edge lists and external matrix libraries

use ndarray::Array2;
use sprs::CsMat;

use crate::matrix::Edge;

/// Converts an edge list to a sprs CSR matrix, summing duplicates
///
/// # Panics
///
/// Panics if an edge lies outside `shape`.
pub fn to_sprs_csr(edges: &[Edge], shape: (usize, usize)) -> CsMat<u64> {
    let (n_rows, n_cols) = shape;
    let mut sorted = edges.to_vec();
    sorted.sort_unstable();

    let mut indptr = Vec::with_capacity(n_rows + 1);
    let mut indices = Vec::with_capacity(sorted.len());
    let mut data: Vec<u64> = Vec::with_capacity(sorted.len());
    indptr.push(0);

    let mut current_row = 0usize;
    let mut last: Option<(usize, usize)> = None;
    for edge in &sorted {
        let row = edge.row as usize;
        let col = edge.col as usize;
        assert!(row < n_rows, "Row index {} out of bounds (n_rows = {})", row, n_rows);
        assert!(col < n_cols, "Column index {} out of bounds (n_cols = {})", col, n_cols);

        while current_row < row {
            indptr.push(indices.len());
            current_row += 1;
        }
        if last == Some((row, col)) {
            // Duplicate coordinate: fold into the previous entry
            if let Some(v) = data.last_mut() {
                *v += edge.value;
            }
        } else {
            indices.push(col);
            data.push(edge.value);
            last = Some((row, col));
        }
    }
    while current_row < n_rows {
        indptr.push(indices.len());
        current_row += 1;
    }

    CsMat::new(shape, indptr, indices, data)
}

/// Converts a sprs matrix (CSR or CSC) to a sorted edge list
pub fn from_sprs_csr(matrix: &CsMat<u64>) -> Vec<Edge> {
    // Ensure matrix is in CSR format
    let csr;
    let matrix = if matrix.is_csr() {
        matrix
    } else {
        csr = matrix.to_csr();
        &csr
    };

    let mut edges = Vec::with_capacity(matrix.nnz());
    for (row, vec) in matrix.outer_iterator().enumerate() {
        for (col, &value) in vec.iter() {
            edges.push(Edge::new(row as u64, col as u64, value));
        }
    }
    edges
}

/// Expands an edge list to a dense array, summing duplicates
///
/// # Panics
///
/// Panics if an edge lies outside `shape`.
pub fn to_dense(edges: &[Edge], shape: (usize, usize)) -> Array2<u64> {
    let mut dense = Array2::<u64>::zeros(shape);
    for edge in edges {
        dense[[edge.row as usize, edge.col as usize]] += edge.value;
    }
    dense
}
