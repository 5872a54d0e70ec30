//! Utility functions and helpers

pub mod formats;

pub use formats::{from_sprs_csr, to_dense, to_sprs_csr};

use rustc_hash::FxHasher;
use std::collections::TryReserveError;
use std::hash::{Hash, Hasher};

/// `len` zeros, or an error instead of aborting when the allocation
/// cannot be made
pub fn try_zeroed(len: usize) -> Result<Vec<usize>, TryReserveError> {
    let mut zeros = Vec::new();
    zeros.try_reserve_exact(len)?;
    zeros.resize(len, 0);
    Ok(zeros)
}

/// Exclusive prefix sum of `input`, one element longer than the input
pub fn exclusive_scan(input: &[usize]) -> Result<Vec<usize>, TryReserveError> {
    let mut result = Vec::new();
    result.try_reserve_exact(input.len() + 1)?;
    let mut sum = 0;

    result.push(0);
    for &val in input {
        sum += val;
        result.push(sum);
    }

    Ok(result)
}

/// Hash of `value` that is identical on every rank and every run.
///
/// Used for key-to-owner partitioning and for cache slot addressing, both
/// of which must agree across processes.
pub fn stable_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}
