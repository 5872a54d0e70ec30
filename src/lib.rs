//! # sorted-coo: distributed SpGEMM over sorted coordinate matrices
//!
//! Multiplies sparse matrices whose coordinate-format edges are sharded
//! across cooperating ranks that talk only through asynchronous active
//! messages.
//!
//! ## Overview
//!
//! The right operand is sorted globally so each row is one contiguous run
//! on one or a few ranks. A replicated row-ownership index turns "who
//! owns row `k`" into a local lookup, and every left edge `(i, k, v)`
//! becomes a fire-and-forget visit to the owners of row `k`. Partial
//! products are staged in a cache on the owning rank before they become
//! remote updates to the distributed accumulator.
//!
//! ## Components
//!
//! 1. **Row-Ownership Index**: CSR-style `row -> owner ranks` table built
//!    from the per-rank row spans of the sorted matrix.
//!
//! 2. **Sorted Matrix**: the sorted edge array plus its index, with
//!    [`SortedMatrix::async_visit_row`].
//!
//! 3. **Staging Caches**:
//!    - **Hash**: unbounded, flushed all at once at a size ceiling
//!    - **Slot**: direct-mapped, evicts on collision
//!    - **Shared**: slot tables in POSIX shared memory, deduplicating
//!      across all ranks of a node
//!
//! 4. **Driver**: [`spgemm`] and [`SpGemm`].
//!
//! The transport is the [`Comm`] trait. [`LocalWorld`] runs every rank as
//! a thread of the current process.
//!
//! ## Usage
//!
//! ```
//! use sorted_coo::{spgemm, product_edges, DistArray, DistMap, Edge, LocalWorld, SortedMatrix};
//! use sorted_coo::{CacheKind, Comm, SpGemmConfig};
//!
//! let products = LocalWorld::new(2).run(|comm| {
//!     let (a_local, b_local) = if comm.rank() == 0 {
//!         (vec![Edge::new(0, 1, 2)], vec![Edge::new(3, 0, 4)])
//!     } else {
//!         (vec![Edge::new(2, 3, 1)], vec![Edge::new(1, 2, 5)])
//!     };
//!     let a = DistArray::from_local(&comm, a_local);
//!     let b = SortedMatrix::from_local(&comm, b_local).unwrap();
//!     let c = DistMap::new(&comm);
//!     spgemm(&comm, &a, &b, &c, &SpGemmConfig::with_cache(CacheKind::Slot)).unwrap();
//!     product_edges(c.gather_all(&comm))
//! });
//!
//! assert_eq!(products[0], vec![Edge::new(0, 2, 10), Edge::new(2, 0, 4)]);
//! ```

pub mod cache;
pub mod comm;
pub mod config;
pub mod container;
pub mod error;
pub mod matrix;
pub mod spgemm;
pub mod utils;

// Re-export primary components
pub use cache::{create_cache, CacheStats, FlushTarget, HashCache, MapTarget, SlotCache, StagingCache};
pub use comm::{all_gather, node_gather, Comm, Handle, LocalComm, LocalWorld, NodeLayout, Registry};
pub use config::{CacheConfig, CacheKind, SpGemmConfig, SyncDiscipline};
pub use container::{CountingSet, DistArray, DistMap};
pub use error::{Error, Result};
pub use matrix::{
    product_edges, reference_product, reference_spgemm, Coord, Edge, Product, RowOwnershipIndex,
    SortedMatrix,
};
pub use spgemm::{
    count_cols, count_rows, spgemm, top_pushes, total_stats, MultiplyReport, SpGemm, TopKFilter,
};
pub use utils::{from_sprs_csr, to_dense, to_sprs_csr};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
