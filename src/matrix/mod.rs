// Matrix data structures and operations

pub mod edge;
pub mod reference;
pub mod row_index;
pub mod sorted;

pub use edge::{product_edges, Coord, Edge, Product};
pub use reference::{reference_product, reference_spgemm};
pub use row_index::{RowOwnershipIndex, RowRange};
pub use sorted::{row_run, SortedMatrix};
