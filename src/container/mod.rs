//! Distributed containers built on the active-message transport.
//!
//! Constructors are collective: every rank must call them in the same
//! order so that their handles agree.

pub mod array;
pub mod counting_set;
pub mod map;

pub use array::DistArray;
pub use counting_set::CountingSet;
pub use map::DistMap;
