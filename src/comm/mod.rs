//! Active-message transport used by the distributed containers and the
//! multiply.
//!
//! The `Comm` trait is the seam to the transport: fire-and-forget remote
//! execution, broadcast, opportunistic draining and a quiescent barrier.
//! `LocalWorld` runs every rank as a thread of the current process and is
//! what the tests and the demo use.

pub mod collective;
pub mod local;
pub mod registry;

pub use collective::{all_gather, node_gather};
pub use local::{LocalComm, LocalWorld};
pub use registry::{Handle, Registry};

/// Placement of a rank within its physical node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    /// Offset of this rank within its node (0 is the node leader)
    pub local_id: usize,
    /// Number of ranks sharing this node
    pub local_size: usize,
    /// Index of the node
    pub node_id: usize,
}

impl NodeLayout {
    /// Lays out `size` ranks in consecutive blocks of `ranks_per_node`.
    ///
    /// The last node may be narrower than the others.
    pub fn blocked(rank: usize, size: usize, ranks_per_node: usize) -> Self {
        let width = ranks_per_node.max(1);
        let node_id = rank / width;
        let first = node_id * width;
        Self {
            local_id: rank - first,
            local_size: width.min(size - first),
            node_id,
        }
    }

    /// Global rank of this node's leader
    pub fn leader(&self, rank: usize) -> usize {
        rank - self.local_id
    }
}

/// Asynchronous active-message communicator.
///
/// Remote closures receive the communicator of the rank they execute on;
/// anything they need on that rank is reached through a [`Handle`]
/// resolved in [`Comm::registry`], never through captured addresses.
pub trait Comm: Clone + Send + Sync + 'static {
    /// This rank's id
    fn rank(&self) -> usize;

    /// Number of ranks
    fn size(&self) -> usize;

    /// Node placement of this rank
    fn layout(&self) -> NodeLayout;

    /// This rank's handle registry
    fn registry(&self) -> &Registry;

    /// Queues `am` for execution on `dest`. Never runs it inline, even
    /// when `dest` is this rank.
    fn async_exec<F>(&self, dest: usize, am: F)
    where
        F: FnOnce(&Self) + Send + 'static;

    /// Executes pending messages addressed to this rank and returns how
    /// many ran.
    fn poll(&self) -> usize;

    /// Collective: returns once every rank has entered the barrier and no
    /// message is queued or executing anywhere.
    fn barrier(&self);

    /// Queues `am` on every rank, including this one
    fn async_bcast<F>(&self, am: F)
    where
        F: Fn(&Self) + Send + Sync + 'static,
    {
        let am = std::sync::Arc::new(am);
        for dest in 0..self.size() {
            let am = am.clone();
            self.async_exec(dest, move |comm| am(comm));
        }
    }

    /// Whether this is rank 0
    fn rank0(&self) -> bool {
        self.rank() == 0
    }
}
