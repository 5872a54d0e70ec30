//! Coordinate-format entries and the accumulated product value

/// One nonzero of a sparse matrix in coordinate form.
///
/// Ordered by row, then column, then value; a globally sorted array of
/// edges keeps every row in one contiguous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Edge {
    /// Row index
    pub row: u64,
    /// Column index
    pub col: u64,
    /// Semiring value
    pub value: u64,
}

impl Edge {
    /// Creates an edge
    pub const fn new(row: u64, col: u64, value: u64) -> Self {
        Self { row, col, value }
    }

    /// Destination coordinate of this edge
    pub const fn coord(&self) -> Coord {
        Coord::new(self.row, self.col)
    }
}

impl From<(u64, u64, u64)> for Edge {
    fn from((row, col, value): (u64, u64, u64)) -> Self {
        Self::new(row, col, value)
    }
}

/// Destination coordinate of a partial product.
///
/// Plain old data: safe to place in memory shared between processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(C)]
pub struct Coord {
    /// Row of the product matrix
    pub row: u64,
    /// Column of the product matrix
    pub col: u64,
}

impl Coord {
    /// Creates a coordinate
    pub const fn new(row: u64, col: u64) -> Self {
        Self { row, col }
    }
}

/// Value stored in the distributed accumulator for one coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Product {
    /// Accumulated sum of every partial product flushed so far
    pub sum: u64,
    /// Number of flushes that reached this coordinate
    pub pushes: u64,
}

impl Product {
    /// Adds one flushed partial sum. Saturates rather than wrapping.
    pub fn absorb(&mut self, partial: u64) {
        self.sum = self.sum.saturating_add(partial);
        self.pushes += 1;
    }
}

/// Converts accumulator entries to edges sorted by coordinate
pub fn product_edges<I>(entries: I) -> Vec<Edge>
where
    I: IntoIterator<Item = (Coord, Product)>,
{
    let mut edges: Vec<Edge> = entries
        .into_iter()
        .map(|(c, p)| Edge::new(c.row, c.col, p.sum))
        .collect();
    edges.sort_unstable();
    edges
}
