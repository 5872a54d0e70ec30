use sorted_coo::{
    product_edges, reference_product, spgemm, top_pushes, total_stats, CacheKind, Comm, DistArray,
    DistMap, Edge, LocalWorld, SortedMatrix, SpGemmConfig,
};

const RANKS: usize = 4;
const RANKS_PER_NODE: usize = 2;
const DIM: u64 = 64;
const EDGES_PER_RANK: u64 = 200;

/// Deterministic skewed edges: low rows and columns are hit far more often
fn demo_edges(rank: usize, salt: u64) -> Vec<Edge> {
    (0..EDGES_PER_RANK)
        .map(|i| {
            let x = (rank as u64 * EDGES_PER_RANK + i + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ salt;
            let row = (x % DIM) * (x % DIM) / DIM;
            let col = ((x >> 17) % DIM) * ((x >> 29) % DIM) / DIM;
            Edge::new(row, col, 1 + (x >> 41) % 5)
        })
        .collect()
}

fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    println!("sorted-coo {}: distributed SpGEMM demo", sorted_coo::VERSION);
    println!("  {} ranks, {} per node, {}x{} operands", RANKS, RANKS_PER_NODE, DIM, DIM);

    let a_all: Vec<Edge> = (0..RANKS).flat_map(|r| demo_edges(r, 0xA)).collect();
    let b_all: Vec<Edge> = (0..RANKS).flat_map(|r| demo_edges(r, 0xB)).collect();
    let expected = reference_product(&a_all, &b_all);
    println!("  reference product: {} nonzeros", expected.len());

    let world = LocalWorld::new(RANKS).with_ranks_per_node(RANKS_PER_NODE);
    for kind in CacheKind::ALL {
        let outcomes = world.run(|comm| {
            let a = DistArray::from_local(&comm, demo_edges(comm.rank(), 0xA));
            let b = SortedMatrix::from_local(&comm, demo_edges(comm.rank(), 0xB))?;
            let c = DistMap::new(&comm);
            let config = SpGemmConfig::with_cache(kind);
            let report = spgemm(&comm, &a, &b, &c, &config)?;
            let stats = total_stats(&comm, &report);
            let top = top_pushes(&comm, &c, 3);
            Ok::<_, sorted_coo::Error>((product_edges(c.gather_all(&comm)), stats, top))
        });

        let (product, stats, top) = match outcomes.into_iter().next() {
            Some(Ok(outcome)) => outcome,
            Some(Err(err)) => {
                println!("\n[{}] skipped: {}", kind, err);
                continue;
            }
            None => continue,
        };

        println!("\n[{}]", kind);
        println!(
            "  nonzeros: {} ({})",
            product.len(),
            if product == expected { "matches reference" } else { "MISMATCH" }
        );
        println!(
            "  inserts: {}, local accumulates: {}, evictions: {}, flushed: {}",
            stats.inserts, stats.local_accumulates, stats.evictions, stats.flushed_entries
        );
        for (coord, p) in top {
            println!("  ({}, {}) = {} after {} pushes", coord.row, coord.col, p.sum, p.pushes);
        }
    }
}
