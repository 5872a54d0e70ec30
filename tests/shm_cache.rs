//! Shared-memory staging cache across simulated nodes
#![cfg(unix)]

use sorted_coo::{
    reference_product, product_edges, spgemm, top_pushes, total_stats, CacheKind, Comm, Coord,
    DistArray, DistMap, Edge, LocalWorld, Product, SortedMatrix, SpGemmConfig, SyncDiscipline,
};

const DISCIPLINES: [SyncDiscipline; 2] = [SyncDiscipline::AtomicSlots, SyncDiscipline::ProcessMutex];

/// Rows 1 and 2 of B live on different ranks of one node and both feed
/// product coordinate (0, 0)
fn converging_push_count(kind: CacheKind) -> Product {
    let results = LocalWorld::new(2).with_ranks_per_node(2).run(|comm| {
        let a = DistArray::from_local(&comm, vec![Edge::new(0, comm.rank() as u64 + 1, 1)]);
        let b = SortedMatrix::from_local(&comm, vec![Edge::new(comm.rank() as u64 + 1, 0, 1)])
            .unwrap();
        assert_eq!(b.index().lookup(1), &[0]);
        assert_eq!(b.index().lookup(2), &[1]);

        let c = DistMap::new(&comm);
        spgemm(&comm, &a, &b, &c, &SpGemmConfig::with_cache(kind)).unwrap();
        top_pushes(&comm, &c, 1)
    });
    assert_eq!(results[0].len(), 1);
    assert_eq!(results[0][0].0, Coord::new(0, 0));
    results[0][0].1
}

#[test]
fn test_siblings_deduplicate_before_flushing() {
    // Process-local slots flush once per rank
    assert_eq!(converging_push_count(CacheKind::Slot), Product { sum: 2, pushes: 2 });

    // A shared slot absorbs both partials and flushes once for the node
    for discipline in DISCIPLINES {
        assert_eq!(
            converging_push_count(CacheKind::Shared(discipline)),
            Product { sum: 2, pushes: 1 },
            "discipline {:?}",
            discipline
        );
    }
}

#[test]
fn test_multi_node_product_matches_reference() {
    let gen = |rank: u64, salt: u64| -> Vec<Edge> {
        (0..50u64)
            .map(|i| {
                let x = (rank * 50 + i + salt) * 48271 % 2147483647;
                Edge::new(x % 11, (x / 11) % 13, 1 + x % 3)
            })
            .collect()
    };
    let a_all: Vec<Edge> = (0..6).flat_map(|r| gen(r, 0)).collect();
    let b_all: Vec<Edge> = (0..6).flat_map(|r| gen(r, 977)).collect();
    let expected = reference_product(&a_all, &b_all);

    for discipline in DISCIPLINES {
        let mut config = SpGemmConfig::with_cache(CacheKind::Shared(discipline));
        config.cache.slots = 16;
        let results = LocalWorld::new(6).with_ranks_per_node(3).run(|comm| {
            let a = DistArray::from_local(&comm, gen(comm.rank() as u64, 0));
            let b = SortedMatrix::from_local(&comm, gen(comm.rank() as u64, 977)).unwrap();
            let c = DistMap::new(&comm);
            let report = spgemm(&comm, &a, &b, &c, &config).unwrap();
            (product_edges(c.gather_all(&comm)), total_stats(&comm, &report))
        });

        let (product, stats) = &results[0];
        assert_eq!(product, &expected, "discipline {:?}", discipline);
        assert!(stats.inserts > 0);
        assert!(stats.flushed_entries <= stats.inserts);
    }
}

#[test]
fn test_back_to_back_caches() {
    // Regions are torn down and names reused safely across multiplies
    let results = LocalWorld::new(4).with_ranks_per_node(2).run(|comm| {
        let a = DistArray::from_local(&comm, vec![Edge::new(comm.rank() as u64, 0, 1)]);
        let b = SortedMatrix::from_local(&comm, vec![Edge::new(0, comm.rank() as u64, 2)]).unwrap();
        let mut sizes = Vec::new();
        for discipline in DISCIPLINES {
            let c = DistMap::new(&comm);
            let config = SpGemmConfig::with_cache(CacheKind::Shared(discipline));
            spgemm(&comm, &a, &b, &c, &config).unwrap();
            sizes.push(c.size(&comm));
        }
        sizes
    });
    // 4 rows of A times a row 0 with 4 columns
    assert!(results.iter().all(|s| s == &vec![16, 16]));
}
