//! Property-based tests.
//!
//! Key invariants:
//! - The row index lists exactly the ranks whose slice holds each row
//! - A flushed cache delivers the sum of every inserted value per key
//! - The distributed product equals the single-process reference

use proptest::prelude::*;
use rustc_hash::FxHashMap;
use sorted_coo::{
    all_gather, product_edges, reference_product, spgemm, CacheConfig, CacheKind, Comm, Coord,
    DistArray, DistMap, Edge, HashCache, LocalWorld, SlotCache, SortedMatrix, SpGemmConfig,
    StagingCache,
};

fn edge() -> impl Strategy<Value = Edge> {
    (0u64..40, 0u64..40, 1u64..10).prop_map(Edge::from)
}

fn shards(max_ranks: usize) -> impl Strategy<Value = Vec<Vec<Edge>>> {
    (1..=max_ranks).prop_flat_map(|ranks| {
        prop::collection::vec(prop::collection::vec(edge(), 0..20), ranks)
    })
}

fn inserts() -> impl Strategy<Value = Vec<(Coord, u64)>> {
    prop::collection::vec(
        ((0u64..6, 0u64..6).prop_map(|(r, c)| Coord::new(r, c)), 0u64..1000),
        0..200,
    )
}

fn conserved(cache: &mut dyn StagingCache, inserts: &[(Coord, u64)]) -> bool {
    let mut expected: FxHashMap<Coord, u64> = FxHashMap::default();
    let mut delivered: FxHashMap<Coord, u64> = FxHashMap::default();
    for &(key, value) in inserts {
        cache.insert(&mut delivered, key, value);
        if value > 0 {
            *expected.entry(key).or_insert(0) += value;
        }
    }
    cache.flush_all(&mut delivered);
    delivered == expected
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Index lookups match a scan of every rank's sorted slice.
    #[test]
    fn index_matches_brute_force(input in shards(4)) {
        let results = LocalWorld::new(input.len()).run(|comm| {
            let matrix = SortedMatrix::from_local(&comm, input[comm.rank()].clone()).unwrap();
            let slices = all_gather(&comm, matrix.edges().local().clone());
            (matrix.index().clone(), slices)
        });
        let (index, slices) = &results[0];

        for row in 0..45u64 {
            let owners: Vec<usize> = slices
                .iter()
                .enumerate()
                .filter(|(_, s)| s.iter().any(|e| e.row == row))
                .map(|(r, _)| r)
                .collect();
            prop_assert_eq!(index.lookup(row), owners.as_slice());
        }
    }

    /// Slices are globally ordered after the sort.
    #[test]
    fn sort_orders_globally(input in shards(4)) {
        let results = LocalWorld::new(input.len()).run(|comm| {
            let array = DistArray::from_local(&comm, input[comm.rank()].clone());
            array.sort(&comm);
            let local = array.local().clone();
            local
        });
        let flat: Vec<Edge> = results.concat();
        let mut expected: Vec<Edge> = input.concat();
        expected.sort();
        prop_assert_eq!(flat, expected);
    }

    /// Hash and slot caches conserve per-key sums for any table size.
    #[test]
    fn local_caches_conserve_sums(seq in inserts(), size in 1usize..16) {
        let mut hash = HashCache::new(size, u64::MAX / 2);
        prop_assert!(conserved(&mut hash, &seq));
        let mut slot = SlotCache::new(size, u64::MAX / 2);
        prop_assert!(conserved(&mut slot, &seq));
    }

    /// Tiny thresholds force frequent overflow flushes without losing value.
    #[test]
    fn overflow_flushes_conserve_sums(seq in inserts(), threshold in 1u64..50) {
        let mut hash = HashCache::new(64, threshold);
        prop_assert!(conserved(&mut hash, &seq));
        let mut slot = SlotCache::new(4, threshold);
        prop_assert!(conserved(&mut slot, &seq));
    }

    /// The distributed product equals the reference for every cache design.
    #[test]
    fn product_matches_reference(a in shards(3), b_edges in prop::collection::vec(edge(), 0..40)) {
        let ranks = a.len();
        let expected = reference_product(&a.concat(), &b_edges);

        for kind in [CacheKind::Hash, CacheKind::Slot] {
            let config = SpGemmConfig {
                cache: CacheConfig::for_kind(kind).with_slots(8),
                poll_interval: 3,
                ..SpGemmConfig::default()
            };
            let results = LocalWorld::new(ranks).run(|comm| {
                let a = DistArray::from_local(&comm, a[comm.rank()].clone());
                // All of B starts on the last rank
                let local_b = if comm.rank() + 1 == ranks { b_edges.clone() } else { Vec::new() };
                let b = SortedMatrix::from_local(&comm, local_b).unwrap();
                let c = DistMap::new(&comm);
                spgemm(&comm, &a, &b, &c, &config).unwrap();
                product_edges(c.gather_all(&comm))
            });
            prop_assert_eq!(&results[0], &expected);
        }
    }
}
