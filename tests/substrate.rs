//! In-process communicator, collectives and distributed containers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sorted_coo::{
    all_gather, node_gather, Comm, CountingSet, DistArray, DistMap, Handle, LocalComm, LocalWorld,
    NodeLayout,
};

fn relay(comm: &LocalComm, counter: Handle<AtomicUsize>, remaining: usize) {
    comm.registry().resolve(counter).fetch_add(1, Ordering::SeqCst);
    if remaining > 0 {
        let next = (comm.rank() + 1) % comm.size();
        comm.async_exec(next, move |c| relay(c, counter, remaining - 1));
    }
}

#[test]
fn test_relay_completes_before_barrier_returns() {
    let results = LocalWorld::new(4).run(|comm| {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = comm.registry().register(counter.clone());
        comm.barrier();

        if comm.rank0() {
            comm.async_exec(0, move |c| relay(c, handle, 39));
        }
        comm.barrier();
        counter.load(Ordering::SeqCst)
    });
    assert_eq!(results, vec![10, 10, 10, 10]);
}

#[test]
fn test_poll_drains_without_a_barrier() {
    let results = LocalWorld::new(2).run(|comm| {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = comm.registry().register(counter.clone());
        comm.barrier();

        if comm.rank0() {
            comm.async_exec(1, move |c| {
                c.registry().resolve(handle).fetch_add(1, Ordering::SeqCst);
            });
        } else {
            while counter.load(Ordering::SeqCst) == 0 {
                comm.poll();
                std::thread::yield_now();
            }
        }
        comm.barrier();
        counter.load(Ordering::SeqCst)
    });
    assert_eq!(results, vec![0, 1]);
}

#[test]
fn test_layout_matches_node_gather() {
    let results = LocalWorld::new(7).with_ranks_per_node(3).run(|comm| {
        let layout = comm.layout();
        let siblings = node_gather(&comm, comm.rank());
        let layouts = all_gather(&comm, layout);
        (layout, siblings, layouts)
    });

    for (rank, (layout, siblings, layouts)) in results.iter().enumerate() {
        assert_eq!(*layout, NodeLayout::blocked(rank, 7, 3));
        assert_eq!(siblings.len(), layout.local_size);
        assert_eq!(siblings[layout.local_id], rank);
        assert!(siblings.iter().all(|&s| layouts[s].node_id == layout.node_id));
    }
}

#[test]
fn test_sorted_array_feeds_counting_set() {
    let results = LocalWorld::new(3).run(|comm| {
        let local: Vec<u32> = (0..30u32).map(|i| (i * 7 + comm.rank() as u32) % 10).collect();
        let array = DistArray::from_local(&comm, local);
        array.sort(&comm);

        let counts = CountingSet::new(&comm);
        for &x in array.local().iter() {
            counts.async_insert(&comm, x);
        }
        (array.global_size(&comm), counts.size(&comm), counts.gather_keys(&comm))
    });

    for (global, distinct, keys) in results {
        assert_eq!(global, 90);
        assert_eq!(distinct, 10);
        assert_eq!(keys, (0..10).collect::<Vec<u32>>());
    }
}

#[test]
fn test_map_visitors_accumulate_on_owner() {
    let results = LocalWorld::new(4).run(|comm| {
        let map: DistMap<u64, u64> = DistMap::new(&comm);
        for key in 0..25u64 {
            map.async_visit(&comm, key, |_, v| *v += 1);
        }
        let mut misplaced = 0;
        map.for_all(&comm, |k, _| {
            if DistMap::<u64, u64>::owner(k, comm.size()) != comm.rank() {
                misplaced += 1;
            }
        });
        let mut all = map.gather_all(&comm);
        all.sort();
        (misplaced, all)
    });

    let expected: Vec<(u64, u64)> = (0..25).map(|k| (k, 4)).collect();
    for (misplaced, all) in results {
        assert_eq!(misplaced, 0);
        assert_eq!(all, expected);
    }
}
