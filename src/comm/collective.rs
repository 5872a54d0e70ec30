//! Gather-then-broadcast collectives built from active messages.
//!
//! Both helpers hop through a coordinator: values are sent to it, a
//! barrier closes the gather, the coordinator sends the full table back
//! out, and a second barrier closes the broadcast. Every caller leaves
//! with an identical table and no further communication is needed to
//! read it.

use parking_lot::Mutex;
use std::sync::Arc;

use super::Comm;

type Table<T> = Arc<Mutex<Vec<Option<T>>>>;

fn collect<T>(table: &Table<T>) -> Vec<T> {
    let gathered = std::mem::take(&mut *table.lock());
    debug_assert!(gathered.iter().all(Option::is_some), "gather left a hole");
    gathered.into_iter().flatten().collect()
}

/// Collective: every rank contributes `value` and receives all
/// contributions in rank order.
///
/// Values are gathered on rank 0, then broadcast.
pub fn all_gather<C, T>(comm: &C, value: T) -> Vec<T>
where
    C: Comm,
    T: Clone + Send + Sync + 'static,
{
    let table: Table<T> = Arc::new(Mutex::new(vec![None; comm.size()]));
    let handle = comm.registry().register(table.clone());

    let rank = comm.rank();
    comm.async_exec(0, move |c| {
        c.registry().resolve(handle).lock()[rank] = Some(value);
    });
    comm.barrier();

    if comm.rank0() {
        let gathered = table.lock().clone();
        comm.async_bcast(move |c| {
            *c.registry().resolve(handle).lock() = gathered.clone();
        });
    }
    comm.barrier();

    comm.registry().release(handle);
    collect(&table)
}

/// Collective: every rank contributes `value` and receives the
/// contributions of the ranks on its own node, ordered by local id.
///
/// Values are gathered on the node leader (local id 0), which then sends
/// the node's table to each sibling.
pub fn node_gather<C, T>(comm: &C, value: T) -> Vec<T>
where
    C: Comm,
    T: Clone + Send + Sync + 'static,
{
    let layout = comm.layout();
    let leader = layout.leader(comm.rank());
    let table: Table<T> = Arc::new(Mutex::new(vec![None; layout.local_size]));
    let handle = comm.registry().register(table.clone());

    let local_id = layout.local_id;
    comm.async_exec(leader, move |c| {
        c.registry().resolve(handle).lock()[local_id] = Some(value);
    });
    comm.barrier();

    if local_id == 0 {
        let gathered = table.lock().clone();
        for sibling in leader + 1..leader + layout.local_size {
            let gathered = gathered.clone();
            comm.async_exec(sibling, move |c| {
                *c.registry().resolve(handle).lock() = gathered;
            });
        }
    }
    comm.barrier();

    comm.registry().release(handle);
    collect(&table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalWorld;

    #[test]
    fn test_all_gather_in_rank_order() {
        let results = LocalWorld::new(4).run(|comm| all_gather(&comm, comm.rank() * 10));
        for gathered in results {
            assert_eq!(gathered, vec![0, 10, 20, 30]);
        }
    }

    #[test]
    fn test_all_gather_single_rank() {
        let results = LocalWorld::new(1).run(|comm| all_gather(&comm, "only"));
        assert_eq!(results, vec![vec!["only"]]);
    }

    #[test]
    fn test_node_gather_stays_on_node() {
        let results = LocalWorld::new(5)
            .with_ranks_per_node(2)
            .run(|comm| node_gather(&comm, format!("r{}", comm.rank())));

        assert_eq!(results[0], vec!["r0", "r1"]);
        assert_eq!(results[1], vec!["r0", "r1"]);
        assert_eq!(results[2], vec!["r2", "r3"]);
        assert_eq!(results[3], vec!["r2", "r3"]);
        assert_eq!(results[4], vec!["r4"]);
    }

    #[test]
    fn test_collectives_release_their_buffers() {
        let results = LocalWorld::new(2).run(|comm| {
            all_gather(&comm, 1u8);
            node_gather(&comm, 2u8);
            comm.registry().live()
        });
        assert_eq!(results, vec![0, 0]);
    }

    #[test]
    fn test_repeated_collectives_do_not_grow_the_registry() {
        let results = LocalWorld::new(2).run(|comm| {
            for round in 0..100 {
                all_gather(&comm, round);
                node_gather(&comm, round);
            }
            comm.registry().register(Arc::new(0u8)).id()
        });
        assert_eq!(results, vec![0, 0]);
    }
}
