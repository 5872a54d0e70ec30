//! In-process world: every rank is a thread, every mailbox a FIFO queue.
//!
//! Quiescence is tracked with a global in-flight counter that is raised
//! before a message is queued and lowered after its closure returns, so
//! a zero count with every rank inside the barrier means nothing is left
//! to run anywhere. Messages carry the sender's barrier epoch: a rank
//! still inside barrier `e` never executes a message sent after `e` was
//! released.

use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;
use std::time::Duration;

use super::{Comm, NodeLayout, Registry};

type LocalAm = Box<dyn FnOnce(&LocalComm) + Send>;

struct Envelope {
    epoch: usize,
    am: LocalAm,
}

/// Panic payload raised on ranks that observe another rank's failure
struct PeerPanicked;

struct Shared {
    size: usize,
    ranks_per_node: usize,
    mailboxes: Vec<Mutex<VecDeque<Envelope>>>,
    in_flight: AtomicUsize,
    arrivals: AtomicUsize,
    released: AtomicUsize,
    poisoned: AtomicBool,
}

impl Shared {
    fn new(size: usize, ranks_per_node: usize) -> Self {
        Self {
            size,
            ranks_per_node,
            mailboxes: (0..size).map(|_| Mutex::new(VecDeque::new())).collect(),
            in_flight: AtomicUsize::new(0),
            arrivals: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            poisoned: AtomicBool::new(false),
        }
    }

    fn check_poison(&self) {
        if self.poisoned.load(SeqCst) {
            std::panic::panic_any(PeerPanicked);
        }
    }
}

struct PoisonOnPanic(Arc<Shared>);

impl Drop for PoisonOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.poisoned.store(true, SeqCst);
        }
    }
}

struct RankState {
    registry: Registry,
    completed: AtomicUsize,
}

/// Communicator of one rank of a [`LocalWorld`]
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    shared: Arc<Shared>,
    state: Arc<RankState>,
}

impl LocalComm {
    fn new(rank: usize, shared: Arc<Shared>) -> Self {
        Self {
            rank,
            shared,
            state: Arc::new(RankState {
                registry: Registry::new(),
                completed: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of barriers this rank has completed
    pub fn barriers_completed(&self) -> usize {
        self.state.completed.load(SeqCst)
    }

    fn drain(&self) -> usize {
        let completed = self.state.completed.load(SeqCst);
        let mailbox = &self.shared.mailboxes[self.rank];
        let mut handled = 0;
        loop {
            let next = {
                let mut queue = mailbox.lock();
                match queue.front() {
                    Some(env) if env.epoch <= completed => queue.pop_front(),
                    _ => None,
                }
            };
            let Some(env) = next else { break };
            (env.am)(self);
            self.shared.in_flight.fetch_sub(1, SeqCst);
            handled += 1;
        }
        handled
    }
}

impl Comm for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn layout(&self) -> NodeLayout {
        NodeLayout::blocked(self.rank, self.shared.size, self.shared.ranks_per_node)
    }

    fn registry(&self) -> &Registry {
        &self.state.registry
    }

    fn async_exec<F>(&self, dest: usize, am: F)
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        assert!(
            dest < self.shared.size,
            "destination rank {} out of range (size = {})",
            dest,
            self.shared.size
        );
        let epoch = self.state.completed.load(SeqCst);
        self.shared.in_flight.fetch_add(1, SeqCst);
        self.shared.mailboxes[dest].lock().push_back(Envelope {
            epoch,
            am: Box::new(am),
        });
    }

    fn poll(&self) -> usize {
        self.shared.check_poison();
        self.drain()
    }

    fn barrier(&self) {
        let shared = &*self.shared;
        let target = self.state.completed.load(SeqCst) + 1;
        shared.arrivals.fetch_add(1, SeqCst);

        let backoff = Backoff::new();
        loop {
            shared.check_poison();
            if shared.released.load(SeqCst) >= target {
                break;
            }
            if self.drain() > 0 {
                backoff.reset();
                continue;
            }
            if shared.arrivals.load(SeqCst) >= target * shared.size
                && shared.in_flight.load(SeqCst) == 0
            {
                shared.released.fetch_max(target, SeqCst);
                break;
            }
            if backoff.is_completed() {
                std::thread::sleep(Duration::from_micros(50));
            } else {
                backoff.snooze();
            }
        }
        self.state.completed.store(target, SeqCst);
    }
}

/// A set of ranks simulated as threads of the current process
#[derive(Debug, Clone)]
pub struct LocalWorld {
    size: usize,
    ranks_per_node: usize,
}

impl LocalWorld {
    /// Creates a world of `size` ranks packed `num_cpus::get()` to a node
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "a world needs at least one rank");
        Self {
            size,
            ranks_per_node: num_cpus::get(),
        }
    }

    /// Sets how many consecutive ranks share a simulated node
    pub fn with_ranks_per_node(mut self, ranks_per_node: usize) -> Self {
        self.ranks_per_node = ranks_per_node.max(1);
        self
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `f` once per rank, each on its own thread, and returns the
    /// per-rank results in rank order.
    ///
    /// If any rank panics, the others fail at their next barrier or poll
    /// and the original panic is propagated.
    pub fn run<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(LocalComm) -> R + Sync,
        R: Send,
    {
        let shared = Arc::new(Shared::new(self.size, self.ranks_per_node));
        tracing::debug!(
            size = self.size,
            ranks_per_node = self.ranks_per_node,
            "starting local world"
        );

        let outcomes: Vec<std::thread::Result<R>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..self.size)
                .map(|rank| {
                    let comm = LocalComm::new(rank, shared.clone());
                    let guard = PoisonOnPanic(shared.clone());
                    let f = &f;
                    s.spawn(move || {
                        let _guard = guard;
                        f(comm)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });

        let mut results = Vec::with_capacity(self.size);
        let mut root_cause = None;
        let mut peer_failure = None;
        for outcome in outcomes {
            match outcome {
                Ok(r) => results.push(r),
                Err(payload) if payload.is::<PeerPanicked>() => {
                    peer_failure.get_or_insert(payload);
                }
                Err(payload) => {
                    root_cause.get_or_insert(payload);
                }
            }
        }
        if let Some(payload) = root_cause.or(peer_failure) {
            std::panic::resume_unwind(payload);
        }
        results
    }
}
