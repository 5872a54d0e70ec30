//! Configuration for the staging caches and the multiply

use crate::error::{Error, Result};

/// How concurrent inserts into a shared-memory region are serialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncDiscipline {
    /// Lock-free: a slot is claimed by compare-and-swap on its value word
    AtomicSlots,
    /// One process-shared mutex embedded in the region header
    ProcessMutex,
}

impl SyncDiscipline {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            SyncDiscipline::AtomicSlots => "atomic",
            SyncDiscipline::ProcessMutex => "mutex",
        }
    }
}

/// Staging cache design
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Unbounded hash table, flushed entirely at a size ceiling
    Hash,
    /// Direct-mapped slot table with collision eviction
    Slot,
    /// Slot tables in shared memory, one per rank, addressed node-wide
    Shared(SyncDiscipline),
}

impl CacheKind {
    /// Every design, for tests and benches that compare them
    pub const ALL: [CacheKind; 4] = [
        CacheKind::Hash,
        CacheKind::Slot,
        CacheKind::Shared(SyncDiscipline::AtomicSlots),
        CacheKind::Shared(SyncDiscipline::ProcessMutex),
    ];

    /// Whether this design needs POSIX shared memory
    pub fn is_shared(&self) -> bool {
        matches!(self, CacheKind::Shared(_))
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKind::Hash => write!(f, "hash"),
            CacheKind::Slot => write!(f, "slot"),
            CacheKind::Shared(d) => write!(f, "shared-{}", d.name()),
        }
    }
}

const DEFAULT_SLOTS: usize = 1 << 20;

fn top_k_slots(k: usize) -> usize {
    k.saturating_mul(k).max(1024)
}

/// Staging cache parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Which design to build
    pub kind: CacheKind,

    /// Entry count at which the hash design flushes everything
    pub hash_capacity: usize,

    /// Slots per table for the slot and shared designs
    pub slots: usize,

    /// A slot whose value reaches this is flushed before it can overflow.
    /// At most `u64::MAX / 2`.
    pub overflow_threshold: u64,

    /// Prefix of shared-memory object names
    pub shm_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: CacheKind::Slot,
            hash_capacity: 1_000_000,
            slots: DEFAULT_SLOTS,
            overflow_threshold: u64::MAX / 2,
            shm_prefix: "scoo".to_string(),
        }
    }
}

impl CacheConfig {
    /// Default parameters for `kind`
    pub fn for_kind(kind: CacheKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Parameters sized for an expected `k` by `k` block of distinct
    /// output coordinates
    pub fn for_top_k(kind: CacheKind, k: usize) -> Self {
        Self {
            kind,
            slots: top_k_slots(k),
            ..Self::default()
        }
    }

    /// Sets the slot count
    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    /// Sets the overflow threshold
    pub fn with_overflow_threshold(mut self, threshold: u64) -> Self {
        self.overflow_threshold = threshold;
        self
    }

    /// Checks every field
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.hash_capacity == 0 {
            return Err(Error::invalid_config("hash_capacity", "must be positive"));
        }
        if self.slots == 0 {
            return Err(Error::invalid_config("slots", "must be positive"));
        }
        if self.overflow_threshold == 0 || self.overflow_threshold > u64::MAX / 2 {
            return Err(Error::invalid_config(
                "overflow_threshold",
                format!("must be in 1..={}", u64::MAX / 2),
            ));
        }
        if self.shm_prefix.contains(['\0', '/']) {
            return Err(Error::invalid_config(
                "shm_prefix",
                "must not contain NUL or '/'",
            ));
        }
        Ok(())
    }
}

/// Parameters of one distributed multiply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpGemmConfig {
    /// Staging cache on every rank
    pub cache: CacheConfig,

    /// Size of the high-degree row and column sets to filter out.
    /// `None` disables filtering.
    pub top_k: Option<usize>,

    /// Local edges dispatched between opportunistic drains; 0 only drains
    /// at barriers
    pub poll_interval: usize,
}

impl Default for SpGemmConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            top_k: None,
            poll_interval: 4096,
        }
    }
}

impl SpGemmConfig {
    /// Default multiply using cache design `kind`
    pub fn with_cache(kind: CacheKind) -> Self {
        Self {
            cache: CacheConfig::for_kind(kind),
            ..Self::default()
        }
    }

    /// Cache parameters a multiply actually builds.
    ///
    /// With filtering on and the slot count left at its default, slot
    /// tables are sized from `top_k` as in [`CacheConfig::for_top_k`].
    pub fn effective_cache(&self) -> CacheConfig {
        match self.top_k {
            Some(k) if self.cache.slots == DEFAULT_SLOTS => {
                self.cache.clone().with_slots(top_k_slots(k))
            }
            _ => self.cache.clone(),
        }
    }

    /// Checks every field
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        if self.top_k == Some(0) {
            return Err(Error::invalid_config("top_k", "use None to disable filtering"));
        }
        Ok(())
    }
}
