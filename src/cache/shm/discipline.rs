//! Synchronization disciplines for shared slot regions
//!
//! A region is synchronized by exactly one discipline for its whole life;
//! the discipline tag in the region header makes siblings refuse to open
//! a region built with another.

use crossbeam_utils::Backoff;
use std::mem::MaybeUninit;
use std::sync::atomic::Ordering;

use super::region::Region;
use crate::cache::slot::{Slot, BUSY};
use crate::config::SyncDiscipline;
use crate::error::{Error, Result};
use crate::matrix::Coord;

/// Exclusive access to one slot of a shared region
pub trait SlotDiscipline: Send + Sync + 'static {
    /// The configuration value naming this discipline
    const KIND: SyncDiscipline;

    /// Header tag identifying this discipline
    const TAG: u64;

    /// Prepares discipline state in a freshly created region
    fn init(region: &Region) -> Result<()>;

    /// Tears down discipline state once no sibling touches the region
    fn destroy(region: &Region);

    /// Runs `f` with exclusive access to slot `idx` and publishes its
    /// changes to every sibling
    fn with_slot<R>(region: &Region, idx: usize, f: impl FnOnce(&mut Slot) -> R) -> R;
}

/// Lock-free: claim a slot by swapping its value word for [`BUSY`]
pub struct AtomicSlots;

impl SlotDiscipline for AtomicSlots {
    const KIND: SyncDiscipline = SyncDiscipline::AtomicSlots;
    const TAG: u64 = 1;

    fn init(_region: &Region) -> Result<()> {
        Ok(())
    }

    fn destroy(_region: &Region) {}

    fn with_slot<R>(region: &Region, idx: usize, f: impl FnOnce(&mut Slot) -> R) -> R {
        let shared = &region.slots()[idx];
        let backoff = Backoff::new();
        let value = loop {
            let current = shared.value.load(Ordering::Acquire);
            if current != BUSY
                && shared
                    .value
                    .compare_exchange_weak(current, BUSY, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                break current;
            }
            backoff.snooze();
        };

        let mut slot = Slot {
            key: Coord::new(
                shared.row.load(Ordering::Relaxed),
                shared.col.load(Ordering::Relaxed),
            ),
            value,
        };
        let result = f(&mut slot);
        debug_assert_ne!(slot.value, BUSY);

        shared.row.store(slot.key.row, Ordering::Relaxed);
        shared.col.store(slot.key.col, Ordering::Relaxed);
        shared.value.store(slot.value, Ordering::Release);
        result
    }
}

/// One process-shared mutex per region, held for every slot update
pub struct ProcessMutex;

struct Locked(*mut libc::pthread_mutex_t);

impl Drop for Locked {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.0);
        }
    }
}

fn pthread_err(op: &'static str, region: &Region, rc: libc::c_int) -> Error {
    Error::SharedMemory {
        op,
        name: region.segment().name().to_string(),
        source: std::io::Error::from_raw_os_error(rc),
    }
}

impl SlotDiscipline for ProcessMutex {
    const KIND: SyncDiscipline = SyncDiscipline::ProcessMutex;
    const TAG: u64 = 2;

    fn init(region: &Region) -> Result<()> {
        unsafe {
            let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            let rc = libc::pthread_mutexattr_init(attr.as_mut_ptr());
            if rc != 0 {
                return Err(pthread_err("pthread_mutexattr_init", region, rc));
            }
            let rc = libc::pthread_mutexattr_setpshared(
                attr.as_mut_ptr(),
                libc::PTHREAD_PROCESS_SHARED,
            );
            let rc = if rc == 0 {
                libc::pthread_mutex_init(region.lock_ptr(), attr.as_ptr())
            } else {
                rc
            };
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            if rc != 0 {
                return Err(pthread_err("pthread_mutex_init", region, rc));
            }
        }
        Ok(())
    }

    fn destroy(region: &Region) {
        unsafe {
            libc::pthread_mutex_destroy(region.lock_ptr());
        }
    }

    fn with_slot<R>(region: &Region, idx: usize, f: impl FnOnce(&mut Slot) -> R) -> R {
        let shared = &region.slots()[idx];
        let lock = region.lock_ptr();
        let rc = unsafe { libc::pthread_mutex_lock(lock) };
        assert_eq!(rc, 0, "pthread_mutex_lock failed on {}", region.segment().name());
        let _locked = Locked(lock);

        let mut slot = Slot {
            key: Coord::new(
                shared.row.load(Ordering::Relaxed),
                shared.col.load(Ordering::Relaxed),
            ),
            value: shared.value.load(Ordering::Relaxed),
        };
        let result = f(&mut slot);

        shared.row.store(slot.key.row, Ordering::Relaxed);
        shared.col.store(slot.key.col, Ordering::Relaxed);
        shared.value.store(slot.value, Ordering::Relaxed);
        result
    }
}
