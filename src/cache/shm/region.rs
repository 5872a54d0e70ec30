//! POSIX shared-memory segments and the slot-region layout inside them

use std::ffi::CString;
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::slot::EMPTY;
use crate::error::{Error, Result};

/// A named, memory-mapped shared-memory object.
///
/// The creating side unlinks the name on drop unless it already did so;
/// every side unmaps.
pub struct ShmSegment {
    name: String,
    ptr: NonNull<u8>,
    len: usize,
    owner: bool,
    linked: bool,
}

// The mapping is process-shared memory; all access goes through atomics
// or a process-shared mutex.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

fn c_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| Error::invalid_config("shm_prefix", "contains NUL"))
}

fn fail(op: &'static str, name: &str) -> Error {
    let err = Error::last_os(op, name);
    tracing::warn!(%err, "shared memory setup failed");
    err
}

unsafe fn map(fd: libc::c_int, len: usize, name: &str) -> Result<NonNull<u8>> {
    let ptr = libc::mmap(
        ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_SHARED,
        fd,
        0,
    );
    if ptr == libc::MAP_FAILED {
        return Err(fail("mmap", name));
    }
    NonNull::new(ptr as *mut u8).ok_or_else(|| fail("mmap", name))
}

impl ShmSegment {
    /// Creates `name` exclusively, sizes it to `len` bytes and maps it
    pub fn create(name: &str, len: usize) -> Result<Self> {
        let c = c_name(name)?;
        unsafe {
            let fd = libc::shm_open(
                c.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::c_uint,
            );
            if fd < 0 {
                return Err(fail("shm_open", name));
            }
            let sized = libc::ftruncate(fd, len as libc::off_t) == 0;
            let mapped = if sized {
                map(fd, len, name)
            } else {
                Err(fail("ftruncate", name))
            };
            libc::close(fd);
            match mapped {
                Ok(ptr) => Ok(Self {
                    name: name.to_string(),
                    ptr,
                    len,
                    owner: true,
                    linked: true,
                }),
                Err(e) => {
                    libc::shm_unlink(c.as_ptr());
                    Err(e)
                }
            }
        }
    }

    /// Opens and maps an existing object of at least `len` bytes
    pub fn open(name: &str, len: usize) -> Result<Self> {
        let c = c_name(name)?;
        unsafe {
            let fd = libc::shm_open(c.as_ptr(), libc::O_RDWR, 0 as libc::c_uint);
            if fd < 0 {
                return Err(fail("shm_open", name));
            }
            let mut st: libc::stat = std::mem::zeroed();
            if libc::fstat(fd, &mut st) != 0 {
                let err = fail("fstat", name);
                libc::close(fd);
                return Err(err);
            }
            if (st.st_size as u64) < len as u64 {
                libc::close(fd);
                return Err(Error::RegionMismatch {
                    name: name.to_string(),
                    reason: format!("{} bytes, expected {}", st.st_size, len),
                });
            }
            let mapped = map(fd, len, name);
            libc::close(fd);
            Ok(Self {
                name: name.to_string(),
                ptr: mapped?,
                len,
                owner: false,
                linked: true,
            })
        }
    }

    /// Removes the name. Existing mappings stay valid.
    pub fn unlink(&mut self) -> Result<()> {
        if !self.linked {
            return Ok(());
        }
        let c = c_name(&self.name)?;
        if unsafe { libc::shm_unlink(c.as_ptr()) } != 0 {
            return Err(fail("shm_unlink", &self.name));
        }
        self.linked = false;
        Ok(())
    }

    /// Object name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start of the mapping
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is zero-length
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
        if self.owner && self.linked {
            let _ = self.unlink();
        }
    }
}

const MAGIC: u64 = 0x5343_4f4f_5245_4731;

/// Fixed header at offset 0 of every region
#[repr(C)]
pub struct RegionHeader {
    magic: u64,
    discipline: u64,
    slots: u64,
    /// Process-shared lock, initialized only by the mutex discipline
    pub lock: libc::pthread_mutex_t,
}

/// Slot as laid out in shared memory, field for field a
/// [`Slot`](crate::cache::Slot)
#[repr(C)]
pub struct SharedSlot {
    /// Resident row
    pub row: AtomicU64,
    /// Resident column
    pub col: AtomicU64,
    /// Accumulated value or a sentinel
    pub value: AtomicU64,
}

const fn slots_offset() -> usize {
    (size_of::<RegionHeader>() + 63) & !63
}

/// Bytes needed for a region of `n_slots`
pub fn region_len(n_slots: usize) -> Result<usize> {
    n_slots
        .checked_mul(size_of::<SharedSlot>())
        .and_then(|b| b.checked_add(slots_offset()))
        .ok_or_else(|| Error::invalid_config("slots", "region size overflows"))
}

/// One rank's slot table in shared memory
pub struct Region {
    segment: ShmSegment,
    n_slots: usize,
}

impl Region {
    /// Creates the calling rank's region and writes its header
    pub fn create(name: &str, n_slots: usize, discipline: u64) -> Result<Self> {
        let segment = ShmSegment::create(name, region_len(n_slots)?)?;
        let header = segment.as_ptr() as *mut RegionHeader;
        unsafe {
            ptr::addr_of_mut!((*header).magic).write(MAGIC);
            ptr::addr_of_mut!((*header).discipline).write(discipline);
            ptr::addr_of_mut!((*header).slots).write(n_slots as u64);
        }
        Ok(Self { segment, n_slots })
    }

    /// Opens a sibling's region, checking it was built the same way
    pub fn open(name: &str, n_slots: usize, discipline: u64) -> Result<Self> {
        let segment = ShmSegment::open(name, region_len(n_slots)?)?;
        let header = segment.as_ptr() as *const RegionHeader;
        let (magic, tag, slots) = unsafe {
            (
                ptr::addr_of!((*header).magic).read(),
                ptr::addr_of!((*header).discipline).read(),
                ptr::addr_of!((*header).slots).read(),
            )
        };
        let mismatch = |reason: String| Error::RegionMismatch {
            name: name.to_string(),
            reason,
        };
        if magic != MAGIC {
            return Err(mismatch("not a slot region".to_string()));
        }
        if tag != discipline {
            return Err(mismatch(format!(
                "synchronized with discipline {}, expected {}",
                tag, discipline
            )));
        }
        if slots != n_slots as u64 {
            return Err(mismatch(format!("{} slots, expected {}", slots, n_slots)));
        }
        Ok(Self { segment, n_slots })
    }

    /// Underlying segment
    pub fn segment(&self) -> &ShmSegment {
        &self.segment
    }

    /// Removes the region's name once every sibling has it mapped
    pub fn unlink(&mut self) -> Result<()> {
        self.segment.unlink()
    }

    /// The embedded process-shared lock
    pub fn lock_ptr(&self) -> *mut libc::pthread_mutex_t {
        let header = self.segment.as_ptr() as *mut RegionHeader;
        unsafe { ptr::addr_of_mut!((*header).lock) }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.n_slots
    }

    /// Whether the region has no slots
    pub fn is_empty(&self) -> bool {
        self.n_slots == 0
    }

    /// The slot table
    pub fn slots(&self) -> &[SharedSlot] {
        unsafe {
            let first = self.segment.as_ptr().add(slots_offset()) as *const SharedSlot;
            std::slice::from_raw_parts(first, self.n_slots)
        }
    }

    /// Stamps every slot vacant. Fresh pages are zero, which reads as an
    /// occupied slot.
    pub fn stamp_vacant(&self) {
        for slot in self.slots() {
            slot.row.store(0, Ordering::Relaxed);
            slot.col.store(0, Ordering::Relaxed);
            slot.value.store(EMPTY, Ordering::Release);
        }
    }
}
