//! Allocator backed by the global Rust allocator.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use super::{Allocator, PageHandle};
use crate::common::config::PAGE_ALIGNMENT;
use crate::common::{Error, Result};

/// Source of allocator identities, used to reject foreign handles.
static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide allocator used by the global buffer pool.
static SHARED: OnceLock<Arc<SystemAllocator>> = OnceLock::new();

/// [`Allocator`] that obtains aligned regions from the global allocator.
///
/// Regions are aligned to their own size, capped at [`PAGE_ALIGNMENT`], and
/// are zero-initialized when first handed out. The allocator keeps running
/// totals of live pages and bytes so memory consumption can be monitored.
///
/// # Example
/// ```
/// use pagebuf::memory::{Allocator, SystemAllocator};
///
/// let allocator = SystemAllocator::new();
/// let handle = allocator.allocate(4096).unwrap();
/// assert_eq!(handle.len(), 4096);
/// assert_eq!(allocator.live_pages(), 1);
///
/// allocator.deallocate(handle);
/// assert_eq!(allocator.allocated_bytes(), 0);
/// ```
#[derive(Debug)]
pub struct SystemAllocator {
    id: u64,
    live_pages: AtomicUsize,
    allocated_bytes: AtomicUsize,
}

impl SystemAllocator {
    /// Create a new allocator with its own identity.
    pub fn new() -> Self {
        Self {
            id: NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed),
            live_pages: AtomicUsize::new(0),
            allocated_bytes: AtomicUsize::new(0),
        }
    }

    /// The process-wide allocator instance.
    pub fn shared() -> Arc<SystemAllocator> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(SystemAllocator::new())))
    }

    /// Identity stamped on every handle this allocator issues.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of regions currently allocated and not yet freed.
    pub fn live_pages(&self) -> usize {
        self.live_pages.load(Ordering::Acquire)
    }

    /// Total bytes currently allocated and not yet freed.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Acquire)
    }

    fn layout(size: usize) -> Result<Layout> {
        let align = size.next_power_of_two().min(PAGE_ALIGNMENT);
        Layout::from_size_align(size, align).map_err(|_| Error::OutOfMemory { size })
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for SystemAllocator {
    fn allocate(&self, size: usize) -> Result<PageHandle> {
        assert!(size > 0, "zero-sized page allocation");
        let layout = Self::layout(size)?;

        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(Error::OutOfMemory { size })?;

        self.live_pages.fetch_add(1, Ordering::AcqRel);
        self.allocated_bytes.fetch_add(size, Ordering::AcqRel);
        debug!(size, addr = raw as usize, "system_allocator.allocate");

        // SAFETY: freshly allocated, zero-initialized and owned by nobody else.
        Ok(unsafe { PageHandle::from_raw_parts(ptr, size, self.id) })
    }

    fn deallocate(&self, handle: PageHandle) {
        assert_eq!(
            handle.allocator_id(),
            self.id,
            "page handle was not issued by this allocator"
        );
        let size = handle.len();
        let layout = match Self::layout(size) {
            Ok(layout) => layout,
            Err(_) => unreachable!("layout was valid at allocation time"),
        };

        debug!(size, addr = handle.addr(), "system_allocator.deallocate");
        // SAFETY: the handle came from `allocate` on this allocator with the
        // same layout, and ownership guarantees it is freed once.
        unsafe { alloc::dealloc(handle.as_ptr().as_ptr(), layout) };

        self.live_pages.fetch_sub(1, Ordering::AcqRel);
        self.allocated_bytes.fetch_sub(size, Ordering::AcqRel);
    }
}
