//! Allocator interface and page handles.

use std::fmt;
use std::ptr::NonNull;
use std::slice;

use crate::common::Result;

/// Raw interface to native memory.
///
/// An allocator hands out regions of exactly the requested size and takes
/// them back. It performs no pooling and no zeroing beyond what the
/// implementation documents.
///
/// # Contract
/// - `allocate` fails with `Error::OutOfMemory` when the request is denied.
/// - `deallocate` must only receive handles issued by the same allocator.
///   Anything else is a fatal usage error and implementations panic.
pub trait Allocator: Send + Sync {
    /// Allocate a region of `size` bytes.
    fn allocate(&self, size: usize) -> Result<PageHandle>;

    /// Return a region to the operating system.
    fn deallocate(&self, handle: PageHandle);
}

/// Owning handle to one native memory region.
///
/// A `PageHandle` is neither `Clone` nor `Copy`: moving it moves ownership of
/// the memory, so a handle cannot be freed twice. Dropping a handle without
/// passing it to [`Allocator::deallocate`] leaks the region.
pub struct PageHandle {
    ptr: NonNull<u8>,
    size: usize,
    allocator_id: u64,
}

// SAFETY: the handle exclusively owns its region; the pointer is not shared
// with any other handle.
unsafe impl Send for PageHandle {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl Sync for PageHandle {}

impl PageHandle {
    /// Build a handle from a raw region.
    ///
    /// # Safety
    /// `ptr` must point to `size` initialized, writable bytes that nothing
    /// else accesses for as long as the handle lives, and `allocator_id` must
    /// identify the allocator that will free them.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, size: usize, allocator_id: u64) -> Self {
        Self {
            ptr,
            size,
            allocator_id,
        }
    }

    /// Start address of the region.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Start address as an integer, for diagnostics.
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Size of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the region has zero length.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Identifier of the allocator that issued this handle.
    #[inline]
    pub fn allocator_id(&self) -> u64 {
        self.allocator_id
    }

    /// Get immutable slice of the region.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: guaranteed by `from_raw_parts`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// Get mutable slice of the region.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: guaranteed by `from_raw_parts`; `&mut self` is exclusive.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }

    /// Zero out the entire region.
    pub fn fill_zero(&mut self) {
        self.as_mut_slice().fill(0);
    }
}

impl fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageHandle")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("size", &self.size)
            .field("allocator_id", &self.allocator_id)
            .finish()
    }
}
