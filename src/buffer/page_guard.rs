//! Pooled page values.
//!
//! - [`RawPage`] - An acquired page without automatic release, for handing
//!   ownership across boundaries (e.g. into a cache entry)
//! - [`PooledPage`] - RAII guard that releases the page when dropped

use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use tracing::error;

use super::pool::BufferPool;
use crate::common::BufferId;
use crate::memory::PageHandle;

/// A page acquired from a [`BufferPool`], owned by the caller.
///
/// The page stays usable by its owner alone until it is passed back to
/// [`BufferPool::release`]. A `RawPage` has no destructor: dropping one
/// without releasing it leaks the memory, which leak tracking reports.
#[must_use = "a raw page must be returned with BufferPool::release"]
pub struct RawPage {
    id: BufferId,
    handle: PageHandle,
}

impl RawPage {
    pub(crate) fn new(id: BufferId, handle: PageHandle) -> Self {
        Self { id, handle }
    }

    pub(crate) fn into_parts(self) -> (BufferId, PageHandle) {
        (self.id, self.handle)
    }

    /// Identity minted for this acquisition.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Page size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.handle.len()
    }

    /// Whether the page has zero length.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handle.is_empty()
    }

    /// Address of the underlying native memory.
    #[inline]
    pub fn addr(&self) -> usize {
        self.handle.addr()
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.handle.as_ptr()
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.handle.as_slice()
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.handle.as_mut_slice()
    }
}

impl fmt::Debug for RawPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawPage")
            .field("id", &self.id)
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len())
            .finish()
    }
}

/// Guard for a page acquired from a [`BufferPool`].
///
/// The page is released back to the pool when the guard is dropped, on
/// error paths included.
///
/// # Example
/// ```
/// use pagebuf::{BufferPool, BufferPoolConfig};
///
/// let pool = BufferPool::with_system_allocator(
///     BufferPoolConfig::default().with_page_size(4096),
/// ).unwrap();
///
/// {
///     let mut page = pool.acquire(true).unwrap();
///     page[0] = 0xAB;
///     // page drops here and returns to the pool
/// }
/// assert_eq!(pool.pool_size(), 1);
/// ```
pub struct PooledPage<'a> {
    /// Reference back to the pool for release on drop.
    pool: &'a BufferPool,
    page: ManuallyDrop<RawPage>,
}

impl<'a> PooledPage<'a> {
    pub(crate) fn new(pool: &'a BufferPool, page: RawPage) -> Self {
        Self {
            pool,
            page: ManuallyDrop::new(page),
        }
    }

    /// Identity minted for this acquisition.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.page.id()
    }

    /// Give up automatic release and take ownership of the raw page.
    pub fn into_raw(self) -> RawPage {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the page is moved out once.
        unsafe { ManuallyDrop::take(&mut this.page) }
    }
}

impl Deref for PooledPage<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.page.as_slice()
    }
}

impl DerefMut for PooledPage<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.page.as_mut_slice()
    }
}

impl Drop for PooledPage<'_> {
    fn drop(&mut self) {
        // SAFETY: drop runs once and the field is not touched afterwards.
        let page = unsafe { ManuallyDrop::take(&mut self.page) };
        let id = page.id();
        if let Err(e) = self.pool.release(page) {
            error!(buffer = %id, error = %e, "pooled_page.drop.release_failed");
        }
    }
}
