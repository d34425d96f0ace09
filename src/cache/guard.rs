//! RAII guards for cache entry access.
//!
//! - [`EntryReadGuard`] - Shared read access (multiple allowed)
//! - [`EntryWriteGuard`] - Exclusive write access
//!
//! Both guards pin the entry and hold its lock for their whole life, and
//! release the lock then unpin when dropped.

use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

use super::CacheEntry;
use crate::common::{Lsn, PageKey, Result};

/// Guard for read-only access to a cached page.
///
/// # Example
/// ```
/// use pagebuf::{BufferPool, BufferPoolConfig, CacheEntry, PageKey};
///
/// let pool = BufferPool::with_system_allocator(
///     BufferPoolConfig::default().with_page_size(4096),
/// ).unwrap();
/// let entry = CacheEntry::new(PageKey::new(1, 0), pool.acquire_raw(true).unwrap());
///
/// {
///     let page = entry.read().unwrap();
///     assert_eq!(page[0], 0);
///     // guard drops here: shared lock released, entry unpinned
/// }
///
/// pool.release(entry.clear_buffer().unwrap().unwrap()).unwrap();
/// ```
pub struct EntryReadGuard<'a> {
    entry: &'a CacheEntry,
    ptr: NonNull<u8>,
    len: usize,
}

impl<'a> EntryReadGuard<'a> {
    /// Wrap an entry the caller has already pinned and share-locked.
    ///
    /// Undoes both if the entry has no buffer.
    pub(crate) fn new(entry: &'a CacheEntry) -> Result<Self> {
        match entry.with_buffer_ptr(|page| (page.as_ptr(), page.len())) {
            Ok((ptr, len)) => Ok(Self { entry, ptr, len }),
            Err(e) => {
                // SAFETY: the caller took this shared lock for the guard.
                unsafe { entry.release_shared() };
                entry.unpin();
                Err(e)
            }
        }
    }

    /// Get the page key.
    #[inline]
    pub fn page_key(&self) -> PageKey {
        self.entry.page_key()
    }

    /// End LSN of the page.
    #[inline]
    pub fn end_lsn(&self) -> Option<Lsn> {
        self.entry.end_lsn()
    }
}

impl Deref for EntryReadGuard<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        // SAFETY: the entry is pinned, so its buffer cannot be detached, and
        // the shared lock keeps writers out.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for EntryReadGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard owns one shared lock, taken before it was built.
        unsafe { self.entry.release_shared() };
        self.entry.unpin();
    }
}

/// Guard for exclusive write access to a cached page.
///
/// Writers record the WAL position of their change with
/// [`EntryWriteGuard::set_end_lsn`] before releasing the page.
///
/// # Example
/// ```
/// use pagebuf::{BufferPool, BufferPoolConfig, CacheEntry, Lsn, PageKey};
///
/// let pool = BufferPool::with_system_allocator(
///     BufferPoolConfig::default().with_page_size(4096),
/// ).unwrap();
/// let entry = CacheEntry::new(PageKey::new(1, 0), pool.acquire_raw(true).unwrap());
///
/// {
///     let mut page = entry.write().unwrap();
///     page[0] = 0xFF;
///     page.set_end_lsn(Lsn::new(0, 128)).unwrap();
/// }
/// assert_eq!(entry.end_lsn(), Some(Lsn::new(0, 128)));
///
/// pool.release(entry.clear_buffer().unwrap().unwrap()).unwrap();
/// ```
pub struct EntryWriteGuard<'a> {
    entry: &'a CacheEntry,
    ptr: NonNull<u8>,
    len: usize,
}

impl<'a> EntryWriteGuard<'a> {
    /// Wrap an entry the caller has already pinned and exclusively locked.
    ///
    /// Undoes both if the entry has no buffer.
    pub(crate) fn new(entry: &'a CacheEntry) -> Result<Self> {
        match entry.with_buffer_ptr(|page| (page.as_ptr(), page.len())) {
            Ok((ptr, len)) => Ok(Self { entry, ptr, len }),
            Err(e) => {
                // SAFETY: the caller took this exclusive lock for the guard.
                unsafe { entry.release_exclusive() };
                entry.unpin();
                Err(e)
            }
        }
    }

    /// Get the page key.
    #[inline]
    pub fn page_key(&self) -> PageKey {
        self.entry.page_key()
    }

    /// Record the WAL position of the change made through this guard.
    ///
    /// # Errors
    /// - `Error::OrderingViolation` if `lsn` is below the current end LSN
    pub fn set_end_lsn(&self, lsn: Lsn) -> Result<()> {
        self.entry.set_end_lsn(lsn)
    }
}

impl Deref for EntryWriteGuard<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        // SAFETY: pinned and exclusively locked; see `EntryReadGuard`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for EntryWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: the exclusive lock makes this the only accessor.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for EntryWriteGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard owns the exclusive lock.
        unsafe { self.entry.release_exclusive() };
        self.entry.unpin();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::common::{BufferPoolConfig, Error};
    use crate::cache::LockState;
    use std::sync::Arc;
    use std::thread;

    fn create_pool() -> BufferPool {
        BufferPool::with_system_allocator(
            BufferPoolConfig::default()
                .with_page_size(4096)
                .with_pool_capacity(4),
        )
        .unwrap()
    }

    fn dispose(pool: &BufferPool, entry: &CacheEntry) {
        if let Some(page) = entry.clear_buffer().unwrap() {
            pool.release(page).unwrap();
        }
    }

    #[test]
    fn test_write_then_read() {
        let pool = create_pool();
        let entry = CacheEntry::new(PageKey::new(3, 1), pool.acquire_raw(true).unwrap());

        {
            let mut guard = entry.write().unwrap();
            assert_eq!(entry.pin_count(), 1);
            assert_eq!(entry.lock_state(), LockState::Exclusive);
            guard[10] = 0x42;
        }
        assert_eq!(entry.pin_count(), 0);
        assert_eq!(entry.lock_state(), LockState::Unlocked);

        {
            let guard = entry.read().unwrap();
            assert_eq!(guard[10], 0x42);
            assert_eq!(guard.len(), 4096);
            assert_eq!(guard.page_key(), PageKey::new(3, 1));
        }

        dispose(&pool, &entry);
    }

    #[test]
    fn test_multiple_read_guards() {
        let pool = create_pool();
        let entry = CacheEntry::new(PageKey::new(0, 0), pool.acquire_raw(true).unwrap());

        let a = entry.read().unwrap();
        let b = entry.try_read().unwrap();
        assert_eq!(entry.pin_count(), 2);
        assert_eq!(entry.lock_state(), LockState::Shared(2));

        assert!(matches!(entry.try_write(), Err(Error::WouldBlock)));
        // A failed try leaves no pin behind.
        assert_eq!(entry.pin_count(), 2);

        drop(a);
        drop(b);
        dispose(&pool, &entry);
    }

    #[test]
    fn test_guard_blocks_eviction() {
        let pool = create_pool();
        let entry = CacheEntry::new(PageKey::new(0, 0), pool.acquire_raw(true).unwrap());

        let guard = entry.read().unwrap();
        assert!(matches!(entry.clear_buffer(), Err(Error::EntryPinned { .. })));
        drop(guard);

        dispose(&pool, &entry);
    }

    #[test]
    fn test_guard_on_detached_entry() {
        let entry = CacheEntry::detached(PageKey::new(9, 9));

        assert!(matches!(entry.read(), Err(Error::BufferDetached(_))));
        assert!(matches!(entry.try_write(), Err(Error::BufferDetached(_))));
        assert_eq!(entry.pin_count(), 0);
        assert_eq!(entry.lock_state(), LockState::Unlocked);
    }

    #[test]
    fn test_write_guard_excludes_second_writer() {
        let pool = create_pool();
        let entry = Arc::new(CacheEntry::new(
            PageKey::new(0, 1),
            pool.acquire_raw(true).unwrap(),
        ));

        let mut guard = entry.write().unwrap();
        guard[0] = 1;

        let other = Arc::clone(&entry);
        let blocked = thread::spawn(move || {
            let write = matches!(other.try_write(), Err(Error::WouldBlock));
            let read = matches!(other.try_read(), Err(Error::WouldBlock));
            other.pin();
            let raw = matches!(other.try_acquire_exclusive(), Err(Error::WouldBlock));
            other.unpin();
            write && read && raw
        })
        .join()
        .unwrap();
        assert!(blocked);

        // Eviction is refused and a stray unpin cannot strip the guard's pin.
        assert!(matches!(entry.clear_buffer(), Err(Error::EntryPinned { .. })));
        let stray = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| entry.unpin()));
        assert!(stray.is_err());

        assert_eq!(guard[0], 1);
        assert_eq!(entry.lock_state(), LockState::Exclusive);
        drop(guard);

        assert_eq!(entry.pin_count(), 0);
        dispose(&pool, &entry);
    }

    #[test]
    fn test_write_guard_end_lsn() {
        let pool = create_pool();
        let entry = CacheEntry::new(PageKey::new(0, 0), pool.acquire_raw(true).unwrap());

        {
            let guard = entry.write().unwrap();
            guard.set_end_lsn(Lsn::new(0, 10)).unwrap();
            assert!(matches!(
                guard.set_end_lsn(Lsn::new(0, 5)),
                Err(Error::OrderingViolation { .. })
            ));
        }
        assert_eq!(entry.read().unwrap().end_lsn(), Some(Lsn::new(0, 10)));

        dispose(&pool, &entry);
    }

    #[test]
    fn test_concurrent_writers_serialize() {
        let pool = create_pool();
        let entry = Arc::new(CacheEntry::new(
            PageKey::new(0, 0),
            pool.acquire_raw(true).unwrap(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let entry = Arc::clone(&entry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let mut guard = entry.write().unwrap();
                        let value = u32::from_le_bytes([guard[0], guard[1], guard[2], guard[3]]);
                        guard[..4].copy_from_slice(&(value + 1).to_le_bytes());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        {
            let guard = entry.read().unwrap();
            assert_eq!(u32::from_le_bytes([guard[0], guard[1], guard[2], guard[3]]), 800);
        }
        dispose(&pool, &entry);
    }
}
