//! PageTable - a minimal page cache over cache entries.
//!
//! The [`PageTable`] indexes [`CacheEntry`] values by [`PageKey`] and runs
//! the fetch and eviction paths against a [`BufferPool`]. It has no
//! replacement policy: callers decide what to evict.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, warn};

use super::CacheEntry;
use crate::buffer::BufferPool;
use crate::common::{Error, PageKey, Result};

/// A pinned reference to a cache entry.
///
/// The entry cannot be evicted while this handle exists. Dropping it unpins
/// the entry. The handle borrows its table, so the table (and the buffers
/// it hands back to the pool on drop) outlives every pin it gave out.
///
/// ```compile_fail,E0505
/// use std::sync::Arc;
/// use pagebuf::{BufferPool, BufferPoolConfig, PageKey, PageTable};
///
/// let pool = BufferPool::with_system_allocator(BufferPoolConfig::default()).unwrap();
/// let table = PageTable::new(Arc::new(pool));
/// let entry = table.fetch(PageKey::new(0, 0), |_| {}).unwrap();
/// drop(table);
/// let _ = entry.pin_count();
/// ```
pub struct PinnedEntry<'a> {
    entry: Arc<CacheEntry>,
    _table: PhantomData<&'a PageTable>,
}

impl PinnedEntry<'_> {
    fn new(entry: Arc<CacheEntry>) -> Self {
        entry.pin();
        Self {
            entry,
            _table: PhantomData,
        }
    }
}

impl Deref for PinnedEntry<'_> {
    type Target = CacheEntry;

    #[inline]
    fn deref(&self) -> &CacheEntry {
        &self.entry
    }
}

impl Drop for PinnedEntry<'_> {
    fn drop(&mut self) {
        self.entry.unpin();
    }
}

/// Maps page keys to cache entries backed by pooled buffers.
///
/// # Thread Safety
/// - `entries`: `RwLock` - lookups share, inserts and evictions exclude.
///   Entries are pinned while the table lock is held, so eviction never
///   races a lookup that is about to pin.
///
/// # Usage
/// ```
/// use std::sync::Arc;
/// use pagebuf::{BufferPool, BufferPoolConfig, PageKey, PageTable};
///
/// let pool = Arc::new(BufferPool::with_system_allocator(
///     BufferPoolConfig::default().with_page_size(4096),
/// ).unwrap());
/// let table = PageTable::new(Arc::clone(&pool));
///
/// {
///     let entry = table.fetch(PageKey::new(1, 0), |bytes| bytes[0] = 7).unwrap();
///     assert_eq!(entry.read().unwrap()[0], 7);
/// }
///
/// assert!(table.evict(PageKey::new(1, 0)).unwrap());
/// assert_eq!(pool.pool_size(), 1);
/// ```
pub struct PageTable {
    pool: Arc<BufferPool>,
    entries: RwLock<HashMap<PageKey, Arc<CacheEntry>>>,
}

impl PageTable {
    /// Create an empty table drawing buffers from `pool`.
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The pool buffers are drawn from.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Get the entry for `key`, bringing the page into memory if needed.
    ///
    /// A new page gets a zeroed buffer which `init` fills in before the
    /// entry becomes visible to other threads. `init` runs with the table
    /// locked, so it must not call back into the table.
    ///
    /// # Errors
    /// - `Error::OutOfMemory` if a new buffer could not be allocated
    pub fn fetch<F>(&self, key: PageKey, init: F) -> Result<PinnedEntry<'_>>
    where
        F: FnOnce(&mut [u8]),
    {
        // Fast path: check if page is already cached (read lock only)
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(&key) {
                return Ok(PinnedEntry::new(Arc::clone(entry)));
            }
        }

        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(&key) {
            return Ok(PinnedEntry::new(Arc::clone(entry)));
        }

        let mut page = self.pool.acquire_raw(true)?;
        init(page.as_mut_slice());

        let entry = Arc::new(CacheEntry::new(key, page));
        entries.insert(key, Arc::clone(&entry));
        debug!(page = %key, "page_table.fetch.loaded");

        Ok(PinnedEntry::new(entry))
    }

    /// Get the entry for `key` if it is cached.
    pub fn get(&self, key: PageKey) -> Option<PinnedEntry<'_>> {
        let entries = self.entries.read();
        entries
            .get(&key)
            .map(|entry| PinnedEntry::new(Arc::clone(entry)))
    }

    /// Evict `key`, returning its buffer to the pool.
    ///
    /// Returns `false` if the page was not cached.
    ///
    /// # Errors
    /// - `Error::EntryPinned` if the entry is pinned; it stays cached
    pub fn evict(&self, key: PageKey) -> Result<bool> {
        let mut entries = self.entries.write();
        let entry = match entries.get(&key) {
            Some(entry) => Arc::clone(entry),
            None => return Ok(false),
        };

        let page = entry.clear_buffer()?;
        entries.remove(&key);
        drop(entries);

        if let Some(page) = page {
            self.pool.release(page)?;
        }
        debug!(page = %key, "page_table.evict");
        Ok(true)
    }

    /// Evict every unpinned entry. Returns how many were evicted.
    ///
    /// # Errors
    /// - `Error::NotAcquired` if a buffer does not belong to the pool
    pub fn evict_all(&self) -> Result<usize> {
        let keys: Vec<PageKey> = self.entries.read().keys().copied().collect();

        let mut evicted = 0;
        for key in keys {
            match self.evict(key) {
                Ok(true) => evicted += 1,
                Ok(false) | Err(Error::EntryPinned { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(evicted)
    }

    /// Number of cached pages.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no pages are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Drop for PageTable {
    fn drop(&mut self) {
        for (key, entry) in self.entries.get_mut().drain() {
            match entry.clear_buffer() {
                Ok(Some(page)) => {
                    if let Err(e) = self.pool.release(page) {
                        warn!(page = %key, error = %e, "page_table.drop.release_failed");
                    }
                }
                Ok(None) => {}
                // Only raw pins taken outside this table can still be held.
                Err(e) => error!(page = %key, error = %e, "page_table.drop.pinned"),
            }
        }
    }
}
