//! CacheEntry - a page bound to a pooled buffer.
//!
//! A [`CacheEntry`] holds a pooled buffer plus the metadata the page cache
//! needs to manage it:
//! - Which page it represents (immutable)
//! - Pin count for reference counting
//! - A shared/exclusive lock over the page bytes
//! - The end LSN of the last WAL record applied to the page

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::lock_api::RawRwLock as _;
use parking_lot::{Mutex, RawRwLock};
use tracing::error;

use super::guard::{EntryReadGuard, EntryWriteGuard};
use crate::buffer::RawPage;
use crate::common::{Error, Lsn, PageKey, Result};

/// Source of execution context identities. Zero means "no owner".
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CONTEXT_ID: Cell<u64> = const { Cell::new(0) };
}

/// Identity of the calling thread, for lock-ownership diagnostics.
fn current_context() -> u64 {
    CONTEXT_ID.with(|id| {
        if id.get() == 0 {
            id.set(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        }
        id.get()
    })
}

/// Observable state of a cache entry's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    /// Held by this many shared holders.
    Shared(u32),
    Exclusive,
}

/// A page cached in memory.
///
/// # Invariants
/// - An entry may only be evicted (its buffer cleared) while `pin_count == 0`.
/// - A locked entry is pinned: locking requires `pin_count >= 1`.
/// - An entry without a buffer is unlocked and unpinned.
/// - `end_lsn` never moves backwards while the buffer is attached.
///
/// # Thread Safety
/// - `latch`: raw reader/writer lock, so acquire and release can happen in
///   different scopes (or threads)
/// - `pin_count`: `AtomicU32` for lock-free reference counting
/// - `buffer` / `end_lsn`: `Mutex` for short, uncontended updates
///
/// Guards pin before they look at the buffer, and [`CacheEntry::clear_buffer`]
/// checks the pin count while holding the buffer, so a guard either finds
/// the buffer pinned in place or fails with `Error::BufferDetached`. Raw
/// `pin()` callers get no such check; the owning cache serializes eviction
/// against its own lookups, as [`PageTable`](super::PageTable) does.
pub struct CacheEntry {
    page_key: PageKey,

    /// The pooled buffer, or None once evicted.
    buffer: Mutex<Option<RawPage>>,

    /// Number of active references to this entry.
    pin_count: AtomicU32,

    latch: RawRwLock,

    /// Number of shared lock holders, mirrored for `lock_state()`.
    shared_holders: AtomicU32,

    /// Context holding the exclusive lock, or 0.
    exclusive_owner: AtomicU64,

    /// LSN of the most recent WAL record reflected in the buffer.
    end_lsn: Mutex<Option<Lsn>>,
}

impl CacheEntry {
    /// Create an entry for `page_key` backed by `buffer`.
    pub fn new(page_key: PageKey, buffer: RawPage) -> Self {
        Self::with_buffer(page_key, Some(buffer))
    }

    /// Create an entry with no buffer attached.
    pub fn detached(page_key: PageKey) -> Self {
        Self::with_buffer(page_key, None)
    }

    fn with_buffer(page_key: PageKey, buffer: Option<RawPage>) -> Self {
        Self {
            page_key,
            buffer: Mutex::new(buffer),
            pin_count: AtomicU32::new(0),
            latch: RawRwLock::INIT,
            shared_holders: AtomicU32::new(0),
            exclusive_owner: AtomicU64::new(0),
            end_lsn: Mutex::new(None),
        }
    }

    /// The page this entry represents.
    #[inline]
    pub fn page_key(&self) -> PageKey {
        self.page_key
    }

    // ========================================================================
    // Pin count operations (Atomic)
    // ========================================================================

    /// Increment the pin count. Returns the new pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the pin count. Returns the new pin count.
    ///
    /// # Panics
    /// Panics if pin count is already 0, or if this is the last pin and the
    /// entry is still locked. The pin count is left unchanged in both cases.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self
            .pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match n {
                0 => None,
                1 if self.latch.is_locked() => None,
                n => Some(n - 1),
            })
            .unwrap_or_else(|n| {
                if n == 0 {
                    panic!("pin count underflow on {}", self.page_key)
                }
                panic!("{} unpinned while locked", self.page_key)
            });
        old - 1
    }

    /// Get the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Check if the entry is currently pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Check if the entry can be evicted.
    #[inline]
    pub fn is_evictable(&self) -> bool {
        self.has_buffer() && !self.is_pinned()
    }

    // ========================================================================
    // Lock operations
    // ========================================================================

    /// Take a shared lock without waiting.
    ///
    /// # Errors
    /// - `Error::WouldBlock` if the lock is held (or requested) exclusively
    ///
    /// # Panics
    /// Panics if the entry is not pinned.
    pub fn try_acquire_shared(&self) -> Result<()> {
        self.assert_pinned_for_lock();
        if !self.latch.try_lock_shared() {
            return Err(Error::WouldBlock);
        }
        self.shared_holders.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Take a shared lock, blocking while an exclusive holder is active.
    ///
    /// # Panics
    /// Panics if the entry is not pinned.
    pub fn acquire_shared(&self) {
        self.assert_pinned_for_lock();
        self.latch.lock_shared();
        self.shared_holders.fetch_add(1, Ordering::AcqRel);
    }

    /// Release one shared lock.
    ///
    /// # Safety
    /// The caller must hold a shared lock it took with
    /// [`CacheEntry::acquire_shared`] or [`CacheEntry::try_acquire_shared`],
    /// and no [`EntryReadGuard`] may own that lock. Releasing a lock some
    /// other holder relies on lets a writer in while that holder still
    /// reads the page.
    ///
    /// ```compile_fail,E0133
    /// # use pagebuf::{CacheEntry, PageKey};
    /// let entry = CacheEntry::detached(PageKey::new(0, 0));
    /// entry.release_shared();
    /// ```
    ///
    /// # Panics
    /// Panics if no shared lock is held.
    pub unsafe fn release_shared(&self) {
        self.shared_holders
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or_else(|_| panic!("release_shared on {} without a shared lock", self.page_key));
        // SAFETY: the caller holds a shared lock; the counter check above
        // catches releases with no holder at all.
        unsafe { self.latch.unlock_shared() };
    }

    /// Take the exclusive lock without waiting.
    ///
    /// # Errors
    /// - `Error::WouldBlock` unless the entry is unlocked
    ///
    /// # Panics
    /// Panics if the entry is not pinned.
    pub fn try_acquire_exclusive(&self) -> Result<()> {
        self.assert_pinned_for_lock();
        if !self.latch.try_lock_exclusive() {
            return Err(Error::WouldBlock);
        }
        self.exclusive_owner
            .store(current_context(), Ordering::Release);
        Ok(())
    }

    /// Take the exclusive lock, blocking until all holders are gone.
    ///
    /// # Panics
    /// Panics if the entry is not pinned.
    pub fn acquire_exclusive(&self) {
        self.assert_pinned_for_lock();
        self.latch.lock_exclusive();
        self.exclusive_owner
            .store(current_context(), Ordering::Release);
    }

    /// Release the exclusive lock.
    ///
    /// May be called from a different thread than the one that acquired it.
    ///
    /// # Safety
    /// The caller must hold the exclusive lock, taken with
    /// [`CacheEntry::acquire_exclusive`] or
    /// [`CacheEntry::try_acquire_exclusive`], and no [`EntryWriteGuard`] may
    /// own it. Releasing a guard's lock admits a second writer to the page.
    ///
    /// ```compile_fail,E0133
    /// # use pagebuf::{CacheEntry, PageKey};
    /// let entry = CacheEntry::detached(PageKey::new(0, 0));
    /// entry.release_exclusive();
    /// ```
    ///
    /// # Panics
    /// Panics if the exclusive lock is not held.
    pub unsafe fn release_exclusive(&self) {
        let owner = self.exclusive_owner.swap(0, Ordering::AcqRel);
        assert!(
            owner != 0,
            "release_exclusive on {} without the exclusive lock",
            self.page_key
        );
        // SAFETY: the caller holds the exclusive lock, and `owner != 0`
        // confirms it is held.
        unsafe { self.latch.unlock_exclusive() };
    }

    /// Current lock state. Racy under contention; meant for diagnostics.
    ///
    /// The holder counters are updated after the latch is taken, so this
    /// may briefly read `Unlocked` for a lock that was just acquired.
    pub fn lock_state(&self) -> LockState {
        if self.exclusive_owner.load(Ordering::Acquire) != 0 {
            return LockState::Exclusive;
        }
        match self.shared_holders.load(Ordering::Acquire) {
            0 => LockState::Unlocked,
            n => LockState::Shared(n),
        }
    }

    /// Whether the calling thread holds the exclusive lock.
    ///
    /// Diagnostic only: use it in assertions, never for control flow.
    pub fn is_locked_by_current_execution_context(&self) -> bool {
        self.exclusive_owner.load(Ordering::Acquire) == current_context()
    }

    fn assert_pinned_for_lock(&self) {
        assert!(
            self.is_pinned(),
            "{} must be pinned before it is locked",
            self.page_key
        );
    }

    // ========================================================================
    // Guards
    // ========================================================================

    /// Pin and share-lock the entry, blocking on an exclusive holder.
    ///
    /// # Errors
    /// - `Error::BufferDetached` if the entry has no buffer
    pub fn read(&self) -> Result<EntryReadGuard<'_>> {
        self.pin();
        self.acquire_shared();
        EntryReadGuard::new(self)
    }

    /// Pin and share-lock the entry without waiting.
    ///
    /// # Errors
    /// - `Error::WouldBlock` if the entry is exclusively locked
    /// - `Error::BufferDetached` if the entry has no buffer
    pub fn try_read(&self) -> Result<EntryReadGuard<'_>> {
        self.pin();
        if let Err(e) = self.try_acquire_shared() {
            self.unpin();
            return Err(e);
        }
        EntryReadGuard::new(self)
    }

    /// Pin and exclusively lock the entry, blocking on any holder.
    ///
    /// # Errors
    /// - `Error::BufferDetached` if the entry has no buffer
    pub fn write(&self) -> Result<EntryWriteGuard<'_>> {
        self.pin();
        self.acquire_exclusive();
        EntryWriteGuard::new(self)
    }

    /// Pin and exclusively lock the entry without waiting.
    ///
    /// # Errors
    /// - `Error::WouldBlock` unless the entry is unlocked
    /// - `Error::BufferDetached` if the entry has no buffer
    pub fn try_write(&self) -> Result<EntryWriteGuard<'_>> {
        self.pin();
        if let Err(e) = self.try_acquire_exclusive() {
            self.unpin();
            return Err(e);
        }
        EntryWriteGuard::new(self)
    }

    // ========================================================================
    // WAL position
    // ========================================================================

    /// LSN of the last WAL record applied to this page, if any.
    pub fn end_lsn(&self) -> Option<Lsn> {
        *self.end_lsn.lock()
    }

    /// Record that the WAL record at `lsn` is reflected in the buffer.
    ///
    /// # Errors
    /// - `Error::OrderingViolation` if `lsn` is below the current end LSN.
    ///   The value is never clamped.
    pub fn set_end_lsn(&self, lsn: Lsn) -> Result<()> {
        let mut end_lsn = self.end_lsn.lock();
        if let Some(current) = *end_lsn {
            if lsn < current {
                error!(
                    page = %self.page_key,
                    current = %current,
                    requested = %lsn,
                    "cache_entry.set_end_lsn.ordering_violation"
                );
                return Err(Error::OrderingViolation {
                    current,
                    requested: lsn,
                });
            }
        }
        *end_lsn = Some(lsn);
        Ok(())
    }

    // ========================================================================
    // Buffer management
    // ========================================================================

    /// Whether a buffer is attached.
    pub fn has_buffer(&self) -> bool {
        self.buffer.lock().is_some()
    }

    /// Detach the buffer so the caller can return it to its pool.
    ///
    /// Resets the end LSN so the entry can later be given a fresh buffer.
    /// Returns `None` if no buffer was attached.
    ///
    /// # Errors
    /// - `Error::EntryPinned` if the entry is pinned
    /// - `Error::EntryLocked` if the entry is unpinned but still locked
    pub fn clear_buffer(&self) -> Result<Option<RawPage>> {
        let mut buffer = self.buffer.lock();
        self.ensure_unpinned()?;
        if self.latch.is_locked() {
            error!(page = %self.page_key, "cache_entry.clear_buffer.locked");
            return Err(Error::EntryLocked(self.page_key));
        }

        let page = buffer.take();
        *self.end_lsn.lock() = None;
        Ok(page)
    }

    /// Attach a buffer to an entry, returning the one it replaces.
    ///
    /// The end LSN starts over: nothing is known about the new contents.
    ///
    /// # Panics
    /// Panics if the entry is pinned or locked: holders may be reading the
    /// current buffer.
    pub fn set_buffer(&self, page: RawPage) -> Option<RawPage> {
        let mut buffer = self.buffer.lock();
        assert!(
            !self.is_pinned() && !self.latch.is_locked(),
            "{} is pinned and its buffer cannot be replaced",
            self.page_key
        );

        let previous = buffer.replace(page);
        *self.end_lsn.lock() = None;
        previous
    }

    /// Run `f` with the attached buffer.
    pub(crate) fn with_buffer_ptr<T>(&self, f: impl FnOnce(&RawPage) -> T) -> Result<T> {
        let buffer = self.buffer.lock();
        match buffer.as_ref() {
            Some(page) => Ok(f(page)),
            None => Err(Error::BufferDetached(self.page_key)),
        }
    }

    fn ensure_unpinned(&self) -> Result<()> {
        let pin_count = self.pin_count();
        if pin_count > 0 {
            return Err(Error::EntryPinned {
                page: self.page_key,
                pin_count,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("page_key", &self.page_key)
            .field("has_buffer", &self.has_buffer())
            .field("pin_count", &self.pin_count())
            .field("lock_state", &self.lock_state())
            .field("end_lsn", &self.end_lsn())
            .finish()
    }
}
