//! Buffer Pool - factory and recycler for native pages.
//!
//! The [`BufferPool`] provides:
//! - Page-sized native buffers, reused through a bounded free queue
//! - Identity-based bookkeeping of every outstanding acquisition
//! - Optional leak tracking with allocation sites
//! - An explicit shutdown hook ([`BufferPool::drain`])

use std::panic::Location;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_queue::SegQueue;
use dashmap::{DashMap, DashSet};
use tracing::{debug, error, warn};

use super::leak::{AcquireSite, Acquisition, LeakReport};
use super::{BufferPoolStats, PooledPage, RawPage};
use crate::common::{BufferId, BufferPoolConfig, Error, Result};
use crate::memory::{Allocator, PageHandle, SystemAllocator};

/// The process-wide pool, created once on first use.
static GLOBAL_POOL: OnceLock<BufferPool> = OnceLock::new();

/// Pool of fixed-size native pages.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                        BufferPool                           │
/// │  ┌──────────────────┐        ┌──────────────────────────┐   │
/// │  │   free_queue     │        │      outstanding         │   │
/// │  │ SegQueue<Handle> │        │ BufferId → Acquisition   │   │
/// │  └──────────────────┘        └──────────────────────────┘   │
/// │  ┌──────────────────┐        ┌──────────────────────────┐   │
/// │  │   free_count     │        │       allocator          │   │
/// │  │   AtomicUsize    │        │   Arc<dyn Allocator>     │   │
/// │  └──────────────────┘        └──────────────────────────┘   │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `free_queue`: lock-free MPMC queue
/// - `free_count`: slot reservation counter, advanced by compare-and-swap
/// - `outstanding` / `orphaned`: sharded concurrent maps
/// - `stats`: No lock - all atomic counters
///
/// # Capacity
/// A release reserves a slot in `free_count` before pushing its page, and
/// only while `free_count < capacity`. The free queue therefore never holds
/// more than `capacity` pages, not even transiently. `pool_size()` reads the
/// reservation counter: it may run ahead of the queue by one per in-flight
/// release or acquire, and matches it whenever the pool is quiescent.
///
/// # Usage
/// ```
/// use pagebuf::{BufferPool, BufferPoolConfig};
///
/// let config = BufferPoolConfig::default()
///     .with_page_size(4096)
///     .with_pool_capacity(2);
/// let pool = BufferPool::with_system_allocator(config).unwrap();
///
/// let page = pool.acquire_raw(true).unwrap();
/// assert!(page.as_slice().iter().all(|&b| b == 0));
/// pool.release(page).unwrap();
/// assert_eq!(pool.pool_size(), 1);
///
/// pool.drain();
/// assert_eq!(pool.pool_size(), 0);
/// ```
pub struct BufferPool {
    config: BufferPoolConfig,

    /// Source and sink of native memory.
    allocator: Arc<dyn Allocator>,

    /// Released pages waiting for reuse.
    free_queue: SegQueue<PageHandle>,

    /// Reserved slots in `free_queue`; never exceeds `config.pool_capacity`.
    free_count: AtomicUsize,

    /// Every acquisition not yet released.
    outstanding: DashMap<BufferId, Acquisition>,

    /// Acquisitions outstanding at `drain()`; freed immediately on release.
    orphaned: DashSet<BufferId>,

    stats: BufferPoolStats,
}

impl BufferPool {
    /// Create a pool on top of `allocator`.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if the configuration fails validation
    pub fn new(config: BufferPoolConfig, allocator: Arc<dyn Allocator>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, allocator))
    }

    /// Create a pool on top of the process-wide [`SystemAllocator`].
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if the configuration fails validation
    pub fn with_system_allocator(config: BufferPoolConfig) -> Result<Self> {
        Self::new(config, SystemAllocator::shared())
    }

    fn build(config: BufferPoolConfig, allocator: Arc<dyn Allocator>) -> Self {
        debug!(
            page_size = config.page_size,
            capacity = config.pool_capacity,
            leak_tracking = config.leak_tracking,
            "buffer_pool.new"
        );
        Self {
            config,
            allocator,
            free_queue: SegQueue::new(),
            free_count: AtomicUsize::new(0),
            outstanding: DashMap::new(),
            orphaned: DashSet::new(),
            stats: BufferPoolStats::new(),
        }
    }

    // ========================================================================
    // Process-wide instance
    // ========================================================================

    /// Create the process-wide pool with an explicit configuration.
    ///
    /// Meant to be called once during startup, before anything calls
    /// [`BufferPool::global`].
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if the configuration fails validation
    /// - `Error::AlreadyInitialized` if the global pool already exists
    pub fn init_global(config: BufferPoolConfig) -> Result<&'static BufferPool> {
        config.validate()?;

        let mut created = false;
        let pool = GLOBAL_POOL.get_or_init(|| {
            created = true;
            Self::build(config, SystemAllocator::shared())
        });

        if created {
            Ok(pool)
        } else {
            Err(Error::AlreadyInitialized)
        }
    }

    /// The process-wide pool.
    ///
    /// Lazily created from [`BufferPoolConfig::from_env`] if
    /// [`BufferPool::init_global`] was never called. Concurrent first calls
    /// agree on a single instance.
    pub fn global() -> &'static BufferPool {
        GLOBAL_POOL.get_or_init(|| {
            let config = BufferPoolConfig::from_env().unwrap_or_else(|e| {
                warn!(error = %e, "buffer_pool.global.config_fallback");
                BufferPoolConfig::default()
            });
            Self::build(config, SystemAllocator::shared())
        })
    }

    // ========================================================================
    // Public API: Acquire and release
    // ========================================================================

    /// Acquire a page guarded for automatic release.
    ///
    /// See [`BufferPool::acquire_raw`] for the meaning of `clear`.
    ///
    /// # Errors
    /// - `Error::OutOfMemory` if a new page was needed and allocation failed
    #[track_caller]
    pub fn acquire(&self, clear: bool) -> Result<PooledPage<'_>> {
        let page = self.acquire_raw(clear)?;
        Ok(PooledPage::new(self, page))
    }

    /// Acquire a page the caller must hand back with [`BufferPool::release`].
    ///
    /// Reuses a pooled page when one is available and allocates otherwise.
    /// With `clear` set the page is zero-filled; without it a reused page
    /// keeps whatever its previous owner left in it, which is fine when the
    /// caller overwrites the whole page anyway.
    ///
    /// # Errors
    /// - `Error::OutOfMemory` if a new page was needed and allocation failed
    #[track_caller]
    pub fn acquire_raw(&self, clear: bool) -> Result<RawPage> {
        let mut handle = match self.free_queue.pop() {
            Some(handle) => {
                self.free_count.fetch_sub(1, Ordering::AcqRel);
                BufferPoolStats::bump(&self.stats.reuses);
                handle
            }
            None => {
                let handle = self.allocator.allocate(self.config.page_size)?;
                BufferPoolStats::bump(&self.stats.allocations);
                handle
            }
        };

        if clear {
            handle.fill_zero();
        }

        let id = BufferId::mint();
        let caller = Location::caller();
        let site = self
            .config
            .leak_tracking
            .then(|| AcquireSite::capture(caller));
        self.outstanding
            .insert(id, Acquisition::new(handle.addr(), site));
        BufferPoolStats::bump(&self.stats.acquisitions);

        debug!(buffer = %id, addr = handle.addr(), clear, "buffer_pool.acquire");
        Ok(RawPage::new(id, handle))
    }

    /// Return a page to the pool.
    ///
    /// The page is queued for reuse unless the free queue is at capacity,
    /// in which case it goes straight back to the allocator.
    ///
    /// # Errors
    /// - `Error::NotAcquired` if the page is not outstanding in this pool.
    ///   The page is not ours to free, so its memory is leaked.
    pub fn release(&self, page: RawPage) -> Result<()> {
        let (id, handle) = page.into_parts();

        match self.outstanding.remove(&id) {
            Some((_, acquisition)) => {
                debug_assert_eq!(acquisition.addr, handle.addr(), "{} changed memory", id);
            }
            None if self.orphaned.remove(&id).is_some() => {
                debug!(buffer = %id, "buffer_pool.release.orphan");
                self.deallocate(handle);
                return Ok(());
            }
            None => {
                error!(buffer = %id, addr = handle.addr(), "buffer_pool.release.not_acquired");
                return Err(Error::NotAcquired(id));
            }
        }

        BufferPoolStats::bump(&self.stats.releases);

        if self.reserve_free_slot() {
            debug!(buffer = %id, "buffer_pool.release.pooled");
            self.free_queue.push(handle);
        } else {
            debug!(buffer = %id, capacity = self.config.pool_capacity, "buffer_pool.release.overflow");
            BufferPoolStats::bump(&self.stats.overflow_releases);
            self.deallocate(handle);
        }

        Ok(())
    }

    // ========================================================================
    // Public API: Diagnostics
    // ========================================================================

    /// Report every outstanding acquisition and its allocation site.
    ///
    /// Nothing is removed. Returns an empty list when leak tracking is off,
    /// because no sites were captured; use
    /// [`BufferPool::outstanding_count`] to detect leaks regardless.
    pub fn check_for_leaks(&self) -> Vec<LeakReport> {
        if !self.config.leak_tracking {
            return Vec::new();
        }

        let mut reports: Vec<LeakReport> = self
            .outstanding
            .iter()
            .filter_map(|entry| entry.value().report(*entry.key()))
            .collect();
        reports.sort_by_key(|r| r.id);

        for report in &reports {
            error!(
                buffer = %report.id,
                location = %report.location,
                age_ms = report.age.as_millis() as u64,
                "buffer_pool.leak_detected"
            );
        }
        reports
    }

    /// Fail if any acquisition is outstanding.
    ///
    /// Intended for points where every buffer must have been returned, such
    /// as the end of a test or before [`BufferPool::drain`].
    ///
    /// # Errors
    /// - `Error::LeakDetected` with the number of outstanding acquisitions
    pub fn assert_no_leaks(&self) -> Result<()> {
        let outstanding = self.outstanding.len();
        if outstanding == 0 {
            return Ok(());
        }
        self.check_for_leaks();
        Err(Error::LeakDetected(outstanding))
    }

    // ========================================================================
    // Public API: Shutdown
    // ========================================================================

    /// Free every pooled page and forget outstanding acquisitions.
    ///
    /// Afterwards the pool holds no native memory and no outstanding
    /// mappings. Pages still held by callers are reported (with sites when
    /// tracking is on) and freed as soon as they are released, instead of
    /// being queued. The pool stays usable after draining.
    pub fn drain(&self) {
        let ids: Vec<BufferId> = self.outstanding.iter().map(|e| *e.key()).collect();
        if !ids.is_empty() {
            if self.config.leak_tracking {
                self.check_for_leaks();
            } else {
                warn!(
                    outstanding = ids.len(),
                    "buffer_pool.drain.unreleased_buffers: set PAGEBUF_TRACK_LEAKS=true for allocation sites"
                );
            }
        }
        // Orphan before forgetting, so a concurrent release always finds the
        // id in one of the two maps.
        for id in ids {
            self.orphaned.insert(id);
            if self.outstanding.remove(&id).is_none() {
                self.orphaned.remove(&id);
            }
        }

        let mut freed = 0usize;
        while let Some(handle) = self.free_queue.pop() {
            self.free_count.fetch_sub(1, Ordering::AcqRel);
            self.deallocate(handle);
            freed += 1;
        }

        debug!(freed, orphaned = self.orphaned.len(), "buffer_pool.drain");
    }

    // ========================================================================
    // Public API: Info
    // ========================================================================

    /// Number of free pages held for reuse.
    pub fn pool_size(&self) -> usize {
        self.free_count.load(Ordering::Acquire)
    }

    /// Maximum number of free pages held for reuse.
    pub fn capacity(&self) -> usize {
        self.config.pool_capacity
    }

    /// Size of every page in bytes.
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Whether allocation sites are captured.
    pub fn leak_tracking(&self) -> bool {
        self.config.leak_tracking
    }

    /// Number of acquisitions not yet released.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Number of pages that were outstanding at `drain()` and are still held.
    pub fn orphaned_count(&self) -> usize {
        self.orphaned.len()
    }

    /// Get buffer pool statistics.
    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn reserve_free_slot(&self) -> bool {
        let capacity = self.config.pool_capacity;
        self.free_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok()
    }

    fn deallocate(&self, handle: PageHandle) {
        BufferPoolStats::bump(&self.stats.deallocations);
        self.allocator.deallocate(handle);
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        self.drain();
    }
}
