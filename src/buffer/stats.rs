//! Buffer pool statistics tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics tracked by the buffer pool.
///
/// All fields are atomic for lock-free, thread-safe updates.
///
/// # Memory Ordering
/// We use `Ordering::Relaxed` for all operations because:
/// - We only need atomicity (no partial updates)
/// - We don't need synchronization between different counters
/// - Statistics are "eventually consistent" - exact ordering doesn't matter
///
/// Capacity enforcement never reads these counters; it uses the pool's own
/// free count.
///
/// # Example
/// ```
/// use pagebuf::BufferPoolStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = BufferPoolStats::new();
/// stats.reuses.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.reuses.load(Ordering::Relaxed), 1);
/// ```
#[derive(Debug)]
pub struct BufferPoolStats {
    /// Number of pages handed out.
    pub acquisitions: AtomicU64,

    /// Number of acquisitions served from the free queue.
    pub reuses: AtomicU64,

    /// Number of pages obtained from the allocator.
    pub allocations: AtomicU64,

    /// Number of pages returned to the pool.
    pub releases: AtomicU64,

    /// Number of pages handed back to the allocator.
    pub deallocations: AtomicU64,

    /// Releases that found the free queue at capacity.
    pub overflow_releases: AtomicU64,
}

impl BufferPoolStats {
    /// Create a new stats tracker with all counters at zero.
    pub fn new() -> Self {
        Self {
            acquisitions: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
            overflow_releases: AtomicU64::new(0),
        }
    }

    /// Fraction of acquisitions served without touching the allocator.
    pub fn reuse_rate(&self) -> f64 {
        self.snapshot().reuse_rate()
    }

    /// Get a snapshot of current statistics.
    ///
    /// This returns a non-atomic copy for display/logging.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            overflow_releases: self.overflow_releases.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.acquisitions.store(0, Ordering::Relaxed);
        self.reuses.store(0, Ordering::Relaxed);
        self.allocations.store(0, Ordering::Relaxed);
        self.releases.store(0, Ordering::Relaxed);
        self.deallocations.store(0, Ordering::Relaxed);
        self.overflow_releases.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for BufferPoolStats {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of buffer pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub acquisitions: u64,
    pub reuses: u64,
    pub allocations: u64,
    pub releases: u64,
    pub deallocations: u64,
    pub overflow_releases: u64,
}

impl StatsSnapshot {
    /// Fraction of acquisitions served from the free queue (0.0 to 1.0).
    pub fn reuse_rate(&self) -> f64 {
        let total = self.reuses + self.allocations;
        if total == 0 {
            0.0
        } else {
            self.reuses as f64 / total as f64
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ acquired: {}, allocated: {}, freed: {}, overflow: {}, reuse_rate: {:.2}% }}",
            self.acquisitions,
            self.allocations,
            self.deallocations,
            self.overflow_releases,
            self.reuse_rate() * 100.0
        )
    }
}
