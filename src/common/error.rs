//! Error types for pagebuf.

use thiserror::Error;

use super::{BufferId, Lsn, PageKey};

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All recoverable errors raised by the page buffer layer.
///
/// Contract violations that cannot be repaired (unpinning below zero,
/// releasing a lock that is not held, handing a page to the wrong
/// allocator) are not represented here: they panic at the call site.
#[derive(Debug, Error)]
pub enum Error {
    /// The allocator could not satisfy a request for native memory.
    ///
    /// Fatal to the requesting operation only; the caller decides whether
    /// to retry, degrade or abort.
    #[error("out of native memory while allocating {size} bytes")]
    OutOfMemory { size: usize },

    /// A buffer was released that this pool does not consider outstanding.
    ///
    /// This is always a caller bug: the buffer came from another pool or
    /// its identity was already consumed.
    #[error("{0} is not acquired from this pool")]
    NotAcquired(BufferId),

    /// A cache entry lock is held in a conflicting mode.
    ///
    /// Callers retry, back off or suspend; this never indicates corruption.
    #[error("cache entry lock is contended")]
    WouldBlock,

    /// A WAL position update would move a page's end LSN backwards.
    #[error("end LSN may not move backwards: current {current}, requested {requested}")]
    OrderingViolation { current: Lsn, requested: Lsn },

    /// Buffers are still outstanding at a point where none are expected.
    #[error("{0} pooled buffer(s) were never released")]
    LeakDetected(usize),

    /// The cache entry is pinned and its buffer may not be detached.
    #[error("{page} is pinned ({pin_count} pins) and cannot be cleared")]
    EntryPinned { page: PageKey, pin_count: u32 },

    /// The cache entry is unpinned but its lock is still held.
    ///
    /// Either a lock holder broke the pinning contract, or a new holder
    /// pinned and locked the entry while it was being cleared.
    #[error("{0} is locked and cannot be cleared")]
    EntryLocked(PageKey),

    /// The cache entry no longer has a buffer attached.
    #[error("{0} has no buffer attached")]
    BufferDetached(PageKey),

    /// Configuration values are out of range or unparsable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The process-wide buffer pool has already been created.
    #[error("global buffer pool is already initialized")]
    AlreadyInitialized,
}
