//! pagebuf - Off-heap page buffers for a disk-based storage engine.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            pagebuf                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Page Cache (cache/)                       │   │
//! │  │     CacheEntry: pins + shared/exclusive lock + end LSN   │   │
//! │  │     PageTable: PageKey → CacheEntry, fetch / evict       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓ RawPage                          │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Buffer Pool (buffer/)                     │   │
//! │  │   free queue (bounded) + outstanding map + leak reports  │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓ PageHandle                       │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Native Memory (memory/)                   │   │
//! │  │            Allocator trait + SystemAllocator             │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageKey, BufferId, Lsn, Error, config)
//! - [`memory`] - Native memory allocation
//! - [`buffer`] - Buffer pool, pooled pages and leak tracking
//! - [`cache`] - Cache entries and the page table
//!
//! # Quick Start
//! ```
//! use pagebuf::{BufferPool, BufferPoolConfig, CacheEntry, Lsn, PageKey};
//!
//! let pool = BufferPool::with_system_allocator(
//!     BufferPoolConfig::default().with_page_size(4096).with_pool_capacity(16),
//! ).unwrap();
//!
//! // Bring a page into memory
//! let entry = CacheEntry::new(PageKey::new(1, 0), pool.acquire_raw(true).unwrap());
//!
//! // Modify it under the exclusive lock and stamp the WAL position
//! {
//!     let mut page = entry.write().unwrap();
//!     page[0] = 0xAB;
//!     page.set_end_lsn(Lsn::new(0, 64)).unwrap();
//! }
//!
//! // Evict it and recycle the buffer
//! let buffer = entry.clear_buffer().unwrap().unwrap();
//! pool.release(buffer).unwrap();
//! assert_eq!(pool.pool_size(), 1);
//! ```

pub mod buffer;
pub mod cache;
pub mod common;
pub mod memory;

// Re-export commonly used items at crate root for convenience
pub use common::config::DEFAULT_PAGE_SIZE;
pub use common::{BufferId, BufferPoolConfig, Error, Lsn, PageKey, Result};

pub use buffer::{BufferPool, BufferPoolStats, LeakReport, PooledPage, RawPage, StatsSnapshot};
pub use cache::{CacheEntry, EntryReadGuard, EntryWriteGuard, LockState, PageTable, PinnedEntry};
pub use memory::{Allocator, PageHandle, SystemAllocator};
