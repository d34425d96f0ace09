//! Buffer pool management.
//!
//! The buffer pool sits between the native allocator and the page cache.
//! It hands out page-sized buffers, takes them back for reuse up to a fixed
//! capacity, and remembers which acquisitions are still outstanding.
//!
//! # Components
//! - [`BufferPool`] - The page factory and recycler
//! - [`PooledPage`] - RAII guard that releases its page on drop
//! - [`RawPage`] - An acquired page with manual release
//! - [`LeakReport`] - An unreleased acquisition found by leak tracking
//! - [`BufferPoolStats`] - Performance statistics

mod leak;
mod page_guard;
mod pool;
mod stats;

pub use leak::LeakReport;
pub use page_guard::{PooledPage, RawPage};
pub use pool::BufferPool;
pub use stats::{BufferPoolStats, StatsSnapshot};
