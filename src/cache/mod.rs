//! Page cache entries.
//!
//! # Components
//! - [`CacheEntry`] - A page bound to a pooled buffer, with pins, a lock,
//!   and its end LSN
//! - [`EntryReadGuard`] / [`EntryWriteGuard`] - RAII guards for page access
//! - [`PageTable`] - Indexes entries by page and runs fetch/evict

mod entry;
mod guard;
mod table;

pub use entry::{CacheEntry, LockState};
pub use guard::{EntryReadGuard, EntryWriteGuard};
pub use table::{PageTable, PinnedEntry};
