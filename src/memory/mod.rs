//! Native memory - the layer below the buffer pool.
//!
//! # Components
//! - [`Allocator`] - Allocates and frees fixed-size native regions
//! - [`PageHandle`] - Owning handle to one allocated region
//! - [`SystemAllocator`] - [`Allocator`] backed by the global Rust allocator
//!
//! Nothing here pools, zeroes on reuse, or remembers which pages are in
//! use. That is the job of [`BufferPool`](crate::buffer::BufferPool).

mod allocator;
mod system;

pub use allocator::{Allocator, PageHandle};
pub use system::SystemAllocator;
