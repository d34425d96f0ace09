//! Common types and utilities shared across pagebuf.
//!
//! This module contains fundamental primitives used throughout the crate:
//! - Configuration constants and [`BufferPoolConfig`]
//! - Error types
//! - Identifiers ([`PageKey`], [`BufferId`], [`Lsn`])

mod buffer_id;
pub mod config;
pub mod error;
mod lsn;
mod page_key;

pub use buffer_id::BufferId;
pub use config::BufferPoolConfig;
pub use error::{Error, Result};
pub use lsn::Lsn;
pub use page_key::PageKey;
