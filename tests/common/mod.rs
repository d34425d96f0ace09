//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use pagebuf::memory::{Allocator, PageHandle, SystemAllocator};
use pagebuf::{BufferPool, BufferPoolConfig, Error, Result};
use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber once per test binary.
///
/// `RUST_LOG=pagebuf=debug` shows every acquire and release.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pagebuf=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

/// Allocator that counts calls and can be told to refuse.
#[derive(Default)]
pub struct CountingAllocator {
    inner: SystemAllocator,
    pub allocated: AtomicUsize,
    pub deallocated: AtomicUsize,
    pub refuse: AtomicBool,
}

impl CountingAllocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn deallocated(&self) -> usize {
        self.deallocated.load(Ordering::SeqCst)
    }

    /// Pages currently held by the pool or its callers.
    pub fn live(&self) -> usize {
        self.inner.live_pages()
    }
}

impl Allocator for CountingAllocator {
    fn allocate(&self, size: usize) -> Result<PageHandle> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::OutOfMemory { size });
        }
        let handle = self.inner.allocate(size)?;
        self.allocated.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    fn deallocate(&self, handle: PageHandle) {
        self.deallocated.fetch_add(1, Ordering::SeqCst);
        self.inner.deallocate(handle);
    }
}

/// Pool with small pages over a fresh counting allocator.
pub fn create_pool(capacity: usize) -> (BufferPool, Arc<CountingAllocator>) {
    create_pool_with(
        BufferPoolConfig::default()
            .with_page_size(4096)
            .with_pool_capacity(capacity),
    )
}

pub fn create_pool_with(config: BufferPoolConfig) -> (BufferPool, Arc<CountingAllocator>) {
    init_tracing();
    let allocator = CountingAllocator::new();
    let pool = BufferPool::new(config, allocator.clone()).unwrap();
    (pool, allocator)
}
