//! Integration tests for the buffer pool.
//!
//! These tests drive the pool through its public API against a counting
//! allocator, checking how much native memory is live at each step.

mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;

use common::{create_pool, create_pool_with};
use pagebuf::{BufferPoolConfig, Error};
use proptest::prelude::*;

/// Three releases into a pool of two: the third page goes back to the allocator.
#[test]
fn test_release_beyond_capacity_deallocates() {
    let (pool, allocator) = create_pool(2);

    let pages: Vec<_> = (0..3).map(|_| pool.acquire_raw(true).unwrap()).collect();
    assert_eq!(allocator.allocated(), 3);

    for page in pages {
        pool.release(page).unwrap();
    }

    assert_eq!(pool.pool_size(), 2);
    assert_eq!(allocator.deallocated(), 1);
    assert_eq!(pool.stats().snapshot().overflow_releases, 1);
    assert_eq!(allocator.live(), 2);
}

#[test]
fn test_reacquire_reuses_pooled_pages() {
    let (pool, allocator) = create_pool(4);

    let page = pool.acquire_raw(true).unwrap();
    let addr = page.addr();
    pool.release(page).unwrap();

    let page = pool.acquire_raw(false).unwrap();
    assert_eq!(page.addr(), addr);
    assert_eq!(allocator.allocated(), 1);
    assert_eq!(pool.pool_size(), 0);

    pool.release(page).unwrap();
}

#[test]
fn test_clear_flag() {
    let (pool, _allocator) = create_pool(4);

    let mut page = pool.acquire_raw(true).unwrap();
    page.as_mut_slice().fill(0x5A);
    pool.release(page).unwrap();

    // Not cleared: previous contents survive.
    let mut page = pool.acquire_raw(false).unwrap();
    assert!(page.as_slice().iter().all(|&b| b == 0x5A));
    page.as_mut_slice()[100] = 1;
    pool.release(page).unwrap();

    // Cleared: every byte is zero.
    let page = pool.acquire_raw(true).unwrap();
    assert!(page.as_slice().iter().all(|&b| b == 0));
    pool.release(page).unwrap();
}

#[test]
fn test_page_has_configured_size() {
    let (pool, _allocator) = create_pool_with(
        BufferPoolConfig::default()
            .with_page_size(8192)
            .with_pool_capacity(1),
    );

    let page = pool.acquire(true).unwrap();
    assert_eq!(page.len(), 8192);
    assert_eq!(pool.page_size(), 8192);
}

/// A page from another pool is rejected and leaves this pool untouched.
#[test]
fn test_release_foreign_page() {
    let (pool, allocator) = create_pool(4);
    let (other, _other_allocator) = create_pool(4);

    let foreign = other.acquire_raw(true).unwrap();
    let id = foreign.id();

    match pool.release(foreign) {
        Err(Error::NotAcquired(reported)) => assert_eq!(reported, id),
        other => panic!("expected NotAcquired, got {:?}", other),
    }
    assert_eq!(pool.pool_size(), 0);
    assert_eq!(allocator.deallocated(), 0);
}

#[test]
fn test_out_of_memory_is_recoverable() {
    let (pool, allocator) = create_pool(4);

    allocator.refuse.store(true, Ordering::SeqCst);
    assert!(matches!(
        pool.acquire_raw(true),
        Err(Error::OutOfMemory { size: 4096 })
    ));
    assert_eq!(pool.outstanding_count(), 0);

    allocator.refuse.store(false, Ordering::SeqCst);
    let page = pool.acquire_raw(true).unwrap();
    pool.release(page).unwrap();
}

#[test]
fn test_pooled_page_releases_on_drop() {
    let (pool, allocator) = create_pool(4);

    {
        let mut page = pool.acquire(true).unwrap();
        page[0] = 9;
        assert_eq!(pool.outstanding_count(), 1);
    }

    assert_eq!(pool.outstanding_count(), 0);
    assert_eq!(pool.pool_size(), 1);
    assert_eq!(allocator.live(), 1);
}

#[test]
fn test_leak_report_names_call_site() {
    let (pool, _allocator) = create_pool_with(
        BufferPoolConfig::default()
            .with_page_size(4096)
            .with_leak_tracking(true),
    );

    let leaked = pool.acquire_raw(true).unwrap();
    let line = line!() - 1;

    let reports = pool.check_for_leaks();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].id, leaked.id());
    assert_eq!(reports[0].location.line(), line);
    assert!(reports[0].location.file().ends_with("buffer_pool_test.rs"));
    assert!(reports[0].to_string().contains("was never released"));

    assert!(matches!(pool.assert_no_leaks(), Err(Error::LeakDetected(1))));

    pool.release(leaked).unwrap();
    assert!(pool.check_for_leaks().is_empty());
    assert!(pool.assert_no_leaks().is_ok());
}

#[test]
fn test_leak_tracking_off() {
    let (pool, _allocator) = create_pool(4);

    let page = pool.acquire_raw(true).unwrap();
    assert!(pool.check_for_leaks().is_empty());
    assert!(matches!(pool.assert_no_leaks(), Err(Error::LeakDetected(1))));

    pool.release(page).unwrap();
}

/// Pages held across `drain()` are freed on release instead of pooled.
#[test]
fn test_drain_with_outstanding_pages() {
    let (pool, allocator) = create_pool(4);

    let pooled = pool.acquire_raw(true).unwrap();
    let held = pool.acquire_raw(true).unwrap();
    pool.release(pooled).unwrap();

    pool.drain();
    assert_eq!(pool.pool_size(), 0);
    assert_eq!(pool.outstanding_count(), 0);
    assert_eq!(pool.orphaned_count(), 1);
    assert_eq!(allocator.live(), 1);

    pool.release(held).unwrap();
    assert_eq!(pool.orphaned_count(), 0);
    assert_eq!(pool.pool_size(), 0);
    assert_eq!(allocator.live(), 0);

    // Still usable.
    let page = pool.acquire_raw(true).unwrap();
    pool.release(page).unwrap();
    assert_eq!(pool.pool_size(), 1);
}

/// Releases racing a drain each land in exactly one of the pool's maps:
/// none is rejected and no page outlives the final drain.
#[test]
fn test_drain_races_release() {
    const PAGES: usize = 64;

    for _ in 0..50 {
        let (pool, allocator) = create_pool(PAGES);
        let pool = Arc::new(pool);
        let pages: Vec<_> = (0..PAGES).map(|_| pool.acquire_raw(true).unwrap()).collect();
        let barrier = Arc::new(Barrier::new(2));

        let releaser = {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                pages
                    .into_iter()
                    .map(|page| pool.release(page))
                    .filter(|result| matches!(result, Err(Error::NotAcquired(_))))
                    .count()
            })
        };

        barrier.wait();
        pool.drain();
        assert_eq!(releaser.join().unwrap(), 0);

        // Releases that won the race were pooled; drain those too.
        pool.drain();
        assert_eq!(pool.outstanding_count(), 0);
        assert_eq!(pool.orphaned_count(), 0);
        assert_eq!(pool.pool_size(), 0);
        assert_eq!(allocator.live(), 0);
    }
}

#[test]
fn test_drop_frees_everything() {
    let (pool, allocator) = create_pool(8);

    for _ in 0..5 {
        let page = pool.acquire_raw(true).unwrap();
        pool.release(page).unwrap();
    }
    let pages: Vec<_> = (0..5).map(|_| pool.acquire_raw(false).unwrap()).collect();
    for page in pages {
        pool.release(page).unwrap();
    }
    assert!(allocator.live() > 0);

    drop(pool);
    assert_eq!(allocator.live(), 0);
    assert_eq!(allocator.allocated(), allocator.deallocated());
}

/// Concurrent acquire/release: capacity holds, no page is handed out twice,
/// and every allocation is accounted for.
#[test]
fn test_concurrent_acquire_release() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 500;
    const CAPACITY: usize = 16;

    let (pool, allocator) = create_pool(CAPACITY);
    let pool = Arc::new(pool);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    let mut batch: Vec<_> = (0..(round % 4) + 1)
                        .map(|_| pool.acquire_raw(round % 2 == 0).unwrap())
                        .collect();
                    for page in &mut batch {
                        // Tag the page; a second owner would overwrite it.
                        page.as_mut_slice()[..8].copy_from_slice(&(t as u64).to_le_bytes());
                    }
                    for page in &batch {
                        assert_eq!(&page.as_slice()[..8], &(t as u64).to_le_bytes()[..]);
                    }
                    let addrs: HashSet<usize> = batch.iter().map(|p| p.addr()).collect();
                    assert_eq!(addrs.len(), batch.len());
                    for page in batch {
                        pool.release(page).unwrap();
                    }
                    assert!(pool.pool_size() <= CAPACITY);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(pool.outstanding_count(), 0);
    assert!(pool.pool_size() <= CAPACITY);
    assert_eq!(
        allocator.allocated() - allocator.deallocated(),
        pool.pool_size()
    );
    assert_eq!(allocator.live(), pool.pool_size());
}

#[derive(Debug, Clone)]
enum Op {
    Acquire { clear: bool },
    Release(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(|clear| Op::Acquire { clear }),
        any::<usize>().prop_map(Op::Release),
    ]
}

proptest! {
    /// The pool tracks a simple model: releases fill the free queue up to
    /// capacity, acquisitions drain it before allocating.
    #[test]
    fn prop_pool_size_matches_model(
        capacity in 0usize..6,
        ops in prop::collection::vec(op_strategy(), 1..64),
    ) {
        let (pool, allocator) = create_pool(capacity);
        let mut held = Vec::new();
        let mut free = 0usize;

        for op in ops {
            match op {
                Op::Acquire { clear } => {
                    let page = pool.acquire_raw(clear).unwrap();
                    if clear {
                        prop_assert!(page.as_slice().iter().all(|&b| b == 0));
                    }
                    free = free.saturating_sub(1);
                    held.push(page);
                }
                Op::Release(i) if !held.is_empty() => {
                    let page = held.swap_remove(i % held.len());
                    pool.release(page).unwrap();
                    free = (free + 1).min(capacity);
                }
                Op::Release(_) => {}
            }

            prop_assert_eq!(pool.pool_size(), free);
            prop_assert_eq!(pool.outstanding_count(), held.len());
            prop_assert_eq!(allocator.live(), free + held.len());
        }

        for page in held {
            pool.release(page).unwrap();
        }
        pool.drain();
        prop_assert_eq!(allocator.live(), 0);
    }
}
