//! Leak tracking diagnostics.

use std::backtrace::Backtrace;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::BufferId;

/// Where an acquisition happened. Captured only when leak tracking is on.
#[derive(Debug, Clone)]
pub(crate) struct AcquireSite {
    pub(crate) location: &'static Location<'static>,
    pub(crate) backtrace: Arc<Backtrace>,
}

impl AcquireSite {
    pub(crate) fn capture(location: &'static Location<'static>) -> Self {
        Self {
            location,
            backtrace: Arc::new(Backtrace::force_capture()),
        }
    }
}

/// Bookkeeping for one outstanding acquisition.
#[derive(Debug)]
pub(crate) struct Acquisition {
    pub(crate) addr: usize,
    pub(crate) acquired_at: Instant,
    pub(crate) site: Option<AcquireSite>,
}

impl Acquisition {
    pub(crate) fn new(addr: usize, site: Option<AcquireSite>) -> Self {
        Self {
            addr,
            acquired_at: Instant::now(),
            site,
        }
    }

    pub(crate) fn report(&self, id: BufferId) -> Option<LeakReport> {
        let site = self.site.as_ref()?;
        Some(LeakReport {
            id,
            location: site.location,
            age: self.acquired_at.elapsed(),
            backtrace: Arc::clone(&site.backtrace),
        })
    }
}

/// An acquisition that was still outstanding when leaks were checked.
#[derive(Debug, Clone)]
pub struct LeakReport {
    /// Identity of the unreleased buffer.
    pub id: BufferId,
    /// Source location of the `acquire` call.
    pub location: &'static Location<'static>,
    /// Time since the buffer was acquired.
    pub age: Duration,
    /// Stack captured at acquisition.
    pub backtrace: Arc<Backtrace>,
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} acquired at {} ({:?} ago) was never released",
            self.id, self.location, self.age
        )
    }
}
