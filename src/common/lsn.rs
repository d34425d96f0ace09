//! Log sequence number type.

use std::fmt;

/// Position of a record in the write-ahead log.
///
/// The page buffer layer treats an `Lsn` as an opaque, totally ordered
/// token: it compares positions but never interprets them. Ordering is by
/// segment first, then by position within the segment.
///
/// # Example
/// ```
/// use pagebuf::Lsn;
///
/// assert!(Lsn::new(1, 900) < Lsn::new(2, 0));
/// assert!(Lsn::ZERO < Lsn::new(0, 1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Lsn {
    /// WAL segment number.
    pub segment: u64,
    /// Byte position inside the segment.
    pub position: u64,
}

impl Lsn {
    /// The smallest possible log position.
    pub const ZERO: Lsn = Lsn {
        segment: 0,
        position: 0,
    };

    /// Create a new Lsn.
    #[inline]
    pub fn new(segment: u64, position: u64) -> Self {
        Lsn { segment, position }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lsn({}:{})", self.segment, self.position)
    }
}
