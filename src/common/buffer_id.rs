//! Buffer identity token.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of buffer identities for the whole process.
///
/// Starts at 1 so that zero never names a live acquisition.
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one acquisition of a pooled page.
///
/// A fresh `BufferId` is minted every time a page leaves a
/// [`BufferPool`](crate::buffer::BufferPool), even when the same native
/// memory is handed out again. Identity is never derived from the bytes in
/// the buffer: two freshly zeroed pages are equal in content but must stay
/// distinguishable.
///
/// # Example
/// ```
/// use pagebuf::BufferId;
///
/// let a = BufferId::mint();
/// let b = BufferId::mint();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl BufferId {
    /// Wrap a raw identity value.
    #[inline]
    pub fn new(id: u64) -> Self {
        BufferId(id)
    }

    /// Mint a process-unique identity.
    #[inline]
    pub fn mint() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer(#{})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_buffer_id_mint_is_unique() {
        let ids: HashSet<BufferId> = (0..1000).map(|_| BufferId::mint()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(!ids.contains(&BufferId::new(0)));
    }

    #[test]
    fn test_buffer_id_mint_concurrent() {
        use std::thread;

        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| (0..500).map(|_| BufferId::mint()).collect::<Vec<_>>()))
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "duplicate {}", id);
            }
        }
        assert_eq!(all.len(), 4000);
    }

    #[test]
    fn test_buffer_id_display() {
        assert_eq!(format!("{}", BufferId::new(42)), "Buffer(#42)");
    }
}
