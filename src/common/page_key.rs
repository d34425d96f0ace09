//! Page identity type.

use std::fmt;

/// Identifies a logical database page: the file it lives in plus its index.
///
/// A [`CacheEntry`](crate::cache::CacheEntry) is bound to exactly one
/// `PageKey` for its whole life.
///
/// # Example
/// ```
/// use pagebuf::PageKey;
///
/// let key = PageKey::new(3, 42);
/// assert_eq!(key.file_id, 3);
/// assert_eq!(key.page_index, 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    /// Identifier of the file the page belongs to.
    pub file_id: u64,
    /// Position of the page inside its file, in pages.
    pub page_index: u64,
}

impl PageKey {
    /// Create a new PageKey.
    #[inline]
    pub fn new(file_id: u64, page_index: u64) -> Self {
        PageKey {
            file_id,
            page_index,
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({}:{})", self.file_id, self.page_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_key_new() {
        let key = PageKey::new(1, 42);
        assert_eq!(key.file_id, 1);
        assert_eq!(key.page_index, 42);
    }

    #[test]
    fn test_page_key_ordering() {
        // file first, then page index
        assert!(PageKey::new(1, 9) < PageKey::new(2, 0));
        assert!(PageKey::new(2, 1) < PageKey::new(2, 5));
    }

    #[test]
    fn test_page_key_display() {
        assert_eq!(format!("{}", PageKey::new(7, 42)), "Page(7:42)");
    }
}
