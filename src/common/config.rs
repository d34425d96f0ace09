//! Configuration for pagebuf.

use super::error::{Error, Result};

/// Default size of a pooled page in bytes (64KB).
///
/// Matches the storage engine's default disk cache page size, which is
/// configured in kilobytes.
pub const DEFAULT_PAGE_SIZE: usize = 64 * 1024;

/// Default number of free pages a pool keeps for reuse.
///
/// With the default page size this retains at most 64MB of idle memory.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Largest alignment requested from the system allocator.
///
/// Pages are aligned to 4096 bytes (or their own size, if smaller) so they
/// can be handed to Direct I/O (O_DIRECT) without copying.
pub const PAGE_ALIGNMENT: usize = 4096;

/// Smallest page size accepted by [`BufferPoolConfig::validate`].
pub const MIN_PAGE_SIZE: usize = 8;

/// Page size in kilobytes.
pub const ENV_PAGE_SIZE_KB: &str = "PAGEBUF_PAGE_SIZE_KB";

/// Maximum number of free pages kept in the pool.
pub const ENV_POOL_LIMIT: &str = "PAGEBUF_POOL_LIMIT";

/// Enables allocation-site capture for leak reports.
pub const ENV_TRACK_LEAKS: &str = "PAGEBUF_TRACK_LEAKS";

/// Settings a [`BufferPool`](crate::buffer::BufferPool) is sized with.
///
/// # Example
/// ```
/// use pagebuf::BufferPoolConfig;
///
/// let config = BufferPoolConfig::default()
///     .with_page_size(8192)
///     .with_pool_capacity(16)
///     .with_leak_tracking(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Size of every page handed out by the pool, in bytes.
    pub page_size: usize,
    /// Maximum number of released pages kept for reuse.
    pub pool_capacity: usize,
    /// Capture the allocation site of every acquisition.
    pub leak_tracking: bool,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            leak_tracking: false,
        }
    }
}

impl BufferPoolConfig {
    /// Set the page size in bytes.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the maximum number of pooled free pages.
    pub fn with_pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    /// Enable or disable leak tracking.
    pub fn with_leak_tracking(mut self, leak_tracking: bool) -> Self {
        self.leak_tracking = leak_tracking;
        self
    }

    /// Check that the configuration describes a usable pool.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if the page size is smaller than
    ///   [`MIN_PAGE_SIZE`] or not a power of two
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "page size {} is below the minimum of {} bytes",
                self.page_size, MIN_PAGE_SIZE
            )));
        }
        if !self.page_size.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "page size {} is not a power of two",
                self.page_size
            )));
        }
        Ok(())
    }

    /// Build a configuration from the process environment.
    ///
    /// Unset variables keep their default value:
    /// - `PAGEBUF_PAGE_SIZE_KB` - page size in kilobytes
    /// - `PAGEBUF_POOL_LIMIT` - pool capacity in pages
    /// - `PAGEBUF_TRACK_LEAKS` - `true`/`1` to enable leak tracking
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if a variable is set but cannot be parsed,
    ///   or the result fails [`validate`](Self::validate)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_PAGE_SIZE_KB) {
            let kb = parse_usize(ENV_PAGE_SIZE_KB, &raw)?;
            config.page_size = kb.checked_mul(1024).ok_or_else(|| {
                Error::InvalidConfig(format!("{}={} overflows", ENV_PAGE_SIZE_KB, raw))
            })?;
        }

        if let Some(raw) = lookup(ENV_POOL_LIMIT) {
            config.pool_capacity = parse_usize(ENV_POOL_LIMIT, &raw)?;
        }

        if let Some(raw) = lookup(ENV_TRACK_LEAKS) {
            config.leak_tracking = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "{}={} is not a boolean",
                        ENV_TRACK_LEAKS, other
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_usize(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|e| Error::InvalidConfig(format!("{}={}: {}", key, raw, e)))
}
