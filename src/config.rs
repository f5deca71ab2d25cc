//! Pool configuration options

use std::time::Duration;

/// Default ceiling on cached connections when none is configured.
pub const DEFAULT_MAX_CAP: usize = 10;

/// Default period between reap sweeps.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for connection pool behavior
///
/// Zero values mean "unset" and are replaced by the defaults in
/// [`Options::normalize`], which [`Pool::new`](crate::Pool::new) always applies.
///
/// # Examples
///
/// ```
/// use connpool::Options;
/// use std::time::Duration;
///
/// let opts = Options::new()
///     .with_initial_size(3)
///     .with_max_cap(5)
///     .with_idle_timeout(Duration::from_secs(30));
///
/// assert_eq!(opts.max_cap, 5);
/// assert_eq!(opts.normalize().reap_interval, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct Options {
    /// Number of connections created when the pool is constructed
    pub initial_size: usize,

    /// Maximum number of idle connections kept in the pool. Raised to
    /// `initial_size` when smaller.
    pub max_cap: usize,

    /// Idle age after which a pooled connection is reaped (`ZERO` = never)
    pub idle_timeout: Duration,

    /// Frequency of reap cycles
    pub reap_interval: Duration,
}

impl Options {
    /// Create options with every value unset
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of connections to create up front
    pub fn with_initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    /// Set the maximum number of cached connections
    pub fn with_max_cap(mut self, cap: usize) -> Self {
        self.max_cap = cap;
        self
    }

    /// Set the idle timeout after which cached connections are reaped
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the period between reap cycles
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Fill in defaults for unset values.
    ///
    /// ```
    /// use connpool::Options;
    ///
    /// let opts = Options::new().with_initial_size(20).normalize();
    /// assert_eq!(opts.max_cap, 20);
    /// ```
    pub fn normalize(&self) -> Self {
        let mut opts = self.clone();
        if opts.reap_interval.is_zero() {
            opts.reap_interval = DEFAULT_REAP_INTERVAL;
        }
        if opts.max_cap == 0 {
            opts.max_cap = DEFAULT_MAX_CAP;
        }
        if opts.max_cap < opts.initial_size {
            opts.max_cap = opts.initial_size;
        }
        opts
    }

    /// Whether idle reaping is enabled
    pub fn reaping_enabled(&self) -> bool {
        !self.idle_timeout.is_zero()
    }
}
