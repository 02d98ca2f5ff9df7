//! State service and cache configuration types.

use keel_core::resilience::CircuitBreakerConfig;
use keel_log::Logger;
use std::time::Duration;

/// Cache proxy configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL of every in-memory entry
    pub item_expiration: Duration,

    /// Period of the expired-entry sweep. Zero disables the sweeper.
    pub cleanup_interval: Duration,

    /// Queue writes for the batch worker instead of writing through
    pub use_batch: bool,

    /// Length of one batch window, measured from its first item
    pub batch_buffer_interval: Duration,

    /// Deadline of each batch write
    pub batch_timeout: Duration,

    /// Capacity of the batch channel; `set` waits when it is full
    pub batch_channel_capacity: usize,

    /// Logging collaborator
    pub logger: Logger,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            item_expiration: Duration::from_secs(5 * 60),
            cleanup_interval: Duration::from_secs(10 * 60),
            use_batch: false,
            batch_buffer_interval: Duration::from_secs(60),
            batch_timeout: Duration::from_secs(10),
            batch_channel_capacity: 1024,
            logger: Logger::global(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL.
    ///
    /// # Examples
    ///
    /// ```
    /// use keel_state::CacheConfig;
    /// use std::time::Duration;
    ///
    /// let config = CacheConfig::new().item_expiration(Duration::from_secs(30));
    /// assert_eq!(config.item_expiration, Duration::from_secs(30));
    /// ```
    pub fn item_expiration(mut self, ttl: Duration) -> Self {
        self.item_expiration = ttl;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Enable batched writes.
    ///
    /// # Examples
    ///
    /// ```
    /// use keel_state::CacheConfig;
    /// use std::time::Duration;
    ///
    /// let config = CacheConfig::new().batched(Duration::from_millis(200), Duration::from_secs(2));
    /// assert!(config.use_batch);
    /// ```
    pub fn batched(mut self, buffer_interval: Duration, timeout: Duration) -> Self {
        self.use_batch = true;
        self.batch_buffer_interval = buffer_interval;
        self.batch_timeout = timeout;
        self
    }

    pub fn use_batch(mut self, enabled: bool) -> Self {
        self.use_batch = enabled;
        self
    }

    pub fn batch_channel_capacity(mut self, capacity: usize) -> Self {
        self.batch_channel_capacity = capacity;
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}

/// State service configuration.
#[derive(Debug, Clone)]
pub struct StateServiceConfig {
    /// Breaker wrapping every adapter call
    pub breaker: CircuitBreakerConfig,

    /// Front the adapter with a [`CacheProxy`](crate::CacheProxy)
    pub cache: Option<CacheConfig>,

    /// Logging collaborator, shared with the breaker and the cache
    pub logger: Logger,
}

impl Default for StateServiceConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::new("state"),
            cache: None,
            logger: Logger::global(),
        }
    }
}

impl StateServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.item_expiration, Duration::from_secs(300));
        assert_eq!(config.cleanup_interval, Duration::from_secs(600));
        assert!(!config.use_batch);
        assert_eq!(config.batch_buffer_interval, Duration::from_secs(60));
        assert_eq!(config.batch_timeout, Duration::from_secs(10));
        assert_eq!(config.batch_channel_capacity, 1024);
    }

    #[test]
    fn test_service_defaults() {
        let config = StateServiceConfig::default();
        assert_eq!(config.breaker.name, "state");
        assert!(config.cache.is_none());
        assert!(StateServiceConfig::new().cache(CacheConfig::new()).cache.is_some());
    }
}
