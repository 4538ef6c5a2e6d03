use std::any::Any;
use std::time::{Duration, Instant};

use super::config::QueryConfig;

/// Type-erased payload stored in the query cache.
pub(crate) type ErasedData = Box<dyn Any + Send + Sync>;

/// A cached entry with timestamp and staleness information.
///
/// Each entry carries its own stale and cache time, so entries seeded with a
/// longer-lived configuration (for example books from a search) keep it.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: Instant,
    pub is_stale: bool,
    pub stale_time: Duration,
    pub cache_time: Duration,
}

impl<T> CacheEntry<T> {
    /// Creates a new cache entry with the given data and timing configuration.
    pub fn new(data: T, config: &QueryConfig) -> Self {
        Self {
            data,
            timestamp: Instant::now(),
            is_stale: false,
            stale_time: config.stale_time,
            cache_time: config.cache_time,
        }
    }

    /// Checks if this entry is stale, marking it stale once its stale time elapsed.
    pub fn check_staleness(&mut self) -> bool {
        if self.timestamp.elapsed() > self.stale_time {
            self.is_stale = true;
        }
        self.is_stale
    }

    /// Marks this entry as stale.
    pub const fn mark_stale(&mut self) {
        self.is_stale = true;
    }

    /// Updates the entry with new data, resetting timestamp and staleness.
    pub fn update(&mut self, data: T) {
        self.data = data;
        self.timestamp = Instant::now();
        self.is_stale = false;
    }

    /// Checks if this entry should be garbage collected.
    pub fn should_gc(&self) -> bool {
        self.timestamp.elapsed() > self.cache_time
    }
}

impl CacheEntry<ErasedData> {
    /// Clones the entry out of the cache if it holds a `T`.
    pub(crate) fn downcast<T: Clone + 'static>(&self) -> Option<CacheEntry<T>> {
        self.data.downcast_ref::<T>().map(|data| CacheEntry {
            data: data.clone(),
            timestamp: self.timestamp,
            is_stale: self.is_stale,
            stale_time: self.stale_time,
            cache_time: self.cache_time,
        })
    }
}
