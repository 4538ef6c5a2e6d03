use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::api::ApiError;

use super::cache::{CacheEntry, ErasedData};
use super::config::QueryConfig;
use super::key::QueryKey;

/// Error type for query operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Fetch failed: {0}")]
    FetchError(String),
}

impl QueryError {
    /// Returns the HTTP status behind this error, if there is one.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api(error) => error.status(),
            Self::FetchError(_) => None,
        }
    }
}

/// A change to the query cache, broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Data was written for the key.
    Updated(QueryKey),
    /// The key was marked stale and should be refetched.
    Invalidated(QueryKey),
    /// The key was removed from the cache.
    Removed(QueryKey),
    /// Every entry was dropped (logout).
    Cleared,
}

/// A client for managing query cache and invalidation.
///
/// The `QueryClient` is the central state manager for queries. It handles:
/// - Caching query results under structured [`QueryKey`]s
/// - Staleness, invalidation and garbage collection
/// - Broadcasting [`CacheEvent`]s to observers
/// - Fetching with the configured retry policy
///
/// It is constructed explicitly and shared behind an `Arc`; nothing about it is
/// global.
///
/// # Example
///
/// ```rust
/// use bookshelf::query::{QueryClient, QueryConfig, QueryKey};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let config = QueryConfig::new(
///     Duration::from_secs(30),  // stale_time
///     Duration::from_secs(300), // cache_time
/// );
///
/// let client = Arc::new(QueryClient::with_config(config));
/// client.set_query_data(QueryKey::new("list-items"), vec![1, 2, 3]);
/// assert_eq!(client.get_query_data::<Vec<i32>>(&QueryKey::new("list-items")), Some(vec![1, 2, 3]));
/// ```
#[derive(Debug, Clone)]
pub struct QueryClient {
    cache: Arc<DashMap<QueryKey, CacheEntry<ErasedData>>>,
    events_tx: broadcast::Sender<CacheEvent>,
    epoch: Arc<AtomicU64>,
    config: QueryConfig,
}

impl QueryClient {
    /// Creates a new query client with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    /// Creates a new query client with the given configuration.
    #[must_use]
    pub fn with_config(config: QueryConfig) -> Self {
        let (events_tx, _) = broadcast::channel(100);
        Self {
            cache: Arc::new(DashMap::new()),
            events_tx,
            epoch: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    /// Gets the query configuration.
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Counts calls to [`clear`](Self::clear).
    ///
    /// Anything read from the cache under an older epoch belongs to a session
    /// that has since ended.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Subscribes to cache events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events_tx.subscribe()
    }

    /// Returns the cached data for `key`, fresh or stale.
    pub fn get_query_data<T>(&self, key: &QueryKey) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.cache
            .get(key)
            .and_then(|entry| entry.data.downcast_ref::<T>().cloned())
    }

    /// Returns the cached entry for `key`, refreshing its stale flag first.
    pub fn get_entry<T>(&self, key: &QueryKey) -> Option<CacheEntry<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.cache.get_mut(key).and_then(|mut entry| {
            entry.check_staleness();
            entry.downcast::<T>()
        })
    }

    /// Writes `data` under `key`.
    ///
    /// An existing entry keeps its timing configuration; a new one gets the
    /// client's default.
    pub fn set_query_data<T>(&self, key: QueryKey, data: T)
    where
        T: Send + Sync + 'static,
    {
        match self.cache.entry(key.clone()) {
            Entry::Occupied(mut occupied) => occupied.get_mut().update(Box::new(data)),
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(Box::new(data), &self.config));
            }
        }
        trace!(%key, "query data set");
        let _ = self.events_tx.send(CacheEvent::Updated(key));
    }

    /// Writes `data` under `key` with its own timing configuration.
    pub fn set_query_data_with_config<T>(&self, key: QueryKey, data: T, config: &QueryConfig)
    where
        T: Send + Sync + 'static,
    {
        self.cache
            .insert(key.clone(), CacheEntry::new(Box::new(data), config));
        trace!(%key, "query data set");
        let _ = self.events_tx.send(CacheEvent::Updated(key));
    }

    /// Replaces the data under `key` with `f(current)`.
    ///
    /// Nothing is written when `f` returns `None`. Returns the previous data.
    pub fn update_query_data<T, F>(&self, key: &QueryKey, f: F) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Option<T>) -> Option<T>,
    {
        let previous = self.get_query_data::<T>(key);
        if let Some(next) = f(previous.clone()) {
            self.set_query_data(key.clone(), next);
        }
        previous
    }

    /// Marks every entry matching `filter` stale and notifies observers.
    ///
    /// Observers watching a matching key refetch even when nothing is cached
    /// yet. Returns the number of cached entries that were marked.
    pub fn invalidate(&self, filter: &QueryKey) -> usize {
        let mut invalidated = Vec::new();
        for mut entry in self.cache.iter_mut() {
            if entry.key().matches(filter) {
                entry.value_mut().mark_stale();
                invalidated.push(entry.key().clone());
            }
        }

        let count = invalidated.len();
        debug!(%filter, count, "invalidating queries");

        if invalidated.is_empty() {
            let _ = self.events_tx.send(CacheEvent::Invalidated(filter.clone()));
        }
        for key in invalidated {
            let _ = self.events_tx.send(CacheEvent::Invalidated(key));
        }
        count
    }

    /// Returns `true` if `key` is missing, invalidated, or past its stale time.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.cache
            .get_mut(key)
            .is_none_or(|mut entry| entry.check_staleness())
    }

    /// Removes every entry matching `filter`. Returns how many were removed.
    pub fn remove(&self, filter: &QueryKey) -> usize {
        let keys: Vec<QueryKey> = self
            .cache
            .iter()
            .filter(|entry| entry.key().matches(filter))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in keys {
            if self.remove_entry(&key) {
                removed += 1;
            }
        }
        removed
    }

    /// Removes exactly `key`. Returns `true` if an entry was present.
    pub fn remove_entry(&self, key: &QueryKey) -> bool {
        let removed = self.cache.remove(key).is_some();
        if removed {
            trace!(%key, "query removed");
            let _ = self.events_tx.send(CacheEvent::Removed(key.clone()));
        }
        removed
    }

    /// Drops every entry and starts a new [`epoch`](Self::epoch).
    pub fn clear(&self) {
        let count = self.cache.len();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.cache.clear();
        debug!(count, "query cache cleared");
        let _ = self.events_tx.send(CacheEvent::Cleared);
    }

    /// Drops entries that outlived their cache time. Returns how many were dropped.
    pub fn collect_garbage(&self) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, entry| !entry.should_gc());
        before.saturating_sub(self.cache.len())
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Returns fresh cached data for `key`, or fetches and caches it.
    ///
    /// A read after [`invalidate`](Self::invalidate) always refetches.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's error once the retry policy gives up.
    pub async fn fetch_query<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        if let Some(entry) = self.get_entry::<T>(key)
            && !entry.is_stale
        {
            trace!(%key, "query served from cache");
            return Ok(entry.data);
        }

        let data = self.fetch_with_retry(key, &fetcher).await?;
        self.set_query_data(key.clone(), data.clone());
        Ok(data)
    }

    /// Fetches `key` into the cache unless fresh data is already there.
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn prefetch_query<T, F, Fut>(&self, key: &QueryKey, fetcher: F)
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        if let Err(error) = self.fetch_query(key, fetcher).await {
            warn!(%key, %error, "prefetch failed");
        }
    }

    /// Runs `fetcher` until it succeeds or the retry policy gives up.
    pub(crate) async fn fetch_with_retry<T, F, Fut>(
        &self,
        key: &QueryKey,
        fetcher: &F,
    ) -> Result<T, QueryError>
    where
        F: Fn() -> Fut + ?Sized,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        let retry = self.config.retry;
        let mut failures = 0;

        loop {
            match fetcher().await {
                Ok(data) => return Ok(data),
                Err(error) => {
                    failures += 1;
                    if !retry.should_retry(failures, &error) {
                        debug!(%key, failures, %error, "query failed");
                        return Err(error);
                    }

                    let delay = retry.delay_for(failures);
                    debug!(%key, failures, ?delay, %error, "retrying query");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::RetryPolicy;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn list_key() -> QueryKey {
        QueryKey::new("list-items")
    }

    fn no_retry_client() -> QueryClient {
        QueryClient::with_config(QueryConfig::default().with_retry(RetryPolicy::NEVER))
    }

    #[test]
    fn test_query_client_new() {
        let client = QueryClient::new();
        assert_eq!(client.cache.len(), 0);
        assert_eq!(client.config.stale_time, Duration::from_secs(0));
    }

    #[test]
    fn test_query_client_with_config() {
        let config = QueryConfig::new(Duration::from_secs(30), Duration::from_secs(300));
        let client = QueryClient::with_config(config);
        assert_eq!(client.config.stale_time, Duration::from_secs(30));
        assert_eq!(client.config.cache_time, Duration::from_secs(300));
    }

    #[test]
    fn test_query_client_cache_operations() {
        let client = QueryClient::new();
        assert!(client.get_query_data::<i32>(&list_key()).is_none());

        client.set_query_data(list_key(), 42);
        assert_eq!(client.get_query_data::<i32>(&list_key()), Some(42));
        assert_eq!(client.get_query_data::<String>(&list_key()), None);
        assert_eq!(client.len(), 1);
    }

    #[test]
    fn test_set_query_data_keeps_entry_config() {
        let client = QueryClient::new();
        let key = QueryKey::new("book").with_param("bookId", "1");
        let long = QueryConfig::new(Duration::from_secs(3600), Duration::from_secs(3600));

        client.set_query_data_with_config(key.clone(), "first".to_string(), &long);
        client.set_query_data(key.clone(), "second".to_string());

        let entry = client.get_entry::<String>(&key).expect("entry should exist");
        assert_eq!(entry.data, "second");
        assert_eq!(entry.stale_time, Duration::from_secs(3600));
        assert!(!entry.is_stale);
    }

    #[test]
    fn test_update_query_data_returns_previous() {
        let client = QueryClient::new();
        client.set_query_data(list_key(), vec![1]);

        let previous = client.update_query_data::<Vec<i32>, _>(&list_key(), |current| {
            current.map(|mut items| {
                items.push(2);
                items
            })
        });

        assert_eq!(previous, Some(vec![1]));
        assert_eq!(client.get_query_data::<Vec<i32>>(&list_key()), Some(vec![1, 2]));
    }

    #[test]
    fn test_invalidate_marks_matching_entries_stale() {
        let config = QueryConfig::new(Duration::from_secs(60), Duration::from_secs(60));
        let client = QueryClient::with_config(config);
        let dune = QueryKey::new("bookSearch").with_param("query", "dune");
        let empty = QueryKey::new("bookSearch").with_param("query", "");

        client.set_query_data(dune.clone(), 1);
        client.set_query_data(empty.clone(), 2);
        client.set_query_data(list_key(), 3);
        assert!(!client.is_stale(&dune));

        assert_eq!(client.invalidate(&QueryKey::new("bookSearch")), 2);
        assert!(client.is_stale(&dune));
        assert!(client.is_stale(&empty));
        assert!(!client.is_stale(&list_key()));
    }

    #[tokio::test]
    async fn test_invalidate_broadcasts_notification() {
        let client = QueryClient::new();
        client.set_query_data(list_key(), 1);
        let mut rx = client.subscribe();

        client.invalidate(&list_key());

        let event = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("Should receive notification within timeout")
            .expect("Channel should not be closed");
        assert_eq!(event, CacheEvent::Invalidated(list_key()));
    }

    #[tokio::test]
    async fn test_invalidate_nonexistent_key() {
        let client = QueryClient::new();
        let mut rx = client.subscribe();

        assert_eq!(client.invalidate(&QueryKey::new("nonexistent")), 0);

        let event = tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("Should receive notification within timeout")
            .expect("Channel should not be closed");
        assert_eq!(event, CacheEvent::Invalidated(QueryKey::new("nonexistent")));
    }

    #[test]
    fn test_missing_key_is_stale() {
        let client = QueryClient::new();
        assert!(client.is_stale(&list_key()));
    }

    #[test]
    fn test_remove_and_clear() {
        let client = QueryClient::new();
        client.set_query_data(QueryKey::new("bookSearch").with_param("query", "a"), 1);
        client.set_query_data(QueryKey::new("bookSearch").with_param("query", "b"), 2);
        client.set_query_data(list_key(), 3);

        assert_eq!(client.remove(&QueryKey::new("bookSearch")), 2);
        assert_eq!(client.len(), 1);

        client.clear();
        assert!(client.is_empty());
    }

    #[test]
    fn test_clear_starts_new_epoch() {
        let client = QueryClient::new();
        let shared = client.clone();
        assert_eq!(client.epoch(), 0);

        client.remove(&list_key());
        client.invalidate(&list_key());
        assert_eq!(client.epoch(), 0);

        shared.clear();
        assert_eq!(client.epoch(), 1);
    }

    #[test]
    fn test_collect_garbage() {
        let config = QueryConfig::new(Duration::ZERO, Duration::ZERO);
        let client = QueryClient::with_config(config);
        client.set_query_data(list_key(), 1);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(client.collect_garbage(), 1);
        assert!(client.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_query_uses_fresh_cache() {
        let config = QueryConfig::new(Duration::from_secs(60), Duration::from_secs(60));
        let client = QueryClient::with_config(config);
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let fetch = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, QueryError>(vec![1, 2])
        };

        assert_eq!(client.fetch_query(&list_key(), fetch).await, Ok(vec![1, 2]));
        assert_eq!(client.fetch_query(&list_key(), fetch).await, Ok(vec![1, 2]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        client.invalidate(&list_key());
        assert_eq!(client.fetch_query(&list_key(), fetch).await, Ok(vec![1, 2]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_query_retries_then_fails() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let client = QueryClient::with_config(QueryConfig::default().with_retry(policy));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = client
            .fetch_query(&list_key(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(QueryError::FetchError("flaky".to_string()))
            })
            .await;

        assert_eq!(result, Err(QueryError::FetchError("flaky".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(client.get_query_data::<i32>(&list_key()).is_none());
    }

    #[tokio::test]
    async fn test_fetch_query_does_not_retry_not_found() {
        let client = QueryClient::new();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = client
            .fetch_query(&list_key(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(QueryError::Api(ApiError::Response {
                    status: 404,
                    body: json!({"message": "missing"}),
                }))
            })
            .await;

        assert_eq!(result.map_err(|e| e.status()), Err(Some(404)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prefetch_query_swallows_errors() {
        let client = no_retry_client();
        client
            .prefetch_query(&list_key(), || async {
                Err::<i32, _>(QueryError::FetchError("offline".to_string()))
            })
            .await;
        assert!(client.is_empty());

        client
            .prefetch_query(&list_key(), || async { Ok::<_, QueryError>(5) })
            .await;
        assert_eq!(client.get_query_data::<i32>(&list_key()), Some(5));
    }
}
