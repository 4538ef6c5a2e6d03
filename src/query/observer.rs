//! Query observers with caching and automatic refetching.
//!
//! A [`Query`] is a stream that keeps a reader in sync with one cache key:
//!
//! 1. If cached data exists, it's immediately emitted
//! 2. If data is stale or missing, a fetch is automatically triggered
//! 3. Writes to the key (including optimistic ones) are re-emitted
//! 4. When the key is invalidated, refetching happens automatically
//! 5. When the whole cache is cleared, the stream ends
//!
//! # Example
//!
//! ```rust,no_run
//! use bookshelf::query::{Query, QueryClient, QueryError, QueryKey};
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let client = Arc::new(QueryClient::new());
//! let query = Query::new(
//!     QueryKey::new("list-items"),
//!     || Box::pin(async { Ok::<_, QueryError>(vec!["a".to_string()]) }),
//!     client,
//! );
//!
//! let mut results = query.stream();
//! while let Some(result) = results.next().await {
//!     if let Some(items) = result.data() {
//!         println!("{} items", items.len());
//!     }
//! }
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::trace;

use super::client::{CacheEvent, QueryClient, QueryError};
use super::key::QueryKey;

/// The state of a query result.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
    /// Query is loading (fetching data).
    Loading,
    /// Query succeeded with data.
    Success {
        /// The data returned by the query.
        data: T,
        /// Whether the data is stale and being refetched.
        is_stale: bool,
    },
    /// Query failed with an error.
    Error(QueryError),
}

/// A query result containing the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    /// The current state of the query.
    pub state: QueryState<T>,
}

impl<T> QueryResult<T> {
    const fn loading() -> Self {
        Self {
            state: QueryState::Loading,
        }
    }

    const fn success(data: T, is_stale: bool) -> Self {
        Self {
            state: QueryState::Success { data, is_stale },
        }
    }

    /// Returns the data if the query succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            QueryState::Success { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Returns the error if the query failed, otherwise `None`.
    pub const fn error(&self) -> Option<&QueryError> {
        match &self.state {
            QueryState::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Returns `true` if the query is currently loading.
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, QueryState::Loading)
    }

    /// Returns `true` if the query succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, QueryState::Success { .. })
    }

    /// Returns `true` if the query failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, QueryState::Error(_))
    }

    /// Returns `true` if the query data is stale.
    pub const fn is_stale(&self) -> bool {
        matches!(self.state, QueryState::Success { is_stale: true, .. })
    }
}

type Fetcher<V> = Arc<dyn Fn() -> BoxFuture<'static, Result<V, QueryError>> + Send + Sync>;

/// An observer that monitors one cache key and fetches it when needed.
pub struct Query<V> {
    key: QueryKey,
    fetcher: Fetcher<V>,
    client: Arc<QueryClient>,
}

impl<V> Query<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new query with the given key, fetcher, and client.
    pub fn new<F>(key: QueryKey, fetcher: F, client: Arc<QueryClient>) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<V, QueryError>> + Send + Sync + 'static,
    {
        Self {
            key,
            fetcher: Arc::new(fetcher),
            client,
        }
    }

    /// Returns the observed key.
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Starts observing. Every call returns an independent stream.
    pub fn stream(&self) -> BoxStream<'static, QueryResult<V>> {
        let watcher = Watcher {
            key: self.key.clone(),
            fetcher: Arc::clone(&self.fetcher),
            events: self.client.subscribe(),
            client: Arc::clone(&self.client),
            last_seen: None,
        };

        stream::unfold((State::Initial, watcher), |(state, mut watcher)| async move {
            match state {
                State::Initial => {
                    let Some(cached) = watcher.client.get_entry::<V>(&watcher.key) else {
                        // No cache: emit Loading, then fetch
                        return Some((QueryResult::loading(), (State::Fetching, watcher)));
                    };

                    watcher.last_seen = Some(cached.timestamp);
                    let next = if cached.is_stale {
                        State::Fetching
                    } else {
                        State::Watching
                    };
                    Some((
                        QueryResult::success(cached.data, cached.is_stale),
                        (next, watcher),
                    ))
                }

                State::Fetching => {
                    let result = watcher.fetch().await;
                    Some((result, (State::Watching, watcher)))
                }

                State::Watching => loop {
                    match watcher.events.recv().await {
                        Ok(CacheEvent::Invalidated(key)) if watcher.key.matches(&key) => {
                            trace!(key = %watcher.key, "query invalidated, refetching");
                            let result = match watcher.client.get_query_data::<V>(&watcher.key) {
                                Some(data) => QueryResult::success(data, true),
                                None => QueryResult::loading(),
                            };
                            return Some((result, (State::Fetching, watcher)));
                        }
                        Ok(CacheEvent::Updated(key)) if key == watcher.key => {
                            if let Some(result) = watcher.updated() {
                                return Some((result, (State::Watching, watcher)));
                            }
                        }
                        Ok(CacheEvent::Cleared) | Err(RecvError::Closed) => return None,
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                    }
                },
            }
        })
        .boxed()
    }
}

impl<V> fmt::Debug for Query<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("key", &self.key).finish_non_exhaustive()
    }
}

struct Watcher<V> {
    key: QueryKey,
    fetcher: Fetcher<V>,
    events: broadcast::Receiver<CacheEvent>,
    client: Arc<QueryClient>,
    /// Timestamp of the cache entry last emitted, used to skip our own writes.
    last_seen: Option<Instant>,
}

impl<V> Watcher<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn fetch(&mut self) -> QueryResult<V> {
        match self.client.fetch_with_retry(&self.key, &*self.fetcher).await {
            Ok(data) => {
                self.client.set_query_data(self.key.clone(), data.clone());
                self.last_seen = self
                    .client
                    .get_entry::<V>(&self.key)
                    .map(|entry| entry.timestamp);
                QueryResult::success(data, false)
            }
            Err(error) => QueryResult {
                state: QueryState::Error(error),
            },
        }
    }

    fn updated(&mut self) -> Option<QueryResult<V>> {
        let entry = self.client.get_entry::<V>(&self.key)?;
        if self.last_seen == Some(entry.timestamp) {
            return None;
        }
        self.last_seen = Some(entry.timestamp);
        Some(QueryResult::success(entry.data, entry.is_stale))
    }
}

/// Internal state machine for the query stream.
enum State {
    Initial,
    Fetching,
    Watching,
}
