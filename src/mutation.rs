//! Optimistic mutations over the query cache.
//!
//! A [`Mutation`] wraps one server-side write (create, update, delete) that
//! affects a cached collection. For every call to [`Mutation::mutate`]:
//!
//! 1. The current entry is snapshotted and the optimistic updater's result is
//!    written into the cache immediately, before `mutate` returns.
//! 2. The server call runs inside the mutation's own [`AsyncOperation`], so
//!    the mutation exposes idle/pending/resolved/rejected.
//! 3. On failure the snapshot is restored exactly, unless the cache was
//!    cleared in the meantime (the session ended).
//! 4. On every settlement the key is invalidated, so observers refetch the
//!    authoritative value.
//!
//! Steps 3 and 4 happen inside the spawned work, so they still happen if the
//! `Mutation` is dropped while the call is in flight.
//!
//! # Example
//!
//! ```rust,no_run
//! use bookshelf::api::ApiError;
//! use bookshelf::mutation::Mutation;
//! use bookshelf::query::{QueryClient, QueryKey};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let client = Arc::new(QueryClient::new());
//! let remove = Mutation::new(
//!     Arc::clone(&client),
//!     QueryKey::new("list-items"),
//!     |id: String| Box::pin(async move { Ok::<_, ApiError>(id) }),
//! )
//! .optimistic(|items: Option<Vec<String>>, id: &String| {
//!     items.map(|items| items.into_iter().filter(|item| item != id).collect())
//! });
//!
//! // `Ok(None)` if the server rejected the call; the cache is rolled back.
//! let removed = remove.mutate("li-1".to_string()).await;
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{debug, trace, warn};

use crate::api::ApiError;
use crate::operation::{AsyncOperation, AsyncState, RunHandle, Status};
use crate::query::{QueryClient, QueryKey};

/// The server call of a mutation.
pub type Mutator<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, ApiError>> + Send + Sync>;

/// Computes the optimistic value of the collection from its current value.
///
/// Returning `None` skips the optimistic write for that call.
pub type Updater<I, V> = Arc<dyn Fn(Option<V>, &I) -> Option<V> + Send + Sync>;

/// Configuration for mutation behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationConfig {
    /// Surface failures through the [`MutationHandle`] instead of `Ok(None)`.
    pub throw_on_error: bool,
}

impl MutationConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            throw_on_error: false,
        }
    }

    #[must_use]
    pub const fn throw_on_error(mut self, throw_on_error: bool) -> Self {
        self.throw_on_error = throw_on_error;
        self
    }
}

/// The cache value a key held before one optimistic write.
///
/// A snapshot belongs to the cache [epoch](QueryClient::epoch) it was taken
/// in. Once the cache has been cleared it no longer restores anything.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<V> {
    key: QueryKey,
    previous: Option<V>,
    epoch: u64,
}

impl<V> Snapshot<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// The value before the write, `None` if the key was empty.
    pub const fn previous(&self) -> Option<&V> {
        self.previous.as_ref()
    }

    /// Puts the snapshotted value back. An empty key is removed again.
    ///
    /// Returns `false` without touching the cache if it was cleared since the
    /// snapshot was taken.
    pub fn restore(self, client: &QueryClient) -> bool {
        if client.epoch() != self.epoch {
            debug!(key = %self.key, "cache cleared since snapshot, not restoring");
            return false;
        }
        match self.previous {
            Some(previous) => client.set_query_data(self.key, previous),
            None => {
                client.remove_entry(&self.key);
            }
        }
        true
    }
}

/// A server-side write with optimistic cache updates and rollback.
///
/// `I` is the call input, `O` the server's answer, and `V` the type cached
/// under the mutation's key.
pub struct Mutation<I, O, V = ()> {
    client: Arc<QueryClient>,
    key: QueryKey,
    mutator: Mutator<I, O>,
    updater: Option<Updater<I, V>>,
    config: MutationConfig,
    operation: AsyncOperation<O, ApiError>,
}

impl<I, O, V> Mutation<I, O, V>
where
    I: Send + 'static,
    O: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a mutation that invalidates `key` after every call.
    pub fn new<F>(client: Arc<QueryClient>, key: QueryKey, mutator: F) -> Self
    where
        F: Fn(I) -> BoxFuture<'static, Result<O, ApiError>> + Send + Sync + 'static,
    {
        Self {
            client,
            key,
            mutator: Arc::new(mutator),
            updater: None,
            config: MutationConfig::default(),
            operation: AsyncOperation::new(),
        }
    }

    /// Applies `updater` to the cached value before each server call.
    #[must_use]
    pub fn optimistic<U>(mut self, updater: U) -> Self
    where
        U: Fn(Option<V>, &I) -> Option<V> + Send + Sync + 'static,
    {
        self.updater = Some(Arc::new(updater));
        self
    }

    #[must_use]
    pub const fn with_config(mut self, config: MutationConfig) -> Self {
        self.config = config;
        self
    }

    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    pub const fn config(&self) -> &MutationConfig {
        &self.config
    }

    /// Starts the mutation. The optimistic write is visible once this returns.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mutate(&self, input: I) -> MutationHandle<O> {
        let snapshot = self.begin(&input);
        let call = (self.mutator)(input);
        let client = Arc::clone(&self.client);
        let key = self.key.clone();

        let run = self.operation.run(async move {
            let result = call.await;
            match &result {
                Ok(_) => debug!(%key, "mutation succeeded"),
                Err(error) => {
                    warn!(%key, %error, "mutation failed, rolling back");
                    if let Some(snapshot) = snapshot {
                        snapshot.restore(&client);
                    }
                }
            }
            client.invalidate(&key);
            result
        });

        MutationHandle {
            run,
            throw_on_error: self.config.throw_on_error,
        }
    }

    /// Snapshots the key and writes the optimistic value, if there is one.
    fn begin(&self, input: &I) -> Option<Snapshot<V>> {
        let updater = self.updater.as_ref()?;
        let epoch = self.client.epoch();
        let previous = self.client.get_query_data::<V>(&self.key);
        let next = updater(previous.clone(), input)?;

        self.client.set_query_data(self.key.clone(), next);
        trace!(key = %self.key, "optimistic update applied");
        Some(Snapshot {
            key: self.key.clone(),
            previous,
            epoch,
        })
    }

    /// The status of the most recent call.
    pub fn state(&self) -> AsyncState<O, ApiError> {
        self.operation.state()
    }

    pub fn status(&self) -> Status {
        self.operation.status()
    }

    /// Streams state changes of this mutation.
    pub fn subscribe(&self) -> BoxStream<'static, AsyncState<O, ApiError>> {
        self.operation.subscribe()
    }

    /// Returns the mutation to idle. Calls in flight still roll back and
    /// invalidate, but their outcome is no longer reported.
    pub fn reset(&self) {
        self.operation.reset();
    }
}

impl<I, O, V> fmt::Debug for Mutation<I, O, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("key", &self.key)
            .field("optimistic", &self.updater.is_some())
            .field("config", &self.config)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

/// The awaitable returned by [`Mutation::mutate`].
///
/// Resolves once rollback and invalidation are done, with:
/// - `Ok(Some(output))` on success
/// - `Ok(None)` on failure
/// - `Err(error)` on failure when [`MutationConfig::throw_on_error`] is set
#[derive(Debug)]
pub struct MutationHandle<O> {
    run: RunHandle<O, ApiError>,
    throw_on_error: bool,
}

impl<O> MutationHandle<O> {
    pub fn is_finished(&self) -> bool {
        self.run.is_finished()
    }
}

impl<O> Future for MutationHandle<O> {
    type Output = Result<Option<O>, ApiError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let throw_on_error = self.throw_on_error;
        Pin::new(&mut self.run).poll(cx).map(|result| match result {
            Ok(output) => Ok(Some(output)),
            Err(error) if throw_on_error => Err(error),
            Err(_) => Ok(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CacheEvent;

    fn key() -> QueryKey {
        QueryKey::new("list-items")
    }

    /// Succeeds for even inputs, fails for odd ones.
    fn push_mutation(client: &Arc<QueryClient>) -> Mutation<u32, u32, Vec<u32>> {
        Mutation::new(Arc::clone(client), key(), |n: u32| {
            Box::pin(async move {
                if n % 2 == 0 {
                    Ok(n)
                } else {
                    Err(ApiError::Response {
                        status: 500,
                        body: serde_json::Value::Null,
                    })
                }
            })
        })
        .optimistic(|items: Option<Vec<u32>>, n: &u32| {
            let mut items = items.unwrap_or_default();
            items.push(*n);
            Some(items)
        })
    }

    #[test]
    fn test_mutation_config() {
        assert!(!MutationConfig::default().throw_on_error);
        assert!(MutationConfig::new().throw_on_error(true).throw_on_error);
    }

    #[tokio::test]
    async fn test_optimistic_write_before_settlement() {
        let client = Arc::new(QueryClient::new());
        client.set_query_data(key(), vec![1_u32]);
        let mutation = push_mutation(&client);

        let handle = mutation.mutate(2);
        assert_eq!(client.get_query_data::<Vec<u32>>(&key()), Some(vec![1, 2]));
        assert_eq!(mutation.status(), Status::Pending);

        assert_eq!(handle.await, Ok(Some(2)));
        assert_eq!(mutation.state(), AsyncState::Resolved(2));
        assert_eq!(client.get_query_data::<Vec<u32>>(&key()), Some(vec![1, 2]));
        assert!(client.is_stale(&key()));
    }

    #[tokio::test]
    async fn test_failure_restores_snapshot() {
        let client = Arc::new(QueryClient::new());
        client.set_query_data(key(), vec![2_u32]);
        let mutation = push_mutation(&client);

        let handle = mutation.mutate(3);
        assert_eq!(client.get_query_data::<Vec<u32>>(&key()), Some(vec![2, 3]));

        assert_eq!(handle.await, Ok(None));
        assert!(mutation.state().is_error());
        assert_eq!(client.get_query_data::<Vec<u32>>(&key()), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_failure_removes_entry_that_was_absent() {
        let client = Arc::new(QueryClient::new());
        let mutation = push_mutation(&client);

        let handle = mutation.mutate(5);
        assert_eq!(client.get_query_data::<Vec<u32>>(&key()), Some(vec![5]));

        assert_eq!(handle.await, Ok(None));
        assert_eq!(client.get_query_data::<Vec<u32>>(&key()), None);
    }

    #[tokio::test]
    async fn test_throw_on_error() {
        let client = Arc::new(QueryClient::new());
        let mutation =
            push_mutation(&client).with_config(MutationConfig::new().throw_on_error(true));

        let result = mutation.mutate(1).await;
        assert_eq!(result.map_err(|e| e.status()), Err(Some(500)));
    }

    #[tokio::test]
    async fn test_settlement_invalidates_key() {
        let client = Arc::new(QueryClient::new());
        client.set_query_data(key(), vec![0_u32]);
        let mut events = client.subscribe();
        let mutation = push_mutation(&client);

        mutation.mutate(4).await.expect("mutation should not throw");

        let mut saw_invalidation = false;
        while let Ok(event) = events.try_recv() {
            if event == CacheEvent::Invalidated(key()) {
                saw_invalidation = true;
            }
        }
        assert!(saw_invalidation);
    }

    #[tokio::test]
    async fn test_dropped_mutation_still_rolls_back() {
        let client = Arc::new(QueryClient::new());
        client.set_query_data(key(), vec![8_u32]);
        let mutation = push_mutation(&client);

        let handle = mutation.mutate(9);
        drop(mutation);

        assert_eq!(handle.await, Ok(None));
        assert_eq!(client.get_query_data::<Vec<u32>>(&key()), Some(vec![8]));
    }

    #[tokio::test]
    async fn test_without_updater_cache_is_untouched() {
        let client = Arc::new(QueryClient::new());
        let mutation: Mutation<u32, u32> =
            Mutation::new(Arc::clone(&client), key(), |n: u32| Box::pin(async move { Ok(n) }));

        let handle = mutation.mutate(1);
        assert!(client.is_empty());
        assert_eq!(handle.await, Ok(Some(1)));
    }

    #[test]
    fn test_snapshot_restore() {
        let client = QueryClient::new();
        client.set_query_data(key(), vec![7_u32]);

        let snapshot = Snapshot {
            key: key(),
            previous: Some(vec![1_u32]),
            epoch: client.epoch(),
        };
        assert_eq!(snapshot.previous(), Some(&vec![1]));
        assert!(snapshot.restore(&client));
        assert_eq!(client.get_query_data::<Vec<u32>>(&key()), Some(vec![1]));

        let restored = Snapshot::<Vec<u32>> {
            key: key(),
            previous: None,
            epoch: client.epoch(),
        }
        .restore(&client);
        assert!(restored);
        assert!(client.is_empty());
    }

    #[test]
    fn test_snapshot_from_before_clear_is_ignored() {
        let client = QueryClient::new();
        let snapshot = Snapshot {
            key: key(),
            previous: Some(vec![1_u32]),
            epoch: client.epoch(),
        };

        client.clear();

        assert!(!snapshot.restore(&client));
        assert!(client.is_empty());
    }

    #[tokio::test]
    async fn test_failure_after_clear_keeps_cache_empty() {
        let client = Arc::new(QueryClient::new());
        client.set_query_data(key(), vec![1_u32]);
        let cleared = Arc::clone(&client);
        let mutation = Mutation::new(Arc::clone(&client), key(), move |_: u32| {
            let cleared = Arc::clone(&cleared);
            Box::pin(async move {
                cleared.clear();
                Err::<u32, _>(ApiError::Unauthorized)
            })
        })
        .optimistic(|items: Option<Vec<u32>>, n: &u32| {
            let mut items = items.unwrap_or_default();
            items.push(*n);
            Some(items)
        });

        let handle = mutation.mutate(3);
        assert_eq!(client.get_query_data::<Vec<u32>>(&key()), Some(vec![1, 3]));

        assert_eq!(handle.await, Ok(None));
        assert!(client.is_empty());
    }
}
