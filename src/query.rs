//! Keyed query cache with staleness, invalidation, and observers.
//!
//! Inspired by [TanStack Query](https://tanstack.com/query): fetched values
//! live in a shared [`QueryClient`] under structured [`QueryKey`]s. Readers
//! either ask the client directly ([`QueryClient::fetch_query`]) or observe a
//! key with a [`Query`] stream that refetches whenever the key is invalidated.
//!
//! # Cache lifecycle
//!
//! - A write stores the value fresh, with the entry's stale and cache time.
//! - Once the stale time elapses, or after [`QueryClient::invalidate`], the
//!   next read refetches.
//! - Entries past their cache time are dropped by
//!   [`QueryClient::collect_garbage`].
//! - [`QueryClient::clear`] drops everything (used on logout).
//!
//! # Example
//!
//! ```rust
//! use bookshelf::query::{QueryClient, QueryKey};
//!
//! let client = QueryClient::new();
//! let key = QueryKey::new("book").with_param("bookId", "b1");
//!
//! client.set_query_data(key.clone(), "Dune".to_string());
//! assert_eq!(client.get_query_data::<String>(&key).as_deref(), Some("Dune"));
//!
//! // A scope-only key matches every book.
//! client.invalidate(&QueryKey::new("book"));
//! assert!(client.is_stale(&key));
//! ```

mod cache;
mod client;
mod config;
mod key;
mod observer;

pub use cache::CacheEntry;
pub use client::{CacheEvent, QueryClient, QueryError};
pub use config::{QueryConfig, RetryPolicy};
pub use key::QueryKey;
pub use observer::{Query, QueryResult, QueryState};
