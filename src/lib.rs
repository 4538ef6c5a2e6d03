//! # Bookshelf - reading-list client core
//!
//! Bookshelf is the client side of a book reading-list service: search books,
//! keep a reading list, rate and annotate what you read. It is built around
//! two pieces that keep asynchronous state honest:
//!
//! 1. **[`AsyncOperation`](operation::AsyncOperation)**: a reusable state
//!    machine for one in-flight unit of work. Settlements that arrive after the
//!    operation was destroyed, reset, or superseded by a newer run are
//!    discarded.
//! 2. **[`Mutation`](mutation::Mutation)** over a shared
//!    [`QueryClient`](query::QueryClient): server writes are applied to the
//!    cache optimistically, rolled back exactly if the server refuses, and
//!    followed by invalidation so readers refetch.
//!
//! ## Core Components
//!
//! - [`operation`]: [`AsyncOperation`](operation::AsyncOperation) and its
//!   [`AsyncState`](operation::AsyncState)
//! - [`query`]: the keyed cache, its configuration and [`Query`](query::Query)
//!   observers
//! - [`mutation`]: optimistic mutations with snapshot rollback
//! - [`api`]: the [`RequestClient`](api::RequestClient) HTTP boundary
//! - [`auth`]: token storage, [`Session`](auth::Session) and the
//!   [`Auth`](auth::Auth) provider
//! - [`books`] and [`list_items`]: the domain services
//! - [`config`]: endpoint configuration from the environment
//!
//! ## Example
//!
//! ```rust,no_run
//! use bookshelf::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let session = Session::new(Arc::new(MemoryTokenStore::new()), Arc::new(QueryClient::new()));
//! let auth = Auth::new(&config, Arc::new(ReqwestTransport::from_config(&config)?), session);
//!
//! auth.login(&Credentials::new("reader", "hunter2")).await?;
//! let client = auth.client().expect("logged in");
//!
//! let list_items = ListItems::new(client);
//! let items = list_items.list().await?;
//!
//! // Mark the first book as finished; the cache changes immediately.
//! if let Some(item) = items.first() {
//!     let update = ListItemUpdate::new(item.id.clone()).finish_date(Some(1_700_000_000_000));
//!     list_items.update_mutation().mutate(update).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events and never installs a subscriber.

pub mod api;
pub mod auth;
pub mod books;
pub mod config;
pub mod list_items;
pub mod mutation;
pub mod operation;
pub mod prelude;
pub mod query;
