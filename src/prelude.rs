//! Prelude module for convenient imports.
//!
//! ```
//! use bookshelf::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`AsyncOperation`] and [`AsyncState`] - Lifecycle of one unit of work
//! - [`QueryClient`], [`QueryKey`] and [`Query`] - The shared cache
//! - [`Mutation`] - Optimistic writes with rollback
//! - [`RequestClient`] and [`ApiError`] - The HTTP boundary
//! - [`Auth`] and [`Session`] - Authentication
//! - [`Books`] and [`ListItems`] - Domain services

pub use crate::api::{ApiError, RequestClient, RequestOptions, ReqwestTransport, Transport};
pub use crate::auth::{Auth, AuthError, Credentials, MemoryTokenStore, Session, TokenStore, User};
pub use crate::books::{Book, Books};
pub use crate::config::ClientConfig;
pub use crate::list_items::{ListItem, ListItemUpdate, ListItems, NewListItem};
pub use crate::mutation::{Mutation, MutationConfig};
pub use crate::operation::{AsyncOperation, AsyncState, Status};
pub use crate::query::{Query, QueryClient, QueryConfig, QueryError, QueryKey};
