//! HTTP boundary: request building, transports, and error normalization.
//!
//! [`RequestClient`] turns an endpoint plus [`RequestOptions`] into an
//! [`HttpRequest`], hands it to a [`Transport`], and normalizes the answer:
//!
//! - 2xx: the parsed JSON body (`null` when empty)
//! - 401: the session is logged out and [`ApiError::Unauthorized`] returned
//! - anything else: [`ApiError::Response`] with the parsed body
//!
//! [`ReqwestTransport`] talks to a real server; [`mock::MockTransport`]
//! scripts answers for tests.

mod client;
mod error;
pub mod mock;
mod request;
mod transport;

pub use client::RequestClient;
pub use error::ApiError;
pub use request::{HttpRequest, HttpResponse, RequestOptions};
pub use transport::{ReqwestTransport, Transport};
