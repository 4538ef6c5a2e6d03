use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::Session;

use super::error::ApiError;
use super::request::{HttpRequest, RequestOptions};
use super::transport::Transport;

/// The HTTP boundary of the crate.
///
/// Every call goes to `<base_url>/<endpoint>`. Bearer auth is attached from the
/// per-request token or the one bound with [`with_token`](Self::with_token).
/// A 401 tears down the [`Session`] before the error is returned.
///
/// # Example
///
/// ```rust,no_run
/// use bookshelf::api::{RequestClient, RequestOptions, ReqwestTransport};
/// use bookshelf::auth::{MemoryTokenStore, Session};
/// use bookshelf::query::QueryClient;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), bookshelf::api::ApiError> {
/// let session = Session::new(
///     Arc::new(MemoryTokenStore::new()),
///     Arc::new(QueryClient::new()),
/// );
/// let client = RequestClient::new(Arc::new(ReqwestTransport::new()), "http://localhost:3000", session)
///     .with_token("secret");
///
/// let books = client.request("books?query=", RequestOptions::new()).await?;
/// println!("{books}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RequestClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    session: Session,
    token: Option<String>,
}

impl RequestClient {
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>, session: Session) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            session,
            token: None,
        }
    }

    /// Binds a token sent with every request that doesn't carry its own.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Points the same transport and session at another base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Builds the request that [`request`](Self::request) would send.
    pub fn build_request(&self, endpoint: &str, options: RequestOptions) -> HttpRequest {
        let method = options.resolved_method();
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );

        let mut request = HttpRequest {
            method,
            url,
            headers: Vec::new(),
            body: None,
        };

        if let Some(token) = options.token.as_deref().or(self.token.as_deref()) {
            request.set_header("Authorization", format!("Bearer {token}"));
        }
        if let Some(data) = options.data {
            request.set_header("Content-Type", "application/json");
            request.body = Some(data);
        }
        for (name, value) in options.headers {
            request.set_header(name, value);
        }
        request
    }

    /// Sends a request and returns the parsed JSON body.
    ///
    /// An empty 2xx body is returned as `null`.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Unauthorized`] on 401, after logging the session out
    /// - [`ApiError::Response`] on any other non-2xx status
    /// - [`ApiError::Network`] if the transport fails
    /// - [`ApiError::Decode`] if a 2xx body is not JSON
    pub async fn request(&self, endpoint: &str, options: RequestOptions) -> Result<Value, ApiError> {
        let request = self.build_request(endpoint, options);
        debug!(method = %request.method, url = %request.url, "sending request");

        let response = self.transport.send(request).await?;

        if response.status == 401 {
            warn!(endpoint, "request unauthorized, ending session");
            if let Err(error) = self.session.logout() {
                warn!(%error, "failed to clear session");
            }
            return Err(ApiError::Unauthorized);
        }

        let body = parse_body(&response.body);
        if response.is_success() {
            body.map_err(ApiError::from)
        } else {
            debug!(endpoint, status = response.status, "request failed");
            Err(ApiError::Response {
                status: response.status,
                body: body.unwrap_or(Value::Null),
            })
        }
    }

    /// Sends a request and decodes the body into `T`.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request), plus [`ApiError::Decode`] when the
    /// body does not match `T`.
    pub async fn request_json<T>(&self, endpoint: &str, options: RequestOptions) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let body = self.request(endpoint, options).await?;
        Ok(serde_json::from_value(body)?)
    }
}

fn parse_body(body: &str) -> Result<Value, serde_json::Error> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::auth::MemoryTokenStore;
    use crate::query::QueryClient;
    use reqwest::Method;
    use serde_json::json;

    fn client() -> RequestClient {
        let session = Session::new(
            Arc::new(MemoryTokenStore::new()),
            Arc::new(QueryClient::new()),
        );
        RequestClient::new(Arc::new(MockTransport::new()), "http://api.test/", session)
    }

    #[test]
    fn test_build_get_request() {
        let request = client().build_request("/books", RequestOptions::new());
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url, "http://api.test/books");
        assert!(request.headers.is_empty());
        assert_eq!(request.body, None);
    }

    #[test]
    fn test_build_request_with_data_and_token() {
        let request = client().build_request(
            "list-items",
            RequestOptions::new()
                .token("abc")
                .data(json!({"bookId": "b1"})),
        );
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.header("authorization"), Some("Bearer abc"));
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body, Some(json!({"bookId": "b1"})));
    }

    #[test]
    fn test_bound_token_and_overrides() {
        let client = client().with_token("bound");
        assert_eq!(client.token(), Some("bound"));

        let request = client.build_request("me", RequestOptions::new());
        assert_eq!(request.header("Authorization"), Some("Bearer bound"));

        let request = client.build_request(
            "me",
            RequestOptions::new()
                .token("explicit")
                .header("authorization", "Custom x")
                .method(Method::DELETE),
        );
        assert_eq!(request.method, Method::DELETE);
        assert_eq!(request.header("Authorization"), Some("Custom x"));
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body("").ok(), Some(Value::Null));
        assert_eq!(parse_body(r#"{"a":1}"#).ok(), Some(json!({"a": 1})));
        assert!(parse_body("<html>").is_err());
    }
}
