//! Scripted transport for testing.
//!
//! [`MockTransport`] answers requests from a list of routes, enabling
//! deterministic tests of everything above the HTTP boundary without a server.
//!
//! # Basic Usage
//!
//! ```
//! use bookshelf::api::mock::MockTransport;
//! use reqwest::Method;
//! use serde_json::json;
//!
//! let mock = MockTransport::new();
//! mock.respond(Method::GET, "list-items", 200, json!({"listItems": []}));
//! mock.respond_once(Method::POST, "list-items", 400, json!({"message": "bad"}));
//! ```
//!
//! # Controlling settlement
//!
//! [`defer`](MockTransport::defer) parks the next matching request until the
//! test resolves or rejects it, which is how interleavings of optimistic
//! writes and server answers are tested:
//!
//! ```no_run
//! # use bookshelf::api::mock::MockTransport;
//! # use reqwest::Method;
//! # use serde_json::json;
//! # async fn example() {
//! let mock = MockTransport::new();
//! let pending = mock.defer(Method::PUT, "list-items/1");
//!
//! // ... start a mutation, inspect the optimistic cache ...
//!
//! pending.resolve(200, json!({"listItem": {}}));
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::trace;

use super::error::ApiError;
use super::request::{HttpRequest, HttpResponse};
use super::transport::Transport;

type Reply = Result<HttpResponse, ApiError>;

enum Answer {
    Ready(Reply),
    Deferred(Option<oneshot::Receiver<Reply>>),
}

struct Route {
    method: Method,
    path: String,
    answer: Answer,
    once: bool,
}

impl Route {
    fn matches(&self, request: &HttpRequest) -> bool {
        self.method == request.method
            && request
                .url
                .ends_with(&format!("/{}", self.path.trim_start_matches('/')))
    }
}

#[derive(Default)]
struct Inner {
    routes: Vec<Route>,
    requests: Vec<HttpRequest>,
}

/// A transport that answers from scripted routes and records every request.
///
/// A route matches when the method is equal and the request URL ends with
/// `/<path>`. The most recently added matching route wins. Requests without a
/// route get a 404. Clones share routes and the request log.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

/// A parked response created by [`MockTransport::defer`].
#[derive(Debug)]
pub struct Deferred {
    tx: oneshot::Sender<Reply>,
}

impl Deferred {
    /// Lets the parked request complete with `status` and a JSON `body`.
    pub fn resolve(self, status: u16, body: Value) {
        let _ = self.tx.send(Ok(HttpResponse::json(status, &body)));
    }

    /// Lets the parked request fail at the transport level.
    pub fn reject(self, error: ApiError) {
        let _ = self.tx.send(Err(error));
    }
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, method: Method, path: &str, answer: Answer, once: bool) {
        self.lock().routes.push(Route {
            method,
            path: path.to_string(),
            answer,
            once,
        });
    }

    /// Answers every matching request with `status` and a JSON `body`.
    pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) {
        let answer = Answer::Ready(Ok(HttpResponse::json(status, &body)));
        self.route(method, path, answer, false);
    }

    /// Answers the next matching request only.
    pub fn respond_once(&self, method: Method, path: &str, status: u16, body: Value) {
        let answer = Answer::Ready(Ok(HttpResponse::json(status, &body)));
        self.route(method, path, answer, true);
    }

    /// Answers the next matching request with a raw, possibly non-JSON body.
    pub fn respond_raw_once(&self, method: Method, path: &str, status: u16, body: &str) {
        let answer = Answer::Ready(Ok(HttpResponse::new(status, body)));
        self.route(method, path, answer, true);
    }

    /// Fails every matching request at the transport level.
    pub fn fail(&self, method: Method, path: &str, error: ApiError) {
        self.route(method, path, Answer::Ready(Err(error)), false);
    }

    /// Parks the next matching request until the returned handle settles it.
    pub fn defer(&self, method: Method, path: &str) -> Deferred {
        let (tx, rx) = oneshot::channel();
        self.route(method, path, Answer::Deferred(Some(rx)), true);
        Deferred { tx }
    }

    /// Every request sent so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.lock().requests.clone()
    }

    /// Number of requests sent with `method` to a URL ending in `/<path>`.
    pub fn count(&self, method: &Method, path: &str) -> usize {
        let suffix = format!("/{}", path.trim_start_matches('/'));
        self.lock()
            .requests
            .iter()
            .filter(|request| request.method == *method && request.url.ends_with(&suffix))
            .count()
    }

    fn answer(&self, request: HttpRequest) -> Answer {
        let mut inner = self.lock();
        let matched = inner.routes.iter().rposition(|route| route.matches(&request));
        trace!(method = %request.method, url = %request.url, matched = matched.is_some(), "mock request");
        inner.requests.push(request);

        let Some(index) = matched else {
            return Answer::Ready(Ok(HttpResponse::json(
                404,
                &json!({"message": "no mock route"}),
            )));
        };

        if inner.routes[index].once {
            return inner.routes.remove(index).answer;
        }
        match &inner.routes[index].answer {
            Answer::Ready(reply) => Answer::Ready(reply.clone()),
            Answer::Deferred(_) => Answer::Deferred(None),
        }
    }
}

impl Transport for MockTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, ApiError>> {
        let answer = self.answer(request);
        Box::pin(async move {
            match answer {
                Answer::Ready(reply) => reply,
                Answer::Deferred(Some(rx)) => rx.await.unwrap_or_else(|_| {
                    Err(ApiError::Network("deferred response dropped".to_string()))
                }),
                Answer::Deferred(None) => {
                    Err(ApiError::Network("deferred response already taken".to_string()))
                }
            }
        })
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MockTransport")
            .field("routes", &inner.routes.len())
            .field("requests", &inner.requests.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            method: Method::GET,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn test_unmatched_request_is_not_found() {
        let mock = MockTransport::new();
        let response = mock
            .send(get("http://api/books"))
            .await
            .expect("mock should answer");
        assert_eq!(response.status, 404);
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_respond_once_then_fallback() {
        let mock = MockTransport::new();
        mock.respond(Method::GET, "books", 200, json!({"books": []}));
        mock.respond_once(Method::GET, "books", 500, json!({"message": "boom"}));

        let first = mock.send(get("http://api/books")).await.expect("answer");
        let second = mock.send(get("http://api/books")).await.expect("answer");
        assert_eq!(first.status, 500);
        assert_eq!(second.status, 200);
        assert_eq!(mock.count(&Method::GET, "books"), 2);
    }

    #[tokio::test]
    async fn test_path_must_match_suffix() {
        let mock = MockTransport::new();
        mock.respond(Method::GET, "list-items", 200, json!({}));

        let response = mock
            .send(get("http://api/list-items/1"))
            .await
            .expect("answer");
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_deferred_response() {
        let mock = MockTransport::new();
        let pending = mock.defer(Method::GET, "me");

        let send = mock.send(get("http://api/me"));
        pending.resolve(200, json!({"user": null}));

        let response = send.await.expect("answer");
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"user":null}"#);
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let mock = MockTransport::new();
        mock.fail(Method::GET, "me", ApiError::Network("offline".to_string()));

        let result = mock.send(get("http://api/me")).await;
        assert_eq!(result, Err(ApiError::Network("offline".to_string())));
    }
}
