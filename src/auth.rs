//! Authentication: token persistence, session teardown, and the auth provider.
//!
//! [`Auth`] tracks the current [`User`] with an [`AsyncOperation`]:
//!
//! - [`Auth::bootstrap`] reads the persisted token and asks the API who it
//!   belongs to, moving through pending to resolved (`Some(user)` or `None`)
//!   or rejected.
//! - [`Auth::login`] and [`Auth::register`] persist the returned token and
//!   resolve the state with the user.
//! - [`Auth::logout`] ends the [`Session`] (token and query cache) and
//!   resolves the state with `None`.
//!
//! # Example
//!
//! ```rust,no_run
//! use bookshelf::api::ReqwestTransport;
//! use bookshelf::auth::{Auth, Credentials, FileTokenStore, MemoryTokenStore, Session, TokenStore};
//! use bookshelf::config::ClientConfig;
//! use bookshelf::query::QueryClient;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let tokens: Arc<dyn TokenStore> = match FileTokenStore::in_data_dir() {
//!     Some(store) => Arc::new(store),
//!     None => Arc::new(MemoryTokenStore::new()),
//! };
//! let session = Session::new(tokens, Arc::new(QueryClient::new()));
//! let auth = Auth::new(&config, Arc::new(ReqwestTransport::from_config(&config)?), session);
//!
//! if auth.bootstrap().await?.is_none() {
//!     auth.login(&Credentials::new("reader", "hunter2")).await?;
//! }
//! let client = auth.client().expect("logged in");
//! # Ok(())
//! # }
//! ```

mod session;
mod token;

use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{ApiError, RequestClient, RequestOptions, Transport};
use crate::config::ClientConfig;
use crate::operation::{AsyncOperation, AsyncState, RunHandle};

pub use session::Session;
pub use token::{FileTokenStore, MemoryTokenStore, TOKEN_KEY, TokenStore, TokenStoreError};

/// Error type for authentication.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] TokenStoreError),
}

/// The authenticated user as returned by the auth endpoints and `me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub token: String,
}

/// Username and password for login and registration.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: User,
}

/// The auth provider.
///
/// The current user lives in the [`Session`], so a 401 on any request made
/// through [`Auth::client`] signs the user out as well.
#[derive(Debug)]
pub struct Auth {
    api: RequestClient,
    auth: RequestClient,
}

impl Auth {
    /// Creates an idle provider. Call [`bootstrap`](Self::bootstrap) to load
    /// the persisted user.
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>, session: Session) -> Self {
        let api = RequestClient::new(transport, config.api_url.clone(), session);
        let auth = api.clone().with_base_url(config.auth_url.clone());
        Self { api, auth }
    }

    pub const fn session(&self) -> &Session {
        self.api.session()
    }

    fn current(&self) -> &AsyncOperation<Option<User>, AuthError> {
        self.session().user()
    }

    /// Loads the user behind the persisted token.
    ///
    /// Resolves with `None` when no token is stored. A rejected token ends the
    /// session and rejects with [`ApiError::Unauthorized`].
    pub fn bootstrap(&self) -> RunHandle<Option<User>, AuthError> {
        let api = self.api.clone();
        self.current().run(async move {
            let Some(token) = api.session().token()? else {
                debug!("no persisted token");
                return Ok(None);
            };
            let envelope: UserEnvelope = api
                .request_json("me", RequestOptions::new().token(token))
                .await?;
            Ok(Some(envelope.user))
        })
    }

    /// Logs in and makes the returned user current.
    ///
    /// A failed attempt leaves the current state untouched.
    ///
    /// # Errors
    ///
    /// Returns the request error, or a storage error if the token cannot be
    /// persisted.
    pub async fn login(&self, credentials: &Credentials) -> Result<User, AuthError> {
        self.authenticate("login", credentials).await
    }

    /// Registers a new account and makes it current.
    ///
    /// # Errors
    ///
    /// Same as [`login`](Self::login).
    pub async fn register(&self, credentials: &Credentials) -> Result<User, AuthError> {
        self.authenticate("register", credentials).await
    }

    async fn authenticate(&self, endpoint: &str, credentials: &Credentials) -> Result<User, AuthError> {
        let body = json!({
            "username": credentials.username,
            "password": credentials.password,
        });
        let envelope: UserEnvelope = self
            .auth
            .request_json(endpoint, RequestOptions::new().data(body))
            .await?;

        let user = envelope.user;
        self.session().tokens().set_token(&user.token)?;
        info!(username = %user.username, endpoint, "authenticated");
        self.current().set_data(Some(user.clone()));
        Ok(user)
    }

    /// Ends the session and clears the current user.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the token could not be removed. The cache and
    /// the current user are cleared regardless.
    pub fn logout(&self) -> Result<(), AuthError> {
        let result = self.session().logout();
        if self.current().state() != AsyncState::Resolved(None) {
            self.current().set_data(None);
        }
        result.map_err(AuthError::from)
    }

    /// The current user, if one is logged in.
    pub fn user(&self) -> Option<User> {
        self.current().state().into_data().flatten()
    }

    pub fn state(&self) -> AsyncState<Option<User>, AuthError> {
        self.current().state()
    }

    pub fn subscribe(&self) -> BoxStream<'static, AsyncState<Option<User>, AuthError>> {
        self.current().subscribe()
    }

    /// A request client bound to the current user's token.
    pub fn client(&self) -> Option<RequestClient> {
        self.user().map(|user| self.api.clone().with_token(user.token))
    }
}
