use std::sync::Arc;

use tracing::debug;

use crate::operation::{AsyncOperation, AsyncState};
use crate::query::QueryClient;

use super::token::{TokenStore, TokenStoreError};
use super::{AuthError, User};

/// The current user of a session.
pub(crate) type CurrentUser = AsyncOperation<Option<User>, AuthError>;

/// The authenticated scope shared by every request client.
///
/// Ending the session forgets the token, drops every cached query and signs
/// the current user out, so no data of one user survives into the next login.
#[derive(Debug, Clone)]
pub struct Session {
    tokens: Arc<dyn TokenStore>,
    queries: Arc<QueryClient>,
    user: Arc<CurrentUser>,
}

impl Session {
    pub fn new(tokens: Arc<dyn TokenStore>, queries: Arc<QueryClient>) -> Self {
        Self {
            tokens,
            queries,
            user: Arc::new(AsyncOperation::new()),
        }
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub const fn queries(&self) -> &Arc<QueryClient> {
        &self.queries
    }

    /// Returns the persisted token, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the token store cannot be read.
    pub fn token(&self) -> Result<Option<String>, TokenStoreError> {
        self.tokens.token()
    }

    pub(crate) fn user(&self) -> &CurrentUser {
        &self.user
    }

    /// Clears the query cache, signs out a resolved user, then clears the
    /// persisted token.
    ///
    /// A user lookup still in flight is left to settle on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the token could not be removed. The cache and the
    /// user are cleared regardless.
    pub fn logout(&self) -> Result<(), TokenStoreError> {
        debug!("ending session");
        self.queries.clear();
        if matches!(self.user.state(), AsyncState::Resolved(Some(_))) {
            self.user.set_data(None);
        }
        self.tokens.clear()
    }
}
