use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use thiserror::Error;
use tracing::trace;

/// Fixed storage key of the persisted auth token.
pub const TOKEN_KEY: &str = "__auth_provider_token__";

/// Error type for token persistence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenStoreError {
    #[error("Token storage failed: {0}")]
    Io(String),

    #[error("Stored token is unreadable: {0}")]
    Decode(String),
}

impl From<io::Error> for TokenStoreError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::InvalidData => Self::Decode(error.to_string()),
            _ => Self::Io(error.to_string()),
        }
    }
}

/// Where the auth token lives between runs.
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    /// Returns the stored token, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    fn token(&self) -> Result<Option<String>, TokenStoreError>;

    /// Replaces the stored token.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn set_token(&self, token: &str) -> Result<(), TokenStoreError>;

    /// Forgets the stored token. Clearing an empty store succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn clear(&self) -> Result<(), TokenStoreError>;
}

/// Stores the token in a file named [`TOKEN_KEY`] inside a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(TOKEN_KEY),
        }
    }

    /// A store under the platform data directory, e.g. `~/.local/share/bookshelf`.
    ///
    /// Returns `None` if the platform has no data directory.
    pub fn in_data_dir() -> Option<Self> {
        dirs::data_dir().map(|dir| Self::new(dir.join("bookshelf")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn token(&self) -> Result<Option<String>, TokenStoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn set_token(&self, token: &str) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, token)?;
        trace!(path = %self.path.display(), "token stored");
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                trace!(path = %self.path.display(), "token cleared");
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// Keeps the token in memory. Useful for tests and short-lived sessions.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: DashMap<&'static str, String>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.entries.insert(TOKEN_KEY, token.into());
        store
    }
}

impl TokenStore for MemoryTokenStore {
    fn token(&self) -> Result<Option<String>, TokenStoreError> {
        Ok(self.entries.get(TOKEN_KEY).map(|token| token.value().clone()))
    }

    fn set_token(&self, token: &str) -> Result<(), TokenStoreError> {
        self.entries.insert(TOKEN_KEY, token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        self.entries.remove(TOKEN_KEY);
        Ok(())
    }
}
