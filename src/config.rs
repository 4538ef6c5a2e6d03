use std::time::Duration;

use thiserror::Error;

/// Environment variable holding the API base URL.
pub const API_URL_VAR: &str = "BOOKSHELF_API_URL";
/// Environment variable holding the auth base URL. Defaults to the API URL.
pub const AUTH_URL_VAR: &str = "BOOKSHELF_AUTH_URL";
/// Environment variable holding the request timeout in seconds.
pub const TIMEOUT_VAR: &str = "BOOKSHELF_TIMEOUT_SECS";

/// Error type for client configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("BOOKSHELF_API_URL is not set")]
    MissingApiUrl,

    #[error("BOOKSHELF_TIMEOUT_SECS is not a number of seconds: {0}")]
    InvalidTimeout(String),
}

/// Where the client talks to and how long it waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the books and list-items API.
    pub api_url: String,
    /// Base URL of the login and register endpoints.
    pub auth_url: String,
    /// Per-request timeout of the production transport.
    pub timeout: Duration,
}

impl ClientConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// A configuration using `api_url` for both the API and auth endpoints.
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into();
        Self {
            auth_url: api_url.clone(),
            api_url,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`from_lookup`](Self::from_lookup).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingApiUrl`] if no API URL is set and
    /// [`ConfigError::InvalidTimeout`] if the timeout is not a whole number.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_url = present(API_URL_VAR).ok_or(ConfigError::MissingApiUrl)?;
        let mut config = Self::new(api_url);

        if let Some(auth_url) = present(AUTH_URL_VAR) {
            config.auth_url = auth_url;
        }
        if let Some(timeout) = present(TIMEOUT_VAR) {
            let seconds = timeout
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidTimeout(timeout.clone()))?;
            config.timeout = Duration::from_secs(seconds);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_new_uses_api_url_for_auth() {
        let config = ClientConfig::new("http://api");
        assert_eq!(config.auth_url, "http://api");
        assert_eq!(config.timeout, ClientConfig::DEFAULT_TIMEOUT);

        let config = config
            .with_auth_url("http://auth")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.auth_url, "http://auth");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_lookup() {
        let config = ClientConfig::from_lookup(lookup(&[
            (API_URL_VAR, "http://api"),
            (AUTH_URL_VAR, "http://auth"),
            (TIMEOUT_VAR, "10"),
        ]))
        .expect("config should load");

        assert_eq!(config.api_url, "http://api");
        assert_eq!(config.auth_url, "http://auth");
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_from_lookup_missing_api_url() {
        assert_eq!(
            ClientConfig::from_lookup(lookup(&[(API_URL_VAR, " ")])),
            Err(ConfigError::MissingApiUrl)
        );
    }

    #[test]
    fn test_from_lookup_invalid_timeout() {
        let result = ClientConfig::from_lookup(lookup(&[
            (API_URL_VAR, "http://api"),
            (TIMEOUT_VAR, "soon"),
        ]));
        assert_eq!(result, Err(ConfigError::InvalidTimeout("soon".to_string())));
    }
}
