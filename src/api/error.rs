use serde_json::Value;
use thiserror::Error;

/// Error type for requests made through the [`RequestClient`](super::RequestClient).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The server answered 401. The session has already been torn down.
    #[error("Please re-authenticate.")]
    Unauthorized,

    /// The server answered with a non-2xx status other than 401.
    #[error("Request failed with status {status}: {body}")]
    Response {
        status: u16,
        /// Parsed response body, or `null` when it was not JSON.
        body: Value,
    },

    /// The request never produced a response.
    #[error("Network error: {0}")]
    Network(String),

    /// A body could not be encoded or decoded.
    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Returns the HTTP status behind this error, if there is one.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::Response { status, .. } => Some(*status),
            Self::Network(_) | Self::Decode(_) => None,
        }
    }

    /// Returns the server's `message` field for response errors.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Response { body, .. } => body.get("message").and_then(Value::as_str),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unauthorized_message() {
        assert_eq!(ApiError::Unauthorized.to_string(), "Please re-authenticate.");
        assert_eq!(ApiError::Unauthorized.status(), Some(401));
    }

    #[test]
    fn test_response_message() {
        let error = ApiError::Response {
            status: 400,
            body: json!({"status": 400, "message": "username required"}),
        };
        assert_eq!(error.status(), Some(400));
        assert_eq!(error.message(), Some("username required"));
    }

    #[test]
    fn test_network_has_no_status() {
        let error = ApiError::Network("connection refused".to_string());
        assert_eq!(error.status(), None);
        assert_eq!(error.message(), None);
    }
}
