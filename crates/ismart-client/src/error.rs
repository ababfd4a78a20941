//! Error types for iSmart client operations

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for iSmart client operations
pub type Result<T> = std::result::Result<T, IsmartClientError>;

/// Errors that can occur during iSmart client operations
#[derive(Error, Debug)]
pub enum IsmartClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A request header name or value could not be encoded
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// A request body could not be encoded as a JSON object
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An authenticated call was attempted without a session
    #[error("Client not authenticated, please call login first")]
    AuthenticationRequired,

    /// The server answered 401. A re-login has already been attempted;
    /// the original call was not resubmitted.
    #[error("Session expired: {message}")]
    SessionExpired { message: String },

    /// The server returned a non-recoverable application code
    #[error("API error {code}: {message}")]
    ApplicationError { code: i64, message: String },

    /// The response body was malformed or incomplete
    #[error("Failed to deserialize response: {message}. Original json was {raw}")]
    Deserialization { message: String, raw: String },

    /// The polling deadline passed before the server produced a result
    #[error("Timed out after {attempts} attempts ({elapsed:?})")]
    Timeout { attempts: u32, elapsed: Duration },

    /// The caller cancelled the polling loop
    #[error("Operation cancelled")]
    Cancelled,
}

impl IsmartClientError {
    /// Create an application error from a server code and message
    pub fn application(code: i64, message: impl Into<String>) -> Self {
        Self::ApplicationError {
            code,
            message: message.into(),
        }
    }

    /// Create a deserialization error carrying the raw response text
    pub fn deserialization(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Deserialization {
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Server return code associated with this error, if any
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::SessionExpired { .. } => Some(401),
            Self::ApplicationError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the caller may resubmit the failed call as-is.
    ///
    /// Only true after a 401, where the client has already logged in again.
    pub fn is_retryable_by_caller(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(IsmartClientError::application(7, "busy").code(), Some(7));
        assert_eq!(
            IsmartClientError::SessionExpired {
                message: "expired".into()
            }
            .code(),
            Some(401)
        );
        assert_eq!(IsmartClientError::Cancelled.code(), None);
    }

    #[test]
    fn test_only_session_expired_is_resubmittable() {
        assert!(IsmartClientError::SessionExpired {
            message: "x".into()
        }
        .is_retryable_by_caller());
        assert!(!IsmartClientError::application(2, "x").is_retryable_by_caller());
        assert!(!IsmartClientError::Timeout {
            attempts: 6,
            elapsed: Duration::from_secs(30)
        }
        .is_retryable_by_caller());
    }

    #[test]
    fn test_deserialization_message_includes_raw() {
        let err = IsmartClientError::deserialization("missing 'data' field", "{\"code\":0}");
        assert!(err.to_string().contains("{\"code\":0}"));
    }
}
