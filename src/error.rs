//! Error types for feed and counter fetches
//!
//! Errors are classified by recoverability:
//! - Retryable: Network issues, timeouts, server errors
//! - NonRetryable: Malformed responses, configuration errors, storage failures
//! - RequiresUserAction: Missing or rejected credentials

use std::path::PathBuf;
use thiserror::Error;

/// Error types for backend calls and local persistence
#[derive(Debug, Error)]
pub enum FeedError {
    // Retryable errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Backend returned {status}: {body}")]
    Http { status: u16, body: String },

    // Non-retryable errors
    #[error("Failed to decode backend response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config file not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    // Requires user action
    #[error("Not signed in")]
    NoSession,

    #[error("Credential rejected by backend")]
    Unauthorized,
}

impl FeedError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Network(_) | FeedError::Timeout(_) => true,
            FeedError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if this error requires user action to resolve
    pub fn requires_user_action(&self) -> bool {
        matches!(self, FeedError::NoSession | FeedError::Unauthorized)
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            FeedError::Network(_) => "Check your internet connection and try again.",
            FeedError::Timeout(_) => "The server took too long to answer. Try again.",
            FeedError::Http { status, .. } if *status == 429 => {
                "Too many requests. Wait a moment and try again."
            }
            FeedError::Http { .. } => "The server reported a problem. Try again shortly.",
            FeedError::Decode(_) => "The server sent an unexpected response. Reload the page.",
            FeedError::Config(_) | FeedError::ConfigNotFound(_) => {
                "Check your configuration in ~/.leadpulse/config.json"
            }
            FeedError::InvalidRequest(_) => "Check the entered value and submit again.",
            FeedError::Io(_) => "Check file permissions and disk space.",
            FeedError::Storage(_) => "Local state could not be saved. It will be rebuilt.",
            FeedError::NoSession => "Sign in to continue.",
            FeedError::Unauthorized => "Your session expired. Sign in again.",
        }
    }
}

impl From<std::io::Error> for FeedError {
    fn from(err: std::io::Error) -> Self {
        FeedError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FeedError::Decode(err.to_string())
        } else {
            FeedError::Network(err.to_string())
        }
    }
}

/// Serializable error shown inline next to a retry action
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfacedError {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    RequiresUserAction,
}

impl From<&FeedError> for SurfacedError {
    fn from(err: &FeedError) -> Self {
        let error_type = if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        };

        SurfacedError {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let err = FeedError::Http {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!err.requires_user_action());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = FeedError::Http {
            status: 404,
            body: "missing".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn surfaced_error_classifies_auth_failures() {
        let surfaced = SurfacedError::from(&FeedError::Unauthorized);
        assert_eq!(surfaced.error_type, ErrorType::RequiresUserAction);
        assert!(!surfaced.can_retry);
        assert_eq!(surfaced.recovery_suggestion, "Your session expired. Sign in again.");
    }

    #[test]
    fn surfaced_error_serializes_camel_case() {
        let surfaced = SurfacedError::from(&FeedError::Timeout(10));
        let json = serde_json::to_value(&surfaced).unwrap();
        assert_eq!(json["errorType"], "retryable");
        assert_eq!(json["canRetry"], true);
        assert_eq!(json["message"], "Request timed out after 10 seconds");
    }
}
