//! Error types shared by the Supabase backend implementation.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::dao::storage::{AuthProviderError, StorageError};

/// Convenient result alias returning [`SupabaseError`] failures.
pub type SupabaseResult<T> = Result<T, SupabaseError>;

/// Failures that can occur while interacting with the hosted backend.
#[derive(Debug, Error)]
pub enum SupabaseError {
    /// Configuration is incomplete or malformed.
    #[error("invalid backend configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: &'static str,
    },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build backend HTTP client")]
    ClientBuilder {
        /// Underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent.
    #[error("failed to send backend request to `{path}`")]
    RequestSend {
        /// Request path.
        path: String,
        /// Underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },
    /// The backend answered with a non-success status.
    #[error("backend responded {status} for `{path}`: {message}")]
    RequestStatus {
        /// Request path.
        path: String,
        /// Response status.
        status: StatusCode,
        /// Message extracted from the response body.
        message: String,
    },
    /// Response payload could not be parsed.
    #[error("failed to decode backend response for `{path}`")]
    DecodeResponse {
        /// Request path.
        path: String,
        /// Underlying decode error.
        #[source]
        source: reqwest::Error,
    },
    /// Opening or using the realtime websocket failed.
    #[error("realtime channel failure")]
    Realtime {
        /// Underlying websocket error.
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    /// Encoding a realtime frame failed.
    #[error("failed to encode realtime frame")]
    EncodeFrame {
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },
}

impl SupabaseError {
    /// Whether the backend understood the request and refused it.
    fn is_rejection(&self) -> bool {
        matches!(self, SupabaseError::RequestStatus { status, .. } if status.is_client_error())
    }

    fn backend_message(&self) -> Option<&str> {
        match self {
            SupabaseError::RequestStatus { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl From<SupabaseError> for StorageError {
    fn from(err: SupabaseError) -> Self {
        if err.is_rejection() {
            let message = err.backend_message().unwrap_or_default().to_string();
            StorageError::rejected(message)
        } else {
            StorageError::unavailable(err.to_string(), err)
        }
    }
}

impl From<SupabaseError> for AuthProviderError {
    fn from(err: SupabaseError) -> Self {
        if err.is_rejection() {
            let message = err.backend_message().unwrap_or_default().to_string();
            AuthProviderError::rejected(message)
        } else {
            AuthProviderError::unavailable(err.to_string(), err)
        }
    }
}

/// Error envelope used across the auth, rest and storage services.
#[derive(Debug, Default, Deserialize)]
pub(super) struct ErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorBody {
    /// Most specific human-readable message in the body.
    pub(super) fn into_message(self) -> Option<String> {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
            .filter(|message| !message.trim().is_empty())
    }
}

/// Extract the backend message from a raw error body, falling back to the status text.
pub(super) fn message_from_body(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unexpected response")
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_most_specific_message() {
        let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        assert_eq!(
            message_from_body(StatusCode::BAD_REQUEST, body),
            "Invalid login credentials"
        );
        let body = r#"{"code":400,"error_code":"email_not_confirmed","msg":"Email not confirmed"}"#;
        assert_eq!(message_from_body(StatusCode::BAD_REQUEST, body), "Email not confirmed");
        assert_eq!(message_from_body(StatusCode::BAD_GATEWAY, "<html>"), "Bad Gateway");
    }

    #[test]
    fn client_errors_become_rejections() {
        let err = SupabaseError::RequestStatus {
            path: "rest/v1/games".into(),
            status: StatusCode::CONFLICT,
            message: "duplicate key".into(),
        };
        assert!(matches!(StorageError::from(err), StorageError::Rejected { message } if message == "duplicate key"));

        let err = SupabaseError::RequestStatus {
            path: "rest/v1/games".into(),
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "down".into(),
        };
        assert!(matches!(StorageError::from(err), StorageError::Unavailable { .. }));
    }
}
