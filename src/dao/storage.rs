use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result alias for auth provider operations.
pub type AuthResult<T> = Result<T, AuthProviderError>;

/// Error raised by storage backends regardless of the underlying implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or answered with a transport failure.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What failed.
        message: String,
        /// Underlying transport error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The backend answered but refused the operation (constraint, policy, bad filter).
    #[error("storage rejected the operation: {message}")]
    Rejected {
        /// Message returned by the backend.
        message: String,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a rejection carrying the backend message.
    pub fn rejected(message: impl Into<String>) -> Self {
        StorageError::Rejected {
            message: message.into(),
        }
    }
}

/// Error raised by authentication providers.
///
/// `Rejected` keeps the provider's own message so callers can classify it
/// (unverified account, bad credentials); `Unavailable` covers transport failures.
#[derive(Debug, Error)]
pub enum AuthProviderError {
    /// The provider refused the request.
    #[error("{message}")]
    Rejected {
        /// Provider message, kept verbatim.
        message: String,
    },
    /// The provider could not be reached.
    #[error("auth provider unavailable: {message}")]
    Unavailable {
        /// What failed.
        message: String,
        /// Underlying transport error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl AuthProviderError {
    /// Construct a rejection carrying the provider message.
    pub fn rejected(message: impl Into<String>) -> Self {
        AuthProviderError::Rejected {
            message: message.into(),
        }
    }

    /// Construct an unavailable error from any transport failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        AuthProviderError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
