use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::{AuthProviderError, StorageError},
    state::notice::Notice,
};

/// Message shown when the provider refuses a sign-in because the email is not confirmed.
pub const UNVERIFIED_MESSAGE: &str =
    "Tu cuenta no está verificada. Revisa tu correo electrónico y confirma tu cuenta.";
/// Message shown when an identity was created but its profile row could not be stored.
pub const PROFILE_INCONSISTENCY_MESSAGE: &str = "Error al registrar el usuario en la base de datos.";

/// Errors surfaced by the session coordinator to login and register forms.
///
/// Every variant displays a message that can be shown as is; transport details
/// are kept out of the display and only logged.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The provider holds the identity until its email is confirmed.
    #[error("{}", UNVERIFIED_MESSAGE)]
    Unverified,
    /// The provider refused the credentials; carries its message verbatim.
    #[error("{0}")]
    Rejected(String),
    /// The operation needs an authenticated session.
    #[error("Debes iniciar sesión para continuar.")]
    NoSession,
    /// The identity exists but its profile row could not be written.
    #[error("{}", PROFILE_INCONSISTENCY_MESSAGE)]
    ProfileInconsistency(String),
    /// Missing or blank form fields.
    #[error("{0}")]
    InvalidInput(String),
    /// The auth provider could not be reached.
    #[error("No se pudo contactar con el servicio de autenticación. Inténtalo de nuevo más tarde.")]
    Unavailable(String),
}

impl AuthError {
    /// Whether a provider message means the account still awaits email confirmation.
    pub fn is_unverified_message(message: &str) -> bool {
        let lowered = message.to_lowercase();
        lowered.contains("confirm") || lowered.contains("verif")
    }
}

impl From<AuthProviderError> for AuthError {
    fn from(err: AuthProviderError) -> Self {
        match err {
            AuthProviderError::Rejected { message } if AuthError::is_unverified_message(&message) => {
                AuthError::Unverified
            }
            AuthProviderError::Rejected { message } => AuthError::Rejected(message),
            AuthProviderError::Unavailable { message, .. } => AuthError::Unavailable(message),
        }
    }
}

impl From<ValidationErrors> for AuthError {
    fn from(err: ValidationErrors) -> Self {
        AuthError::InvalidInput(format!("validation failed: {err}"))
    }
}

/// Errors that can occur in controller operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The remote store failed or refused the operation.
    #[error("remote store error: {0}")]
    Unavailable(#[source] StorageError),
    /// The operation needs an authenticated session.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The current profile lacks the required role.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested entity is not in local state.
    #[error("not found: {0}")]
    NotFound(String),
    /// Uploading a file to the object store failed.
    #[error("upload failed: {0}")]
    Upload(#[source] StorageError),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl ServiceError {
    /// Blocking notice describing this failure.
    pub fn notice(&self) -> Notice {
        Notice::blocking(self.to_string())
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NoSession => ServiceError::Unauthorized(err.to_string()),
            AuthError::InvalidInput(message) => ServiceError::InvalidInput(message),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_unverified_provider_messages() {
        let err: AuthError = AuthProviderError::rejected("Email not confirmed").into();
        assert!(matches!(err, AuthError::Unverified));

        let err: AuthError = AuthProviderError::rejected("Invalid login credentials").into();
        assert_eq!(err.to_string(), "Invalid login credentials");
    }

    #[test]
    fn unavailable_provider_hides_transport_text() {
        let io = std::io::Error::other("connection reset by peer");
        let err: AuthError = AuthProviderError::unavailable("POST auth/v1/token".into(), io).into();
        assert!(!err.to_string().contains("connection reset"));
    }
}
