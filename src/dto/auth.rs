use std::fmt;

use serde::Deserialize;
use validator::Validate;

use crate::dto::validation::non_blank;

/// Payload of the login form.
#[derive(Clone, Deserialize, Validate)]
pub struct LoginRequest {
    /// Email the account signed up with.
    #[validate(custom(function = "non_blank"))]
    pub identifier: String,
    /// Password.
    #[validate(custom(function = "non_blank"))]
    pub secret: String,
}

impl LoginRequest {
    /// Form with both fields filled.
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

/// Payload of the registration form.
#[derive(Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Display name of the new profile.
    #[validate(custom(function = "non_blank"))]
    pub username: String,
    /// Password of the new identity.
    #[validate(custom(function = "non_blank"))]
    pub password: String,
    /// Email of the new identity.
    #[validate(custom(function = "non_blank"))]
    pub email: String,
}

impl RegisterRequest {
    /// Form with every field filled.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            email: email.into(),
        }
    }
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_checks() {
        assert!(LoginRequest::new("anne@bonny.io", "pw").validate().is_ok());
        assert!(LoginRequest::new("anne@bonny.io", " ").validate().is_err());
        assert!(RegisterRequest::new("", "pw", "a@b.c").validate().is_err());
    }

    #[test]
    fn debug_omits_secrets() {
        let rendered = format!("{:?}", LoginRequest::new("anne", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
