//! Validation helpers for DTOs.

use validator::ValidationError;

/// Rejects values made only of whitespace.
///
/// `validator`'s `length(min = 1)` accepts `"   "`; every required text field in
/// the forms goes through this check instead.
pub fn non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be empty".into());
        return Err(err);
    }
    Ok(())
}
