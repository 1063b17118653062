//! Validated inputs accepted by the controllers and display helpers for views.

use time::{OffsetDateTime, macros::format_description};

/// Login and registration forms.
pub mod auth;
/// Comment box input.
pub mod comment;
/// Game creation and single-field edits.
pub mod game;
/// Star rating submission.
pub mod review;
pub mod validation;

/// Format a timestamp the way notification and comment lists show it (`dd/mm/yyyy hh:mm`).
pub fn format_display_time(at: OffsetDateTime) -> String {
    at.format(format_description!("[day]/[month]/[year] [hour]:[minute]"))
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats_day_first_with_minutes() {
        assert_eq!(
            format_display_time(datetime!(2024-03-07 09:05 UTC)),
            "07/03/2024 09:05"
        );
    }
}
