use serde::Deserialize;
use validator::Validate;

/// Star rating plus optional text submitted from the detail page.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReviewSubmission {
    /// Stars, 1 to 5.
    #[validate(range(min = 1, max = 5))]
    pub rating: u8,
    /// Optional review text.
    #[serde(default)]
    pub comment: Option<String>,
}

impl ReviewSubmission {
    /// Submission of `rating` stars with optional text.
    pub fn new(rating: u8, comment: Option<String>) -> Self {
        Self { rating, comment }
    }

    /// Review text with surrounding whitespace removed; blank text is no text.
    pub fn comment_text(&self) -> Option<String> {
        self.comment
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_must_be_between_one_and_five() {
        assert!(ReviewSubmission::new(0, None).validate().is_err());
        assert!(ReviewSubmission::new(6, None).validate().is_err());
        assert!(ReviewSubmission::new(5, Some("great".into())).validate().is_ok());
    }

    #[test]
    fn blank_comment_is_dropped() {
        assert_eq!(ReviewSubmission::new(3, Some("  ".into())).comment_text(), None);
    }
}
