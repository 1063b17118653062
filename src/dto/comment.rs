use serde::Deserialize;
use validator::Validate;

use crate::{dao::models::CommentId, dto::validation::non_blank};

/// Text typed into the comment box, optionally replying to another comment.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CommentDraft {
    /// Comment text.
    #[validate(custom(function = "non_blank"))]
    pub content: String,
    /// Comment being replied to.
    #[serde(default)]
    pub parent_id: Option<CommentId>,
}

impl CommentDraft {
    /// Top-level draft.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            parent_id: None,
        }
    }

    /// Draft replying to `parent_id`, pre-filled with an `@username ` mention.
    pub fn reply_to(parent_id: CommentId, username: &str) -> Self {
        Self {
            content: format!("@{username} "),
            parent_id: Some(parent_id),
        }
    }
}
