use std::collections::HashMap;

use tracing::{debug, warn};
use validator::Validate;

use crate::{
    dao::models::{Comment, CommentId, GameId, NewComment, SubjectId},
    dto::{comment::CommentDraft, format_display_time},
    error::ServiceError,
    state::{Notice, SharedState},
};

/// Author shown when a comment's profile cannot be resolved.
pub const ANONYMOUS_AUTHOR: &str = "Anónimo";
/// Inline message shown when the comment list cannot be fetched.
pub const LOAD_FAILED_MESSAGE: &str = "No se pudieron cargar los comentarios.";

/// Comment together with its resolved author name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEntry {
    /// Stored comment.
    pub comment: Comment,
    /// Author username, or a placeholder when unknown.
    pub author: String,
}

impl CommentEntry {
    /// Creation time formatted for display.
    pub fn display_time(&self) -> String {
        format_display_time(self.comment.created_at)
    }
}

/// Comment list of one game's detail page.
///
/// Threads are a single level deep: replies point at a top-level comment and
/// are listed under it in creation order.
pub struct CommentThread {
    state: SharedState,
    game_id: GameId,
    entries: Vec<CommentEntry>,
    load_error: Option<String>,
}

impl CommentThread {
    /// Empty thread of `game_id`; call `load` to fetch it.
    pub fn new(state: SharedState, game_id: GameId) -> Self {
        Self {
            state,
            game_id,
            entries: Vec::new(),
            load_error: None,
        }
    }

    /// Game the thread belongs to.
    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    /// Fetch the comments oldest first and resolve their authors.
    ///
    /// A failed fetch leaves the list empty and shows an inline notice.
    pub async fn load(&mut self) {
        match self.state.comments().list_for_game(self.game_id).await {
            Ok(comments) => {
                let authors = self.resolve_authors(&comments).await;
                self.entries = comments
                    .into_iter()
                    .map(|comment| {
                        let author = author_of(&authors, comment.auth_subject_id);
                        CommentEntry { comment, author }
                    })
                    .collect();
                self.load_error = None;
                debug!(game_id = self.game_id, count = self.entries.len(), "comments loaded");
            }
            Err(err) => {
                warn!(game_id = self.game_id, error = %err, "failed to load comments");
                self.entries.clear();
                self.load_error = Some(LOAD_FAILED_MESSAGE.to_string());
                self.state.notices().publish(Notice::inline(LOAD_FAILED_MESSAGE));
            }
        }
    }

    /// Batch lookup of usernames; failures degrade to an empty map.
    async fn resolve_authors(&self, comments: &[Comment]) -> HashMap<SubjectId, String> {
        let mut subjects: Vec<SubjectId> = comments.iter().map(|c| c.auth_subject_id).collect();
        subjects.sort_unstable();
        subjects.dedup();

        match self.state.profiles().find_many(&subjects).await {
            Ok(profiles) => profiles
                .into_iter()
                .filter(|profile| !profile.username.trim().is_empty())
                .map(|profile| (profile.auth_subject_id, profile.username))
                .collect(),
            Err(err) => {
                warn!(game_id = self.game_id, error = %err, "failed to resolve comment authors");
                HashMap::new()
            }
        }
    }

    /// Loaded comments, oldest first.
    pub fn entries(&self) -> &[CommentEntry] {
        &self.entries
    }

    /// Inline error from the last load, if it failed.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Comments without a parent, in creation order.
    pub fn top_level(&self) -> impl Iterator<Item = &CommentEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.comment.parent_id.is_none())
    }

    /// Direct replies to `parent_id`.
    pub fn replies_to(&self, parent_id: CommentId) -> impl Iterator<Item = &CommentEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.comment.parent_id == Some(parent_id))
    }

    /// Draft replying to `comment_id`, pre-filled with its author's mention.
    pub fn reply_draft(&self, comment_id: CommentId) -> Option<CommentDraft> {
        self.entries
            .iter()
            .find(|entry| entry.comment.id == comment_id)
            .map(|entry| CommentDraft::reply_to(comment_id, &entry.author))
    }

    fn report(&self, err: ServiceError) -> ServiceError {
        self.state.notices().publish(err.notice());
        err
    }

    /// Post `draft` as the current user and append the stored comment.
    pub async fn post(&mut self, draft: CommentDraft) -> Result<&CommentEntry, ServiceError> {
        let profile = self
            .state
            .session_handle()
            .require_session()
            .map_err(|err| self.report(err.into()))?;
        draft.validate().map_err(|err| self.report(err.into()))?;

        let new_comment = NewComment {
            game_id: self.game_id,
            auth_user_id: profile.auth_subject_id,
            content: draft.content.trim().to_string(),
            parent_id: draft.parent_id,
        };
        let comment = self
            .state
            .comments()
            .insert(&new_comment)
            .await
            .map_err(|err| self.report(err.into()))?;
        debug!(game_id = self.game_id, id = comment.id, "comment posted");

        let author = if profile.username.trim().is_empty() {
            ANONYMOUS_AUTHOR.to_string()
        } else {
            profile.username
        };
        self.entries.push(CommentEntry { comment, author });
        let last = self.entries.len() - 1;
        Ok(&self.entries[last])
    }

    /// Delete a comment (admin only) and drop it from the list.
    pub async fn delete(&mut self, comment_id: CommentId) -> Result<(), ServiceError> {
        self.state
            .session_handle()
            .require_admin()
            .map_err(|err| self.report(err))?;
        self.state
            .comments()
            .delete(comment_id)
            .await
            .map_err(|err| self.report(err.into()))?;
        self.entries.retain(|entry| entry.comment.id != comment_id);
        debug!(game_id = self.game_id, id = comment_id, "comment deleted");
        Ok(())
    }
}

fn author_of(authors: &HashMap<SubjectId, String>, subject: SubjectId) -> String {
    authors
        .get(&subject)
        .cloned()
        .unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string())
}
