use tracing::{debug, warn};
use validator::Validate;

use crate::{
    dao::models::{GameId, Review, SubjectId},
    dto::review::ReviewSubmission,
    error::ServiceError,
    state::SharedState,
};

/// Star selector and review text of one game's detail page.
///
/// Hovering only changes the preview; a value is selected by an explicit click
/// and stored by [`RatingPanel::submit`], which upserts on (user, game).
pub struct RatingPanel {
    state: SharedState,
    game_id: GameId,
    reviews: Vec<Review>,
    hover: Option<u8>,
    selected: Option<u8>,
    text: String,
}

impl RatingPanel {
    /// Empty panel of `game_id`; call `load` to fetch reviews.
    pub fn new(state: SharedState, game_id: GameId) -> Self {
        Self {
            state,
            game_id,
            reviews: Vec::new(),
            hover: None,
            selected: None,
            text: String::new(),
        }
    }

    fn current_subject(&self) -> Option<SubjectId> {
        self.state
            .session_handle()
            .profile()
            .map(|profile| profile.auth_subject_id)
    }

    /// Fetch the game's reviews and pre-fill the selector from the current
    /// user's review. Skipped without a session.
    pub async fn load(&mut self) -> Result<(), ServiceError> {
        let Some(subject) = self.current_subject() else {
            return Ok(());
        };
        let reviews = self
            .state
            .reviews()
            .list_for_game(self.game_id)
            .await
            .map_err(|err| {
                warn!(game_id = self.game_id, error = %err, "failed to load reviews");
                ServiceError::from(err)
            })?;
        self.reviews = reviews;

        if let Some(own) = self.reviews.iter().find(|review| review.user_id == subject) {
            self.selected = Some(own.rating);
            self.text = own.comment.clone().unwrap_or_default();
        }
        Ok(())
    }

    /// Loaded reviews.
    pub fn reviews(&self) -> &[Review] {
        &self.reviews
    }

    /// The current user's stored review, if any.
    pub fn own_review(&self) -> Option<&Review> {
        let subject = self.current_subject()?;
        self.reviews.iter().find(|review| review.user_id == subject)
    }

    /// Mean rating over every loaded review.
    pub fn average(&self) -> Option<f64> {
        if self.reviews.is_empty() {
            return None;
        }
        let total: u32 = self.reviews.iter().map(|review| u32::from(review.rating)).sum();
        Some(f64::from(total) / self.reviews.len() as f64)
    }

    /// Preview `stars` while hovering.
    pub fn hover(&mut self, stars: u8) {
        self.hover = Some(stars.clamp(1, 5));
    }

    /// Stop previewing.
    pub fn clear_hover(&mut self) {
        self.hover = None;
    }

    /// Select `stars`.
    pub fn click(&mut self, stars: u8) {
        self.selected = Some(stars.clamp(1, 5));
    }

    /// Replace the draft text.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Draft text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Selected star count.
    pub fn selected(&self) -> Option<u8> {
        self.selected
    }

    /// Stars to light up: the hovered value while hovering, else the selection.
    pub fn preview(&self) -> u8 {
        self.hover.or(self.selected).unwrap_or(0)
    }

    /// Store the selected rating and text for the current user.
    pub async fn submit(&mut self) -> Result<Review, ServiceError> {
        let profile = self
            .state
            .session_handle()
            .require_session()
            .map_err(|err| self.report(err.into()))?;
        let submission = ReviewSubmission::new(self.selected.unwrap_or(0), Some(self.text.clone()));
        submission
            .validate()
            .map_err(|err| self.report(err.into()))?;

        let review = Review {
            user_id: profile.auth_subject_id,
            game_id: self.game_id,
            rating: submission.rating,
            comment: submission.comment_text(),
            created_at: None,
        };
        let stored = self
            .state
            .reviews()
            .upsert(&review)
            .await
            .map_err(|err| self.report(err.into()))?
            .unwrap_or(review);

        self.reviews.retain(|existing| existing.user_id != stored.user_id);
        self.reviews.push(stored.clone());
        debug!(game_id = self.game_id, rating = stored.rating, "review stored");
        Ok(stored)
    }

    fn report(&self, err: ServiceError) -> ServiceError {
        self.state.notices().publish(err.notice());
        err
    }
}
