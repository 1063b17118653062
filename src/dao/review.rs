use std::sync::Arc;

use crate::dao::{
    backend::{Filter, Query, TableStore},
    models::{GameId, Review},
    rows::{from_rows, to_row},
    storage::StorageResult,
};

/// Remote table holding ratings and reviews.
pub const REVIEW_TABLE: &str = "reviews";
/// Uniqueness key of a review.
pub const REVIEW_CONFLICT_COLUMNS: &[&str] = &["user_id", "game_id"];

/// Data Access Object for review rows.
#[derive(Clone)]
pub struct ReviewRepository {
    tables: Arc<dyn TableStore>,
}

impl ReviewRepository {
    /// Repository over `tables`.
    pub fn new(tables: Arc<dyn TableStore>) -> Self {
        Self { tables }
    }

    /// Every review of a game.
    pub async fn list_for_game(&self, game_id: GameId) -> StorageResult<Vec<Review>> {
        let rows = self
            .tables
            .select(REVIEW_TABLE, Query::new().filter(Filter::eq("game_id", game_id)))
            .await?;
        from_rows(REVIEW_TABLE, rows)
    }

    /// Insert or replace the review of `(review.user_id, review.game_id)`.
    pub async fn upsert(&self, review: &Review) -> StorageResult<Option<Review>> {
        let mut row = to_row(REVIEW_TABLE, review)?;
        // Let the store stamp new rows; an explicit null would overwrite it.
        if row.get("created_at").is_some_and(|value| value.is_null()) {
            row.remove("created_at");
        }
        let rows = self
            .tables
            .upsert(REVIEW_TABLE, vec![row], REVIEW_CONFLICT_COLUMNS)
            .await?;
        Ok(from_rows(REVIEW_TABLE, rows)?.into_iter().next())
    }
}
