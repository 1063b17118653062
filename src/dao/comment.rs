use std::sync::Arc;

use crate::dao::{
    backend::{Direction, Filter, Query, TableStore},
    models::{Comment, CommentId, GameId, NewComment},
    rows::{from_row, from_rows, to_row},
    storage::{StorageError, StorageResult},
};

/// Remote table holding game comments.
pub const COMMENT_TABLE: &str = "comments";

/// Data Access Object for comment rows.
#[derive(Clone)]
pub struct CommentRepository {
    tables: Arc<dyn TableStore>,
}

impl CommentRepository {
    /// Repository over `tables`.
    pub fn new(tables: Arc<dyn TableStore>) -> Self {
        Self { tables }
    }

    /// Comments of a game, oldest first.
    pub async fn list_for_game(&self, game_id: GameId) -> StorageResult<Vec<Comment>> {
        let rows = self
            .tables
            .select(
                COMMENT_TABLE,
                Query::new()
                    .filter(Filter::eq("game_id", game_id))
                    .order_by("created_at", Direction::Ascending),
            )
            .await?;
        from_rows(COMMENT_TABLE, rows)
    }

    /// Insert a comment and return the stored row.
    pub async fn insert(&self, comment: &NewComment) -> StorageResult<Comment> {
        let rows = self
            .tables
            .insert(COMMENT_TABLE, vec![to_row(COMMENT_TABLE, comment)?])
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::rejected("comments: insert returned no row"))?;
        from_row(COMMENT_TABLE, row)
    }

    /// Delete one comment by id.
    pub async fn delete(&self, id: CommentId) -> StorageResult<()> {
        self.tables
            .delete(COMMENT_TABLE, vec![Filter::eq("id", id)])
            .await
    }
}
