use std::sync::Arc;

use serde_json::Value;

use crate::dao::{
    backend::{ChangeFeed, ChangeSubscription, Direction, Filter, Query, TableStore},
    models::{Game, GameId, NewGame},
    rows::{from_row, from_rows, patch, to_row},
    storage::{StorageError, StorageResult},
};

/// Remote table holding the catalog.
pub const GAME_TABLE: &str = "games";

/// Data Access Object encapsulating table-store interaction for catalog entries.
#[derive(Clone)]
pub struct GameRepository {
    tables: Arc<dyn TableStore>,
    changes: Arc<dyn ChangeFeed>,
}

impl GameRepository {
    /// Repository over `tables`, following realtime changes through `changes`.
    pub fn new(tables: Arc<dyn TableStore>, changes: Arc<dyn ChangeFeed>) -> Self {
        Self { tables, changes }
    }

    /// Fetch every game ordered by id.
    pub async fn list(&self) -> StorageResult<Vec<Game>> {
        let rows = self
            .tables
            .select(GAME_TABLE, Query::new().order_by("id", Direction::Ascending))
            .await?;
        from_rows(GAME_TABLE, rows)
    }

    /// Insert a game and return the stored row with its server-assigned id.
    pub async fn insert(&self, game: &NewGame) -> StorageResult<Game> {
        let rows = self
            .tables
            .insert(GAME_TABLE, vec![to_row(GAME_TABLE, game)?])
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::rejected("games: insert returned no row"))?;
        from_row(GAME_TABLE, row)
    }

    /// Write a single column of one game.
    pub async fn update_column(&self, id: GameId, column: &str, value: Value) -> StorageResult<()> {
        self.tables
            .update(GAME_TABLE, patch(column, value), vec![Filter::eq("id", id)])
            .await
    }

    /// Delete one game by id.
    pub async fn delete(&self, id: GameId) -> StorageResult<()> {
        self.tables
            .delete(GAME_TABLE, vec![Filter::eq("id", id)])
            .await
    }

    /// Open the realtime channel on the games table.
    pub async fn subscribe(&self) -> StorageResult<ChangeSubscription> {
        self.changes.subscribe(GAME_TABLE).await
    }
}
