//! Local game list kept in sync with the remote table.

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::{RwLock, watch};
use tracing::{debug, warn};

use crate::dao::{
    backend::{ChangeEvent, ChangeKind, Row},
    models::{Game, GameId},
};

/// One row as it was before and after an optimistic mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    /// Row before the mutation.
    pub before: Game,
    /// Row as staged locally.
    pub after: Game,
}

/// In-memory game list in display order, owned by the catalog controller.
///
/// Every change bumps a revision counter that views can watch.
pub struct Catalog {
    games: RwLock<IndexMap<GameId, Game>>,
    revision: watch::Sender<u64>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

fn row_id(row: &Row) -> Option<GameId> {
    row.get("id").and_then(Value::as_i64)
}

fn decode(row: &Row) -> Option<Game> {
    match serde_json::from_value(Value::Object(row.clone())) {
        Ok(game) => Some(game),
        Err(err) => {
            warn!(error = %err, "ignoring undecodable game change");
            None
        }
    }
}

impl Catalog {
    /// Empty list at revision 0.
    pub fn new() -> Self {
        let (revision, _rx) = watch::channel(0);
        Self {
            games: RwLock::new(IndexMap::new()),
            revision,
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Receiver notified after every change to the list.
    pub fn watcher(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Copy of the list in display order.
    pub async fn snapshot(&self) -> Vec<Game> {
        self.games.read().await.values().cloned().collect()
    }

    /// Game `id`, if present.
    pub async fn get(&self, id: GameId) -> Option<Game> {
        self.games.read().await.get(&id).cloned()
    }

    /// Number of games.
    pub async fn len(&self) -> usize {
        self.games.read().await.len()
    }

    /// Whether the list holds no game.
    pub async fn is_empty(&self) -> bool {
        self.games.read().await.is_empty()
    }

    /// Replace the list wholesale, keeping the order of `games`.
    pub async fn replace_all(&self, games: Vec<Game>) {
        let mut guard = self.games.write().await;
        *guard = games.into_iter().map(|game| (game.id, game)).collect();
        drop(guard);
        self.bump();
    }

    /// Append `game` unless a row with the same id is already present.
    pub async fn insert_if_absent(&self, game: Game) -> bool {
        let mut guard = self.games.write().await;
        if guard.contains_key(&game.id) {
            return false;
        }
        guard.insert(game.id, game);
        drop(guard);
        self.bump();
        true
    }

    /// Replace the row with the same id in place. Unknown ids are ignored.
    pub async fn replace(&self, game: Game) -> bool {
        let mut guard = self.games.write().await;
        let Some(slot) = guard.get_mut(&game.id) else {
            return false;
        };
        *slot = game;
        drop(guard);
        self.bump();
        true
    }

    /// Remove game `id`, keeping the order of the others.
    pub async fn remove(&self, id: GameId) -> Option<Game> {
        let mut guard = self.games.write().await;
        let removed = guard.shift_remove(&id);
        drop(guard);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Run `mutate` on a copy of game `id` and store the result, under one write lock.
    ///
    /// `None` when the id is unknown; the row is left untouched when `mutate` fails.
    pub async fn stage<F, T, E>(&self, id: GameId, mutate: F) -> Option<Result<(StagedRow, T), E>>
    where
        F: FnOnce(&mut Game) -> Result<T, E>,
    {
        let mut guard = self.games.write().await;
        let slot = guard.get_mut(&id)?;
        let mut after = slot.clone();
        let output = match mutate(&mut after) {
            Ok(output) => output,
            Err(err) => return Some(Err(err)),
        };
        let before = std::mem::replace(slot, after.clone());
        drop(guard);
        self.bump();
        Some(Ok((StagedRow { before, after }, output)))
    }

    /// Put back the row captured by [`Catalog::stage`].
    ///
    /// Only the staged row is touched, and only while it still holds the staged
    /// value: a realtime update or delete that landed meanwhile is kept.
    pub async fn restore(&self, staged: StagedRow) -> bool {
        let mut guard = self.games.write().await;
        match guard.get_mut(&staged.before.id) {
            Some(slot) if *slot == staged.after => {
                *slot = staged.before;
                drop(guard);
                self.bump();
                true
            }
            _ => false,
        }
    }

    /// Apply a realtime change unconditionally; the latest event wins.
    pub async fn apply(&self, event: &ChangeEvent) -> bool {
        match event.kind {
            ChangeKind::Insert => match event.record.as_ref().and_then(decode) {
                Some(game) => self.insert_if_absent(game).await,
                None => false,
            },
            ChangeKind::Update => match event.record.as_ref().and_then(decode) {
                Some(game) => self.replace(game).await,
                None => false,
            },
            ChangeKind::Delete => {
                let id = event
                    .old_record
                    .as_ref()
                    .and_then(row_id)
                    .or_else(|| event.record.as_ref().and_then(row_id));
                match id {
                    Some(id) => self.remove(id).await.is_some(),
                    None => {
                        debug!("delete event without a primary key");
                        false
                    }
                }
            }
        }
    }
}
