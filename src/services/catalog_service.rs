use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};
use validator::{Validate, ValidationError};

use crate::{
    dao::{
        backend::{ChangeSubscription, UploadOptions},
        models::{Game, GameId, Link},
    },
    dto::game::{CreateGameRequest, FieldUpdate, GameField, LinkEdit},
    error::ServiceError,
    services::media::{MediaStore, image_path},
    state::{Notice, SharedState},
};

/// Inline message shown while the realtime catalog feed is down.
pub const FEED_LOST_MESSAGE: &str =
    "Se perdió la conexión en tiempo real. Reconectando el catálogo...";

/// Wait between attempts to reopen a dropped change feed.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

fn invalid_input(err: ValidationError) -> ServiceError {
    ServiceError::InvalidInput(err.to_string())
}

fn out_of_range(what: &str, index: usize, len: usize) -> ServiceError {
    ServiceError::NotFound(format!("{what} #{index} (game has {len})"))
}

/// Reopen the games feed, retrying every [`RESUBSCRIBE_DELAY`], then reload
/// the list to pick up changes missed while it was down.
async fn resubscribe(state: &SharedState) -> ChangeSubscription {
    loop {
        sleep(RESUBSCRIBE_DELAY).await;
        let subscription = match state.games().subscribe().await {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(error = %err, "catalog change feed resubscribe failed");
                continue;
            }
        };
        match state.games().list().await {
            Ok(games) => state.catalog().replace_all(games).await,
            Err(err) => warn!(error = %err, "catalog reload after resubscribe failed"),
        }
        return subscription;
    }
}

/// Card projection of a game for list views.
#[derive(Debug, Clone, PartialEq)]
pub struct GameCard {
    /// Game id.
    pub id: GameId,
    /// Title.
    pub name: String,
    /// Genre, if set.
    pub genre: Option<String>,
    /// `image`, then the first gallery image, then the configured placeholder.
    /// `None` means the view renders its own placeholder.
    pub cover: Option<String>,
}

/// Mediates every create/update/delete of games between the in-memory list and
/// the remote table.
///
/// Edits are optimistic and go through [`CatalogController::commit`], which
/// puts the edited row back on remote failure. Edits of one game are
/// serialized so array edits never start from a stale copy. Creates and
/// deletes wait for the remote confirmation.
#[derive(Clone)]
pub struct CatalogController {
    state: SharedState,
    media: MediaStore,
    writes: Arc<DashMap<GameId, Arc<Mutex<()>>>>,
}

impl CatalogController {
    /// Controller over the shared catalog, uploading into the configured bucket.
    pub fn new(state: SharedState) -> Self {
        let media = MediaStore::new(
            state.backend().objects.clone(),
            state.config().storage_bucket.clone(),
        );
        Self {
            state,
            media,
            writes: Arc::new(DashMap::new()),
        }
    }

    fn write_lock(&self, id: GameId) -> Arc<Mutex<()>> {
        self.writes.entry(id).or_default().clone()
    }

    /// Publish the failure as a blocking notice and hand it back.
    fn report(&self, err: ServiceError) -> ServiceError {
        self.state.notices().publish(err.notice());
        err
    }

    fn require_admin(&self) -> Result<(), ServiceError> {
        self.state
            .session_handle()
            .require_admin()
            .map(|_| ())
            .map_err(|err| self.report(err))
    }

    async fn current(&self, id: GameId) -> Result<Game, ServiceError> {
        self.state
            .catalog()
            .get(id)
            .await
            .ok_or_else(|| ServiceError::NotFound(format!("game {id}")))
    }

    /// Fetch every game ordered by id and replace the local list.
    pub async fn load(&self) -> Result<usize, ServiceError> {
        let games = self
            .state
            .games()
            .list()
            .await
            .map_err(|err| self.report(err.into()))?;
        let count = games.len();
        self.state.catalog().replace_all(games).await;
        info!(count, "catalog loaded");
        Ok(count)
    }

    /// Follow realtime changes on the games table until the returned handle is closed or dropped.
    pub async fn subscribe_to_changes(&self) -> Result<CatalogSubscription, ServiceError> {
        let mut subscription = self
            .state
            .games()
            .subscribe()
            .await
            .map_err(|err| self.report(err.into()))?;

        let state = self.state.clone();
        let task = tokio::spawn(async move {
            loop {
                while let Some(event) = subscription.next().await {
                    let applied = state.catalog().apply(&event).await;
                    debug!(kind = ?event.kind, applied, "catalog change event");
                }
                warn!("catalog change feed ended");
                state.notices().publish(Notice::inline(FEED_LOST_MESSAGE));
                subscription = resubscribe(&state).await;
                info!("catalog change feed resumed");
            }
        });
        Ok(CatalogSubscription { task: Some(task) })
    }

    /// Insert a new game and append the stored row once the store confirms it.
    pub async fn create(&self, request: CreateGameRequest) -> Result<Game, ServiceError> {
        self.require_admin()?;
        request
            .validate()
            .map_err(|err| self.report(err.into()))?;

        let game = self
            .state
            .games()
            .insert(&request.into_new_game())
            .await
            .map_err(|err| self.report(err.into()))?;
        // The realtime feed may have delivered the row first.
        self.state.catalog().insert_if_absent(game.clone()).await;
        info!(id = game.id, name = %game.name, "game created");
        Ok(game)
    }

    /// Derive a column update from the current row, apply it locally, write
    /// that column remotely, and put the row back if the write fails.
    async fn commit<F>(&self, id: GameId, edit: F) -> Result<Game, ServiceError>
    where
        F: FnOnce(&Game) -> Result<FieldUpdate, ServiceError>,
    {
        let lock = self.write_lock(id);
        let _serialized = lock.lock().await;

        let staged = self
            .state
            .catalog()
            .stage(id, |game| {
                let update = edit(game)?;
                update.apply(game);
                Ok::<_, ServiceError>(update)
            })
            .await;
        let (staged, update) = match staged {
            Some(Ok(staged)) => staged,
            Some(Err(err)) => return Err(self.report(err)),
            None => return Err(self.report(ServiceError::NotFound(format!("game {id}")))),
        };
        let column = update.field().column();

        match self
            .state
            .games()
            .update_column(id, column, update.value())
            .await
        {
            Ok(()) => {
                debug!(id, column, "game updated");
                Ok(staged.after)
            }
            Err(err) => {
                let restored = self.state.catalog().restore(staged).await;
                warn!(id, column, restored, error = %err, "game update failed; rolling back");
                Err(self.report(err.into()))
            }
        }
    }

    /// Optimistically set one field of a game.
    pub async fn update_field(
        &self,
        id: GameId,
        field: GameField,
        value: Value,
    ) -> Result<Game, ServiceError> {
        self.require_admin()?;
        let update = FieldUpdate::from_value(field, value)
            .map_err(|err| self.report(invalid_input(err)))?;
        self.commit(id, move |_| Ok(update)).await
    }

    /// Replace the links of a game; any accepted links shape is normalized first.
    pub async fn update_links(&self, id: GameId, links: Value) -> Result<Game, ServiceError> {
        self.update_field(id, GameField::Links, links).await
    }

    /// Append a link and persist the whole `links` array.
    pub async fn add_link(&self, id: GameId, link: Link) -> Result<Game, ServiceError> {
        self.require_admin()?;
        self.commit(id, move |game| {
            let mut links = game.links.clone();
            links.push(link);
            Ok(FieldUpdate::Links(links))
        })
        .await
    }

    /// Merge `edit` into the link at `index`.
    pub async fn edit_link(
        &self,
        id: GameId,
        index: usize,
        edit: LinkEdit,
    ) -> Result<Game, ServiceError> {
        self.require_admin()?;
        self.commit(id, move |game| {
            let mut links = game.links.clone();
            let len = links.len();
            let link = links
                .get_mut(index)
                .ok_or_else(|| out_of_range("link", index, len))?;
            edit.merge_into(link);
            Ok(FieldUpdate::Links(links))
        })
        .await
    }

    /// Remove the link at `index` and persist the remaining array.
    pub async fn remove_link(&self, id: GameId, index: usize) -> Result<Game, ServiceError> {
        self.require_admin()?;
        self.commit(id, move |game| {
            if index >= game.links.len() {
                return Err(out_of_range("link", index, game.links.len()));
            }
            let mut links = game.links.clone();
            links.remove(index);
            Ok(FieldUpdate::Links(links))
        })
        .await
    }

    /// Append an image URL and persist the whole `images` array.
    pub async fn add_image(&self, id: GameId, url: String) -> Result<Game, ServiceError> {
        self.require_admin()?;
        self.commit(id, move |game| {
            let mut images = game.images.clone();
            images.push(url);
            Ok(FieldUpdate::Images(images))
        })
        .await
    }

    /// Remove the image at `index` and persist the remaining array.
    pub async fn remove_image(&self, id: GameId, index: usize) -> Result<Game, ServiceError> {
        self.require_admin()?;
        self.commit(id, move |game| {
            if index >= game.images.len() {
                return Err(out_of_range("image", index, game.images.len()));
            }
            let mut images = game.images.clone();
            images.remove(index);
            Ok(FieldUpdate::Images(images))
        })
        .await
    }

    /// Upload an image file and append its public URL to the game.
    ///
    /// Nothing is added to the game when the upload fails.
    pub async fn upload_image(
        &self,
        id: GameId,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<Game, ServiceError> {
        self.require_admin()?;
        self.current(id).await.map_err(|err| self.report(err))?;

        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let path = image_path(id, millis, file_name);
        let options = UploadOptions {
            content_type,
            ..UploadOptions::default()
        };
        let stored = self
            .media
            .upload(&path, bytes, options)
            .await
            .map_err(|err| {
                warn!(id, path = %path, error = %err, "image upload failed");
                self.report(ServiceError::Upload(err))
            })?;

        let url = self.media.public_url(&stored);
        info!(id, url = %url, "image uploaded");
        self.add_image(id, url).await
    }

    /// Delete a game remotely, then drop it from the local list.
    pub async fn delete(&self, id: GameId) -> Result<(), ServiceError> {
        self.require_admin()?;
        self.state
            .games()
            .delete(id)
            .await
            .map_err(|err| self.report(err.into()))?;
        self.state.catalog().remove(id).await;
        self.writes.remove(&id);
        info!(id, "game deleted");
        Ok(())
    }

    /// Copy of the local list in display order.
    pub async fn games(&self) -> Vec<Game> {
        self.state.catalog().snapshot().await
    }

    /// Card projections in display order.
    pub async fn cards(&self) -> Vec<GameCard> {
        let placeholder = self.state.config().placeholder_image.clone();
        self.state
            .catalog()
            .snapshot()
            .await
            .into_iter()
            .map(|game| GameCard {
                cover: game
                    .cover_image()
                    .map(str::to_string)
                    .or_else(|| placeholder.clone()),
                id: game.id,
                name: game.name,
                genre: game.genre,
            })
            .collect()
    }
}

/// Running realtime subscription of the catalog. Closing or dropping it
/// releases the remote channel.
pub struct CatalogSubscription {
    task: Option<JoinHandle<()>>,
}

impl CatalogSubscription {
    /// Stop following changes.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CatalogSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
