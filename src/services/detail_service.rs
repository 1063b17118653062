use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    dao::models::{Game, GameId},
    error::ServiceError,
    services::{
        carousel::{CarouselDriver, CarouselHandle, CarouselView},
        comment_service::CommentThread,
        review_service::RatingPanel,
    },
    state::SharedState,
};

/// Everything the detail page of one game interacts with: the carousel, the
/// comment thread and the rating panel.
///
/// The carousel follows catalog edits to the game's images until the detail
/// view is dropped.
pub struct DetailController {
    game_id: GameId,
    state: SharedState,
    carousel: CarouselDriver,
    /// Comment thread of the game.
    pub comments: CommentThread,
    /// Rating panel of the game.
    pub rating: RatingPanel,
    follower: JoinHandle<()>,
}

impl DetailController {
    /// Open the detail page of `game_id`, which must be in the catalog.
    ///
    /// Comment and review fetch failures do not prevent opening the page.
    pub async fn open(state: SharedState, game_id: GameId) -> Result<Self, ServiceError> {
        let game = state
            .catalog()
            .get(game_id)
            .await
            .ok_or_else(|| ServiceError::NotFound(format!("game {game_id}")))?;

        let carousel = CarouselDriver::spawn();
        carousel.show(game.id, game.images.clone());

        let mut comments = CommentThread::new(state.clone(), game_id);
        comments.load().await;

        let mut rating = RatingPanel::new(state.clone(), game_id);
        if let Err(err) = rating.load().await {
            warn!(game_id, error = %err, "rating panel starts empty");
        }

        let follower = Self::follow_catalog(state.clone(), game_id, carousel.sender());
        debug!(game_id, images = game.images.len(), "detail page opened");

        Ok(Self {
            game_id,
            state,
            carousel,
            comments,
            rating,
            follower,
        })
    }

    /// Re-feed the carousel whenever the catalog revision moves.
    fn follow_catalog(
        state: SharedState,
        game_id: GameId,
        carousel: CarouselHandle,
    ) -> JoinHandle<()> {
        let mut revisions: watch::Receiver<u64> = state.catalog().watcher();
        tokio::spawn(async move {
            while revisions.changed().await.is_ok() {
                match state.catalog().get(game_id).await {
                    Some(game) => carousel.show(game.id, game.images),
                    None => carousel.show(game_id, Vec::new()),
                }
            }
        })
    }

    /// Game shown.
    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    /// Current catalog row of the game, if it still exists.
    pub async fn game(&self) -> Option<Game> {
        self.state.catalog().get(self.game_id).await
    }

    /// Image carousel.
    pub fn carousel(&self) -> &CarouselDriver {
        &self.carousel
    }

    /// Current carousel view.
    pub fn carousel_view(&self) -> CarouselView {
        self.carousel.view()
    }
}

impl Drop for DetailController {
    fn drop(&mut self) {
        self.follower.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::json;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::backend::{Backend, memory::MemoryBackend},
        state::AppState,
    };

    async fn state_with(game: serde_json::Value) -> SharedState {
        let state = AppState::new(
            AppConfig::default(),
            Backend::from_single(Arc::new(MemoryBackend::new())),
        );
        let game: Game = serde_json::from_value(game).unwrap();
        state.catalog().replace_all(vec![game]).await;
        state
    }

    #[tokio::test(start_paused = true)]
    async fn game_without_images_shows_placeholder_and_arms_no_timer() {
        let state = state_with(json!({ "id": 1, "name": "Sea of Thieves" })).await;
        let detail = DetailController::open(state, 1).await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(detail.carousel_view(), CarouselView::NoImages);
        assert!(!detail.carousel().timer_armed());
        assert!(detail.comments.entries().is_empty());
    }

    #[tokio::test]
    async fn unknown_game_is_not_found() {
        let state = state_with(json!({ "id": 1, "name": "x" })).await;
        assert!(matches!(
            DetailController::open(state, 2).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn carousel_follows_catalog_edits() {
        let state = state_with(json!({ "id": 1, "name": "x", "images": ["a"] })).await;
        let detail = DetailController::open(state.clone(), 1).await.unwrap();
        let mut view = detail.carousel().watcher();
        view.wait_for(|view| matches!(view, CarouselView::Showing { total: 1, .. }))
            .await
            .unwrap();

        state
            .catalog()
            .stage(1, |game| {
                game.images.push("b".into());
                Ok::<(), ()>(())
            })
            .await
            .unwrap()
            .unwrap();
        view.wait_for(|view| matches!(view, CarouselView::Showing { total: 2, .. }))
            .await
            .unwrap();
    }
}
