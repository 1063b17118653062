//! End-to-end flows of the controllers against the in-memory backend.

use std::{sync::Arc, time::Duration};

use serde_json::json;

use pirate_games_finder::{
    config::AppConfig,
    dao::{
        backend::{
            AuthEvent, AuthStateChange, Backend, Query, TableStore,
            memory::{MemoryBackend, Operation},
        },
        game::GAME_TABLE,
        models::{NewGame, NewProfile, Profile, Review, Role},
        review::REVIEW_TABLE,
    },
    dto::{
        auth::LoginRequest,
        game::{CreateGameRequest, GameField},
    },
    error::ServiceError,
    services::{
        carousel::CarouselView, catalog_service::CatalogController,
        detail_service::DetailController, session_service::SessionCoordinator,
    },
    state::{AppState, SessionPhase, SharedState},
};

fn setup() -> (MemoryBackend, SharedState) {
    let memory = MemoryBackend::new();
    let state = AppState::new(
        AppConfig::default(),
        Backend::from_single(Arc::new(memory.clone())),
    );
    (memory, state)
}

/// Create an account with a stored profile of `role` and log it in.
async fn sign_in_as(memory: &MemoryBackend, state: &SharedState, role: Role) -> Profile {
    let subject = memory.add_account("captain@flint.io", "doubloons", true).await;
    state
        .profiles()
        .insert(&NewProfile {
            auth_user_id: subject,
            username: "captain".into(),
            email: Some("captain@flint.io".into()),
            role,
        })
        .await
        .unwrap();
    let profile = SessionCoordinator::new(state.clone())
        .login(LoginRequest::new("captain@flint.io", "doubloons"))
        .await
        .unwrap();
    assert_eq!(profile.role, role);
    profile
}

fn new_game(name: &str) -> NewGame {
    NewGame {
        name: name.into(),
        genre: None,
        description: None,
        notes: None,
        image: None,
        images: Vec::new(),
        links: Vec::new(),
    }
}

#[tokio::test]
async fn login_provisions_profile_and_provider_sign_out_clears_it() {
    let (memory, state) = setup();
    memory.add_account("mary@read.io", "cutlass", true).await;
    let coordinator = SessionCoordinator::new(state.clone());
    let listener = coordinator.start().await;
    assert_eq!(state.session().current(), SessionPhase::Anonymous);

    let profile = coordinator
        .login(LoginRequest::new("mary@read.io", "cutlass"))
        .await
        .unwrap();
    assert_eq!(profile.username, "mary");
    assert_eq!(profile.role, Role::User);
    assert!(!profile.provisional);

    let mut watcher = state.session_handle().watcher();
    memory.emit_auth_event(AuthStateChange {
        event: AuthEvent::SignedOut,
        session: None,
    });
    watcher
        .wait_for(|phase| *phase == SessionPhase::Anonymous)
        .await
        .unwrap();
    listener.shutdown();
}

#[tokio::test]
async fn admin_creates_game_with_empty_collections() {
    let (memory, state) = setup();
    sign_in_as(&memory, &state, Role::Admin).await;
    let catalog = CatalogController::new(state);

    let game = catalog
        .create(CreateGameRequest::named("Sea of Thieves"))
        .await
        .unwrap();

    let games = catalog.games().await;
    assert_eq!(games.len(), 1);
    assert!(games[0].id > 0);
    assert_eq!(games[0].id, game.id);
    assert!(games[0].links.is_empty());
    assert!(games[0].images.is_empty());
}

#[tokio::test]
async fn string_link_reaches_the_store_normalized() {
    let (memory, state) = setup();
    sign_in_as(&memory, &state, Role::Admin).await;
    let catalog = CatalogController::new(state);
    let game = catalog.create(CreateGameRequest::named("Black Flag")).await.unwrap();

    catalog
        .update_field(game.id, GameField::Links, json!("https://mega.nz/file"))
        .await
        .unwrap();

    let rows = memory.select(GAME_TABLE, Query::new()).await.unwrap();
    assert_eq!(rows[0]["links"], json!([{ "name": "", "url": "https://mega.nz/file" }]));
}

#[tokio::test]
async fn failed_name_update_leaves_list_unchanged() {
    let (memory, state) = setup();
    sign_in_as(&memory, &state, Role::Admin).await;
    let catalog = CatalogController::new(state);
    let game = catalog.create(CreateGameRequest::named("Monkey Island")).await.unwrap();
    let before = catalog.games().await;

    memory.fail_next(Operation::Update, Some(GAME_TABLE), 1).await;
    let result = catalog
        .update_field(game.id, GameField::Name, json!("X"))
        .await;

    assert!(matches!(result, Err(ServiceError::Unavailable(_))));
    assert_eq!(catalog.games().await, before);
}

#[tokio::test]
async fn realtime_changes_from_other_sessions_are_applied() {
    let (_memory, state) = setup();
    let catalog = CatalogController::new(state.clone());
    catalog.load().await.unwrap();
    let subscription = catalog.subscribe_to_changes().await.unwrap();
    let mut revisions = state.catalog().watcher();

    let inserted = state.games().insert(&new_game("Pirates!")).await.unwrap();
    while state.catalog().get(inserted.id).await.is_none() {
        revisions.changed().await.unwrap();
    }

    state.games().delete(inserted.id).await.unwrap();
    while state.catalog().get(inserted.id).await.is_some() {
        revisions.changed().await.unwrap();
    }
    subscription.close();
}

#[tokio::test(start_paused = true)]
async fn anonymous_detail_without_images_has_no_timer() {
    let (_memory, state) = setup();
    let _listener = SessionCoordinator::new(state.clone()).start().await;
    assert_eq!(state.session().current(), SessionPhase::Anonymous);
    let game = state.games().insert(&new_game("Raft")).await.unwrap();
    CatalogController::new(state.clone()).load().await.unwrap();

    let detail = DetailController::open(state, game.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(detail.carousel_view(), CarouselView::NoImages);
    assert!(!detail.carousel().timer_armed());
    assert!(detail.rating.reviews().is_empty());
}

#[tokio::test]
async fn rerating_replaces_the_existing_review() {
    let (memory, state) = setup();
    let profile = sign_in_as(&memory, &state, Role::User).await;
    let game = state.games().insert(&new_game("Assassin's Creed IV")).await.unwrap();
    CatalogController::new(state.clone()).load().await.unwrap();
    state
        .reviews()
        .upsert(&Review {
            user_id: profile.auth_subject_id,
            game_id: game.id,
            rating: 3,
            comment: None,
            created_at: None,
        })
        .await
        .unwrap();

    let mut detail = DetailController::open(state.clone(), game.id).await.unwrap();
    assert_eq!(detail.rating.selected(), Some(3));
    detail.rating.click(5);
    detail.rating.set_text("great");
    detail.rating.submit().await.unwrap();

    let rows = memory.select(REVIEW_TABLE, Query::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    let stored = state.reviews().list_for_game(game.id).await.unwrap();
    assert_eq!(stored[0].rating, 5);
    assert_eq!(stored[0].comment.as_deref(), Some("great"));
}
