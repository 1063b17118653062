//! Application state shared by the controllers.

pub mod catalog;
pub mod notice;
pub mod session;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    dao::{
        backend::Backend, comment::CommentRepository, game::GameRepository,
        notification::NotificationRepository, profile::ProfileRepository,
        review::ReviewRepository,
    },
};

pub use self::catalog::{Catalog, StagedRow};
pub use self::notice::{Notice, NoticeHub, Severity};
pub use self::session::{SessionHandle, SessionPhase, SessionState};

/// Shared handle to [`AppState`].
pub type SharedState = Arc<AppState>;

const NOTICE_CAPACITY: usize = 32;

/// Central application state: configuration, backend handles and the owned
/// in-memory state each controller writes to.
pub struct AppState {
    config: AppConfig,
    backend: Backend,
    games: GameRepository,
    profiles: ProfileRepository,
    comments: CommentRepository,
    reviews: ReviewRepository,
    notifications: NotificationRepository,
    session: SessionState,
    catalog: Catalog,
    notices: NoticeHub,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The session starts uninitialized and the catalog empty.
    pub fn new(config: AppConfig, backend: Backend) -> SharedState {
        Arc::new(Self {
            games: GameRepository::new(backend.tables.clone(), backend.changes.clone()),
            profiles: ProfileRepository::new(backend.tables.clone()),
            comments: CommentRepository::new(backend.tables.clone()),
            reviews: ReviewRepository::new(backend.tables.clone()),
            notifications: NotificationRepository::new(backend.tables.clone()),
            session: SessionState::new(),
            catalog: Catalog::new(),
            notices: NoticeHub::new(NOTICE_CAPACITY),
            config,
            backend,
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Backend contracts.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Game table access.
    pub fn games(&self) -> &GameRepository {
        &self.games
    }

    /// Profile table access.
    pub fn profiles(&self) -> &ProfileRepository {
        &self.profiles
    }

    /// Comment table access.
    pub fn comments(&self) -> &CommentRepository {
        &self.comments
    }

    /// Review table access.
    pub fn reviews(&self) -> &ReviewRepository {
        &self.reviews
    }

    /// Notification table access.
    pub fn notifications(&self) -> &NotificationRepository {
        &self.notifications
    }

    /// Current-user state, written only by the session coordinator.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Read-only session view for controllers and views.
    pub fn session_handle(&self) -> SessionHandle {
        self.session.handle()
    }

    /// Game list, written only by the catalog controller.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Hub used to surface failures to the user.
    pub fn notices(&self) -> &NoticeHub {
        &self.notices
    }
}
