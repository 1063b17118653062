use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::{
    sync::{RwLock, watch},
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        backend::{ChangeEvent, ChangeKind},
        models::{Game, NewNotification, Notification, NotificationId},
    },
    dto::format_display_time,
    error::ServiceError,
    state::{Notice, SessionPhase, SharedState},
};

/// Number of notifications kept for the bell menu.
pub const NOTIFICATION_LIMIT: usize = 20;
/// `type` of the notification created for every new game.
pub const NEW_GAME_KIND: &str = "new_game";
const NEW_GAME_TITLE: &str = "Nuevo juego añadido";

fn new_game_message(name: &str) -> String {
    format!("¡{name} ha sido añadido a la biblioteca!")
}

/// `dd/mm/yyyy hh:mm` creation time shown next to a notification.
pub fn display_time(notification: &Notification) -> String {
    format_display_time(notification.created_at)
}

/// Notification list of the current user with its unread count.
#[derive(Clone)]
pub struct NotificationFeed {
    state: SharedState,
    items: Arc<RwLock<Vec<Notification>>>,
    unread: Arc<watch::Sender<usize>>,
}

impl NotificationFeed {
    /// Inbox of the signed-in user; call `refresh` to load it.
    pub fn new(state: SharedState) -> Self {
        let (unread, _rx) = watch::channel(0);
        Self {
            state,
            items: Arc::new(RwLock::new(Vec::new())),
            unread: Arc::new(unread),
        }
    }

    fn current_user(&self) -> Option<Uuid> {
        self.state.session_handle().profile().map(|profile| profile.id)
    }

    async fn publish_unread(&self) {
        let count = self.items.read().await.iter().filter(|n| !n.read).count();
        self.unread.send_if_modified(|current| {
            let changed = *current != count;
            *current = count;
            changed
        });
    }

    /// Copy of the list, newest first.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.items.read().await.clone()
    }

    /// Number of unread notifications.
    pub fn unread_count(&self) -> usize {
        *self.unread.borrow()
    }

    /// Receiver notified when the unread count changes.
    pub fn unread_watcher(&self) -> watch::Receiver<usize> {
        self.unread.subscribe()
    }

    /// Drop every notification held locally.
    pub async fn clear(&self) {
        self.items.write().await.clear();
        self.publish_unread().await;
    }

    /// Refetch the latest notifications of the current user; clears without one.
    pub async fn refresh(&self) -> Result<usize, ServiceError> {
        let Some(user_id) = self.current_user() else {
            self.clear().await;
            return Ok(0);
        };
        let latest = self
            .state
            .notifications()
            .latest(user_id, NOTIFICATION_LIMIT)
            .await?;
        let count = latest.len();
        *self.items.write().await = latest;
        self.publish_unread().await;
        debug!(count, "notifications refreshed");
        Ok(count)
    }

    /// Record a `new_game` notification for the current user and prepend it.
    pub async fn on_game_inserted(&self, game: &Game) -> Result<Option<Notification>, ServiceError> {
        let Some(user_id) = self.current_user() else {
            return Ok(None);
        };
        let new = NewNotification {
            user_id,
            kind: NEW_GAME_KIND.to_string(),
            title: NEW_GAME_TITLE.to_string(),
            message: new_game_message(&game.name),
            game_id: Some(game.id),
            read: false,
            created_at: OffsetDateTime::now_utc(),
        };
        let Some(stored) = self.state.notifications().insert(&new).await? else {
            return Ok(None);
        };

        {
            let mut items = self.items.write().await;
            if !items.iter().any(|existing| existing.id == stored.id) {
                items.insert(0, stored.clone());
                items.truncate(NOTIFICATION_LIMIT);
            }
        }
        self.publish_unread().await;
        info!(game_id = game.id, "new game notification recorded");
        Ok(Some(stored))
    }

    fn report(&self, err: ServiceError) -> ServiceError {
        self.state.notices().publish(Notice::inline(err.to_string()));
        err
    }

    async fn mark_local(&self, ids: &[NotificationId]) {
        {
            let mut items = self.items.write().await;
            for item in items.iter_mut().filter(|item| ids.contains(&item.id)) {
                item.read = true;
            }
        }
        self.publish_unread().await;
    }

    /// Mark a notification as read.
    pub async fn mark_as_read(&self, id: NotificationId) -> Result<(), ServiceError> {
        self.state
            .notifications()
            .mark_read(&[id])
            .await
            .map_err(|err| self.report(err.into()))?;
        self.mark_local(&[id]).await;
        Ok(())
    }

    /// Mark every unread notification as read with a single update.
    pub async fn mark_all_as_read(&self) -> Result<(), ServiceError> {
        let unread: Vec<NotificationId> = self
            .items
            .read()
            .await
            .iter()
            .filter(|item| !item.read)
            .map(|item| item.id)
            .collect();
        if unread.is_empty() {
            return Ok(());
        }
        self.state
            .notifications()
            .mark_read(&unread)
            .await
            .map_err(|err| self.report(err.into()))?;
        self.mark_local(&unread).await;
        Ok(())
    }

    /// Opening the menu reads everything.
    pub async fn open(&self) -> Result<(), ServiceError> {
        if self.unread_count() > 0 {
            self.mark_all_as_read().await?;
        }
        Ok(())
    }

    async fn handle_change(&self, event: ChangeEvent) {
        if event.kind != ChangeKind::Insert {
            return;
        }
        let Some(record) = event.record else {
            return;
        };
        match serde_json::from_value::<Game>(Value::Object(record)) {
            Ok(game) => {
                if let Err(err) = self.on_game_inserted(&game).await {
                    warn!(game_id = game.id, error = %err, "failed to record new game notification");
                }
            }
            Err(err) => warn!(error = %err, "ignoring undecodable game insert"),
        }
    }

    async fn handle_session(&self, phase: SessionPhase, last_user: &mut Option<Uuid>) {
        match phase {
            SessionPhase::Anonymous => {
                *last_user = None;
                self.clear().await;
            }
            SessionPhase::Authenticated(profile) if *last_user != Some(profile.id) => {
                *last_user = Some(profile.id);
                if let Err(err) = self.refresh().await {
                    warn!(error = %err, "failed to fetch notifications");
                }
            }
            _ => {}
        }
    }

    /// Follow game inserts, session changes and the poll interval until the
    /// returned listener is dropped.
    pub async fn start(&self) -> Result<NotificationListener, ServiceError> {
        let mut changes = self.state.games().subscribe().await?;
        let mut session = self.state.session_handle().watcher();
        let mut poll = interval(self.state.config().timings.notification_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let feed = self.clone();
        let task = tokio::spawn(async move {
            let mut last_user = None;
            let phase = session.borrow_and_update().clone();
            feed.handle_session(phase, &mut last_user).await;

            loop {
                tokio::select! {
                    changed = session.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let phase = session.borrow_and_update().clone();
                        feed.handle_session(phase, &mut last_user).await;
                    }
                    event = changes.next() => match event {
                        Some(event) => feed.handle_change(event).await,
                        None => {
                            warn!("game change feed closed; notifications stop following inserts");
                            break;
                        }
                    },
                    _ = poll.tick() => {
                        if last_user.is_some() {
                            if let Err(err) = feed.refresh().await {
                                warn!(error = %err, "notification poll failed");
                            }
                        }
                    }
                }
            }
        });
        Ok(NotificationListener { task })
    }
}

/// Background task of a started [`NotificationFeed`]; aborted on drop.
pub struct NotificationListener {
    task: JoinHandle<()>,
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            backend::{
                Backend,
                memory::{MemoryBackend, Operation},
            },
            models::{NewGame, Profile},
            notification::NOTIFICATION_TABLE,
        },
        state::AppState,
    };

    fn signed_in() -> (MemoryBackend, SharedState, Profile) {
        let memory = MemoryBackend::new();
        let state = AppState::new(
            AppConfig::default(),
            Backend::from_single(Arc::new(memory.clone())),
        );
        let profile = Profile::provisional(Uuid::new_v4(), "jack".into(), None);
        state.session().set(SessionPhase::Authenticated(profile.clone()));
        (memory, state, profile)
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
    async fn game_insert_creates_unread_notification() {
        let (_memory, state, profile) = signed_in();
        let feed = NotificationFeed::new(state.clone());
        let _listener = feed.start().await.unwrap();
        let mut unread = feed.unread_watcher();

        state.games().insert(&new_game("Sea of Thieves")).await.unwrap();
        unread.wait_for(|count| *count == 1).await.unwrap();

        let items = feed.notifications().await;
        assert_eq!(items[0].kind, NEW_GAME_KIND);
        assert_eq!(items[0].title, "Nuevo juego añadido");
        assert_eq!(items[0].message, "¡Sea of Thieves ha sido añadido a la biblioteca!");
        assert_eq!(items[0].user_id, profile.id);

        feed.open().await.unwrap();
        assert_eq!(feed.unread_count(), 0);
        let stored = state.notifications().latest(profile.id, NOTIFICATION_LIMIT).await.unwrap();
        assert!(stored.iter().all(|n| n.read));
    }

    #[tokio::test]
    async fn mark_all_uses_one_update_and_skips_when_nothing_unread() {
        let (memory, state, _profile) = signed_in();
        let feed = NotificationFeed::new(state);
        for name in ["A", "B", "C"] {
            let game: Game = serde_json::from_value(serde_json::json!({ "id": 1, "name": name })).unwrap();
            feed.on_game_inserted(&game).await.unwrap();
        }
        assert_eq!(feed.unread_count(), 3);

        feed.mark_all_as_read().await.unwrap();
        feed.mark_all_as_read().await.unwrap();
        assert_eq!(memory.call_count(Operation::Update, NOTIFICATION_TABLE), 1);
        assert_eq!(feed.unread_count(), 0);
    }

    #[tokio::test]
    async fn latest_twenty_newest_first() {
        let (_memory, state, profile) = signed_in();
        let base = OffsetDateTime::now_utc();
        for minute in 0..25 {
            state
                .notifications()
                .insert(&NewNotification {
                    user_id: profile.id,
                    kind: NEW_GAME_KIND.into(),
                    title: "t".into(),
                    message: format!("m{minute}"),
                    game_id: None,
                    read: false,
                    created_at: base + Duration::from_secs(60 * minute),
                })
                .await
                .unwrap();
        }
        let feed = NotificationFeed::new(state);
        assert_eq!(feed.refresh().await.unwrap(), NOTIFICATION_LIMIT);
        assert_eq!(feed.notifications().await[0].message, "m24");
    }

    #[tokio::test]
    async fn signing_out_clears_the_list() {
        let (_memory, state, _profile) = signed_in();
        let feed = NotificationFeed::new(state.clone());
        let _listener = feed.start().await.unwrap();
        let game: Game = serde_json::from_value(serde_json::json!({ "id": 4, "name": "Raft" })).unwrap();
        feed.on_game_inserted(&game).await.unwrap();
        let mut unread = feed.unread_watcher();

        state.session().set(SessionPhase::Anonymous);
        unread.wait_for(|count| *count == 0).await.unwrap();
        assert!(feed.notifications().await.is_empty());
    }
}
