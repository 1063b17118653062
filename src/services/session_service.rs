use std::{future::Future, sync::Arc, time::Duration};

use dashmap::DashMap;
use futures::{
    FutureExt, StreamExt,
    future::{BoxFuture, Shared},
    stream::BoxStream,
};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    dao::{
        backend::{AuthEvent, AuthStateChange, Session},
        models::{NewProfile, Profile, Role, SubjectId},
        storage::{StorageError, StorageResult},
    },
    dto::auth::{LoginRequest, RegisterRequest},
    error::AuthError,
    state::{SessionPhase, SharedState},
};

type ProfileLookup = Shared<BoxFuture<'static, Option<Profile>>>;

/// Username given to provisioned profiles: the local part of the email.
fn username_from(identifier: Option<&str>) -> String {
    identifier
        .and_then(|value| value.split('@').next())
        .map(str::trim)
        .filter(|local| !local.is_empty())
        .unwrap_or("user")
        .to_string()
}

/// Bridges the auth provider's session lifecycle to the application profile.
///
/// Owns the in-flight profile lookups (one per subject at a time) and the
/// background retries reconciling provisional profiles.
#[derive(Clone)]
pub struct SessionCoordinator {
    state: SharedState,
    in_flight: Arc<DashMap<SubjectId, ProfileLookup>>,
    retries: Arc<DashMap<SubjectId, JoinHandle<()>>>,
}

impl SessionCoordinator {
    /// Coordinator writing to the session of `state`.
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            in_flight: Arc::new(DashMap::new()),
            retries: Arc::new(DashMap::new()),
        }
    }

    fn fetch_timeout(&self) -> Duration {
        self.state.config().timings.profile_fetch_timeout
    }

    /// Run `work` within the profile fetch timeout.
    async fn bounded<T>(&self, what: &'static str, work: impl Future<Output = T>) -> Option<T> {
        match timeout(self.fetch_timeout(), work).await {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(operation = what, timeout = ?self.fetch_timeout(), "backend call timed out");
                None
            }
        }
    }

    /// Look up the profile of `subject`.
    ///
    /// Concurrent calls for the same subject share one remote lookup. Errors and
    /// timeouts resolve to `None`, exactly like a missing row.
    pub async fn fetch_profile(&self, subject: SubjectId) -> Option<Profile> {
        let lookup = self
            .in_flight
            .entry(subject)
            .or_insert_with(|| self.spawn_lookup(subject))
            .clone();

        match timeout(self.fetch_timeout(), lookup).await {
            Ok(profile) => profile,
            Err(_) => {
                warn!(%subject, timeout = ?self.fetch_timeout(), "profile lookup timed out; treating as not found");
                None
            }
        }
    }

    fn spawn_lookup(&self, subject: SubjectId) -> ProfileLookup {
        let profiles = self.state.profiles().clone();
        let in_flight = self.in_flight.clone();
        let task = tokio::spawn(async move {
            let result = profiles.find_by_subject(subject).await;
            in_flight.remove(&subject);
            match result {
                Ok(profile) => profile,
                Err(err) => {
                    warn!(%subject, error = %err, "profile lookup failed; treating as not found");
                    None
                }
            }
        });

        async move {
            task.await.unwrap_or_else(|err| {
                warn!(%subject, error = %err, "profile lookup task aborted");
                None
            })
        }
        .boxed()
        .shared()
    }

    /// Number of subjects with a lookup currently running.
    pub fn lookups_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Create the default profile row for `subject`.
    ///
    /// When the insert fails a provisional profile is returned so the user is
    /// never left without an identity, and a bounded background retry
    /// replaces it with the stored row later.
    pub async fn provision_profile(&self, subject: SubjectId, email: Option<&str>) -> Profile {
        let new_profile = NewProfile {
            auth_user_id: subject,
            username: username_from(email),
            email: email.map(str::to_string),
            role: Role::User,
        };

        let inserted = self
            .bounded("profile insert", self.state.profiles().insert(&new_profile))
            .await;
        match inserted {
            Some(Ok(Some(profile))) => {
                info!(%subject, "provisioned profile");
                return profile;
            }
            Some(Ok(None)) => {
                if let Some(profile) = self.fetch_profile(subject).await {
                    return profile;
                }
                warn!(%subject, "provisioned profile not readable yet; using a provisional one");
            }
            Some(Err(err)) => {
                warn!(%subject, error = %err, "profile insert failed; using a provisional profile");
            }
            None => {}
        }

        self.schedule_reconcile(new_profile.clone());
        Profile::provisional(subject, new_profile.username, new_profile.email)
    }

    fn schedule_reconcile(&self, new_profile: NewProfile) {
        let subject = new_profile.auth_user_id;
        let attempts = self.state.config().timings.profile_retry_attempts;
        if attempts == 0 {
            return;
        }
        let spacing = self.state.config().timings.profile_retry_spacing;
        let coordinator = self.clone();

        let task = tokio::spawn(async move {
            for attempt in 1..=attempts {
                tokio::time::sleep(spacing).await;
                match coordinator.reconcile_once(&new_profile).await {
                    Ok(profile) => {
                        if coordinator.state.session().reconcile(subject, profile) {
                            info!(%subject, attempt, "provisional profile replaced by stored row");
                        }
                        break;
                    }
                    Err(err) => {
                        warn!(%subject, attempt, error = %err, "profile reconcile attempt failed");
                    }
                }
            }
            coordinator.retries.remove(&subject);
        });

        if let Some(previous) = self.retries.insert(subject, task) {
            previous.abort();
        }
    }

    async fn reconcile_once(&self, new_profile: &NewProfile) -> StorageResult<Profile> {
        let profiles = self.state.profiles();
        if let Some(profile) = profiles.find_by_subject(new_profile.auth_user_id).await? {
            return Ok(profile);
        }
        profiles
            .insert(new_profile)
            .await?
            .ok_or_else(|| StorageError::rejected("users: insert returned no row"))
    }

    /// Number of background reconcile tasks still pending.
    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    fn cancel_retries(&self) {
        self.retries.retain(|_, task| {
            task.abort();
            false
        });
    }

    /// Fetch the profile of `subject`, provisioning it when missing.
    async fn resolve_profile(&self, subject: SubjectId, email: Option<&str>) -> Profile {
        match self.fetch_profile(subject).await {
            Some(profile) => profile,
            None => self.provision_profile(subject, email).await,
        }
    }

    /// Sign in with a password and make the resolved profile current.
    pub async fn login(&self, request: LoginRequest) -> Result<Profile, AuthError> {
        request.validate()?;
        let identifier = request.identifier.trim().to_string();

        let session = self
            .state
            .backend()
            .auth
            .sign_in_with_password(identifier.clone(), request.secret)
            .await
            .map_err(|err| {
                warn!(error = %err, "sign-in refused");
                AuthError::from(err)
            })?;

        let subject = session.subject();
        let email = session.user.email.clone().unwrap_or(identifier);
        self.state.session().set(SessionPhase::Loading);
        let profile = self.resolve_profile(subject, Some(&email)).await;
        info!(%subject, role = ?profile.role, "signed in");
        self.state
            .session()
            .set(SessionPhase::Authenticated(profile.clone()));
        Ok(profile)
    }

    /// Invalidate the provider session and clear the current profile.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let outcome = self.state.backend().auth.sign_out().await;
        self.cancel_retries();
        self.state.session().set(SessionPhase::Anonymous);
        match outcome {
            Ok(()) => {
                info!("signed out");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "sign-out failed; local session cleared anyway");
                Err(err.into())
            }
        }
    }

    /// Create an identity and its profile row.
    ///
    /// Returns `None` when the provider holds the identity until confirmation
    /// and does not report its subject yet. A failed profile insert after the
    /// identity was created is reported as [`AuthError::ProfileInconsistency`];
    /// the identity is not rolled back.
    pub async fn register(&self, request: RegisterRequest) -> Result<Option<Profile>, AuthError> {
        request.validate()?;
        let email = request.email.trim().to_string();
        let username = request.username.trim().to_string();

        let subject = self
            .state
            .backend()
            .auth
            .sign_up(email.clone(), request.password)
            .await
            .map_err(|err| {
                warn!(error = %err, "sign-up refused");
                AuthError::from(err)
            })?;

        let Some(subject) = subject else {
            info!("identity created; awaiting confirmation");
            return Ok(None);
        };

        let new_profile = NewProfile {
            auth_user_id: subject,
            username,
            email: Some(email),
            role: Role::User,
        };
        match self.state.profiles().insert(&new_profile).await {
            Ok(profile) => {
                info!(%subject, "registered");
                Ok(profile)
            }
            Err(err) => {
                warn!(%subject, error = %err, "identity created but profile insert failed");
                Err(AuthError::ProfileInconsistency(err.to_string()))
            }
        }
    }

    /// Determine the initial session, then follow provider events.
    ///
    /// The event stream is opened before the initial check so nothing is missed,
    /// but events are only applied once the check has completed (or timed out).
    /// Loading always clears before this returns.
    pub async fn start(&self) -> SessionListener {
        let events = self.state.backend().auth.subscribe();
        self.state.session().set(SessionPhase::Loading);

        let phase = self.bootstrap().await;
        match &phase {
            SessionPhase::Authenticated(profile) => {
                info!(subject = %profile.auth_subject_id, "session restored")
            }
            _ => info!("no active session"),
        }
        self.state.session().set(phase);

        let coordinator = self.clone();
        let task = tokio::spawn(async move { coordinator.listen(events).await });
        SessionListener {
            task: Some(task),
            coordinator: self.clone(),
        }
    }

    async fn bootstrap(&self) -> SessionPhase {
        let session = match self
            .bounded("session check", self.state.backend().auth.session())
            .await
        {
            Some(Ok(Some(session))) => session,
            Some(Ok(None)) | None => return SessionPhase::Anonymous,
            Some(Err(err)) => {
                warn!(error = %err, "session check failed; continuing anonymously");
                return SessionPhase::Anonymous;
            }
        };

        let Session { user, .. } = session;
        let profile = self.resolve_profile(user.id, user.email.as_deref()).await;
        SessionPhase::Authenticated(profile)
    }

    async fn listen(self, mut events: BoxStream<'static, AuthStateChange>) {
        while let Some(change) = events.next().await {
            self.handle_event(change).await;
        }
        debug!("auth event stream ended");
    }

    async fn handle_event(&self, change: AuthStateChange) {
        match (change.event, change.session) {
            (AuthEvent::SignedIn, Some(session)) => {
                let subject = session.subject();
                if self.state.session().is_subject(subject) {
                    debug!(%subject, "sign-in event for the current profile");
                    return;
                }
                match self.fetch_profile(subject).await {
                    Some(profile) => {
                        info!(%subject, "profile loaded after sign-in event");
                        self.state
                            .session()
                            .set(SessionPhase::Authenticated(profile));
                    }
                    None => debug!(%subject, "no profile yet for signed-in subject"),
                }
            }
            (AuthEvent::SignedOut, _) => {
                self.cancel_retries();
                self.state.session().set(SessionPhase::Anonymous);
                info!("signed out by provider");
            }
            (event, _) => debug!(?event, "ignoring auth event"),
        }
    }
}

/// Handle on the running auth-event listener. Tear down with
/// [`SessionListener::shutdown`]; dropping it has the same effect.
pub struct SessionListener {
    task: Option<JoinHandle<()>>,
    coordinator: SessionCoordinator,
}

impl SessionListener {
    /// Stop listening to auth events.
    pub fn shutdown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.coordinator.cancel_retries();
    }
}

impl Drop for SessionListener {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AppConfig, Timings},
        dao::{
            backend::{
                AuthProvider, AuthUser, Backend,
                memory::{MemoryBackend, Operation},
            },
            profile::PROFILE_TABLE,
        },
        state::AppState,
    };

    fn session_of(subject: SubjectId, email: &str) -> Session {
        Session {
            access_token: "token".into(),
            refresh_token: None,
            expires_at: None,
            user: AuthUser {
                id: subject,
                email: Some(email.into()),
            },
        }
    }

    fn setup() -> (MemoryBackend, SessionCoordinator) {
        let memory = MemoryBackend::new();
        let config = AppConfig {
            timings: Timings {
                profile_fetch_timeout: Duration::from_secs(5),
                profile_retry_attempts: 3,
                profile_retry_spacing: Duration::from_secs(3),
                ..Timings::default()
            },
            ..AppConfig::default()
        };
        let state = AppState::new(config, Backend::from_single(Arc::new(memory.clone())));
        (memory, SessionCoordinator::new(state))
    }

    #[test]
    fn username_defaults_to_email_local_part() {
        assert_eq!(username_from(Some("anne.bonny@sea.io")), "anne.bonny");
        assert_eq!(username_from(Some("@sea.io")), "user");
        assert_eq!(username_from(None), "user");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetches_share_one_lookup() {
        let (memory, coordinator) = setup();
        let subject = memory.add_account("anne@sea.io", "pw", true).await;
        coordinator.provision_profile(subject, Some("anne@sea.io")).await;
        memory
            .set_latency(Operation::Select, Duration::from_millis(500))
            .await;

        let (a, b, c) = tokio::join!(
            coordinator.fetch_profile(subject),
            coordinator.fetch_profile(subject),
            coordinator.fetch_profile(subject),
        );

        assert_eq!(memory.call_count(Operation::Select, PROFILE_TABLE), 1);
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(coordinator.lookups_in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_resolves_to_not_found() {
        let (memory, coordinator) = setup();
        memory
            .set_latency(Operation::Select, Duration::from_secs(60))
            .await;

        let profile = coordinator.fetch_profile(SubjectId::new_v4()).await;
        assert!(profile.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_provision_is_reconciled_in_background() {
        let (memory, coordinator) = setup();
        let subject = memory.add_account("mary@sea.io", "pw", true).await;
        memory
            .fail_next(Operation::Insert, Some(PROFILE_TABLE), 2)
            .await;

        let profile = coordinator.login(LoginRequest::new("mary@sea.io", "pw")).await.unwrap();
        assert!(profile.provisional);
        assert_eq!(profile.username, "mary");
        assert_eq!(coordinator.pending_retries(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;

        let current = coordinator.state.session_handle().profile().unwrap();
        assert!(!current.provisional);
        assert_eq!(current.auth_subject_id, subject);
        assert_eq!(coordinator.pending_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unverified_login_is_classified() {
        let (memory, coordinator) = setup();
        memory.add_account("jack@sea.io", "pw", false).await;

        let err = coordinator
            .login(LoginRequest::new("jack@sea.io", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unverified));
        assert!(coordinator.state.session_handle().profile().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn register_without_reported_subject_creates_no_profile() {
        let (memory, coordinator) = setup();
        memory.set_auto_confirm(false);

        let registered = coordinator
            .register(RegisterRequest::new("calico", "pw123456", "calico@sea.io"))
            .await
            .unwrap();
        assert!(registered.is_none());
        assert_eq!(memory.call_count(Operation::Insert, PROFILE_TABLE), 0);

        let err = coordinator
            .login(LoginRequest::new("calico@sea.io", "pw123456"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unverified));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_profile_insert_keeps_the_identity() {
        let (memory, coordinator) = setup();
        memory
            .fail_next(Operation::Insert, Some(PROFILE_TABLE), 1)
            .await;

        let err = coordinator
            .register(RegisterRequest::new("rackham", "pw123456", "rackham@sea.io"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ProfileInconsistency(_)));

        let profile = coordinator
            .login(LoginRequest::new("rackham@sea.io", "pw123456"))
            .await
            .unwrap();
        assert!(!profile.provisional);
        assert_eq!(profile.username, "rackham");
    }

    #[tokio::test(start_paused = true)]
    async fn logout_clears_profile_even_when_provider_fails() {
        let (memory, coordinator) = setup();
        memory.add_account("vane@sea.io", "pw", true).await;
        coordinator.login(LoginRequest::new("vane@sea.io", "pw")).await.unwrap();
        memory.fail_next(Operation::SignOut, None, 1).await;

        assert!(coordinator.logout().await.is_err());
        assert_eq!(coordinator.state.session().current(), SessionPhase::Anonymous);
    }

    #[tokio::test(start_paused = true)]
    async fn sign_in_event_for_current_profile_is_a_no_op() {
        let (memory, coordinator) = setup();
        let _listener = coordinator.start().await;
        let subject = memory.add_account("teach@sea.io", "pw", true).await;
        let profile = coordinator.login(LoginRequest::new("teach@sea.io", "pw")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let selects = memory.call_count(Operation::Select, PROFILE_TABLE);

        memory.emit_auth_event(AuthStateChange {
            event: AuthEvent::SignedIn,
            session: Some(session_of(subject, "teach@sea.io")),
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(memory.call_count(Operation::Select, PROFILE_TABLE), selects);
        assert_eq!(
            coordinator.state.session().current(),
            SessionPhase::Authenticated(profile)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sign_in_event_for_another_subject_only_fetches() {
        let (memory, coordinator) = setup();
        let _listener = coordinator.start().await;
        let known = memory.add_account("kidd@sea.io", "pw", true).await;
        let stored = coordinator.provision_profile(known, Some("kidd@sea.io")).await;
        let inserts = memory.call_count(Operation::Insert, PROFILE_TABLE);

        let stranger = SubjectId::new_v4();
        memory.emit_auth_event(AuthStateChange {
            event: AuthEvent::SignedIn,
            session: Some(session_of(stranger, "nobody@sea.io")),
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coordinator.state.session().current(), SessionPhase::Anonymous);
        assert_eq!(memory.call_count(Operation::Insert, PROFILE_TABLE), inserts);

        memory.emit_auth_event(AuthStateChange {
            event: AuthEvent::SignedIn,
            session: Some(session_of(known, "kidd@sea.io")),
        });
        let mut watcher = coordinator.state.session_handle().watcher();
        watcher
            .wait_for(|phase| phase.profile().is_some_and(|p| p.auth_subject_id == known))
            .await
            .unwrap();
        assert_eq!(coordinator.state.session_handle().profile(), Some(stored));
        assert_eq!(memory.call_count(Operation::Insert, PROFILE_TABLE), inserts);
    }

    #[tokio::test(start_paused = true)]
    async fn events_during_bootstrap_apply_after_it() {
        let (memory, coordinator) = setup();
        let subject = memory.add_account("bonnet@sea.io", "pw", true).await;
        coordinator.provision_profile(subject, Some("bonnet@sea.io")).await;
        memory
            .sign_in_with_password("bonnet@sea.io".into(), "pw".into())
            .await
            .unwrap();
        memory
            .set_latency(Operation::Select, Duration::from_secs(2))
            .await;

        let starting = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.start().await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        memory.emit_auth_event(AuthStateChange {
            event: AuthEvent::SignedOut,
            session: None,
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(coordinator.state.session().current().is_loading());

        let _listener = starting.await.unwrap();
        let mut watcher = coordinator.state.session_handle().watcher();
        watcher
            .wait_for(|phase| *phase == SessionPhase::Anonymous)
            .await
            .unwrap();
    }
}
