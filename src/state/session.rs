//! Current-user state machine and its read-only handle.

use tokio::sync::watch;

use crate::{
    dao::models::{Profile, SubjectId},
    error::{AuthError, ServiceError},
};

/// Lifecycle of the current user as seen by the application.
///
/// `Uninitialized → Loading → {Authenticated, Anonymous}`; the resolved states
/// only go back to `Loading` while an explicit profile fetch is running.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionPhase {
    /// Nothing determined yet.
    #[default]
    Uninitialized,
    /// A session check or profile fetch is running.
    Loading,
    /// Signed in with a resolved profile.
    Authenticated(Profile),
    /// No session.
    Anonymous,
}

impl SessionPhase {
    /// Profile of an authenticated phase.
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            SessionPhase::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }

    /// Whether the phase is still undetermined.
    pub fn is_loading(&self) -> bool {
        matches!(self, SessionPhase::Uninitialized | SessionPhase::Loading)
    }
}

/// Owner of the current-user state; only the session coordinator writes to it.
pub struct SessionState {
    phase: watch::Sender<SessionPhase>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// State starting in [`SessionPhase::Uninitialized`].
    pub fn new() -> Self {
        let (phase, _rx) = watch::channel(SessionPhase::Uninitialized);
        Self { phase }
    }

    /// Read-only handle for controllers and views.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            phase: self.phase.subscribe(),
        }
    }

    /// Current phase.
    pub fn current(&self) -> SessionPhase {
        self.phase.borrow().clone()
    }

    pub(crate) fn set(&self, phase: SessionPhase) {
        self.phase.send_replace(phase);
    }

    /// Replace a provisional profile of `subject` by its stored row.
    ///
    /// Returns `false` when the session moved on (signed out or another user).
    pub(crate) fn reconcile(&self, subject: SubjectId, stored: Profile) -> bool {
        self.phase.send_if_modified(|phase| match phase {
            SessionPhase::Authenticated(current)
                if current.provisional && current.auth_subject_id == subject =>
            {
                *phase = SessionPhase::Authenticated(stored);
                true
            }
            _ => false,
        })
    }

    /// Whether the current profile belongs to `subject`.
    pub(crate) fn is_subject(&self, subject: SubjectId) -> bool {
        self.phase
            .borrow()
            .profile()
            .is_some_and(|profile| profile.auth_subject_id == subject)
    }
}

/// Cheap, cloneable view of the session used to gate write paths.
#[derive(Clone)]
pub struct SessionHandle {
    phase: watch::Receiver<SessionPhase>,
}

impl SessionHandle {
    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase.borrow().clone()
    }

    /// Current profile, if signed in.
    pub fn profile(&self) -> Option<Profile> {
        self.phase.borrow().profile().cloned()
    }

    /// True until the initial determination completes, and during explicit fetches.
    pub fn is_loading(&self) -> bool {
        self.phase.borrow().is_loading()
    }

    /// Whether the current profile is an admin.
    pub fn is_admin(&self) -> bool {
        self.phase
            .borrow()
            .profile()
            .is_some_and(Profile::is_admin)
    }

    /// Whether the current profile is a regular user.
    pub fn is_user(&self) -> bool {
        self.phase
            .borrow()
            .profile()
            .is_some_and(|profile| !profile.is_admin())
    }

    /// Current profile, or [`AuthError::NoSession`].
    pub fn require_session(&self) -> Result<Profile, AuthError> {
        self.profile().ok_or(AuthError::NoSession)
    }

    /// Current profile when it has the admin role.
    pub fn require_admin(&self) -> Result<Profile, ServiceError> {
        let profile = self.require_session()?;
        if profile.is_admin() {
            Ok(profile)
        } else {
            Err(ServiceError::Forbidden("admin role required".into()))
        }
    }

    /// Watch receiver for views that re-render on session changes.
    pub fn watcher(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    /// Wait until the initial determination has completed.
    pub async fn settled(&mut self) -> SessionPhase {
        let settled = match self.phase.wait_for(|phase| !phase.is_loading()).await {
            Ok(phase) => Some(phase.clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.phase.borrow().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::Role;
    use uuid::Uuid;

    #[test]
    fn starts_loading_and_exposes_roles() {
        let state = SessionState::new();
        let handle = state.handle();
        assert!(handle.is_loading());
        assert!(!handle.is_admin());

        let mut profile = Profile::provisional(Uuid::new_v4(), "anne".into(), None);
        profile.role = Role::Admin;
        state.set(SessionPhase::Authenticated(profile));
        assert!(!handle.is_loading());
        assert!(handle.is_admin());
        assert!(!handle.is_user());
        assert!(handle.require_admin().is_ok());

        state.set(SessionPhase::Anonymous);
        assert!(matches!(handle.require_session(), Err(AuthError::NoSession)));
    }

    #[test]
    fn reconcile_only_replaces_matching_provisional_profile() {
        let state = SessionState::new();
        let subject = Uuid::new_v4();
        let provisional = Profile::provisional(subject, "mary".into(), None);
        let mut stored = provisional.clone();
        stored.provisional = false;
        stored.id = Uuid::new_v4();

        state.set(SessionPhase::Authenticated(provisional));
        assert!(!state.reconcile(Uuid::new_v4(), stored.clone()));
        assert!(state.reconcile(subject, stored.clone()));
        assert_eq!(state.current(), SessionPhase::Authenticated(stored.clone()));
        assert!(!state.reconcile(subject, stored));
    }

    #[tokio::test]
    async fn settled_waits_for_determination_and_survives_a_dropped_owner() {
        let state = SessionState::new();
        let mut handle = state.handle();
        let waiter = tokio::spawn(async move { handle.settled().await });
        state.set(SessionPhase::Loading);
        state.set(SessionPhase::Anonymous);
        assert_eq!(waiter.await.unwrap(), SessionPhase::Anonymous);

        let fresh = SessionState::new();
        let mut orphan = fresh.handle();
        drop(fresh);
        assert_eq!(orphan.settled().await, SessionPhase::Uninitialized);
    }
}
