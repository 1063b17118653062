//! In-process implementation of every backend contract.
//!
//! Behaves like the hosted backend closely enough for the controllers: serial
//! or UUID primary keys, unique constraints, `created_at` defaults, change
//! events on every write and password accounts with optional confirmation.
//! Faults and latency can be injected per operation to exercise degraded paths.

mod tables;

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use futures::{StreamExt, future::BoxFuture, future::ready, stream::BoxStream};
use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, watch},
    time::sleep,
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use uuid::Uuid;

use crate::dao::{
    backend::{
        AuthEvent, AuthProvider, AuthStateChange, AuthUser, ChangeEvent, ChangeFeed,
        ChangeSubscription, ObjectStore, Session, UploadOptions,
    },
    models::SubjectId,
    storage::{AuthProviderError, AuthResult, StorageError, StorageResult},
};

use self::tables::TableData;

const EVENT_CAPACITY: usize = 256;
const SESSION_TTL: Duration = Duration::from_secs(3600);
const PUBLIC_BASE_URL: &str = "memory://storage/v1/object/public";

/// Operations that can be counted, delayed or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`TableStore::select`](crate::dao::backend::TableStore::select).
    Select,
    /// Plain table insert.
    Insert,
    /// Insert-or-merge on conflict columns.
    Upsert,
    /// Table update.
    Update,
    /// Table delete.
    Delete,
    /// Object upload.
    Upload,
    /// Password sign-in.
    SignIn,
    /// Identity creation.
    SignUp,
    /// Session invalidation.
    SignOut,
}

/// Error returned by operations made to fail on purpose.
#[derive(Debug, Error)]
#[error("injected {operation:?} failure")]
pub struct InjectedFault {
    /// Operation that was made to fail.
    pub operation: Operation,
}

#[derive(Default)]
struct Faults {
    failures: HashMap<(Operation, Option<&'static str>), usize>,
    latency: HashMap<Operation, Duration>,
}

struct Account {
    subject: SubjectId,
    email: String,
    password: String,
    confirmed: bool,
}

struct Inner {
    tables: Mutex<HashMap<&'static str, TableData>>,
    accounts: Mutex<HashMap<String, Account>>,
    session: Mutex<Option<Session>>,
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    faults: Mutex<Faults>,
    calls: DashMap<(Operation, &'static str), usize>,
    auth_events: broadcast::Sender<AuthStateChange>,
    changes: broadcast::Sender<ChangeEvent>,
    feed_resets: watch::Sender<u64>,
    auto_confirm: AtomicBool,
}

/// Shared handle to the in-memory backend; clones see the same data.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty backend: no tables, accounts or session.
    pub fn new() -> Self {
        let (auth_events, _) = broadcast::channel(EVENT_CAPACITY);
        let (changes, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(HashMap::new()),
                accounts: Mutex::new(HashMap::new()),
                session: Mutex::new(None),
                objects: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                calls: DashMap::new(),
                auth_events,
                changes,
                feed_resets: watch::Sender::new(0),
                auto_confirm: AtomicBool::new(true),
            }),
        }
    }

    /// Whether new sign-ups are confirmed immediately (default) or need verification.
    ///
    /// Unconfirmed sign-ups do not report their subject, like a provider that
    /// withholds the identity until the email is verified.
    pub fn set_auto_confirm(&self, enabled: bool) {
        self.inner.auto_confirm.store(enabled, Ordering::SeqCst);
    }

    /// Register an identity directly, bypassing sign-up.
    pub async fn add_account(&self, email: &str, password: &str, confirmed: bool) -> SubjectId {
        let subject = Uuid::new_v4();
        let mut accounts = self.inner.accounts.lock().await;
        accounts.insert(
            email.to_lowercase(),
            Account {
                subject,
                email: email.to_string(),
                password: password.to_string(),
                confirmed,
            },
        );
        subject
    }

    /// Make the next `times` calls of `operation` fail. `table` narrows table operations.
    pub async fn fail_next(&self, operation: Operation, table: Option<&'static str>, times: usize) {
        let mut faults = self.inner.faults.lock().await;
        *faults.failures.entry((operation, table)).or_default() += times;
    }

    /// Delay every call of `operation` by `latency`.
    pub async fn set_latency(&self, operation: Operation, latency: Duration) {
        let mut faults = self.inner.faults.lock().await;
        if latency.is_zero() {
            faults.latency.remove(&operation);
        } else {
            faults.latency.insert(operation, latency);
        }
    }

    /// Number of calls of `operation` against `table` so far.
    pub fn call_count(&self, operation: Operation, table: &'static str) -> usize {
        self.inner
            .calls
            .get(&(operation, table))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Push an auth-state transition to subscribers as if the provider emitted it.
    pub fn emit_auth_event(&self, change: AuthStateChange) {
        let _ = self.inner.auth_events.send(change);
    }

    /// End every open change subscription, as when the realtime socket drops.
    /// Later subscriptions are unaffected.
    pub fn drop_change_feeds(&self) {
        self.inner.feed_resets.send_modify(|generation| *generation += 1);
    }

    /// Bytes stored at `bucket/path`, if any.
    pub async fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        let objects = self.inner.objects.lock().await;
        objects.get(&(bucket.to_string(), path.to_string())).cloned()
    }

    /// Record the call, apply latency and consume a pending failure if any.
    async fn enter(&self, operation: Operation, table: &'static str) -> Result<(), InjectedFault> {
        *self.inner.calls.entry((operation, table)).or_default() += 1;

        let (latency, fail) = {
            let mut faults = self.inner.faults.lock().await;
            let latency = faults.latency.get(&operation).copied();
            let fail = [(operation, Some(table)), (operation, None)]
                .into_iter()
                .any(|key| match faults.failures.get_mut(&key) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        true
                    }
                    _ => false,
                });
            (latency, fail)
        };

        if let Some(latency) = latency {
            sleep(latency).await;
        }

        if fail {
            debug!(?operation, table, "injecting backend failure");
            return Err(InjectedFault { operation });
        }
        Ok(())
    }

    async fn enter_storage(&self, operation: Operation, table: &'static str) -> StorageResult<()> {
        self.enter(operation, table).await.map_err(|fault| {
            StorageError::unavailable(format!("{table}: {fault}"), fault)
        })
    }

    async fn enter_auth(&self, operation: Operation) -> AuthResult<()> {
        self.enter(operation, "auth")
            .await
            .map_err(|fault| AuthProviderError::unavailable(fault.to_string(), fault))
    }

    fn publish_auth(&self, event: AuthEvent, session: Option<Session>) {
        let _ = self.inner.auth_events.send(AuthStateChange { event, session });
    }

    fn publish_change(&self, event: ChangeEvent) {
        let _ = self.inner.changes.send(event);
    }

    fn issue_session(subject: SubjectId, email: &str) -> Session {
        Session {
            access_token: Uuid::new_v4().to_string(),
            refresh_token: Some(Uuid::new_v4().to_string()),
            expires_at: Some(SystemTime::now() + SESSION_TTL),
            user: AuthUser {
                id: subject,
                email: Some(email.to_string()),
            },
        }
    }
}

impl AuthProvider for MemoryBackend {
    fn sign_in_with_password(
        &self,
        email: String,
        password: String,
    ) -> BoxFuture<'static, AuthResult<Session>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.enter_auth(Operation::SignIn).await?;
            let session = {
                let accounts = backend.inner.accounts.lock().await;
                let account = accounts
                    .get(&email.to_lowercase())
                    .filter(|account| account.password == password)
                    .ok_or_else(|| AuthProviderError::rejected("Invalid login credentials"))?;
                if !account.confirmed {
                    return Err(AuthProviderError::rejected("Email not confirmed"));
                }
                Self::issue_session(account.subject, &account.email)
            };

            *backend.inner.session.lock().await = Some(session.clone());
            backend.publish_auth(AuthEvent::SignedIn, Some(session.clone()));
            Ok(session)
        })
    }

    fn sign_up(
        &self,
        email: String,
        password: String,
    ) -> BoxFuture<'static, AuthResult<Option<SubjectId>>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.enter_auth(Operation::SignUp).await?;
            let key = email.to_lowercase();
            let mut accounts = backend.inner.accounts.lock().await;
            if accounts.contains_key(&key) {
                return Err(AuthProviderError::rejected("User already registered"));
            }
            let subject = Uuid::new_v4();
            let confirmed = backend.inner.auto_confirm.load(Ordering::SeqCst);
            accounts.insert(
                key,
                Account {
                    subject,
                    email,
                    password,
                    confirmed,
                },
            );
            Ok(confirmed.then_some(subject))
        })
    }

    fn sign_out(&self) -> BoxFuture<'static, AuthResult<()>> {
        let backend = self.clone();
        Box::pin(async move {
            backend.enter_auth(Operation::SignOut).await?;
            backend.inner.session.lock().await.take();
            backend.publish_auth(AuthEvent::SignedOut, None);
            Ok(())
        })
    }

    fn session(&self) -> BoxFuture<'static, AuthResult<Option<Session>>> {
        let backend = self.clone();
        Box::pin(async move {
            let session = backend.inner.session.lock().await.clone();
            Ok(session.filter(|session| !session.is_expired(SystemTime::now())))
        })
    }

    fn refresh_session(&self) -> BoxFuture<'static, AuthResult<Session>> {
        let backend = self.clone();
        Box::pin(async move {
            let mut slot = backend.inner.session.lock().await;
            let Some(current) = slot.as_ref() else {
                return Err(AuthProviderError::rejected("Auth session missing!"));
            };
            let email = current.user.email.clone().unwrap_or_default();
            let refreshed = Self::issue_session(current.subject(), &email);
            *slot = Some(refreshed.clone());
            drop(slot);
            backend.publish_auth(AuthEvent::TokenRefreshed, Some(refreshed.clone()));
            Ok(refreshed)
        })
    }

    fn subscribe(&self) -> BoxStream<'static, AuthStateChange> {
        BroadcastStream::new(self.inner.auth_events.subscribe())
            .filter_map(|item| ready(item.ok()))
            .boxed()
    }
}

impl ObjectStore for MemoryBackend {
    fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> BoxFuture<'static, StorageResult<String>> {
        let backend = self.clone();
        let key = (bucket.to_string(), path.to_string());
        Box::pin(async move {
            backend.enter_storage(Operation::Upload, "objects").await?;
            let mut objects = backend.inner.objects.lock().await;
            if !options.upsert && objects.contains_key(&key) {
                return Err(StorageError::rejected("The resource already exists"));
            }
            let stored = key.1.clone();
            objects.insert(key, bytes);
            Ok(stored)
        })
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{PUBLIC_BASE_URL}/{bucket}/{path}")
    }
}

impl ChangeFeed for MemoryBackend {
    fn subscribe(&self, table: &'static str) -> BoxFuture<'static, StorageResult<ChangeSubscription>> {
        let receiver = self.inner.changes.subscribe();
        let mut resets = self.inner.feed_resets.subscribe();
        Box::pin(async move {
            let events = BroadcastStream::new(receiver)
                .filter_map(move |item| ready(item.ok().filter(|event| event.table == table)))
                .take_until(async move {
                    let _ = resets.changed().await;
                });
            Ok(ChangeSubscription::new(events, None))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_in_reports_provider_messages() {
        let backend = MemoryBackend::new();
        backend.add_account("jack@sparrow.io", "pearl", false).await;

        let err = backend
            .sign_in_with_password("jack@sparrow.io".into(), "wrong".into())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid login credentials");

        let err = backend
            .sign_in_with_password("jack@sparrow.io".into(), "pearl".into())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email not confirmed");
    }

    #[tokio::test]
    async fn sign_in_and_out_emit_events() {
        let backend = MemoryBackend::new();
        let subject = backend.add_account("anne@bonny.io", "revenge", true).await;
        let mut events = AuthProvider::subscribe(&backend);

        let session = backend
            .sign_in_with_password("anne@bonny.io".into(), "revenge".into())
            .await
            .unwrap();
        assert_eq!(session.subject(), subject);
        assert_eq!(backend.session().await.unwrap(), Some(session));

        backend.sign_out().await.unwrap();
        assert_eq!(backend.session().await.unwrap(), None);

        let first = events.next().await.unwrap();
        assert_eq!(first.event, AuthEvent::SignedIn);
        let second = events.next().await.unwrap();
        assert_eq!(second.event, AuthEvent::SignedOut);
        assert!(second.session.is_none());
    }

    #[tokio::test]
    async fn uploads_refuse_overwrites_without_upsert() {
        let backend = MemoryBackend::new();
        let options = UploadOptions::default();
        backend
            .upload("avatars", "1/a.png", vec![1, 2], options.clone())
            .await
            .unwrap();
        let err = backend
            .upload("avatars", "1/a.png", vec![3], options)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Rejected { .. }));
        assert_eq!(backend.object("avatars", "1/a.png").await, Some(vec![1, 2]));
        assert_eq!(
            backend.public_url("avatars", "1/a.png"),
            "memory://storage/v1/object/public/avatars/1/a.png"
        );
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let backend = MemoryBackend::new();
        backend.fail_next(Operation::SignUp, None, 1).await;
        assert!(
            backend
                .sign_up("a@b.c".into(), "pw".into())
                .await
                .is_err()
        );
        assert!(
            backend
                .sign_up("a@b.c".into(), "pw".into())
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(backend.call_count(Operation::SignUp, "auth"), 2);
    }
}
