#[cfg(any(test, feature = "memory-backend"))]
pub mod memory;
#[cfg(feature = "supabase-backend")]
pub mod supabase;

use std::{fmt, sync::Arc, time::SystemTime};

use futures::{
    Stream, StreamExt,
    future::BoxFuture,
    stream::BoxStream,
};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use crate::dao::{
    models::SubjectId,
    storage::{AuthResult, StorageResult},
};

/// A table row as exchanged with the remote store.
pub type Row = Map<String, Value>;

/// Row filter understood by every table store.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Column equals the value; `null` matches missing values.
    Eq(&'static str, Value),
    /// Column equals one of the values.
    In(&'static str, Vec<Value>),
}

impl Filter {
    /// `column = value`.
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(column, value.into())
    }

    /// `column IN (values)`.
    pub fn any_of<V: Into<Value>>(column: &'static str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(column, values.into_iter().map(Into::into).collect())
    }

    /// Whether `row` satisfies the filter.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Eq(column, expected) => row.get(*column) == Some(expected),
            Filter::In(column, candidates) => row
                .get(*column)
                .is_some_and(|value| candidates.contains(value)),
        }
    }
}

/// Sort direction of a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Ordering clause of a select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Column sorted on.
    pub column: &'static str,
    /// Sort direction.
    pub direction: Direction,
}

/// Select parameters: filters are AND-ed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Conditions every returned row satisfies.
    pub filters: Vec<Filter>,
    /// Sort clause, if any.
    pub order: Option<Order>,
    /// Maximum number of rows.
    pub limit: Option<usize>,
}

impl Query {
    /// Unfiltered, unordered select of every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Sort on `column`.
    pub fn order_by(mut self, column: &'static str, direction: Direction) -> Self {
        self.order = Some(Order { column, direction });
        self
    }

    /// Return at most `limit` rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Options forwarded with an object upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// MIME type; the store guesses it when `None`.
    pub content_type: Option<String>,
    /// `Cache-Control` max-age in seconds.
    pub cache_control: String,
    /// Overwrite an existing object at the same path.
    pub upsert: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            content_type: None,
            cache_control: "3600".into(),
            upsert: false,
        }
    }
}

/// Authenticated identity as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// Subject id.
    pub id: SubjectId,
    /// Email the identity signed up with.
    pub email: Option<String>,
}

/// Provider-issued credential. Opaque to the application apart from its subject.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Bearer token for table and storage requests.
    pub access_token: String,
    /// Token exchanged for a new session.
    pub refresh_token: Option<String>,
    /// Expiry instant; `None` never expires.
    pub expires_at: Option<SystemTime>,
    /// Identity the session belongs to.
    pub user: AuthUser,
}

impl Session {
    /// Subject id of the signed-in identity.
    pub fn subject(&self) -> SubjectId {
        self.user.id
    }

    /// Whether the session is past its expiry at `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Kind of auth-state transition pushed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A session was established.
    SignedIn,
    /// The session ended.
    SignedOut,
    /// The session was renewed for the same subject.
    TokenRefreshed,
    /// Identity attributes changed.
    UserUpdated,
    /// Any event this application does not act on, by provider name.
    Other(String),
}

/// Auth-state transition together with the session it concerns, if any.
#[derive(Debug, Clone)]
pub struct AuthStateChange {
    /// What happened.
    pub event: AuthEvent,
    /// Session after the transition.
    pub session: Option<Session>,
}

/// Kind of row-level change pushed by the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Row created.
    Insert,
    /// Row modified; `record` holds the new row.
    Update,
    /// Row removed.
    Delete,
}

/// Row-level change; `old_record` carries at least the primary key on deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Table the row belongs to.
    pub table: String,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Row after the change.
    pub record: Option<Row>,
    /// Row before the change, as far as the channel reports it.
    pub old_record: Option<Row>,
}

/// Live subscription to a table's change events.
///
/// Dropping the subscription (or calling [`ChangeSubscription::close`]) releases
/// the underlying channel.
pub struct ChangeSubscription {
    events: BoxStream<'static, ChangeEvent>,
    worker: Option<JoinHandle<()>>,
}

impl ChangeSubscription {
    /// Wrap a stream of events. `worker` is the task feeding it, aborted on release.
    pub fn new<S>(events: S, worker: Option<JoinHandle<()>>) -> Self
    where
        S: Stream<Item = ChangeEvent> + Send + 'static,
    {
        Self {
            events: events.boxed(),
            worker,
        }
    }

    /// Next change event, or `None` once the channel is closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.next().await
    }

    /// Release the channel.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Password-based authentication provider.
pub trait AuthProvider: Send + Sync {
    /// Exchange credentials for a session. The provider message is kept on rejection.
    fn sign_in_with_password(
        &self,
        email: String,
        password: String,
    ) -> BoxFuture<'static, AuthResult<Session>>;
    /// Create an identity. Providers that hold the identity until email
    /// confirmation may not report a subject yet.
    fn sign_up(
        &self,
        email: String,
        password: String,
    ) -> BoxFuture<'static, AuthResult<Option<SubjectId>>>;
    /// Invalidate the current session.
    fn sign_out(&self) -> BoxFuture<'static, AuthResult<()>>;
    /// Current unexpired session, if any.
    fn session(&self) -> BoxFuture<'static, AuthResult<Option<Session>>>;
    /// Renew the current session and emit [`AuthEvent::TokenRefreshed`].
    fn refresh_session(&self) -> BoxFuture<'static, AuthResult<Session>>;
    /// Stream of auth-state transitions, starting after the call.
    fn subscribe(&self) -> BoxStream<'static, AuthStateChange>;
}

/// Relational table store.
pub trait TableStore: Send + Sync {
    /// Rows of `table` matching `query`.
    fn select(&self, table: &'static str, query: Query) -> BoxFuture<'static, StorageResult<Vec<Row>>>;
    /// Insert rows and return them as stored (with server-assigned columns).
    fn insert(&self, table: &'static str, rows: Vec<Row>) -> BoxFuture<'static, StorageResult<Vec<Row>>>;
    /// Insert rows, replacing those that collide on `on_conflict` columns.
    fn upsert(
        &self,
        table: &'static str,
        rows: Vec<Row>,
        on_conflict: &'static [&'static str],
    ) -> BoxFuture<'static, StorageResult<Vec<Row>>>;
    /// Merge `patch` into every row matching `filters`.
    fn update(
        &self,
        table: &'static str,
        patch: Row,
        filters: Vec<Filter>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove every row matching `filters`.
    fn delete(&self, table: &'static str, filters: Vec<Filter>) -> BoxFuture<'static, StorageResult<()>>;
}

/// Binary object store with public URLs.
pub trait ObjectStore: Send + Sync {
    /// Upload `bytes` and return the stored path.
    fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> BoxFuture<'static, StorageResult<String>>;
    /// Publicly readable URL of a stored object.
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Realtime row-change channel.
pub trait ChangeFeed: Send + Sync {
    /// Start receiving insert, update and delete events of `table`.
    fn subscribe(&self, table: &'static str) -> BoxFuture<'static, StorageResult<ChangeSubscription>>;
}

/// Every remote contract the controllers depend on.
#[derive(Clone)]
pub struct Backend {
    /// Sessions and identities.
    pub auth: Arc<dyn AuthProvider>,
    /// Relational tables.
    pub tables: Arc<dyn TableStore>,
    /// Image storage.
    pub objects: Arc<dyn ObjectStore>,
    /// Realtime row changes.
    pub changes: Arc<dyn ChangeFeed>,
}

impl Backend {
    /// Bundle a single value implementing every contract.
    pub fn from_single<B>(backend: Arc<B>) -> Self
    where
        B: AuthProvider + TableStore + ObjectStore + ChangeFeed + 'static,
    {
        Self {
            auth: backend.clone(),
            tables: backend.clone(),
            objects: backend.clone(),
            changes: backend,
        }
    }
}
