use std::{sync::Arc, time::Duration};

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::{RwLock, broadcast};

use crate::dao::backend::{AuthEvent, AuthStateChange, Session};

use super::{
    config::SupabaseConfig,
    error::{SupabaseError, SupabaseResult, message_from_body},
};

const AUTH_EVENT_CAPACITY: usize = 16;

/// Shared HTTP client for every backend service. Clones share the session.
#[derive(Clone)]
pub struct SupabaseClient {
    pub(super) http: Client,
    pub(super) config: Arc<SupabaseConfig>,
    pub(super) session: Arc<RwLock<Option<Session>>>,
    pub(super) auth_events: broadcast::Sender<AuthStateChange>,
}

impl SupabaseClient {
    /// Build the client. No request is issued until the first operation.
    pub fn connect(config: SupabaseConfig) -> SupabaseResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| SupabaseError::ClientBuilder { source })?;
        let (auth_events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            http,
            config: Arc::new(config),
            session: Arc::new(RwLock::new(None)),
            auth_events,
        })
    }

    pub(super) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url, path.trim_start_matches('/'))
    }

    /// Request carrying the API key and the current user's token (or the key itself
    /// for anonymous access).
    pub(super) async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let bearer = self.bearer().await;
        self.http
            .request(method, self.endpoint(path))
            .header("apikey", self.config.api_key.as_str())
            .bearer_auth(bearer)
    }

    /// Request authenticated with the API key only.
    pub(super) fn anonymous_request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.endpoint(path))
            .header("apikey", self.config.api_key.as_str())
            .bearer_auth(self.config.api_key.as_str())
    }

    pub(super) async fn bearer(&self) -> String {
        let session = self.session.read().await;
        session
            .as_ref()
            .map(|session| session.access_token.clone())
            .unwrap_or_else(|| self.config.api_key.clone())
    }

    /// Send `builder`, turning transport failures and non-success statuses into errors.
    pub(super) async fn send(&self, builder: RequestBuilder, path: &str) -> SupabaseResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|source| SupabaseError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(SupabaseError::RequestStatus {
            path: path.to_string(),
            status,
            message: message_from_body(status, &body),
        })
    }

    pub(super) async fn send_json<T>(&self, builder: RequestBuilder, path: &str) -> SupabaseResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send(builder, path).await?;
        response
            .json::<T>()
            .await
            .map_err(|source| SupabaseError::DecodeResponse {
                path: path.to_string(),
                source,
            })
    }

    pub(super) async fn store_session(&self, session: Option<Session>) {
        *self.session.write().await = session;
    }

    pub(super) fn publish_auth(&self, event: AuthEvent, session: Option<Session>) {
        let _ = self.auth_events.send(AuthStateChange { event, session });
    }
}
