use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::{StreamExt, future::BoxFuture, future::ready, stream::BoxStream};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::{
    backend::{AuthEvent, AuthProvider, AuthStateChange, AuthUser, Session},
    models::SubjectId,
    storage::{AuthProviderError, AuthResult},
};

use super::client::SupabaseClient;

const TOKEN_PATH: &str = "auth/v1/token";
const SIGNUP_PATH: &str = "auth/v1/signup";
const LOGOUT_PATH: &str = "auth/v1/logout";

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    expires_at: Option<u64>,
    user: GoTrueUser,
}

impl From<TokenResponse> for Session {
    fn from(token: TokenResponse) -> Self {
        let expires_at = token
            .expires_at
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
            .or_else(|| {
                token
                    .expires_in
                    .map(|secs| SystemTime::now() + Duration::from_secs(secs))
            });
        Session {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
            user: AuthUser {
                id: token.user.id,
                email: token.user.email,
            },
        }
    }
}

/// Sign-up answers either with a full token response (auto-confirmed projects)
/// or with the bare user while confirmation is pending.
fn subject_from_signup(body: &Value) -> Option<SubjectId> {
    body.get("user")
        .and_then(|user| user.get("id"))
        .or_else(|| body.get("id"))
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok())
}

impl SupabaseClient {
    async fn grant(&self, grant_type: &str, body: Value) -> AuthResult<Session> {
        let path = format!("{TOKEN_PATH}?grant_type={grant_type}");
        let builder = self.anonymous_request(Method::POST, &path).json(&body);
        let token: TokenResponse = self.send_json(builder, TOKEN_PATH).await?;
        Ok(token.into())
    }
}

impl AuthProvider for SupabaseClient {
    fn sign_in_with_password(
        &self,
        email: String,
        password: String,
    ) -> BoxFuture<'static, AuthResult<Session>> {
        let client = self.clone();
        Box::pin(async move {
            let session = client
                .grant("password", json!({ "email": email, "password": password }))
                .await?;
            client.store_session(Some(session.clone())).await;
            client.publish_auth(AuthEvent::SignedIn, Some(session.clone()));
            Ok(session)
        })
    }

    fn sign_up(
        &self,
        email: String,
        password: String,
    ) -> BoxFuture<'static, AuthResult<Option<SubjectId>>> {
        let client = self.clone();
        Box::pin(async move {
            let builder = client
                .anonymous_request(Method::POST, SIGNUP_PATH)
                .json(&json!({ "email": email, "password": password }));
            let body: Value = client.send_json(builder, SIGNUP_PATH).await?;
            let subject = subject_from_signup(&body);

            if body.get("access_token").is_some() {
                match serde_json::from_value::<TokenResponse>(body) {
                    Ok(token) => {
                        let session = Session::from(token);
                        client.store_session(Some(session.clone())).await;
                        client.publish_auth(AuthEvent::SignedIn, Some(session));
                    }
                    Err(err) => warn!(error = %err, "sign-up returned an unreadable session"),
                }
            }
            Ok(subject)
        })
    }

    fn sign_out(&self) -> BoxFuture<'static, AuthResult<()>> {
        let client = self.clone();
        Box::pin(async move {
            let had_session = client.session.read().await.is_some();
            let outcome = if had_session {
                let builder = client.request(Method::POST, LOGOUT_PATH).await;
                client.send(builder, LOGOUT_PATH).await.map(|_| ())
            } else {
                Ok(())
            };

            // The local session is dropped whatever the provider answered.
            client.store_session(None).await;
            client.publish_auth(AuthEvent::SignedOut, None);

            match outcome {
                Ok(()) => Ok(()),
                Err(err) => {
                    let err = AuthProviderError::from(err);
                    if matches!(err, AuthProviderError::Rejected { .. }) {
                        debug!(error = %err, "logout rejected for an already invalid session");
                        Ok(())
                    } else {
                        Err(err)
                    }
                }
            }
        })
    }

    fn session(&self) -> BoxFuture<'static, AuthResult<Option<Session>>> {
        let client = self.clone();
        Box::pin(async move {
            let current = client.session.read().await.clone();
            match current {
                Some(session) if session.is_expired(SystemTime::now()) => {
                    if session.refresh_token.is_none() {
                        client.store_session(None).await;
                        return Ok(None);
                    }
                    match client.refresh_session().await {
                        Ok(refreshed) => Ok(Some(refreshed)),
                        Err(AuthProviderError::Rejected { message }) => {
                            debug!(%message, "expired session could not be refreshed");
                            client.store_session(None).await;
                            Ok(None)
                        }
                        Err(err) => Err(err),
                    }
                }
                other => Ok(other),
            }
        })
    }

    fn refresh_session(&self) -> BoxFuture<'static, AuthResult<Session>> {
        let client = self.clone();
        Box::pin(async move {
            let refresh_token = client
                .session
                .read()
                .await
                .as_ref()
                .and_then(|session| session.refresh_token.clone())
                .ok_or_else(|| AuthProviderError::rejected("Auth session missing!"))?;

            let session = client
                .grant("refresh_token", json!({ "refresh_token": refresh_token }))
                .await?;
            client.store_session(Some(session.clone())).await;
            client.publish_auth(AuthEvent::TokenRefreshed, Some(session.clone()));
            Ok(session)
        })
    }

    fn subscribe(&self) -> BoxStream<'static, AuthStateChange> {
        BroadcastStream::new(self.auth_events.subscribe())
            .filter_map(|item| ready(item.ok()))
            .boxed()
    }
}
