/// HTTP client for the hosted auth service (GoTrue)
use super::{AuthEvent, AuthService, Credentials, Identity, Session, SignUpProfile};
use crate::{
    config::BackendConfig,
    error::{ClubError, ClubResult, DomainCondition, RemoteError, NETWORK, TIMEOUT},
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Refresh this long before the advertised expiry
const REFRESH_MARGIN_SECS: i64 = 10;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: UserResponse,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: Uuid,
    email: Option<String>,
}

/// Error bodies differ between GoTrue versions
#[derive(Debug, Default, Deserialize)]
struct GoTrueErrorBody {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Auth client holding the current session in memory
#[derive(Clone)]
pub struct GoTrueClient {
    http_client: reqwest::Client,
    auth_url: String,
    anon_key: String,
    session: Arc<RwLock<Option<Session>>>,
    events: broadcast::Sender<AuthEvent>,
}

impl GoTrueClient {
    pub fn new(config: &BackendConfig) -> ClubResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClubError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let (events, _) = broadcast::channel(16);

        Ok(Self {
            http_client,
            auth_url: format!("{}/auth/v1", config.url),
            anon_key: config.anon_key.clone(),
            session: Arc::new(RwLock::new(None)),
            events,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http_client
            .post(format!("{}/{}", self.auth_url, path))
            .header("apikey", &self.anon_key)
    }

    fn stored_session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    fn store_session(&self, session: Option<Session>) {
        if let Ok(mut slot) = self.session.write() {
            *slot = session;
        }
    }

    fn emit(&self, event: AuthEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    async fn token_request(&self, grant_type: &str, body: Value) -> ClubResult<Session> {
        let response = self
            .post(&format!("token?grant_type={}", grant_type))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(auth_error(status, &text).into());
        }

        let token: TokenResponse = response.json().await?;
        Ok(session_from_token(token))
    }

    async fn refresh(&self, refresh_token: &str) -> ClubResult<Session> {
        let session = self
            .token_request("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;
        self.store_session(Some(session.clone()));
        self.emit(AuthEvent::TokenRefreshed(session.clone()));
        tracing::debug!("Refreshed session for {}", session.user.id);
        Ok(session)
    }
}

#[async_trait]
impl AuthService for GoTrueClient {
    async fn get_session(&self) -> ClubResult<Option<Session>> {
        let Some(session) = self.stored_session() else {
            return Ok(None);
        };

        if session.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
            return Ok(Some(session));
        }

        match session.refresh_token.as_deref() {
            Some(refresh_token) => self.refresh(refresh_token).await.map(Some),
            None => {
                self.store_session(None);
                self.emit(AuthEvent::SignedOut);
                Ok(None)
            }
        }
    }

    async fn sign_up(
        &self,
        credentials: &Credentials,
        profile: &SignUpProfile,
    ) -> ClubResult<Option<Session>> {
        let response = self
            .post("signup")
            .json(&json!({
                "email": credentials.email,
                "password": credentials.password,
                "data": profile,
            }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(auth_error(status, &text).into());
        }

        // With email confirmation enabled the body is a bare user, not a session
        match serde_json::from_str::<TokenResponse>(&text) {
            Ok(token) => {
                let session = session_from_token(token);
                self.store_session(Some(session.clone()));
                self.emit(AuthEvent::SignedIn(session.clone()));
                Ok(Some(session))
            }
            Err(_) => Ok(None),
        }
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> ClubResult<Session> {
        let session = self
            .token_request(
                "password",
                json!({ "email": credentials.email, "password": credentials.password }),
            )
            .await?;

        self.store_session(Some(session.clone()));
        self.emit(AuthEvent::SignedIn(session.clone()));
        tracing::info!("Signed in as {}", session.user.id);
        Ok(session)
    }

    async fn sign_out(&self) -> ClubResult<()> {
        if let Some(session) = self.stored_session() {
            let response = self
                .post("logout")
                .bearer_auth(&session.access_token)
                .send()
                .await
                .map_err(transport_error)?;

            // An already-invalid token still means we are signed out
            let status = response.status();
            if !status.is_success() && status != StatusCode::UNAUTHORIZED {
                let text = response.text().await.unwrap_or_default();
                return Err(auth_error(status, &text).into());
            }
        }

        self.store_session(None);
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn reset_password_for_email(&self, email: &str) -> ClubResult<()> {
        let response = self
            .post("recover")
            .json(&json!({ "email": email }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(auth_error(status, &text).into());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

fn session_from_token(token: TokenResponse) -> Session {
    let expires_at = token
        .expires_at
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(|| Utc::now() + Duration::seconds(token.expires_in.unwrap_or(3600)));

    Session {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at,
        user: Identity {
            id: token.user.id,
            email: token.user.email,
        },
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::new(TIMEOUT, format!("Auth request timed out: {}", e))
    } else {
        RemoteError::new(NETWORK, format!("Auth request failed: {}", e))
    }
}

/// Translate a GoTrue error body into a classified [`RemoteError`]
fn auth_error(status: StatusCode, text: &str) -> RemoteError {
    let body: GoTrueErrorBody = serde_json::from_str(text).unwrap_or_default();

    let code = body.error_code.clone().or_else(|| match &body.code {
        Some(Value::String(code)) => Some(code.clone()),
        _ => body.error.clone(),
    });
    let message = body
        .msg
        .or(body.error_description)
        .or(body.message)
        .or(body.error)
        .unwrap_or_else(|| text.to_string());

    let condition = code
        .as_deref()
        .and_then(DomainCondition::from_tag)
        .or_else(|| match code.as_deref() {
            Some("invalid_grant") if status == StatusCode::BAD_REQUEST => {
                Some(DomainCondition::InvalidCredentials)
            }
            _ => None,
        });

    match condition {
        Some(condition) => RemoteError::condition(condition, message),
        None => RemoteError::new(status.as_str(), message),
    }
}
