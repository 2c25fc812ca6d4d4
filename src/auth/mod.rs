/// Identity, session and the authentication service seam
pub mod gotrue;

pub use gotrue::GoTrueClient;

use crate::error::{ClubError, ClubResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;
use validator::Validate;

/// Authenticated principal as known to the auth subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Bearer session issued by the auth subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user: Identity,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Change notifications pushed by the auth subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

/// Profile attributes collected at sign-up
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SignUpProfile {
    #[validate(length(min = 1, max = 80))]
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 40))]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
}

/// Credentials checked before any sign-up/sign-in call leaves the client
#[derive(Debug, Clone, Validate)]
pub struct Credentials {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
}

impl Credentials {
    pub fn new(email: &str, password: &str) -> ClubResult<Self> {
        let credentials = Self {
            email: email.trim().to_lowercase(),
            password: password.to_string(),
        };
        credentials
            .validate()
            .map_err(|e| ClubError::Validation(format!("Invalid credentials: {}", e)))?;
        Ok(credentials)
    }
}

#[derive(Debug, Validate)]
struct EmailAddress {
    #[validate(email)]
    email: String,
}

/// Trim, lowercase and validate an email address
pub fn normalize_email(email: &str) -> ClubResult<String> {
    let address = EmailAddress {
        email: email.trim().to_lowercase(),
    };
    address
        .validate()
        .map_err(|e| ClubError::Validation(format!("Invalid email: {}", e)))?;
    Ok(address.email)
}

impl SignUpProfile {
    pub fn checked(self) -> ClubResult<Self> {
        self.validate()
            .map_err(|e| ClubError::Validation(format!("Invalid profile: {}", e)))?;
        Ok(self)
    }
}

/// Authentication subsystem seam
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Current persisted session, refreshing it if it has expired
    async fn get_session(&self) -> ClubResult<Option<Session>>;

    /// Create an account; returns a session when no confirmation step is required
    async fn sign_up(
        &self,
        credentials: &Credentials,
        profile: &SignUpProfile,
    ) -> ClubResult<Option<Session>>;

    async fn sign_in_with_password(&self, credentials: &Credentials) -> ClubResult<Session>;

    async fn sign_out(&self) -> ClubResult<()>;

    async fn reset_password_for_email(&self, email: &str) -> ClubResult<()>;

    /// Stream of auth state changes
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
