/// Embedded backend
///
/// A SQLite implementation of the remote procedure surface and the auth
/// service, used for local development and tests. Each [`LocalClient`]
/// carries its own bearer token, so several identities can share one
/// backend the way several browsers share one hosted project.

mod accounts;
mod events;
mod membership;
mod moderation;
mod roles;
mod rpc;
mod tables;

pub use roles::Role;

use crate::{
    audit::AuditLogEntry,
    auth::{normalize_email, AuthEvent, AuthService, Credentials, Session, SignUpProfile},
    error::{ClubError, ClubResult, RemoteError},
    gateway::{Order, RemoteResult, RpcGateway, TableQuery},
    moderation::{ContentStatus, ContentType},
    organization::MemberRole,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Row, SqlitePool,
};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

impl From<sqlx::Error> for RemoteError {
    fn from(e: sqlx::Error) -> Self {
        let code = match &e {
            sqlx::Error::Database(db) => match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation => "23505",
                sqlx::error::ErrorKind::ForeignKeyViolation => "23503",
                sqlx::error::ErrorKind::NotNullViolation => "23502",
                sqlx::error::ErrorKind::CheckViolation => "23514",
                _ => "XX000",
            },
            sqlx::Error::RowNotFound => "PGRST116",
            _ => "XX000",
        };
        RemoteError::new(code, e.to_string())
    }
}

/// Identity a request is evaluated as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Caller {
    pub user_id: Option<Uuid>,
    pub role: Option<Role>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            role: None,
        }
    }

    /// Unrestricted caller for reads the backend performs on its own behalf
    pub fn system() -> Self {
        Self {
            user_id: None,
            role: Some(Role::SuperAdmin),
        }
    }

    pub fn has_role(&self, required: Role) -> bool {
        self.role.is_some_and(|role| role.can_act_as(required))
    }

    pub fn require_user(&self) -> Result<Uuid, RemoteError> {
        self.user_id
            .ok_or_else(|| RemoteError::permission_denied("authentication required"))
    }

    pub fn require_role(&self, required: Role) -> Result<Uuid, RemoteError> {
        let user_id = self.require_user()?;
        if !self.has_role(required) {
            return Err(RemoteError::permission_denied(format!(
                "{} role required",
                required.as_str()
            )));
        }
        Ok(user_id)
    }
}

/// SQLite-backed stand-in for the hosted project
#[derive(Clone)]
pub struct LocalBackend {
    pool: SqlitePool,
}

impl LocalBackend {
    /// Private in-memory database. A single connection keeps every client on
    /// the same database.
    pub async fn open_in_memory() -> ClubResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::migrate(pool).await
    }

    /// File-backed database, created if missing
    pub async fn open(path: &Path) -> ClubResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ClubError::Config(format!("Cannot create {}: {}", parent.display(), e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> ClubResult<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!("Embedded backend ready");
        Ok(Self { pool })
    }

    /// New client with no identity
    pub fn client(&self) -> Arc<LocalClient> {
        Arc::new(LocalClient::new(self.pool.clone()))
    }

    pub async fn grant_role(&self, user_id: Uuid, role: Role) -> ClubResult<()> {
        roles::grant_role(&self.pool, user_id, role).await
    }

    pub async fn create_organization(&self, name: &str, slug: &str) -> ClubResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO organizations (id, name, slug, created_at) VALUES (?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(name)
            .bind(slug)
            .bind(tables::now())
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn add_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> ClubResult<()> {
        sqlx::query(
            r#"
            INSERT INTO organization_members (organization_id, user_id, role, joined_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(organization_id, user_id) DO UPDATE SET role = excluded.role
            "#,
        )
        .bind(organization_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .bind(tables::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_post(
        &self,
        organization_id: Uuid,
        author_id: Uuid,
        content: &str,
    ) -> ClubResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO posts (id, organization_id, author_id, content, status, created_at) VALUES (?, ?, ?, ?, 'active', ?)",
        )
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .bind(author_id.to_string())
        .bind(content)
        .bind(tables::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn create_comment(&self, post_id: Uuid, author_id: Uuid, content: &str) -> ClubResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO comments (id, post_id, author_id, content, status, created_at) VALUES (?, ?, ?, ?, 'active', ?)",
        )
        .bind(id.to_string())
        .bind(post_id.to_string())
        .bind(author_id.to_string())
        .bind(content)
        .bind(tables::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Current moderation status of a post or comment
    pub async fn content_status(
        &self,
        content_type: ContentType,
        content_id: Uuid,
    ) -> ClubResult<Option<ContentStatus>> {
        let table = match content_type {
            ContentType::Post => "posts",
            ContentType::Comment => "comments",
            ContentType::Event => return Ok(None),
        };

        let row = sqlx::query(&format!("SELECT status FROM {} WHERE id = ?", table))
            .bind(content_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(ContentStatus::from_str(&row.try_get::<String, _>("status")?)?)),
            None => Ok(None),
        }
    }

    /// Every audit entry, oldest first
    pub async fn audit_log(&self) -> ClubResult<Vec<AuditLogEntry>> {
        let query = TableQuery::from("admin_actions").order_by("created_at", Order::Asc);
        let rows = tables::select(&self.pool, &Caller::system(), &query).await?;
        Ok(serde_json::from_value(rows)?)
    }
}

/// One browser's view of the embedded backend
pub struct LocalClient {
    pool: SqlitePool,
    access_token: RwLock<Option<String>>,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl LocalClient {
    fn new(pool: SqlitePool) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            pool,
            access_token: RwLock::new(None),
            session: RwLock::new(None),
            events,
        }
    }

    /// Identity of the signed-in user, if any
    pub fn user_id(&self) -> Option<Uuid> {
        self.session
            .read()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.user.id))
    }

    async fn caller(&self) -> Result<Caller, RemoteError> {
        let token = RpcGateway::access_token(self);
        self.caller_for(token.as_deref()).await
    }

    async fn caller_for(&self, token: Option<&str>) -> Result<Caller, RemoteError> {
        let Some(token) = token else {
            return Ok(Caller::anonymous());
        };

        let user_id = accounts::session_user(&self.pool, token)
            .await?
            .ok_or_else(|| RemoteError::new("PGRST301", "JWT expired"))?;
        let role = roles::role_of(&self.pool, user_id).await?;
        Ok(Caller {
            user_id: Some(user_id),
            role,
        })
    }

    fn install(&self, session: Option<Session>) {
        let token = session.as_ref().map(|s| s.access_token.clone());
        if let Ok(mut current) = self.session.write() {
            *current = session;
        }
        self.set_access_token(token);
    }

    fn current_session(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    fn announce(&self, event: AuthEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl AuthService for LocalClient {
    async fn get_session(&self) -> ClubResult<Option<Session>> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };
        if !session.is_expired() {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.as_deref() else {
            self.install(None);
            return Ok(None);
        };
        let refreshed = accounts::refresh_session(&self.pool, refresh_token).await?;
        self.install(Some(refreshed.clone()));
        self.announce(AuthEvent::TokenRefreshed(refreshed.clone()));
        Ok(Some(refreshed))
    }

    async fn sign_up(
        &self,
        credentials: &Credentials,
        profile: &SignUpProfile,
    ) -> ClubResult<Option<Session>> {
        let identity = accounts::create_user(&self.pool, credentials, profile).await?;
        let session = accounts::create_session(&self.pool, identity).await?;
        self.install(Some(session.clone()));

        if let Some(code) = profile.invite_code.as_deref() {
            if let Err(e) = self.rpc("redeem_invite_code", json!({ "p_code": code })).await {
                tracing::warn!("Invite code at sign-up was not redeemed: {}", e);
            }
        }

        self.announce(AuthEvent::SignedIn(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> ClubResult<Session> {
        let identity = accounts::verify_password(&self.pool, credentials).await?;
        let session = accounts::create_session(&self.pool, identity).await?;
        self.install(Some(session.clone()));
        self.announce(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> ClubResult<()> {
        if let Some(session) = self.current_session() {
            accounts::revoke_session(&self.pool, &session.access_token).await?;
        }
        self.install(None);
        self.announce(AuthEvent::SignedOut);
        Ok(())
    }

    async fn reset_password_for_email(&self, email: &str) -> ClubResult<()> {
        let email = normalize_email(email)?;
        // Same answer whether or not the account exists
        if accounts::email_exists(&self.pool, &email).await? {
            tracing::info!("Password reset requested for a local account");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl RpcGateway for LocalClient {
    async fn rpc(&self, name: &str, args: Value) -> RemoteResult {
        let caller = self.caller().await?;
        rpc::dispatch(&self.pool, &caller, name, &args).await
    }

    async fn rpc_with_token(&self, token: Option<&str>, name: &str, args: Value) -> RemoteResult {
        let caller = self.caller_for(token).await?;
        rpc::dispatch(&self.pool, &caller, name, &args).await
    }

    async fn select(&self, query: &TableQuery) -> RemoteResult {
        let caller = self.caller().await?;
        tables::select(&self.pool, &caller, query).await
    }

    async fn insert(&self, table: &str, row: Value) -> RemoteResult {
        let caller = self.caller().await?;
        tables::insert(&self.pool, &caller, table, row).await
    }

    async fn update(&self, query: &TableQuery, patch: Value) -> RemoteResult {
        let caller = self.caller().await?;
        tables::update(&self.pool, &caller, query, patch).await
    }

    async fn invoke_function(&self, name: &str, _body: Option<Value>) -> RemoteResult {
        Err(RemoteError::capability_missing(name))
    }

    fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut current) = self.access_token.write() {
            *current = token;
        }
    }

    fn access_token(&self) -> Option<String> {
        self.access_token.read().ok().and_then(|t| t.clone())
    }
}
