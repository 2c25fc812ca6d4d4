/// Local accounts and bearer sessions
use super::tables::{now, timestamp};
use crate::{
    auth::{Credentials, Identity, Session, SignUpProfile},
    error::{DomainCondition, RemoteError},
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn session_ttl() -> Duration {
    Duration::hours(1)
}

/// Generate random alphanumeric string
pub(crate) fn random_token(length: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                             abcdefghijklmnopqrstuvwxyz\
                             0123456789";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn invalid_credentials() -> RemoteError {
    RemoteError::condition(DomainCondition::InvalidCredentials, "Invalid login credentials")
}

pub(crate) async fn create_user(
    pool: &SqlitePool,
    credentials: &Credentials,
    profile: &SignUpProfile,
) -> Result<Identity, RemoteError> {
    let existing = sqlx::query("SELECT id FROM users WHERE email = ?")
        .bind(&credentials.email)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Err(RemoteError::condition(
            DomainCondition::AccountExists,
            "User already registered",
        ));
    }

    let id = Uuid::new_v4();
    let salt = hex::encode(rand::thread_rng().gen::<[u8; 16]>());
    sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, password_salt, full_name, phone, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&credentials.email)
    .bind(hash_password(&credentials.password, &salt))
    .bind(&salt)
    .bind(&profile.full_name)
    .bind(&profile.phone)
    .bind(now())
    .execute(pool)
    .await?;

    tracing::info!("Created local account {}", id);
    Ok(Identity {
        id,
        email: Some(credentials.email.clone()),
    })
}

pub(crate) async fn verify_password(
    pool: &SqlitePool,
    credentials: &Credentials,
) -> Result<Identity, RemoteError> {
    let row = sqlx::query("SELECT id, password_hash, password_salt FROM users WHERE email = ?")
        .bind(&credentials.email)
        .fetch_optional(pool)
        .await?
        .ok_or_else(invalid_credentials)?;

    let stored: String = row.try_get("password_hash")?;
    let salt: String = row.try_get("password_salt")?;
    if hash_password(&credentials.password, &salt) != stored {
        return Err(invalid_credentials());
    }

    let id: String = row.try_get("id")?;
    Ok(Identity {
        id: parse_uuid(&id)?,
        email: Some(credentials.email.clone()),
    })
}

pub(crate) async fn create_session(
    pool: &SqlitePool,
    identity: Identity,
) -> Result<Session, RemoteError> {
    let access_token = random_token(48);
    let refresh_token = random_token(48);
    let expires_at = Utc::now() + session_ttl();

    sqlx::query(
        r#"
        INSERT INTO auth_sessions (access_token, refresh_token, user_id, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&access_token)
    .bind(&refresh_token)
    .bind(identity.id.to_string())
    .bind(timestamp(expires_at))
    .bind(now())
    .execute(pool)
    .await?;

    Ok(Session {
        access_token,
        refresh_token: Some(refresh_token),
        expires_at,
        user: identity,
    })
}

/// Trade a refresh token for a new session; the old session is revoked
pub(crate) async fn refresh_session(
    pool: &SqlitePool,
    refresh_token: &str,
) -> Result<Session, RemoteError> {
    let row = sqlx::query(
        r#"
        SELECT s.access_token, u.id, u.email
        FROM auth_sessions s JOIN users u ON u.id = s.user_id
        WHERE s.refresh_token = ?
        "#,
    )
    .bind(refresh_token)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| RemoteError::new("PGRST301", "Invalid Refresh Token"))?;

    let old_token: String = row.try_get("access_token")?;
    let id: String = row.try_get("id")?;
    let email: String = row.try_get("email")?;
    revoke_session(pool, &old_token).await?;

    create_session(
        pool,
        Identity {
            id: parse_uuid(&id)?,
            email: Some(email),
        },
    )
    .await
}

pub(crate) async fn revoke_session(pool: &SqlitePool, access_token: &str) -> Result<(), RemoteError> {
    sqlx::query("DELETE FROM auth_sessions WHERE access_token = ?")
        .bind(access_token)
        .execute(pool)
        .await?;
    Ok(())
}

/// Owner of an unexpired access token
pub(crate) async fn session_user(
    pool: &SqlitePool,
    access_token: &str,
) -> Result<Option<Uuid>, RemoteError> {
    let row = sqlx::query("SELECT user_id, expires_at FROM auth_sessions WHERE access_token = ?")
        .bind(access_token)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let expires_at: String = row.try_get("expires_at")?;
    let expires_at = DateTime::parse_from_rfc3339(&expires_at)
        .map_err(|e| RemoteError::new("XX000", format!("Invalid timestamp: {}", e)))?;
    if expires_at <= Utc::now() {
        return Ok(None);
    }

    let user_id: String = row.try_get("user_id")?;
    Ok(Some(parse_uuid(&user_id)?))
}

pub(crate) async fn email_exists(pool: &SqlitePool, email: &str) -> Result<bool, RemoteError> {
    let row = sqlx::query("SELECT 1 FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid, RemoteError> {
    Uuid::parse_str(value).map_err(|e| RemoteError::new("22P02", format!("invalid uuid {}: {}", value, e)))
}
