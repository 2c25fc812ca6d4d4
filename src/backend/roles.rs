/// Platform staff roles
use super::tables::now;
use crate::error::{ClubError, ClubResult, RemoteError};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Staff role levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May review reports and moderate content
    Moderator,
    /// Platform administrator (`is_admin` answers true)
    Admin,
    /// Full access
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Moderator => "moderator",
            Role::Admin => "admin",
            Role::SuperAdmin => "superadmin",
        }
    }

    pub fn from_str(s: &str) -> ClubResult<Self> {
        match s.to_lowercase().as_str() {
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::SuperAdmin),
            _ => Err(ClubError::Validation(format!("Invalid role: {}", s))),
        }
    }

    /// Check if this role can perform actions requiring another role
    pub fn can_act_as(&self, required: Role) -> bool {
        self >= &required
    }
}

/// Grant (or replace) the staff role of a user
pub(crate) async fn grant_role(pool: &SqlitePool, user_id: Uuid, role: Role) -> ClubResult<()> {
    sqlx::query(
        r#"
        INSERT INTO user_roles (user_id, role, granted_at)
        VALUES (?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET role = excluded.role, granted_at = excluded.granted_at
        "#,
    )
    .bind(user_id.to_string())
    .bind(role.as_str())
    .bind(now())
    .execute(pool)
    .await?;

    tracing::info!("Granted {} role to {}", role.as_str(), user_id);
    Ok(())
}

pub(crate) async fn role_of(pool: &SqlitePool, user_id: Uuid) -> Result<Option<Role>, RemoteError> {
    let row = sqlx::query("SELECT role FROM user_roles WHERE user_id = ?")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let role: String = row.try_get("role")?;
    Role::from_str(&role)
        .map(Some)
        .map_err(|e| RemoteError::new("XX000", e.to_string()))
}
