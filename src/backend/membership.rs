/// Organization membership, invites and challenge participation
use super::{
    accounts::random_token,
    roles::Role,
    rpc::Args,
    tables::{now, row_to_json, timestamp, Column, ColumnType},
    Caller,
};
use crate::{
    challenges::ChallengeStatus,
    error::{DomainCondition, RemoteError},
    gateway::RemoteResult,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const INVITE_COLUMNS: &[Column] = &[
    Column { name: "id", ty: ColumnType::Text },
    Column { name: "code", ty: ColumnType::Text },
    Column { name: "organization_id", ty: ColumnType::Text },
    Column { name: "created_by", ty: ColumnType::Text },
    Column { name: "max_uses", ty: ColumnType::Integer },
    Column { name: "uses", ty: ColumnType::Integer },
    Column { name: "expires_at", ty: ColumnType::Timestamp },
    Column { name: "created_at", ty: ColumnType::Timestamp },
];

/// Generate a new invite code
fn generate_code() -> String {
    format!("humbl-{}", random_token(10).to_lowercase())
}

pub(crate) async fn get_user_organizations(pool: &SqlitePool, caller: &Caller) -> RemoteResult {
    let Some(user_id) = caller.user_id else {
        return Ok(Value::Array(Vec::new()));
    };

    let rows = sqlx::query(
        r#"
        SELECT o.id, o.name, o.slug, m.role
        FROM organization_members m JOIN organizations o ON o.id = m.organization_id
        WHERE m.user_id = ?
        ORDER BY m.joined_at, o.name
        "#,
    )
    .bind(user_id.to_string())
    .fetch_all(pool)
    .await?;

    let memberships = rows
        .iter()
        .map(|row| -> Result<Value, RemoteError> {
            Ok(json!({
                "organization_id": row.try_get::<String, _>("id")?,
                "name": row.try_get::<String, _>("name")?,
                "slug": row.try_get::<String, _>("slug")?,
                "role": row.try_get::<String, _>("role")?,
            }))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Value::Array(memberships))
}

async fn member_role(
    pool: &SqlitePool,
    organization_id: Uuid,
    user_id: Uuid,
) -> Result<Option<String>, RemoteError> {
    let row = sqlx::query("SELECT role FROM organization_members WHERE organization_id = ? AND user_id = ?")
        .bind(organization_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(|row| row.try_get::<String, _>("role"))
        .transpose()
        .map_err(Into::into)
}

/// Platform admins and organization owners/admins may issue invites
pub(crate) async fn create_invite_code(pool: &SqlitePool, caller: &Caller, args: Args<'_>) -> RemoteResult {
    let user_id = caller.require_user()?;
    let organization_id = args.uuid("p_organization_id")?;
    let max_uses = args.i64("p_max_uses")?;
    let expires_at = args.opt_timestamp("p_expires_at")?;

    if !caller.has_role(Role::Admin) {
        let role = member_role(pool, organization_id, user_id).await?;
        if !matches!(role.as_deref(), Some("admin") | Some("owner")) {
            return Err(RemoteError::permission_denied(
                "only organization admins can create invites",
            ));
        }
    }
    if max_uses < 1 {
        return Err(RemoteError::new("23514", "max_uses must be positive"));
    }

    let row = sqlx::query(
        r#"
        INSERT INTO invite_codes (id, code, organization_id, created_by, max_uses, uses, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?, 0, ?, ?)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(generate_code())
    .bind(organization_id.to_string())
    .bind(user_id.to_string())
    .bind(max_uses)
    .bind(expires_at.map(timestamp))
    .bind(now())
    .fetch_one(pool)
    .await?;

    let columns: Vec<&Column> = INVITE_COLUMNS.iter().collect();
    row_to_json(&row, &columns)
}

/// Validate and use invite code
pub(crate) async fn redeem_invite_code(pool: &SqlitePool, caller: &Caller, args: Args<'_>) -> RemoteResult {
    let user_id = caller.require_user()?;
    let code = args.str("p_code")?;

    let mut tx = pool.begin().await?;

    let row = sqlx::query("SELECT id, organization_id, max_uses, uses, expires_at FROM invite_codes WHERE code = ?")
        .bind(code.trim().to_lowercase())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RemoteError::condition(DomainCondition::InviteNotFound, "invite code not found"))?;

    let invite_id: String = row.try_get("id")?;
    let organization_id: String = row.try_get("organization_id")?;
    let max_uses: i64 = row.try_get("max_uses")?;
    let uses: i64 = row.try_get("uses")?;
    let expires_at: Option<String> = row.try_get("expires_at")?;

    if let Some(expires_at) = expires_at {
        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|e| RemoteError::new("XX000", format!("Invalid timestamp: {}", e)))?;
        if expires_at <= Utc::now() {
            return Err(RemoteError::condition(DomainCondition::InviteExpired, "invite code has expired"));
        }
    }

    let redeemed = sqlx::query("SELECT 1 FROM invite_redemptions WHERE invite_id = ? AND user_id = ?")
        .bind(&invite_id)
        .bind(user_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
    if redeemed.is_some() || uses >= max_uses {
        return Err(RemoteError::condition(DomainCondition::AlreadyUsed, "invite code already used"));
    }

    sqlx::query("UPDATE invite_codes SET uses = uses + 1 WHERE id = ?")
        .bind(&invite_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO invite_redemptions (id, invite_id, user_id, redeemed_at) VALUES (?, ?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(&invite_id)
        .bind(user_id.to_string())
        .bind(now())
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO organization_members (organization_id, user_id, role, joined_at)
        VALUES (?, ?, 'member', ?)
        ON CONFLICT(organization_id, user_id) DO NOTHING
        "#,
    )
    .bind(&organization_id)
    .bind(user_id.to_string())
    .bind(now())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!("{} joined {} by invite", user_id, organization_id);
    Ok(json!({ "organization_id": organization_id }))
}

pub(crate) async fn join_challenge(pool: &SqlitePool, caller: &Caller, args: Args<'_>) -> RemoteResult {
    let user_id = caller.require_user()?;
    let challenge_id = args.uuid("p_challenge_id")?;

    let row = sqlx::query("SELECT status FROM challenges WHERE id = ?")
        .bind(challenge_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| {
            RemoteError::condition(DomainCondition::NotFound, format!("challenge {} not found", challenge_id))
        })?;
    let status: String = row.try_get("status")?;
    if ChallengeStatus::from_str(&status).ok() != Some(ChallengeStatus::Active) {
        return Err(RemoteError::condition(
            DomainCondition::InvalidTransition,
            "challenge is not accepting participants",
        ));
    }

    let joined_at = now();
    let result = sqlx::query(
        r#"
        INSERT INTO challenge_participations (id, challenge_id, user_id, joined_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(challenge_id, user_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(challenge_id.to_string())
    .bind(user_id.to_string())
    .bind(&joined_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RemoteError::condition(DomainCondition::AlreadyJoined, "already joined this challenge"));
    }

    Ok(json!({
        "challenge_id": challenge_id,
        "user_id": user_id,
        "joined_at": joined_at,
    }))
}
