/// Event registration, QR and attendance procedures
use super::{roles::Role, rpc::Args, tables::now, Caller};
use crate::{
    error::{DomainCondition, RemoteError},
    events::EventStatus,
    gateway::RemoteResult,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn event_not_found(event_id: Uuid) -> RemoteError {
    RemoteError::condition(DomainCondition::NotFound, format!("event {} not found", event_id))
}

fn qr_token() -> String {
    URL_SAFE_NO_PAD.encode(rand::thread_rng().gen::<[u8; 24]>())
}

/// Register the caller; capacity is claimed with a conditional update so it
/// can never pass `max_capacity`
pub(crate) async fn register_for_event(pool: &SqlitePool, caller: &Caller, args: Args<'_>) -> RemoteResult {
    let user_id = caller.require_user()?;
    let event_id = args.uuid("p_event_id")?;

    let mut tx = pool.begin().await?;

    let row = sqlx::query("SELECT status FROM events WHERE id = ?")
        .bind(event_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| event_not_found(event_id))?;
    let status: String = row.try_get("status")?;
    let open = EventStatus::from_str(&status)
        .map(|s| s.accepts_registrations())
        .unwrap_or(false);
    if !open {
        return Err(RemoteError::condition(
            DomainCondition::EventClosed,
            format!("event {} is not open for registration", event_id),
        ));
    }

    let existing = sqlx::query("SELECT 1 FROM event_registrations WHERE event_id = ? AND user_id = ?")
        .bind(event_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
    if existing.is_some() {
        return Err(RemoteError::condition(
            DomainCondition::AlreadyRegistered,
            "already registered for this event",
        ));
    }

    let claimed = sqlx::query(
        r#"
        UPDATE events
        SET current_capacity = current_capacity + 1
        WHERE id = ? AND (max_capacity IS NULL OR current_capacity < max_capacity)
        RETURNING current_capacity
        "#,
    )
    .bind(event_id.to_string())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| RemoteError::condition(DomainCondition::EventFull, "event is full"))?;
    let current_capacity: i64 = claimed.try_get("current_capacity")?;

    sqlx::query("INSERT INTO event_registrations (id, event_id, user_id, created_at) VALUES (?, ?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(event_id.to_string())
        .bind(user_id.to_string())
        .bind(now())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::debug!("{} registered for {} ({})", user_id, event_id, current_capacity);
    Ok(json!({
        "event_id": event_id,
        "user_id": user_id,
        "current_capacity": current_capacity,
    }))
}

/// Write a token only where none exists and return whatever is stored
pub(crate) async fn generate_event_qr_code(pool: &SqlitePool, caller: &Caller, args: Args<'_>) -> RemoteResult {
    caller.require_role(Role::Admin)?;
    let event_id = args.uuid("p_event_id")?;

    sqlx::query("UPDATE events SET qr_code_token = ? WHERE id = ? AND qr_code_token IS NULL")
        .bind(qr_token())
        .bind(event_id.to_string())
        .execute(pool)
        .await?;

    let row = sqlx::query("SELECT qr_code_token FROM events WHERE id = ?")
        .bind(event_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| event_not_found(event_id))?;
    let token: Option<String> = row.try_get("qr_code_token")?;

    token
        .map(|token| json!(token))
        .ok_or_else(|| RemoteError::new("XX000", "QR token was not stored"))
}

pub(crate) async fn mark_event_attendance(pool: &SqlitePool, caller: &Caller, args: Args<'_>) -> RemoteResult {
    let user_id = caller.require_user()?;
    let qr_token = args.str("p_qr_token")?;

    let row = sqlx::query("SELECT id FROM events WHERE qr_code_token = ?")
        .bind(&qr_token)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| RemoteError::condition(DomainCondition::QrNotFound, "QR code not found"))?;
    let event_id: String = row.try_get("id")?;

    let registered = sqlx::query("SELECT 1 FROM event_registrations WHERE event_id = ? AND user_id = ?")
        .bind(&event_id)
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;
    if registered.is_none() {
        return Err(RemoteError::condition(
            DomainCondition::NotRegistered,
            "not registered for this event",
        ));
    }

    let attended_at = now();
    let result = sqlx::query(
        r#"
        INSERT INTO event_attendance (id, event_id, user_id, attended_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(event_id, user_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&event_id)
    .bind(user_id.to_string())
    .bind(&attended_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RemoteError::condition(
            DomainCondition::AlreadyMarked,
            "attendance already marked",
        ));
    }

    Ok(json!({
        "event_id": event_id,
        "user_id": user_id,
        "attended_at": attended_at,
    }))
}
