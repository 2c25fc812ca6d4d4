/// Report and content-status procedures
use super::{
    roles::Role,
    rpc::Args,
    tables::{now, Column, ColumnType, row_to_json},
    Caller,
};
use crate::{
    error::{DomainCondition, RemoteError},
    gateway::RemoteResult,
    moderation::{ContentStatus, ContentType, ReportStatus, Resolution},
};
use serde_json::json;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

const REPORT_COLUMNS: &[Column] = &[
    Column { name: "id", ty: ColumnType::Text },
    Column { name: "reporter_id", ty: ColumnType::Text },
    Column { name: "reported_content_id", ty: ColumnType::Text },
    Column { name: "reported_content_type", ty: ColumnType::Text },
    Column { name: "reason", ty: ColumnType::Text },
    Column { name: "description", ty: ColumnType::Text },
    Column { name: "status", ty: ColumnType::Text },
    Column { name: "reviewed_by", ty: ColumnType::Text },
    Column { name: "reviewed_at", ty: ColumnType::Timestamp },
    Column { name: "resolution_notes", ty: ColumnType::Text },
    Column { name: "created_at", ty: ColumnType::Timestamp },
];

fn content_table(content_type: ContentType) -> Option<&'static str> {
    match content_type {
        ContentType::Post => Some("posts"),
        ContentType::Comment => Some("comments"),
        ContentType::Event => None,
    }
}

fn invalid_transition(message: impl Into<String>) -> RemoteError {
    RemoteError::condition(DomainCondition::InvalidTransition, message)
}

fn bad_enum(e: crate::error::ClubError) -> RemoteError {
    RemoteError::new("22023", e.to_string())
}

/// The one place content status changes. Returns whether the row changed;
/// asking for the current status is a no-op.
pub(crate) async fn transition_content(
    conn: &mut SqliteConnection,
    content_type: ContentType,
    content_id: Uuid,
    next: ContentStatus,
    moderator_id: Uuid,
    reason: &str,
    report_id: Option<Uuid>,
) -> Result<bool, RemoteError> {
    let table = content_table(content_type).ok_or_else(|| {
        invalid_transition(format!("{} content has no moderation status", content_type.as_str()))
    })?;

    let row = sqlx::query(&format!("SELECT status FROM {} WHERE id = ?", table))
        .bind(content_id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            RemoteError::condition(
                DomainCondition::NotFound,
                format!("{} {} not found", content_type.as_str(), content_id),
            )
        })?;
    let current: String = row.try_get("status")?;
    let current = ContentStatus::from_str(&current).map_err(bad_enum)?;

    if current == next {
        return Ok(false);
    }
    if !current.can_transition_to(next) {
        return Err(invalid_transition(format!(
            "cannot move {} from {} to {}",
            content_type.as_str(),
            current.as_str(),
            next.as_str()
        )));
    }

    sqlx::query(&format!("UPDATE {} SET status = ? WHERE id = ?", table))
        .bind(next.as_str())
        .bind(content_id.to_string())
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO content_moderation_log
            (id, content_id, content_type, previous_status, new_status, moderator_id, reason, report_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(content_id.to_string())
    .bind(content_type.as_str())
    .bind(current.as_str())
    .bind(next.as_str())
    .bind(moderator_id.to_string())
    .bind(reason)
    .bind(report_id.map(|id| id.to_string()))
    .bind(now())
    .execute(&mut *conn)
    .await?;

    Ok(true)
}

async fn content_exists(
    pool: &SqlitePool,
    content_type: ContentType,
    content_id: Uuid,
) -> Result<bool, RemoteError> {
    let table = content_table(content_type).unwrap_or("events");
    let row = sqlx::query(&format!("SELECT 1 FROM {} WHERE id = ?", table))
        .bind(content_id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

pub(crate) async fn report_content(pool: &SqlitePool, caller: &Caller, args: Args<'_>) -> RemoteResult {
    let user_id = caller.require_user()?;
    let content_id = args.uuid("p_content_id")?;
    let content_type = ContentType::from_str(&args.str("p_content_type")?).map_err(bad_enum)?;
    let reason = args.str("p_reason")?;
    let description = args.opt_str("p_description")?;
    let reporter_id = args.uuid("p_reporter_id")?;

    if reporter_id != user_id {
        return Err(RemoteError::permission_denied("reports must be filed as the caller"));
    }
    if reason.trim().is_empty() {
        return Err(RemoteError::new("23514", "report reason is required"));
    }
    if !content_exists(pool, content_type, content_id).await? {
        return Err(RemoteError::condition(
            DomainCondition::NotFound,
            format!("{} {} not found", content_type.as_str(), content_id),
        ));
    }

    let id = Uuid::new_v4();
    let row = sqlx::query(
        r#"
        INSERT INTO content_reports
            (id, reporter_id, reported_content_id, reported_content_type, reason, description, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(id.to_string())
    .bind(user_id.to_string())
    .bind(content_id.to_string())
    .bind(content_type.as_str())
    .bind(reason.trim())
    .bind(description)
    .bind(ReportStatus::Pending.as_str())
    .bind(now())
    .fetch_one(pool)
    .await?;

    let columns: Vec<&Column> = REPORT_COLUMNS.iter().collect();
    row_to_json(&row, &columns)
}

/// Resolve a batch of pending reports and optionally act on their content,
/// all in one transaction
pub(crate) async fn resolve_content_reports(
    pool: &SqlitePool,
    caller: &Caller,
    args: Args<'_>,
) -> RemoteResult {
    let moderator_id = caller.require_role(Role::Moderator)?;
    let mut report_ids = args.uuid_list("p_report_ids")?;
    report_ids.sort();
    report_ids.dedup();
    let resolution = match args.str("p_resolution")?.as_str() {
        "approved" => Resolution::Approved,
        "rejected" => Resolution::Rejected,
        other => return Err(RemoteError::new("22023", format!("invalid resolution: {}", other))),
    };
    let content_action = args
        .opt_str("p_content_action")?
        .map(|s| ContentStatus::from_str(&s))
        .transpose()
        .map_err(bad_enum)?;
    let notes = args.opt_str("p_notes")?;

    if report_ids.is_empty() {
        return Err(RemoteError::new("22023", "no reports given"));
    }

    let mut tx = pool.begin().await?;
    let mut targets = Vec::with_capacity(report_ids.len());
    for report_id in &report_ids {
        let row = sqlx::query(
            "SELECT status, reported_content_id, reported_content_type FROM content_reports WHERE id = ?",
        )
        .bind(report_id.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            RemoteError::condition(DomainCondition::NotFound, format!("report {} not found", report_id))
        })?;

        let status: String = row.try_get("status")?;
        if ReportStatus::from_str(&status).map_err(bad_enum)?.is_terminal() {
            return Err(RemoteError::condition(
                DomainCondition::AlreadyResolved,
                format!("report {} already resolved", report_id),
            ));
        }

        let content_id: String = row.try_get("reported_content_id")?;
        let content_type: String = row.try_get("reported_content_type")?;
        targets.push((
            *report_id,
            super::accounts::parse_uuid(&content_id)?,
            ContentType::from_str(&content_type).map_err(bad_enum)?,
        ));
    }

    let mut content_updated = 0u64;
    if let Some(action) = content_action {
        let reason = notes.clone().unwrap_or_else(|| "Report resolved".to_string());
        for (report_id, content_id, content_type) in &targets {
            let changed = transition_content(
                &mut tx,
                *content_type,
                *content_id,
                action,
                moderator_id,
                &reason,
                Some(*report_id),
            )
            .await?;
            if changed {
                content_updated += 1;
            }
        }
    }

    let reviewed_at = now();
    for report_id in &report_ids {
        sqlx::query(
            r#"
            UPDATE content_reports
            SET status = ?, reviewed_by = ?, reviewed_at = ?, resolution_notes = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(resolution.as_str())
        .bind(moderator_id.to_string())
        .bind(&reviewed_at)
        .bind(&notes)
        .bind(report_id.to_string())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(json!({
        "resolved": report_ids.len(),
        "content_updated": content_updated,
    }))
}

pub(crate) async fn moderate_content(pool: &SqlitePool, caller: &Caller, args: Args<'_>) -> RemoteResult {
    let moderator_id = caller.require_role(Role::Moderator)?;
    let content_ids = args.uuid_list("p_content_ids")?;
    let content_type = ContentType::from_str(&args.str("p_content_type")?).map_err(bad_enum)?;
    let next = ContentStatus::from_str(&args.str("p_new_status")?).map_err(bad_enum)?;
    let reason = args.str("p_reason")?;

    if args.uuid("p_moderator_id")? != moderator_id {
        return Err(RemoteError::permission_denied("moderation must be performed as the caller"));
    }
    if !next.is_moderation_target() {
        return Err(invalid_transition(format!("content cannot be moved to {}", next.as_str())));
    }

    let mut tx = pool.begin().await?;
    let mut moderated = 0u64;
    for content_id in content_ids {
        if transition_content(&mut tx, content_type, content_id, next, moderator_id, &reason, None).await? {
            moderated += 1;
        }
    }
    tx.commit().await?;

    Ok(json!({ "moderated": moderated }))
}

pub(crate) async fn log_admin_action(pool: &SqlitePool, caller: &Caller, args: Args<'_>) -> RemoteResult {
    let admin_id = caller.require_role(Role::Moderator)?;
    let id = Uuid::new_v4();
    let details = args.value("p_details").cloned().unwrap_or_else(|| json!({}));

    sqlx::query(
        r#"
        INSERT INTO admin_actions (id, admin_id, action, target_type, target_id, details, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(admin_id.to_string())
    .bind(args.str("p_action")?)
    .bind(args.str("p_target_type")?)
    .bind(args.opt_str("p_target_id")?)
    .bind(details.to_string())
    .bind(now())
    .execute(pool)
    .await?;

    Ok(json!({ "id": id }))
}
