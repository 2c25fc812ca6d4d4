/// Member notifications
use crate::{
    audit::{AdminAction, AuditLogger},
    error::{ClubError, ClubResult},
    gateway::{GatewayExt, Order, RpcGateway, TableQuery},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Announcement,
    Event,
    Challenge,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Announcement => "announcement",
            NotificationKind::Event => "event",
            NotificationKind::Challenge => "challenge",
            NotificationKind::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub recipient_id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

#[derive(Debug, Clone, Validate)]
pub struct NewNotification {
    pub organization_id: Uuid,
    pub recipient_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
    pub kind: NotificationKind,
}

/// Notification manager
#[derive(Clone)]
pub struct NotificationManager {
    gateway: Arc<dyn RpcGateway>,
    audit: Arc<AuditLogger>,
}

impl NotificationManager {
    pub fn new(gateway: Arc<dyn RpcGateway>, audit: Arc<AuditLogger>) -> Self {
        Self { gateway, audit }
    }

    /// Send a notification to one member (admin only)
    pub async fn send(&self, notification: NewNotification, sent_by: Uuid) -> ClubResult<Notification> {
        notification
            .validate()
            .map_err(|e| ClubError::Validation(format!("Invalid notification: {}", e)))?;

        let row = json!({
            "organization_id": notification.organization_id,
            "recipient_id": notification.recipient_id,
            "title": notification.title.trim(),
            "message": notification.message.trim(),
            "type": notification.kind.as_str(),
            "created_by": sent_by,
        });

        let sent: Notification = self.gateway.insert_as("notifications", row).await?;
        tracing::info!("Sent notification {} to {}", sent.id, sent.recipient_id);

        self.audit.record(AdminAction::new(
            "notification_sent",
            "notification",
            Some(sent.id),
            json!({ "recipient_id": sent.recipient_id, "type": sent.kind.as_str() }),
        ));

        Ok(sent)
    }

    /// Notifications visible to the caller, newest first
    pub async fn list(&self, unread_only: bool, limit: u32) -> ClubResult<Vec<Notification>> {
        let mut query = TableQuery::from("notifications")
            .order_by("created_at", Order::Desc)
            .limit(limit);
        if unread_only {
            query = query.is_null("read_at");
        }

        self.gateway.select_as(&query).await
    }

    pub async fn mark_read(&self, notification_id: Uuid) -> ClubResult<Notification> {
        let query = TableQuery::from("notifications").eq("id", notification_id.to_string());
        let mut rows: Vec<Notification> = self
            .gateway
            .update_as(&query, json!({ "read_at": Utc::now() }))
            .await?;

        rows.pop()
            .ok_or_else(|| ClubError::NotFound(format!("Notification {}", notification_id)))
    }
}
