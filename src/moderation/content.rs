/// Direct content moderation
use super::{ContentStatus, ContentType};
use crate::{
    audit::{AdminAction, AuditLogger},
    error::{ClubError, ClubResult},
    gateway::{GatewayExt, RpcGateway},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct ModerationSummary {
    moderated: u64,
}

/// Single client entry point for changing the status of posts and comments
#[derive(Clone)]
pub struct ContentModerator {
    gateway: Arc<dyn RpcGateway>,
    audit: Arc<AuditLogger>,
}

impl ContentModerator {
    pub fn new(gateway: Arc<dyn RpcGateway>, audit: Arc<AuditLogger>) -> Self {
        Self { gateway, audit }
    }

    /// Move content to `flagged` or `removed`. Returns how many items changed;
    /// items already in `new_status` count as unchanged.
    pub async fn transition_content_status(
        &self,
        content_ids: &[Uuid],
        content_type: ContentType,
        new_status: ContentStatus,
        reason: &str,
        moderator_id: Uuid,
    ) -> ClubResult<u64> {
        if content_ids.is_empty() {
            return Err(ClubError::Validation("No content selected".to_string()));
        }
        if !content_type.is_moderatable() {
            return Err(ClubError::Validation(format!(
                "{} content has no moderation status",
                content_type.as_str()
            )));
        }
        if !new_status.is_moderation_target() {
            return Err(ClubError::InvalidTransition {
                from: "any".to_string(),
                to: new_status.as_str().to_string(),
            });
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ClubError::Validation("A moderation reason is required".to_string()));
        }

        let summary: ModerationSummary = self
            .gateway
            .rpc_as(
                "moderate_content",
                json!({
                    "p_content_ids": content_ids,
                    "p_content_type": content_type.as_str(),
                    "p_new_status": new_status.as_str(),
                    "p_moderator_id": moderator_id,
                    "p_reason": reason,
                }),
            )
            .await?;

        tracing::info!(
            "Moved {} {}(s) to {}",
            summary.moderated,
            content_type.as_str(),
            new_status.as_str()
        );

        self.audit.record(AdminAction::new(
            "content_moderated",
            content_type.as_str(),
            (content_ids.len() == 1).then(|| content_ids[0]),
            json!({
                "content_ids": content_ids,
                "new_status": new_status.as_str(),
                "reason": reason,
                "count": summary.moderated,
            }),
        ));

        Ok(summary.moderated)
    }

    /// Proactive sweep that does not go through a report
    pub async fn moderate_content_direct(
        &self,
        content_ids: &[Uuid],
        content_type: ContentType,
        new_status: ContentStatus,
        moderator_id: Uuid,
        reason: &str,
    ) -> ClubResult<u64> {
        self.transition_content_status(content_ids, content_type, new_status, reason, moderator_id)
            .await
    }
}
