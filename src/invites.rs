/// Organization invite codes
use crate::{
    audit::{AdminAction, AuditLogger},
    error::{ClubError, ClubResult, DomainCondition},
    gateway::{GatewayExt, Order, RpcGateway, TableQuery},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Invite code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteCode {
    pub id: Uuid,
    pub code: String,
    pub organization_id: Uuid,
    pub created_by: Uuid,
    pub max_uses: i64,
    pub uses: i64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InviteCode {
    pub fn remaining(&self) -> i64 {
        (self.max_uses - self.uses).max(0)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    Joined { organization_id: Uuid },
    AlreadyUsed,
}

#[derive(Debug, Deserialize)]
struct RedeemReply {
    organization_id: Uuid,
}

/// Invite code manager
#[derive(Clone)]
pub struct InviteManager {
    gateway: Arc<dyn RpcGateway>,
    audit: Arc<AuditLogger>,
}

impl InviteManager {
    pub fn new(gateway: Arc<dyn RpcGateway>, audit: Arc<AuditLogger>) -> Self {
        Self { gateway, audit }
    }

    /// Create a code for an organization; the server picks the code text
    pub async fn create(
        &self,
        organization_id: Uuid,
        max_uses: i64,
        expires_in: Option<Duration>,
    ) -> ClubResult<InviteCode> {
        if max_uses < 1 {
            return Err(ClubError::Validation("An invite needs at least one use".to_string()));
        }

        let invite: InviteCode = self
            .gateway
            .rpc_as(
                "create_invite_code",
                json!({
                    "p_organization_id": organization_id,
                    "p_max_uses": max_uses,
                    "p_expires_at": expires_in.map(|d| Utc::now() + d),
                }),
            )
            .await?;

        tracing::info!("Created invite {} for {}", invite.code, organization_id);

        self.audit.record(AdminAction::new(
            "invite_created",
            "invite_code",
            Some(invite.id),
            json!({ "organization_id": organization_id, "max_uses": max_uses }),
        ));

        Ok(invite)
    }

    pub async fn list(&self, organization_id: Uuid) -> ClubResult<Vec<InviteCode>> {
        let query = TableQuery::from("invite_codes")
            .eq("organization_id", organization_id.to_string())
            .order_by("created_at", Order::Desc);
        self.gateway.select_as(&query).await
    }

    /// Join the organization behind `code` as the caller
    pub async fn redeem(&self, code: &str) -> ClubResult<RedeemOutcome> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ClubError::Validation("Invite code is empty".to_string()));
        }

        let reply = self
            .gateway
            .rpc_as::<RedeemReply>("redeem_invite_code", json!({ "p_code": code }))
            .await;

        match reply {
            Ok(reply) => {
                tracing::info!("Redeemed invite for {}", reply.organization_id);
                Ok(RedeemOutcome::Joined {
                    organization_id: reply.organization_id,
                })
            }
            Err(e) if e.is_condition(DomainCondition::AlreadyUsed) => Ok(RedeemOutcome::AlreadyUsed),
            Err(e) => Err(e),
        }
    }
}
