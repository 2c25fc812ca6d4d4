/// Organization (tenant) context
use crate::{
    error::{ClubError, ClubResult},
    gateway::{GatewayExt, RpcGateway},
    session::SessionSnapshot,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, RwLock};
use tokio::{sync::watch, task::JoinHandle};
use uuid::Uuid;

/// Role of a member inside one organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Member,
    Admin,
    Owner,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Member => "member",
            MemberRole::Admin => "admin",
            MemberRole::Owner => "owner",
        }
    }
}

/// One organization the current identity belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub organization_id: Uuid,
    pub name: String,
    pub slug: String,
    pub role: MemberRole,
}

#[derive(Debug, Default)]
struct OrganizationState {
    user_id: Option<Uuid>,
    memberships: Vec<Membership>,
    current: Option<Uuid>,
}

/// Resolves which tenant the current identity is acting within
pub struct OrganizationContext {
    gateway: Arc<dyn RpcGateway>,
    state: RwLock<OrganizationState>,
}

impl OrganizationContext {
    pub fn new(gateway: Arc<dyn RpcGateway>) -> Self {
        Self {
            gateway,
            state: RwLock::new(OrganizationState::default()),
        }
    }

    /// Reload memberships for the identity in `snapshot`
    pub async fn load(&self, snapshot: &SessionSnapshot) -> ClubResult<()> {
        let Some(user_id) = snapshot.user_id() else {
            self.clear();
            return Ok(());
        };

        let memberships: Vec<Membership> = self
            .gateway
            .rpc_as("get_user_organizations", json!({}))
            .await?;

        let mut state = self.write()?;
        let keep_current = state.user_id == Some(user_id)
            && state
                .current
                .is_some_and(|id| memberships.iter().any(|m| m.organization_id == id));
        if !keep_current {
            state.current = memberships.first().map(|m| m.organization_id);
        }
        state.user_id = Some(user_id);
        state.memberships = memberships;

        tracing::debug!(
            "Loaded {} organization(s) for {}",
            state.memberships.len(),
            user_id
        );
        Ok(())
    }

    /// Follow identity changes for as long as the session sender lives
    pub fn watch_session(
        self: Arc<Self>,
        mut session: watch::Receiver<SessionSnapshot>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_user = None;
            loop {
                let snapshot = session.borrow_and_update().clone();
                if !snapshot.loading() && snapshot.user_id() != last_user {
                    last_user = snapshot.user_id();
                    if let Err(e) = self.load(&snapshot).await {
                        tracing::warn!("Failed to load organizations: {}", e);
                    }
                }

                if session.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    pub fn clear(&self) {
        if let Ok(mut state) = self.state.write() {
            *state = OrganizationState::default();
        }
    }

    pub fn memberships(&self) -> Vec<Membership> {
        self.state
            .read()
            .map(|state| state.memberships.clone())
            .unwrap_or_default()
    }

    pub fn current(&self) -> Option<Membership> {
        let state = self.state.read().ok()?;
        let current = state.current?;
        state
            .memberships
            .iter()
            .find(|m| m.organization_id == current)
            .cloned()
    }

    pub fn current_id(&self) -> Option<Uuid> {
        self.state.read().ok().and_then(|state| state.current)
    }

    /// Current organization id, or an error when none is selected
    pub fn require_current(&self) -> ClubResult<Uuid> {
        self.current_id()
            .ok_or_else(|| ClubError::Validation("No organization selected".to_string()))
    }

    /// Switch tenant; only organizations the identity belongs to are accepted
    pub fn select(&self, organization_id: Uuid) -> ClubResult<()> {
        let mut state = self.write()?;
        if !state
            .memberships
            .iter()
            .any(|m| m.organization_id == organization_id)
        {
            return Err(ClubError::NotFound(format!(
                "Not a member of organization {}",
                organization_id
            )));
        }
        state.current = Some(organization_id);
        tracing::info!("Switched to organization {}", organization_id);
        Ok(())
    }

    /// Whether the identity administers the current organization (UI only)
    pub fn is_org_admin(&self) -> bool {
        self.current()
            .is_some_and(|m| m.role >= MemberRole::Admin)
    }

    fn write(&self) -> ClubResult<std::sync::RwLockWriteGuard<'_, OrganizationState>> {
        self.state
            .write()
            .map_err(|_| ClubError::Internal("Organization state poisoned".to_string()))
    }
}
