/// Challenge administration and participation
use crate::{
    audit::{AdminAction, AuditLogger},
    error::{ClubError, ClubResult, DomainCondition},
    gateway::{GatewayExt, Order, RpcGateway, TableQuery},
};
use chrono::{DateTime, Utc};
use serde::{de::IgnoredAny, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

/// Challenge status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Draft,
    Active,
    Completed,
    Cancelled,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Draft => "draft",
            ChallengeStatus::Active => "active",
            ChallengeStatus::Completed => "completed",
            ChallengeStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> ClubResult<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(ChallengeStatus::Draft),
            "active" => Ok(ChallengeStatus::Active),
            "completed" => Ok(ChallengeStatus::Completed),
            "cancelled" => Ok(ChallengeStatus::Cancelled),
            _ => Err(ClubError::Validation(format!("Invalid challenge status: {}", s))),
        }
    }

    pub fn can_transition_to(&self, next: ChallengeStatus) -> bool {
        matches!(
            (self, next),
            (ChallengeStatus::Draft, ChallengeStatus::Active)
                | (ChallengeStatus::Draft, ChallengeStatus::Cancelled)
                | (ChallengeStatus::Active, ChallengeStatus::Completed)
                | (ChallengeStatus::Active, ChallengeStatus::Cancelled)
        )
    }
}

/// Points handed out by a challenge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RewardPoints {
    #[validate(range(min = 0))]
    pub points_reward: i64,
    #[validate(range(min = 0))]
    pub winner_reward_points: i64,
    #[validate(range(min = 0))]
    pub runner_up_reward_points: i64,
    #[validate(range(min = 0))]
    pub participation_reward_points: i64,
}

impl RewardPoints {
    fn checked(self) -> ClubResult<Self> {
        self.validate()
            .map_err(|e| ClubError::Validation(format!("Invalid rewards: {}", e)))?;
        Ok(self)
    }

    fn as_patch(&self) -> Value {
        json!({
            "points_reward": self.points_reward,
            "winner_reward_points": self.winner_reward_points,
            "runner_up_reward_points": self.runner_up_reward_points,
            "participation_reward_points": self.participation_reward_points,
        })
    }
}

/// Challenge row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: ChallengeStatus,
    #[serde(flatten)]
    pub rewards: RewardPoints,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`ChallengeManager::create`]
#[derive(Debug, Clone, Validate)]
pub struct NewChallenge {
    pub organization_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(nested)]
    pub rewards: RewardPoints,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyJoined,
}

/// Challenge manager
#[derive(Clone)]
pub struct ChallengeManager {
    gateway: Arc<dyn RpcGateway>,
    audit: Arc<AuditLogger>,
}

impl ChallengeManager {
    pub fn new(gateway: Arc<dyn RpcGateway>, audit: Arc<AuditLogger>) -> Self {
        Self { gateway, audit }
    }

    pub async fn list(
        &self,
        organization_id: Uuid,
        status: Option<ChallengeStatus>,
    ) -> ClubResult<Vec<Challenge>> {
        let mut query = TableQuery::from("challenges")
            .eq("organization_id", organization_id.to_string())
            .order_by("created_at", Order::Desc);
        if let Some(status) = status {
            query = query.eq("status", status.as_str());
        }

        self.gateway.select_as(&query).await
    }

    pub async fn get(&self, challenge_id: Uuid) -> ClubResult<Option<Challenge>> {
        let query = TableQuery::from("challenges")
            .eq("id", challenge_id.to_string())
            .limit(1);
        let mut rows: Vec<Challenge> = self.gateway.select_as(&query).await?;
        Ok(rows.pop())
    }

    /// Create a challenge in `draft`
    pub async fn create(&self, challenge: NewChallenge, created_by: Uuid) -> ClubResult<Challenge> {
        challenge
            .validate()
            .map_err(|e| ClubError::Validation(format!("Invalid challenge: {}", e)))?;
        if let (Some(start), Some(end)) = (challenge.start_date, challenge.end_date) {
            if end <= start {
                return Err(ClubError::Validation(
                    "Challenge must end after it starts".to_string(),
                ));
            }
        }

        let mut row = json!({
            "organization_id": challenge.organization_id,
            "title": challenge.title.trim(),
            "description": challenge.description,
            "status": ChallengeStatus::Draft.as_str(),
            "start_date": challenge.start_date,
            "end_date": challenge.end_date,
            "created_by": created_by,
        });
        if let (Some(row), Value::Object(rewards)) = (row.as_object_mut(), challenge.rewards.as_patch()) {
            row.extend(rewards);
        }

        let created: Challenge = self.gateway.insert_as("challenges", row).await?;
        info!("Created challenge {} ({})", created.id, created.title);

        self.audit.record(AdminAction::new(
            "challenge_created",
            "challenge",
            Some(created.id),
            json!({ "title": created.title, "organization_id": created.organization_id }),
        ));

        Ok(created)
    }

    pub async fn update_status(
        &self,
        challenge_id: Uuid,
        next: ChallengeStatus,
    ) -> ClubResult<Challenge> {
        let current = self.require(challenge_id).await?;
        if !current.status.can_transition_to(next) {
            return Err(ClubError::InvalidTransition {
                from: current.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        let updated = self
            .patch(challenge_id, json!({ "status": next.as_str() }))
            .await?;
        info!(
            "Challenge {} moved {} -> {}",
            challenge_id,
            current.status.as_str(),
            next.as_str()
        );

        self.audit.record(AdminAction::new(
            "challenge_status_changed",
            "challenge",
            Some(challenge_id),
            json!({ "from": current.status.as_str(), "to": next.as_str() }),
        ));

        Ok(updated)
    }

    /// Change reward points. Refused once anyone has joined.
    pub async fn update_rewards(
        &self,
        challenge_id: Uuid,
        rewards: RewardPoints,
    ) -> ClubResult<Challenge> {
        let rewards = rewards.checked()?;
        self.require(challenge_id).await?;

        let participants = TableQuery::from("challenge_participations")
            .columns(&["id"])
            .eq("challenge_id", challenge_id.to_string())
            .limit(1);
        let joined: Vec<IgnoredAny> = self.gateway.select_as(&participants).await?;
        if !joined.is_empty() {
            return Err(ClubError::Validation(
                "Rewards are locked once participants have joined".to_string(),
            ));
        }

        let updated = self.patch(challenge_id, rewards.as_patch()).await?;

        self.audit.record(AdminAction::new(
            "challenge_rewards_updated",
            "challenge",
            Some(challenge_id),
            rewards.as_patch(),
        ));

        Ok(updated)
    }

    /// Join an active challenge as the caller
    pub async fn join(&self, challenge_id: Uuid) -> ClubResult<JoinOutcome> {
        let result = self
            .gateway
            .rpc("join_challenge", json!({ "p_challenge_id": challenge_id }))
            .await
            .map_err(ClubError::from);

        match result {
            Ok(_) => {
                info!("Joined challenge {}", challenge_id);
                Ok(JoinOutcome::Joined)
            }
            Err(e) if e.is_condition(DomainCondition::AlreadyJoined) => Ok(JoinOutcome::AlreadyJoined),
            Err(e) => Err(e),
        }
    }

    async fn require(&self, challenge_id: Uuid) -> ClubResult<Challenge> {
        self.get(challenge_id)
            .await?
            .ok_or_else(|| ClubError::NotFound(format!("Challenge {}", challenge_id)))
    }

    async fn patch(&self, challenge_id: Uuid, patch: Value) -> ClubResult<Challenge> {
        let query = TableQuery::from("challenges").eq("id", challenge_id.to_string());
        let mut rows: Vec<Challenge> = self.gateway.update_as(&query, patch).await?;
        rows.pop()
            .ok_or_else(|| ClubError::NotFound(format!("Challenge {}", challenge_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_transitions() {
        use ChallengeStatus::*;
        assert!(Draft.can_transition_to(Active));
        assert!(Draft.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Cancelled));

        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Draft.can_transition_to(Completed));
    }

    #[test]
    fn test_negative_rewards_rejected() {
        let rewards = RewardPoints {
            points_reward: -5,
            ..Default::default()
        };
        assert!(rewards.checked().is_err());
    }

    #[test]
    fn test_challenge_row_flattens_rewards() {
        let row = json!({
            "id": Uuid::new_v4(),
            "organization_id": Uuid::new_v4(),
            "title": "30 day walk",
            "status": "active",
            "points_reward": 10,
            "winner_reward_points": 100,
            "runner_up_reward_points": 50,
            "participation_reward_points": 5,
            "created_at": "2026-10-01T00:00:00Z",
        });
        let challenge: Challenge = serde_json::from_value(row).unwrap();
        assert_eq!(challenge.rewards.winner_reward_points, 100);
        assert_eq!(challenge.status, ChallengeStatus::Active);
    }
}
