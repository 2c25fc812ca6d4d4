/// Event lifecycle: admin management and the end-user listing
use crate::{
    audit::{AdminAction, AuditLogger},
    error::{ClubError, ClubResult, DomainCondition},
    gateway::{GatewayExt, Order, RpcGateway, TableQuery},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Columns readable without an identity; the QR token is admin-only
const PUBLIC_EVENT_COLUMNS: &[&str] = &[
    "id",
    "organization_id",
    "title",
    "description",
    "location",
    "start_time",
    "end_time",
    "status",
    "max_capacity",
    "current_capacity",
    "price_cents",
    "currency",
    "created_by",
    "created_at",
];

/// Event status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Upcoming => "upcoming",
            EventStatus::Ongoing => "ongoing",
            EventStatus::Completed => "completed",
            EventStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> ClubResult<Self> {
        match s.to_lowercase().as_str() {
            "upcoming" => Ok(EventStatus::Upcoming),
            "ongoing" => Ok(EventStatus::Ongoing),
            "completed" => Ok(EventStatus::Completed),
            "cancelled" => Ok(EventStatus::Cancelled),
            _ => Err(ClubError::Validation(format!("Invalid event status: {}", s))),
        }
    }

    /// `upcoming -> ongoing -> completed`; anything not yet cancelled may be
    /// cancelled, including a completed event.
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::Upcoming, EventStatus::Ongoing)
                | (EventStatus::Ongoing, EventStatus::Completed)
                | (EventStatus::Upcoming, EventStatus::Cancelled)
                | (EventStatus::Ongoing, EventStatus::Cancelled)
                | (EventStatus::Completed, EventStatus::Cancelled)
        )
    }

    pub fn accepts_registrations(&self) -> bool {
        matches!(self, EventStatus::Upcoming | EventStatus::Ongoing)
    }
}

/// Event row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub status: EventStatus,
    #[serde(default)]
    pub max_capacity: Option<i64>,
    #[serde(default)]
    pub current_capacity: i64,
    #[serde(default)]
    pub price_cents: i64,
    #[serde(default)]
    pub currency: Option<String>,
    /// Only present for admins, and only once generated
    #[serde(default)]
    pub qr_code_token: Option<String>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn is_full(&self) -> bool {
        self.max_capacity
            .is_some_and(|max| self.current_capacity >= max)
    }

    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}

/// Input for [`EventManager::create_event`]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewEvent {
    pub organization_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(length(max = 300))]
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[validate(range(min = 1))]
    pub max_capacity: Option<i64>,
    #[validate(range(min = 0))]
    pub price_cents: i64,
    #[validate(length(equal = 3))]
    pub currency: String,
}

/// Result of a registration attempt that reached the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered { current_capacity: i64 },
    AlreadyRegistered,
}

/// Result of scanning an attendance QR code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceOutcome {
    Marked { event_id: Uuid },
    AlreadyMarked,
}

#[derive(Debug, Deserialize)]
struct RegistrationReply {
    current_capacity: i64,
}

#[derive(Debug, Deserialize)]
struct AttendanceReply {
    event_id: Uuid,
}

/// Admin event management
#[derive(Clone)]
pub struct EventManager {
    gateway: Arc<dyn RpcGateway>,
    audit: Arc<AuditLogger>,
}

impl EventManager {
    pub fn new(gateway: Arc<dyn RpcGateway>, audit: Arc<AuditLogger>) -> Self {
        Self { gateway, audit }
    }

    /// Upcoming events in start order, public columns only. Works anonymously.
    pub async fn list_upcoming(&self, organization_id: Option<Uuid>) -> ClubResult<Vec<Event>> {
        let mut query = TableQuery::from("events")
            .columns(PUBLIC_EVENT_COLUMNS)
            .eq("status", EventStatus::Upcoming.as_str())
            .order_by("start_time", Order::Asc);
        if let Some(organization_id) = organization_id {
            query = query.eq("organization_id", organization_id.to_string());
        }

        self.gateway.select_as(&query).await
    }

    /// All events of an organization, newest first (admin view)
    pub async fn list(
        &self,
        organization_id: Uuid,
        status: Option<EventStatus>,
    ) -> ClubResult<Vec<Event>> {
        let mut query = TableQuery::from("events")
            .eq("organization_id", organization_id.to_string())
            .order_by("start_time", Order::Desc);
        if let Some(status) = status {
            query = query.eq("status", status.as_str());
        }

        self.gateway.select_as(&query).await
    }

    pub async fn get(&self, event_id: Uuid) -> ClubResult<Option<Event>> {
        let query = TableQuery::from("events")
            .eq("id", event_id.to_string())
            .limit(1);
        let mut rows: Vec<Event> = self.gateway.select_as(&query).await?;
        Ok(rows.pop())
    }

    pub async fn create_event(&self, event: NewEvent, created_by: Uuid) -> ClubResult<Event> {
        event
            .validate()
            .map_err(|e| ClubError::Validation(format!("Invalid event: {}", e)))?;
        if event.end_time.is_some_and(|end| end <= event.start_time) {
            return Err(ClubError::Validation(
                "Event must end after it starts".to_string(),
            ));
        }

        let row = json!({
            "organization_id": event.organization_id,
            "title": event.title.trim(),
            "description": event.description,
            "location": event.location,
            "start_time": event.start_time,
            "end_time": event.end_time,
            "status": EventStatus::Upcoming.as_str(),
            "max_capacity": event.max_capacity,
            "current_capacity": 0,
            "price_cents": event.price_cents,
            "currency": event.currency.to_lowercase(),
            "created_by": created_by,
        });

        let created: Event = self.gateway.insert_as("events", row).await?;
        info!("Created event {} ({})", created.id, created.title);

        self.audit.record(AdminAction::new(
            "event_created",
            "event",
            Some(created.id),
            json!({ "title": created.title, "organization_id": created.organization_id }),
        ));

        Ok(created)
    }

    pub async fn update_status(&self, event_id: Uuid, next: EventStatus) -> ClubResult<Event> {
        let current = self
            .get(event_id)
            .await?
            .ok_or_else(|| ClubError::NotFound(format!("Event {}", event_id)))?;

        if !current.status.can_transition_to(next) {
            return Err(ClubError::InvalidTransition {
                from: current.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        if current.status == EventStatus::Completed {
            warn!("Cancelling completed event {}", event_id);
        }

        let query = TableQuery::from("events").eq("id", event_id.to_string());
        let mut rows: Vec<Event> = self
            .gateway
            .update_as(&query, json!({ "status": next.as_str() }))
            .await?;
        let updated = rows
            .pop()
            .ok_or_else(|| ClubError::NotFound(format!("Event {}", event_id)))?;

        info!(
            "Event {} moved {} -> {}",
            event_id,
            current.status.as_str(),
            next.as_str()
        );

        self.audit.record(AdminAction::new(
            "event_status_changed",
            "event",
            Some(event_id),
            json!({ "from": current.status.as_str(), "to": next.as_str() }),
        ));

        Ok(updated)
    }

    /// Attendance token for an event. Generated once; later calls return the
    /// same value.
    pub async fn generate_qr_code(&self, event_id: Uuid) -> ClubResult<String> {
        if let Some(token) = self.get(event_id).await?.and_then(|e| e.qr_code_token) {
            debug!("Event {} already has a QR token", event_id);
            return Ok(token);
        }

        let token: String = self
            .gateway
            .rpc_as("generate_event_qr_code", json!({ "p_event_id": event_id }))
            .await?;

        self.audit.record(AdminAction::new(
            "event_qr_generated",
            "event",
            Some(event_id),
            json!({}),
        ));

        Ok(token)
    }

    /// Mark the caller as present using a scanned QR token
    pub async fn mark_attendance(&self, qr_token: &str) -> ClubResult<AttendanceOutcome> {
        let qr_token = qr_token.trim();
        if qr_token.is_empty() {
            return Err(ClubError::Validation("QR code is empty".to_string()));
        }

        let reply = self
            .gateway
            .rpc_as::<AttendanceReply>("mark_event_attendance", json!({ "p_qr_token": qr_token }))
            .await;

        match reply {
            Ok(reply) => {
                info!("Attendance marked for event {}", reply.event_id);
                Ok(AttendanceOutcome::Marked {
                    event_id: reply.event_id,
                })
            }
            Err(e) if e.is_condition(DomainCondition::AlreadyMarked) => {
                Ok(AttendanceOutcome::AlreadyMarked)
            }
            Err(e) => Err(e),
        }
    }

    /// Register the caller for an event. A full event is an error
    /// ([`DomainCondition::EventFull`]); a repeat registration is not.
    pub async fn register(&self, event_id: Uuid) -> ClubResult<RegistrationOutcome> {
        let reply = self
            .gateway
            .rpc_as::<RegistrationReply>("register_for_event", json!({ "p_event_id": event_id }))
            .await;

        match reply {
            Ok(reply) => Ok(RegistrationOutcome::Registered {
                current_capacity: reply.current_capacity,
            }),
            Err(e) if e.is_condition(DomainCondition::AlreadyRegistered) => {
                Ok(RegistrationOutcome::AlreadyRegistered)
            }
            Err(e) => Err(e),
        }
    }
}

/// End-user events page: upcoming events with optimistic registration
pub struct EventListing {
    manager: EventManager,
    events: Vec<Event>,
    registered: HashSet<Uuid>,
}

impl EventListing {
    pub fn new(manager: EventManager) -> Self {
        Self {
            manager,
            events: Vec::new(),
            registered: HashSet::new(),
        }
    }

    pub async fn load(&mut self, organization_id: Option<Uuid>) -> ClubResult<()> {
        self.events = self.manager.list_upcoming(organization_id).await?;
        Ok(())
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn is_registered(&self, event_id: Uuid) -> bool {
        self.registered.contains(&event_id)
    }

    /// Show the registration immediately and undo it if the server refuses
    pub async fn register(&mut self, event_id: Uuid) -> ClubResult<RegistrationOutcome> {
        let index = self
            .events
            .iter()
            .position(|e| e.id == event_id)
            .ok_or_else(|| ClubError::NotFound(format!("Event {}", event_id)))?;

        let previous_capacity = self.events[index].current_capacity;
        let was_registered = self.registered.contains(&event_id);
        if !was_registered && !self.events[index].is_full() {
            self.events[index].current_capacity += 1;
        }
        self.registered.insert(event_id);

        match self.manager.register(event_id).await {
            Ok(RegistrationOutcome::Registered { current_capacity }) => {
                self.events[index].current_capacity = current_capacity;
                Ok(RegistrationOutcome::Registered { current_capacity })
            }
            Ok(RegistrationOutcome::AlreadyRegistered) => {
                self.events[index].current_capacity = previous_capacity;
                Ok(RegistrationOutcome::AlreadyRegistered)
            }
            Err(e) => {
                debug!("Rolling back registration for {}: {}", event_id, e);
                self.events[index].current_capacity = previous_capacity;
                if !was_registered {
                    self.registered.remove(&event_id);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_transitions() {
        use EventStatus::*;
        assert!(Upcoming.can_transition_to(Ongoing));
        assert!(Ongoing.can_transition_to(Completed));
        assert!(Upcoming.can_transition_to(Cancelled));
        assert!(Completed.can_transition_to(Cancelled));

        assert!(!Cancelled.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Upcoming));
        assert!(!Completed.can_transition_to(Ongoing));
        assert!(!Upcoming.can_transition_to(Completed));
    }

    #[test]
    fn test_new_event_validation() {
        let mut event = NewEvent {
            organization_id: Uuid::new_v4(),
            title: "Sunrise yoga".to_string(),
            description: None,
            location: Some("Beach".to_string()),
            start_time: Utc::now(),
            end_time: None,
            max_capacity: Some(20),
            price_cents: 0,
            currency: "usd".to_string(),
        };
        assert!(event.validate().is_ok());

        event.max_capacity = Some(0);
        assert!(event.validate().is_err());

        event.max_capacity = None;
        event.title = String::new();
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_event_row_without_private_columns() {
        let row = json!({
            "id": Uuid::new_v4(),
            "organization_id": Uuid::new_v4(),
            "title": "Book club",
            "start_time": "2026-11-01T18:00:00Z",
            "status": "upcoming",
            "max_capacity": 2,
            "current_capacity": 2,
            "created_at": "2026-10-01T00:00:00Z",
        });
        let event: Event = serde_json::from_value(row).unwrap();
        assert!(event.qr_code_token.is_none());
        assert!(event.is_full());
        assert!(event.is_free());
    }
}
