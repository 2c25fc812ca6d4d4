/// Content reports and moderatable content
///
/// Any identity may report a post, comment or event. Admins resolve reports
/// (approve or reject, exactly once) and may move the reported content from
/// `active` to `flagged` or `removed`, either as part of a resolution or
/// directly. Both paths reach the same server-side transition.

pub mod content;
pub mod reports;

pub use content::ContentModerator;
pub use reports::{BulkOutcome, ModerationQueue, ReportManager, ResolutionSummary};

use crate::error::{ClubError, ClubResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of reported content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Post,
    Comment,
    Event,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Post => "post",
            ContentType::Comment => "comment",
            ContentType::Event => "event",
        }
    }

    pub fn from_str(s: &str) -> ClubResult<Self> {
        match s.to_lowercase().as_str() {
            "post" => Ok(ContentType::Post),
            "comment" => Ok(ContentType::Comment),
            "event" => Ok(ContentType::Event),
            _ => Err(ClubError::Validation(format!("Invalid content type: {}", s))),
        }
    }

    /// Only posts and comments carry a moderation status
    pub fn is_moderatable(&self) -> bool {
        matches!(self, ContentType::Post | ContentType::Comment)
    }
}

/// Report lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Approved => "approved",
            ReportStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> ClubResult<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ReportStatus::Pending),
            "approved" => Ok(ReportStatus::Approved),
            "rejected" => Ok(ReportStatus::Rejected),
            _ => Err(ClubError::Validation(format!("Invalid report status: {}", s))),
        }
    }

    /// Reviewed reports are terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReportStatus::Pending)
    }
}

/// Outcome an admin assigns to a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Approved,
    Rejected,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        self.status().as_str()
    }

    pub fn status(&self) -> ReportStatus {
        match self {
            Resolution::Approved => ReportStatus::Approved,
            Resolution::Rejected => ReportStatus::Rejected,
        }
    }
}

/// Moderation status of a post or comment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Active,
    Flagged,
    Removed,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Active => "active",
            ContentStatus::Flagged => "flagged",
            ContentStatus::Removed => "removed",
        }
    }

    pub fn from_str(s: &str) -> ClubResult<Self> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ContentStatus::Active),
            "flagged" => Ok(ContentStatus::Flagged),
            "removed" => Ok(ContentStatus::Removed),
            _ => Err(ClubError::Validation(format!("Invalid content status: {}", s))),
        }
    }

    /// `active -> flagged`, `active -> removed`, `flagged -> removed`.
    /// `removed` is terminal.
    pub fn can_transition_to(&self, next: ContentStatus) -> bool {
        matches!(
            (self, next),
            (ContentStatus::Active, ContentStatus::Flagged)
                | (ContentStatus::Active, ContentStatus::Removed)
                | (ContentStatus::Flagged, ContentStatus::Removed)
        )
    }

    /// Whether `self` is a status a moderator may request
    pub fn is_moderation_target(&self) -> bool {
        matches!(self, ContentStatus::Flagged | ContentStatus::Removed)
    }
}

/// Complaint against a unit of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentReport {
    pub id: Uuid,
    pub reporter_id: Uuid,
    pub reported_content_id: Uuid,
    pub reported_content_type: ContentType,
    pub reason: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: ReportStatus,
    #[serde(default)]
    pub reviewed_by: Option<Uuid>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}
