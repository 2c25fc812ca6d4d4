/// Unified error types for the HUMBL Girls Club core
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// SQLSTATE raised by Postgres when a called function does not exist
pub const UNDEFINED_FUNCTION: &str = "42883";
/// SQLSTATE raised by Postgres when a referenced table does not exist
pub const UNDEFINED_TABLE: &str = "42P01";
/// SQLSTATE for insufficient privilege
pub const INSUFFICIENT_PRIVILEGE: &str = "42501";
/// SQLSTATE for `RAISE EXCEPTION` without an explicit code
pub const RAISE_EXCEPTION: &str = "P0001";
/// Client-side code for transport failures
pub const NETWORK: &str = "NETWORK";
/// Client-side code for request timeouts
pub const TIMEOUT: &str = "TIMEOUT";

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum ClubError {
    /// Error returned by a remote procedure, table query or edge function
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Input rejected before it reached the backend
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested row does not exist (client-side lookup)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Status change the client knows to be illegal
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Local deadline elapsed
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Embedded database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded database migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for crate operations
pub type ClubResult<T> = Result<T, ClubError>;

/// Error body returned by the backend (PostgREST shape)
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} ({code})")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

/// Coarse classification every caller branches on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The procedure, table or function is not deployed on the server
    CapabilityMissing,
    /// An anticipated outcome that is not a failure of the system
    DomainCondition(DomainCondition),
    /// The server refused the call for lack of privilege
    AuthorizationDenied,
    /// Network trouble or timeout, worth retrying
    Transient,
    /// Rejected locally before any call was made
    InvalidInput,
    /// Anything else
    Unexpected,
}

/// Anticipated, non-fatal outcomes signalled by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainCondition {
    AlreadyRegistered,
    EventFull,
    EventClosed,
    NotRegistered,
    AlreadyMarked,
    QrNotFound,
    AlreadyUsed,
    InviteExpired,
    InviteNotFound,
    InsufficientPoints,
    NotFound,
    AlreadyResolved,
    InvalidTransition,
    AlreadyJoined,
    AccountExists,
    InvalidCredentials,
}

/// Message fragments used by servers that do not send a condition hint.
/// Checked in order; the first match wins.
const LEGACY_MESSAGE_CONDITIONS: &[(&str, DomainCondition)] = &[
    ("already registered for", DomainCondition::AlreadyRegistered),
    ("user already registered", DomainCondition::AccountExists),
    ("already registered", DomainCondition::AlreadyRegistered),
    ("already used", DomainCondition::AlreadyUsed),
    ("already marked", DomainCondition::AlreadyMarked),
    ("already resolved", DomainCondition::AlreadyResolved),
    ("already joined", DomainCondition::AlreadyJoined),
    ("qr code not found", DomainCondition::QrNotFound),
    ("event is full", DomainCondition::EventFull),
    ("insufficient points", DomainCondition::InsufficientPoints),
    ("invalid login credentials", DomainCondition::InvalidCredentials),
    ("expired", DomainCondition::InviteExpired),
    ("not found", DomainCondition::NotFound),
];

impl DomainCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainCondition::AlreadyRegistered => "already_registered",
            DomainCondition::EventFull => "event_full",
            DomainCondition::EventClosed => "event_closed",
            DomainCondition::NotRegistered => "not_registered",
            DomainCondition::AlreadyMarked => "already_marked",
            DomainCondition::QrNotFound => "qr_not_found",
            DomainCondition::AlreadyUsed => "already_used",
            DomainCondition::InviteExpired => "invite_expired",
            DomainCondition::InviteNotFound => "invite_not_found",
            DomainCondition::InsufficientPoints => "insufficient_points",
            DomainCondition::NotFound => "not_found",
            DomainCondition::AlreadyResolved => "already_resolved",
            DomainCondition::InvalidTransition => "invalid_transition",
            DomainCondition::AlreadyJoined => "already_joined",
            DomainCondition::AccountExists => "account_exists",
            DomainCondition::InvalidCredentials => "invalid_credentials",
        }
    }

    /// Parse a condition tag as sent in the `hint` field
    pub fn from_tag(tag: &str) -> Option<Self> {
        let condition = match tag.trim() {
            "already_registered" => DomainCondition::AlreadyRegistered,
            "event_full" => DomainCondition::EventFull,
            "event_closed" => DomainCondition::EventClosed,
            "not_registered" => DomainCondition::NotRegistered,
            "already_marked" => DomainCondition::AlreadyMarked,
            "qr_not_found" => DomainCondition::QrNotFound,
            "already_used" => DomainCondition::AlreadyUsed,
            "invite_expired" => DomainCondition::InviteExpired,
            "invite_not_found" => DomainCondition::InviteNotFound,
            "insufficient_points" => DomainCondition::InsufficientPoints,
            "not_found" => DomainCondition::NotFound,
            "already_resolved" => DomainCondition::AlreadyResolved,
            "invalid_transition" => DomainCondition::InvalidTransition,
            "already_joined" => DomainCondition::AlreadyJoined,
            "account_exists" | "user_already_exists" => DomainCondition::AccountExists,
            "invalid_credentials" => DomainCondition::InvalidCredentials,
            _ => return None,
        };
        Some(condition)
    }

    fn from_legacy_message(message: &str) -> Option<Self> {
        let message = message.to_lowercase();
        LEGACY_MESSAGE_CONDITIONS
            .iter()
            .find(|(fragment, _)| message.contains(fragment))
            .map(|(_, condition)| *condition)
    }

    /// Text shown to the user in place of a failure toast
    pub fn user_message(&self) -> &'static str {
        match self {
            DomainCondition::AlreadyRegistered => "You're already registered for this event.",
            DomainCondition::EventFull => "This event is full.",
            DomainCondition::EventClosed => "Registration for this event is closed.",
            DomainCondition::NotRegistered => "You're not registered for this event.",
            DomainCondition::AlreadyMarked => "Your attendance has already been recorded.",
            DomainCondition::QrNotFound => "This QR code doesn't match any event.",
            DomainCondition::AlreadyUsed => "This invite code has already been used.",
            DomainCondition::InviteExpired => "This invite code has expired.",
            DomainCondition::InviteNotFound => "This invite code isn't valid.",
            DomainCondition::InsufficientPoints => "You don't have enough points for this.",
            DomainCondition::NotFound => "That content could not be found.",
            DomainCondition::AlreadyResolved => "This report has already been reviewed.",
            DomainCondition::InvalidTransition => "That status change isn't allowed.",
            DomainCondition::AlreadyJoined => "You've already joined this challenge.",
            DomainCondition::AccountExists => "An account with this email already exists.",
            DomainCondition::InvalidCredentials => "Invalid email or password.",
        }
    }
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    /// Error for a procedure or function that is not deployed
    pub fn capability_missing(name: &str) -> Self {
        Self::new(
            UNDEFINED_FUNCTION,
            format!("function {} does not exist", name),
        )
    }

    /// Error signalling an anticipated domain outcome
    pub fn condition(condition: DomainCondition, message: impl Into<String>) -> Self {
        Self {
            code: RAISE_EXCEPTION.to_string(),
            message: message.into(),
            details: None,
            hint: Some(condition.as_str().to_string()),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(INSUFFICIENT_PRIVILEGE, message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code.as_str() {
            UNDEFINED_FUNCTION | UNDEFINED_TABLE | "PGRST202" | "PGRST205" => {
                ErrorKind::CapabilityMissing
            }
            INSUFFICIENT_PRIVILEGE | "PGRST301" | "PGRST302" | "401" | "403" => {
                ErrorKind::AuthorizationDenied
            }
            NETWORK | TIMEOUT | "502" | "503" | "504" => ErrorKind::Transient,
            _ => {
                let tagged = self.hint.as_deref().and_then(DomainCondition::from_tag);
                match tagged.or_else(|| DomainCondition::from_legacy_message(&self.message)) {
                    Some(condition) => ErrorKind::DomainCondition(condition),
                    None => ErrorKind::Unexpected,
                }
            }
        }
    }

    pub fn condition_kind(&self) -> Option<DomainCondition> {
        match self.kind() {
            ErrorKind::DomainCondition(condition) => Some(condition),
            _ => None,
        }
    }
}

impl ClubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClubError::Remote(e) => e.kind(),
            ClubError::Validation(_) | ClubError::InvalidTransition { .. } => ErrorKind::InvalidInput,
            ClubError::NotFound(_) => ErrorKind::DomainCondition(DomainCondition::NotFound),
            ClubError::Timeout(_) => ErrorKind::Transient,
            ClubError::Http(e) if e.is_timeout() || e.is_connect() => ErrorKind::Transient,
            _ => ErrorKind::Unexpected,
        }
    }

    /// The domain condition carried by this error, if any
    pub fn condition(&self) -> Option<DomainCondition> {
        match self.kind() {
            ErrorKind::DomainCondition(condition) => Some(condition),
            _ => None,
        }
    }

    pub fn is_condition(&self, condition: DomainCondition) -> bool {
        self.condition() == Some(condition)
    }

    /// Text for the toast shown when a user action fails
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::DomainCondition(condition) => condition.user_message().to_string(),
            ErrorKind::CapabilityMissing => {
                "This feature isn't available yet. Please try again later.".to_string()
            }
            ErrorKind::AuthorizationDenied => {
                "You don't have permission to do that.".to_string()
            }
            ErrorKind::Transient => "Connection problem. Please try again.".to_string(),
            ErrorKind::InvalidInput | ErrorKind::Unexpected => match self {
                ClubError::Remote(e) => e.message.clone(),
                other => other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_function_is_capability_missing() {
        let err = RemoteError::new("42883", "function public.is_admin(uuid) does not exist");
        assert_eq!(err.kind(), ErrorKind::CapabilityMissing);
        assert_eq!(
            RemoteError::capability_missing("stripe-connect").kind(),
            ErrorKind::CapabilityMissing
        );
    }

    #[test]
    fn test_hint_takes_precedence_over_message() {
        let err = RemoteError {
            code: RAISE_EXCEPTION.to_string(),
            message: "already used".to_string(),
            details: None,
            hint: Some("event_full".to_string()),
        };
        assert_eq!(err.kind(), ErrorKind::DomainCondition(DomainCondition::EventFull));
    }

    #[test]
    fn test_legacy_messages_still_classify() {
        let err = RemoteError::new("P0001", "User is already registered for this event");
        assert_eq!(
            err.kind(),
            ErrorKind::DomainCondition(DomainCondition::AlreadyRegistered)
        );

        let err = RemoteError::new("P0001", "Invite code already used");
        assert_eq!(err.condition_kind(), Some(DomainCondition::AlreadyUsed));

        let err = RemoteError::new("P0001", "something broke");
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn test_permission_and_transport_codes() {
        assert_eq!(
            RemoteError::permission_denied("admin privileges required").kind(),
            ErrorKind::AuthorizationDenied
        );
        assert_eq!(RemoteError::new(TIMEOUT, "timed out").kind(), ErrorKind::Transient);
        assert_eq!(RemoteError::new("503", "unavailable").kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_user_messages() {
        let err = ClubError::from(RemoteError::condition(
            DomainCondition::AlreadyRegistered,
            "already registered for this event",
        ));
        assert_eq!(err.user_message(), "You're already registered for this event.");
        assert!(err.is_condition(DomainCondition::AlreadyRegistered));

        let err = ClubError::from(RemoteError::new("XX000", "disk on fire"));
        assert_eq!(err.user_message(), "disk on fire");

        let err = ClubError::Timeout(Duration::from_secs(8));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_condition_tags_round_trip() {
        for condition in [
            DomainCondition::AlreadyRegistered,
            DomainCondition::QrNotFound,
            DomainCondition::AccountExists,
        ] {
            assert_eq!(DomainCondition::from_tag(condition.as_str()), Some(condition));
        }
        assert_eq!(DomainCondition::from_tag("nope"), None);
    }
}
