/// Named procedure dispatch for the embedded backend
use super::{accounts::parse_uuid, events, membership, moderation, roles, Caller};
use crate::{error::RemoteError, gateway::RemoteResult};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Typed access to a procedure's JSON arguments
#[derive(Clone, Copy)]
pub(crate) struct Args<'a>(&'a Value);

impl<'a> Args<'a> {
    pub fn new(args: &'a Value) -> Self {
        Self(args)
    }

    fn invalid(name: &str, expected: &str) -> RemoteError {
        RemoteError::new("22023", format!("argument {} must be {}", name, expected))
    }

    pub fn value(&self, name: &str) -> Option<&'a Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    pub fn str(&self, name: &str) -> Result<String, RemoteError> {
        self.opt_str(name)?
            .ok_or_else(|| Self::invalid(name, "a string"))
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<String>, RemoteError> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(Self::invalid(name, "a string")),
        }
    }

    pub fn uuid(&self, name: &str) -> Result<Uuid, RemoteError> {
        parse_uuid(&self.str(name)?)
    }

    pub fn uuid_list(&self, name: &str) -> Result<Vec<Uuid>, RemoteError> {
        let items = self
            .value(name)
            .and_then(Value::as_array)
            .ok_or_else(|| Self::invalid(name, "an array of uuids"))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| Self::invalid(name, "an array of uuids"))
                    .and_then(parse_uuid)
            })
            .collect()
    }

    pub fn i64(&self, name: &str) -> Result<i64, RemoteError> {
        self.value(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| Self::invalid(name, "an integer"))
    }

    pub fn opt_timestamp(&self, name: &str) -> Result<Option<DateTime<Utc>>, RemoteError> {
        self.opt_str(name)?
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|_| Self::invalid(name, "an RFC 3339 timestamp"))
            })
            .transpose()
    }
}

pub(crate) async fn dispatch(pool: &SqlitePool, caller: &Caller, name: &str, args: &Value) -> RemoteResult {
    let args = Args::new(args);
    tracing::debug!("rpc {} as {:?}", name, caller.user_id);

    match name {
        "is_admin" => is_admin(pool, caller, args).await,
        "get_user_organizations" => membership::get_user_organizations(pool, caller).await,
        "report_content" => moderation::report_content(pool, caller, args).await,
        "resolve_content_reports" => moderation::resolve_content_reports(pool, caller, args).await,
        "moderate_content" => moderation::moderate_content(pool, caller, args).await,
        "log_admin_action" => moderation::log_admin_action(pool, caller, args).await,
        "register_for_event" => events::register_for_event(pool, caller, args).await,
        "generate_event_qr_code" => events::generate_event_qr_code(pool, caller, args).await,
        "mark_event_attendance" => events::mark_event_attendance(pool, caller, args).await,
        "join_challenge" => membership::join_challenge(pool, caller, args).await,
        "create_invite_code" => membership::create_invite_code(pool, caller, args).await,
        "redeem_invite_code" => membership::redeem_invite_code(pool, caller, args).await,
        _ => Err(RemoteError::capability_missing(&format!("public.{}", name))),
    }
}

async fn is_admin(pool: &SqlitePool, caller: &Caller, args: Args<'_>) -> RemoteResult {
    caller.require_user()?;
    let user_id = args.uuid("user_id")?;
    let role = roles::role_of(pool, user_id).await?;
    Ok(json!(role.is_some_and(|r| r.can_act_as(roles::Role::Admin))))
}
