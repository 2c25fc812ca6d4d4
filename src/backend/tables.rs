/// Policy-checked table access for the embedded backend
///
/// Only whitelisted tables are reachable through the gateway's table path.
/// Each table declares its columns and who may read, insert and update it,
/// playing the part of row-level security.
use super::{roles::Role, Caller};
use crate::{
    error::{RemoteError, UNDEFINED_TABLE},
    gateway::{Filter, Order, TableQuery},
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqliteArguments, SqliteRow},
    query::Query,
    Row, Sqlite, SqlitePool,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnType {
    Text,
    Integer,
    Timestamp,
    Json,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

const fn text(name: &'static str) -> Column {
    Column { name, ty: ColumnType::Text }
}

const fn int(name: &'static str) -> Column {
    Column { name, ty: ColumnType::Integer }
}

const fn ts(name: &'static str) -> Column {
    Column { name, ty: ColumnType::Timestamp }
}

const fn json(name: &'static str) -> Column {
    Column { name, ty: ColumnType::Json }
}

/// Who may perform an operation on a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Public,
    Authenticated,
    /// Rows whose owner column is the caller; staff see every row
    Owner,
    Staff(Role),
    Denied,
}

#[derive(Debug)]
pub(crate) struct TablePolicy {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub read: Access,
    pub insert: Access,
    pub update: Access,
    pub owner_column: Option<&'static str>,
    /// Hidden from callers below admin
    pub private_columns: &'static [&'static str],
    /// Never written through the table path
    pub readonly_columns: &'static [&'static str],
    /// Extra predicate every table-path update must satisfy
    pub update_guard: Option<&'static str>,
    /// `(by, at)` columns stamped with the caller and the current time on update
    pub reviewer_stamp: Option<(&'static str, &'static str)>,
}

impl TablePolicy {
    fn column(&self, name: &str) -> Result<&Column, RemoteError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                RemoteError::new(
                    "42703",
                    format!("column {}.{} does not exist", self.name, name),
                )
            })
    }
}

const POLICIES: &[TablePolicy] = &[
    TablePolicy {
        name: "organizations",
        columns: &[text("id"), text("name"), text("slug"), ts("created_at")],
        read: Access::Public,
        insert: Access::Staff(Role::Admin),
        update: Access::Staff(Role::Admin),
        owner_column: None,
        private_columns: &[],
        readonly_columns: &["id", "created_at"],
        update_guard: None,
        reviewer_stamp: None,
    },
    TablePolicy {
        name: "organization_members",
        columns: &[text("organization_id"), text("user_id"), text("role"), ts("joined_at")],
        read: Access::Owner,
        insert: Access::Staff(Role::Admin),
        update: Access::Staff(Role::Admin),
        owner_column: Some("user_id"),
        private_columns: &[],
        readonly_columns: &["organization_id", "user_id", "joined_at"],
        update_guard: None,
        reviewer_stamp: None,
    },
    TablePolicy {
        name: "posts",
        columns: &[
            text("id"),
            text("organization_id"),
            text("author_id"),
            text("content"),
            text("status"),
            ts("created_at"),
        ],
        read: Access::Public,
        insert: Access::Owner,
        update: Access::Denied,
        owner_column: Some("author_id"),
        private_columns: &[],
        readonly_columns: &["id", "status", "created_at"],
        update_guard: None,
        reviewer_stamp: None,
    },
    TablePolicy {
        name: "comments",
        columns: &[
            text("id"),
            text("post_id"),
            text("author_id"),
            text("content"),
            text("status"),
            ts("created_at"),
        ],
        read: Access::Public,
        insert: Access::Owner,
        update: Access::Denied,
        owner_column: Some("author_id"),
        private_columns: &[],
        readonly_columns: &["id", "status", "created_at"],
        update_guard: None,
        reviewer_stamp: None,
    },
    TablePolicy {
        name: "content_reports",
        columns: &[
            text("id"),
            text("reporter_id"),
            text("reported_content_id"),
            text("reported_content_type"),
            text("reason"),
            text("description"),
            text("status"),
            text("reviewed_by"),
            ts("reviewed_at"),
            text("resolution_notes"),
            ts("created_at"),
        ],
        read: Access::Owner,
        insert: Access::Denied,
        update: Access::Staff(Role::Moderator),
        owner_column: Some("reporter_id"),
        private_columns: &[],
        readonly_columns: &[
            "id",
            "reporter_id",
            "reported_content_id",
            "reported_content_type",
            "reason",
            "description",
            "reviewed_by",
            "reviewed_at",
            "created_at",
        ],
        update_guard: Some("status = 'pending'"),
        reviewer_stamp: Some(("reviewed_by", "reviewed_at")),
    },
    TablePolicy {
        name: "content_moderation_log",
        columns: &[
            text("id"),
            text("content_id"),
            text("content_type"),
            text("previous_status"),
            text("new_status"),
            text("moderator_id"),
            text("reason"),
            text("report_id"),
            ts("created_at"),
        ],
        read: Access::Staff(Role::Moderator),
        insert: Access::Denied,
        update: Access::Denied,
        owner_column: None,
        private_columns: &[],
        readonly_columns: &[],
        update_guard: None,
        reviewer_stamp: None,
    },
    TablePolicy {
        name: "events",
        columns: &[
            text("id"),
            text("organization_id"),
            text("title"),
            text("description"),
            text("location"),
            ts("start_time"),
            ts("end_time"),
            text("status"),
            int("max_capacity"),
            int("current_capacity"),
            int("price_cents"),
            text("currency"),
            text("qr_code_token"),
            text("created_by"),
            ts("created_at"),
        ],
        read: Access::Public,
        insert: Access::Staff(Role::Admin),
        update: Access::Staff(Role::Admin),
        owner_column: None,
        private_columns: &["qr_code_token"],
        readonly_columns: &["id", "organization_id", "current_capacity", "qr_code_token", "created_at"],
        update_guard: None,
        reviewer_stamp: None,
    },
    TablePolicy {
        name: "event_registrations",
        columns: &[text("id"), text("event_id"), text("user_id"), ts("created_at")],
        read: Access::Owner,
        insert: Access::Denied,
        update: Access::Denied,
        owner_column: Some("user_id"),
        private_columns: &[],
        readonly_columns: &[],
        update_guard: None,
        reviewer_stamp: None,
    },
    TablePolicy {
        name: "event_attendance",
        columns: &[text("id"), text("event_id"), text("user_id"), ts("attended_at")],
        read: Access::Owner,
        insert: Access::Denied,
        update: Access::Denied,
        owner_column: Some("user_id"),
        private_columns: &[],
        readonly_columns: &[],
        update_guard: None,
        reviewer_stamp: None,
    },
    TablePolicy {
        name: "challenges",
        columns: &[
            text("id"),
            text("organization_id"),
            text("title"),
            text("description"),
            text("status"),
            int("points_reward"),
            int("winner_reward_points"),
            int("runner_up_reward_points"),
            int("participation_reward_points"),
            ts("start_date"),
            ts("end_date"),
            text("created_by"),
            ts("created_at"),
        ],
        read: Access::Authenticated,
        insert: Access::Staff(Role::Admin),
        update: Access::Staff(Role::Admin),
        owner_column: None,
        private_columns: &[],
        readonly_columns: &["id", "organization_id", "created_at"],
        update_guard: None,
        reviewer_stamp: None,
    },
    TablePolicy {
        name: "challenge_participations",
        columns: &[text("id"), text("challenge_id"), text("user_id"), ts("joined_at")],
        read: Access::Authenticated,
        insert: Access::Denied,
        update: Access::Denied,
        owner_column: None,
        private_columns: &[],
        readonly_columns: &[],
        update_guard: None,
        reviewer_stamp: None,
    },
    TablePolicy {
        name: "notifications",
        columns: &[
            text("id"),
            text("organization_id"),
            text("recipient_id"),
            text("title"),
            text("message"),
            text("type"),
            ts("read_at"),
            text("created_by"),
            ts("created_at"),
        ],
        read: Access::Owner,
        insert: Access::Staff(Role::Admin),
        update: Access::Owner,
        owner_column: Some("recipient_id"),
        private_columns: &[],
        readonly_columns: &[
            "id",
            "organization_id",
            "recipient_id",
            "title",
            "message",
            "type",
            "created_by",
            "created_at",
        ],
        update_guard: None,
        reviewer_stamp: None,
    },
    TablePolicy {
        name: "admin_actions",
        columns: &[
            text("id"),
            text("admin_id"),
            text("action"),
            text("target_type"),
            text("target_id"),
            json("details"),
            ts("created_at"),
        ],
        read: Access::Staff(Role::Admin),
        insert: Access::Denied,
        update: Access::Denied,
        owner_column: None,
        private_columns: &[],
        readonly_columns: &[],
        update_guard: None,
        reviewer_stamp: None,
    },
    TablePolicy {
        name: "invite_codes",
        columns: &[
            text("id"),
            text("code"),
            text("organization_id"),
            text("created_by"),
            int("max_uses"),
            int("uses"),
            ts("expires_at"),
            ts("created_at"),
        ],
        read: Access::Staff(Role::Admin),
        insert: Access::Denied,
        update: Access::Staff(Role::Admin),
        owner_column: None,
        private_columns: &[],
        readonly_columns: &["id", "code", "organization_id", "created_by", "uses", "created_at"],
        update_guard: None,
        reviewer_stamp: None,
    },
];

pub(crate) fn policy(table: &str) -> Result<&'static TablePolicy, RemoteError> {
    POLICIES
        .iter()
        .find(|p| p.name == table)
        .ok_or_else(|| {
            RemoteError::new(UNDEFINED_TABLE, format!("relation public.{} does not exist", table))
        })
}

/// Row scope granted to a caller
enum Scope {
    All,
    OwnedBy(Uuid),
}

fn authorize(
    policy: &TablePolicy,
    access: Access,
    caller: &Caller,
    operation: &str,
) -> Result<Scope, RemoteError> {
    let denied = || {
        RemoteError::permission_denied(format!(
            "permission denied to {} table {}",
            operation, policy.name
        ))
    };

    match access {
        Access::Public => Ok(Scope::All),
        Access::Authenticated => caller.user_id.map(|_| Scope::All).ok_or_else(denied),
        Access::Owner if caller.has_role(Role::Moderator) => Ok(Scope::All),
        Access::Owner => match (caller.user_id, policy.owner_column) {
            (Some(user_id), Some(_)) => Ok(Scope::OwnedBy(user_id)),
            _ => Err(denied()),
        },
        Access::Staff(role) if caller.has_role(role) => Ok(Scope::All),
        Access::Staff(_) | Access::Denied => Err(denied()),
    }
}

/// Value bound into a statement
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Canonical stored form of a timestamp (fixed width, so text order is time order)
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now() -> String {
    timestamp(Utc::now())
}

fn invalid_value(column: &Column, value: &Value) -> RemoteError {
    RemoteError::new(
        "22P02",
        format!("invalid input for column {}: {}", column.name, value),
    )
}

pub(crate) fn to_sql(column: &Column, value: &Value) -> Result<SqlValue, RemoteError> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    match column.ty {
        ColumnType::Text => match value {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Number(_) | Value::Bool(_) => Ok(SqlValue::Text(value.to_string())),
            _ => Err(invalid_value(column, value)),
        },
        ColumnType::Integer => match value {
            Value::Number(n) => n.as_i64().map(SqlValue::Integer),
            Value::Bool(b) => Some(SqlValue::Integer(i64::from(*b))),
            Value::String(s) => s.trim().parse().ok().map(SqlValue::Integer),
            _ => None,
        }
        .ok_or_else(|| invalid_value(column, value)),
        ColumnType::Timestamp => value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|at| SqlValue::Text(timestamp(at.with_timezone(&Utc))))
            .ok_or_else(|| invalid_value(column, value)),
        ColumnType::Json => Ok(SqlValue::Text(value.to_string())),
    }
}

pub(crate) fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &[SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Integer(i) => query.bind(*i),
        };
    }
    query
}

pub(crate) fn row_to_json(row: &SqliteRow, columns: &[&Column]) -> Result<Value, RemoteError> {
    let mut object = Map::new();
    for column in columns {
        let value = match column.ty {
            ColumnType::Text | ColumnType::Timestamp => row
                .try_get::<Option<String>, _>(column.name)?
                .map(Value::String)
                .unwrap_or(Value::Null),
            ColumnType::Integer => row
                .try_get::<Option<i64>, _>(column.name)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            ColumnType::Json => match row.try_get::<Option<String>, _>(column.name)? {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| RemoteError::new("XX000", format!("corrupt json column: {}", e)))?,
                None => Value::Null,
            },
        };
        object.insert(column.name.to_string(), value);
    }
    Ok(Value::Object(object))
}

/// Columns a caller may see
fn visible_columns<'p>(policy: &'p TablePolicy, caller: &Caller) -> Vec<&'p Column> {
    let privileged = caller.has_role(Role::Admin);
    policy
        .columns
        .iter()
        .filter(|c| privileged || !policy.private_columns.contains(&c.name))
        .collect()
}

fn where_clause(
    policy: &TablePolicy,
    filters: &[Filter],
    scope: &Scope,
    binds: &mut Vec<SqlValue>,
) -> Result<Vec<String>, RemoteError> {
    let mut predicates = Vec::new();

    for filter in filters {
        let column = policy.column(filter.column())?;
        match filter {
            Filter::Eq(_, value) => {
                predicates.push(format!("{} = ?", column.name));
                binds.push(to_sql(column, value)?);
            }
            Filter::In(_, values) if values.is_empty() => predicates.push("0 = 1".to_string()),
            Filter::In(_, values) => {
                let placeholders = vec!["?"; values.len()].join(", ");
                predicates.push(format!("{} IN ({})", column.name, placeholders));
                for value in values {
                    binds.push(to_sql(column, value)?);
                }
            }
            Filter::IsNull(_) => predicates.push(format!("{} IS NULL", column.name)),
        }
    }

    if let (Scope::OwnedBy(user_id), Some(owner)) = (scope, policy.owner_column) {
        predicates.push(format!("{} = ?", owner));
        binds.push(SqlValue::from(*user_id));
    }

    Ok(predicates)
}

pub(crate) async fn select(
    pool: &SqlitePool,
    caller: &Caller,
    query: &TableQuery,
) -> Result<Value, RemoteError> {
    let policy = policy(&query.table)?;
    let scope = authorize(policy, policy.read, caller, "read")?;
    let visible = visible_columns(policy, caller);

    let columns: Vec<&Column> = match &query.columns {
        Some(requested) => requested
            .iter()
            .map(|name| -> Result<&'static Column, RemoteError> {
                let column = policy.column(name)?;
                if !visible.iter().any(|c| c.name == column.name) {
                    return Err(RemoteError::permission_denied(format!(
                        "permission denied for column {}",
                        name
                    )));
                }
                Ok(column)
            })
            .collect::<Result<_, _>>()?,
        None => visible,
    };

    let mut binds = Vec::new();
    let predicates = where_clause(policy, &query.filters, &scope, &mut binds)?;

    let mut sql = format!(
        "SELECT {} FROM {}",
        columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", "),
        policy.name
    );
    if !predicates.is_empty() {
        sql.push_str(&format!(" WHERE {}", predicates.join(" AND ")));
    }
    if let Some((column, order)) = &query.order {
        let column = policy.column(column)?;
        let direction = match order {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        };
        sql.push_str(&format!(" ORDER BY {} {}", column.name, direction));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let rows = bind_all(sqlx::query(&sql), &binds).fetch_all(pool).await?;
    let rows = rows
        .iter()
        .map(|row| row_to_json(row, &columns))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Value::Array(rows))
}

pub(crate) async fn insert(
    pool: &SqlitePool,
    caller: &Caller,
    table: &str,
    row: Value,
) -> Result<Value, RemoteError> {
    let policy = policy(table)?;
    let scope = authorize(policy, policy.insert, caller, "insert into")?;

    let Value::Object(mut row) = row else {
        return Err(RemoteError::new("PGRST102", "insert body must be a JSON object"));
    };

    let has_id = policy.columns.iter().any(|c| c.name == "id");
    if has_id {
        row.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    }
    for column in policy.columns.iter().filter(|c| c.name == "created_at" || c.name == "joined_at") {
        row.entry(column.name).or_insert_with(|| Value::String(now()));
    }
    if let (Scope::OwnedBy(user_id), Some(owner)) = (&scope, policy.owner_column) {
        match row.get(owner).and_then(Value::as_str) {
            None => {
                row.insert(owner.to_string(), Value::String(user_id.to_string()));
            }
            Some(value) if value == user_id.to_string() => {}
            Some(_) => {
                return Err(RemoteError::permission_denied(format!(
                    "new row violates row-level security policy for table {}",
                    policy.name
                )))
            }
        }
    }

    let mut names = Vec::new();
    let mut binds = Vec::new();
    for (name, value) in &row {
        let column = policy.column(name)?;
        names.push(column.name);
        binds.push(to_sql(column, value)?);
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        policy.name,
        names.join(", "),
        vec!["?"; names.len()].join(", ")
    );
    bind_all(sqlx::query(&sql), &binds).execute(pool).await?;

    let key = match (has_id, row.get("id")) {
        (true, Some(id)) => Filter::Eq("id".to_string(), id.clone()),
        _ => return Ok(Value::Object(row)),
    };
    let mut inserted = TableQuery::from(policy.name);
    inserted.filters.push(key);
    let rows = select(pool, &Caller::system(), &inserted).await?;

    let visible = visible_columns(policy, caller);
    first_row(rows).map(|row| retain_columns(row, &visible))
}

pub(crate) async fn update(
    pool: &SqlitePool,
    caller: &Caller,
    query: &TableQuery,
    patch: Value,
) -> Result<Value, RemoteError> {
    let policy = policy(&query.table)?;
    let scope = authorize(policy, policy.update, caller, "update")?;

    if query.filters.is_empty() {
        return Err(RemoteError::new("21000", "UPDATE requires a WHERE clause"));
    }
    let Value::Object(patch) = patch else {
        return Err(RemoteError::new("PGRST102", "update body must be a JSON object"));
    };
    if patch.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }

    let mut assignments = Vec::new();
    let mut binds = Vec::new();
    for (name, value) in &patch {
        let column = policy.column(name)?;
        if policy.readonly_columns.contains(&column.name) {
            return Err(RemoteError::permission_denied(format!(
                "column {} of table {} cannot be updated",
                column.name, policy.name
            )));
        }
        assignments.push(format!("{} = ?", column.name));
        binds.push(to_sql(column, value)?);
    }

    if let Some((by, at)) = policy.reviewer_stamp {
        let reviewer = caller
            .user_id
            .ok_or_else(|| RemoteError::permission_denied("reviewer must be signed in"))?;
        assignments.push(format!("{} = ?", by));
        binds.push(SqlValue::Text(reviewer.to_string()));
        assignments.push(format!("{} = ?", at));
        binds.push(SqlValue::Text(now()));
    }

    let mut predicates = where_clause(policy, &query.filters, &scope, &mut binds)?;
    if let Some(guard) = policy.update_guard {
        predicates.push(guard.to_string());
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {} RETURNING id",
        policy.name,
        assignments.join(", "),
        predicates.join(" AND ")
    );
    let updated = bind_all(sqlx::query(&sql), &binds).fetch_all(pool).await?;
    let ids = updated
        .iter()
        .map(|row| row.try_get::<String, _>("id").map(Value::String))
        .collect::<Result<Vec<_>, _>>()?;

    if ids.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    select(pool, caller, &TableQuery::from(policy.name).in_list("id", ids)).await
}

fn first_row(rows: Value) -> Result<Value, RemoteError> {
    match rows {
        Value::Array(mut rows) if !rows.is_empty() => Ok(rows.swap_remove(0)),
        _ => Err(RemoteError::new("PGRST116", "inserted row could not be read back")),
    }
}

fn retain_columns(row: Value, visible: &[&Column]) -> Value {
    match row {
        Value::Object(mut object) => {
            object.retain(|name, _| visible.iter().any(|c| c.name == name));
            Value::Object(object)
        }
        other => other,
    }
}
