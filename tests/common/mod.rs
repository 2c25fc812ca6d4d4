//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use humbl_club::{
    auth::{AuthEvent, AuthService, Credentials, Identity, Session, SignUpProfile},
    error::{ClubError, ClubResult, RemoteError, NETWORK},
    gateway::{RemoteResult, RpcGateway, TableQuery},
    ClubContext, LocalBackend, Role,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const PASSWORD: &str = "correct-horse";

pub fn session_for(user_id: Uuid) -> Session {
    Session {
        access_token: format!("token-{}", Uuid::new_v4()),
        refresh_token: Some(format!("refresh-{}", Uuid::new_v4())),
        expires_at: Utc::now() + ChronoDuration::hours(1),
        user: Identity {
            id: user_id,
            email: Some(format!("{}@example.com", user_id.simple())),
        },
    }
}

/// Scripted answer to one `get_session` call
#[derive(Debug, Clone)]
pub enum Fetch {
    /// Never resolves
    Hang,
    /// Fails immediately with a network error
    Fail,
    Return(Option<Session>),
    /// Resolves after a delay
    After(Duration, Option<Session>),
}

/// Auth service whose answers are scripted per call
pub struct ScriptedAuth {
    fetches: Mutex<VecDeque<Fetch>>,
    users: Mutex<HashMap<String, Uuid>>,
    announce: bool,
    events: broadcast::Sender<AuthEvent>,
    pub fetch_calls: AtomicUsize,
}

impl ScriptedAuth {
    /// `announce` controls whether sign-in/out emit auth events
    pub fn new(fetches: Vec<Fetch>, announce: bool) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            fetches: Mutex::new(fetches.into()),
            users: Mutex::new(HashMap::new()),
            announce,
            events,
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    pub fn user_id(&self, email: &str) -> Uuid {
        *self
            .users
            .lock()
            .unwrap()
            .entry(email.to_lowercase())
            .or_insert_with(Uuid::new_v4)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthService for ScriptedAuth {
    async fn get_session(&self) -> ClubResult<Option<Session>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.fetches.lock().unwrap().pop_front();
        match next.unwrap_or(Fetch::Return(None)) {
            Fetch::Hang => std::future::pending().await,
            Fetch::Fail => Err(ClubError::Remote(RemoteError::new(NETWORK, "connection refused"))),
            Fetch::Return(session) => Ok(session),
            Fetch::After(delay, session) => {
                tokio::time::sleep(delay).await;
                Ok(session)
            }
        }
    }

    async fn sign_up(
        &self,
        credentials: &Credentials,
        _profile: &SignUpProfile,
    ) -> ClubResult<Option<Session>> {
        let session = session_for(self.user_id(&credentials.email));
        if self.announce {
            self.emit(AuthEvent::SignedIn(session.clone()));
        }
        Ok(Some(session))
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> ClubResult<Session> {
        let session = session_for(self.user_id(&credentials.email));
        if self.announce {
            self.emit(AuthEvent::SignedIn(session.clone()));
        }
        Ok(session)
    }

    async fn sign_out(&self) -> ClubResult<()> {
        if self.announce {
            self.emit(AuthEvent::SignedOut);
        }
        Ok(())
    }

    async fn reset_password_for_email(&self, _email: &str) -> ClubResult<()> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

/// Gateway that records calls and answers from a script
#[derive(Default)]
pub struct ScriptedGateway {
    admins: Mutex<HashMap<Uuid, (Duration, bool)>>,
    replies: Mutex<HashMap<String, RemoteResult>>,
    calls: Mutex<Vec<(String, Value)>>,
    sent_tokens: Mutex<Vec<(String, Option<String>)>>,
    token: Mutex<Option<String>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `is_admin` for `user_id` with `flag` after `delay`
    pub fn set_admin(&self, user_id: Uuid, delay: Duration, flag: bool) {
        self.admins.lock().unwrap().insert(user_id, (delay, flag));
    }

    pub fn reply(&self, name: &str, result: RemoteResult) {
        self.replies.lock().unwrap().insert(name.to_string(), result);
    }

    pub fn calls_to(&self, name: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    /// Bearer tokens passed explicitly to calls of `name`
    pub fn tokens_sent_to(&self, name: &str) -> Vec<Option<String>> {
        self.sent_tokens
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, token)| token.clone())
            .collect()
    }

    fn record(&self, name: &str, args: Value) {
        self.calls.lock().unwrap().push((name.to_string(), args));
    }
}

#[async_trait]
impl RpcGateway for ScriptedGateway {
    async fn rpc(&self, name: &str, args: Value) -> RemoteResult {
        self.record(name, args.clone());

        if name == "is_admin" {
            if let Some(reply) = self.replies.lock().unwrap().get(name).cloned() {
                return reply;
            }
            let user_id = args["user_id"]
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok());
            let answer = user_id.and_then(|id| self.admins.lock().unwrap().get(&id).copied());
            let (delay, flag) = answer.unwrap_or((Duration::ZERO, false));
            tokio::time::sleep(delay).await;
            return Ok(json!(flag));
        }

        self.replies
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| Err(RemoteError::capability_missing(name)))
    }

    async fn rpc_with_token(&self, token: Option<&str>, name: &str, args: Value) -> RemoteResult {
        self.sent_tokens
            .lock()
            .unwrap()
            .push((name.to_string(), token.map(str::to_string)));
        self.rpc(name, args).await
    }

    async fn select(&self, query: &TableQuery) -> RemoteResult {
        self.record(&format!("select:{}", query.table), Value::Null);
        Ok(json!([]))
    }

    async fn insert(&self, table: &str, row: Value) -> RemoteResult {
        self.record(&format!("insert:{}", table), row.clone());
        Ok(row)
    }

    async fn update(&self, query: &TableQuery, patch: Value) -> RemoteResult {
        self.record(&format!("update:{}", query.table), patch);
        Ok(json!([]))
    }

    async fn invoke_function(&self, name: &str, body: Option<Value>) -> RemoteResult {
        self.rpc(&format!("fn:{}", name), body.unwrap_or(Value::Null)).await
    }

    fn set_access_token(&self, token: Option<String>) {
        *self.token.lock().unwrap() = token;
    }

    fn access_token(&self) -> Option<String> {
        self.token()
    }
}

pub async fn local_backend() -> LocalBackend {
    LocalBackend::open_in_memory()
        .await
        .expect("embedded backend should open")
}

/// Create an account and return its id
pub async fn create_user(backend: &LocalBackend, email: &str, role: Option<Role>) -> Uuid {
    let client = backend.client();
    let credentials = Credentials::new(email, PASSWORD).unwrap();
    let profile = SignUpProfile {
        full_name: email.split('@').next().unwrap_or("member").to_string(),
        ..Default::default()
    };
    let session = client
        .sign_up(&credentials, &profile)
        .await
        .expect("sign up should succeed")
        .expect("local sign up returns a session");

    if let Some(role) = role {
        backend.grant_role(session.user.id, role).await.unwrap();
    }
    session.user.id
}

/// Context signed in as `email`, with the admin flag settled
pub async fn signed_in(backend: &LocalBackend, email: &str, role: Option<Role>) -> (ClubContext, Uuid) {
    let user_id = create_user(backend, email, role).await;
    let ctx = ClubContext::local(backend).unwrap();
    ctx.session.ready().await;
    ctx.session.sign_in(email, PASSWORD).await.unwrap();

    let mut rx = ctx.session.subscribe();
    let expect_admin = role.is_some_and(|r| r.can_act_as(Role::Admin));
    tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.user_id() == Some(user_id) && s.is_admin == expect_admin),
    )
    .await
    .expect("session should settle")
    .unwrap();

    (ctx, user_id)
}
