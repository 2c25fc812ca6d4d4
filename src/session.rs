/// Session/authorization context
///
/// Owns the current identity, its session and the best-effort admin flag.
/// State lives in a single [`SessionSnapshot`] published over a `watch`
/// channel, so every transition is observed as one atomic replacement.
///
/// Three background tasks race to leave the initializing phase: the auth
/// event listener, the initial session fetch (with per-attempt timeout and
/// linear backoff) and the watchdog. Results carry a ticket taken when the
/// work started; a result older than the last applied one is dropped.
use crate::{
    auth::{normalize_email, AuthEvent, AuthService, Credentials, Identity, Session, SignUpProfile},
    config::SessionConfig,
    error::ClubResult,
    gateway::RpcGateway,
};
use serde_json::json;
use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long a sign-in/out waits for the auth listener before applying its own result
const AUTH_EVENT_GRACE: Duration = Duration::from_secs(1);

const CONNECTION_TIMEOUT_MESSAGE: &str =
    "Connection timed out. Please check your internet connection and refresh the page.";
const CONNECTION_FAILED_MESSAGE: &str =
    "Unable to reach the server. Please check your internet connection and try again.";

/// Lifecycle phase of the context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Initializing,
    Authenticated,
    Anonymous,
}

/// Everything a view needs to render session-dependent UI
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub identity: Option<Identity>,
    pub session: Option<Session>,
    /// UI affordance only; the server re-checks on every privileged call
    pub is_admin: bool,
    pub connection_error: Option<String>,
    /// Ticket of the last applied transition
    pub generation: u64,
}

impl SessionSnapshot {
    fn initializing() -> Self {
        Self {
            phase: SessionPhase::Initializing,
            identity: None,
            session: None,
            is_admin: false,
            connection_error: None,
            generation: 0,
        }
    }

    pub fn loading(&self) -> bool {
        self.phase == SessionPhase::Initializing
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Authenticated
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.identity.as_ref().map(|identity| identity.id)
    }
}

enum Transition {
    SignedIn(Session),
    SignedOut,
    ConnectionFailed(&'static str),
}

struct Inner {
    auth: Arc<dyn AuthService>,
    gateway: Arc<dyn RpcGateway>,
    config: SessionConfig,
    state: watch::Sender<SessionSnapshot>,
    tickets: AtomicU64,
    mounted: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Session/authorization context handle
pub struct SessionContext {
    inner: Arc<Inner>,
}

impl SessionContext {
    /// Start the context. Must be called from within a tokio runtime.
    pub fn start(
        auth: Arc<dyn AuthService>,
        gateway: Arc<dyn RpcGateway>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::initializing());
        let inner = Arc::new(Inner {
            auth,
            gateway,
            config,
            state,
            tickets: AtomicU64::new(0),
            mounted: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
        });

        // Subscribe before fetching so no change between the two is lost
        let events = inner.auth.subscribe();
        inner.spawn(Arc::clone(&inner).listen(events));
        inner.spawn(Arc::clone(&inner).initialize());
        inner.spawn(Arc::clone(&inner).watchdog());

        Self { inner }
    }

    /// Current state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every transition
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    /// Wait until the context has left the initializing phase
    pub async fn ready(&self) -> SessionSnapshot {
        let mut rx = self.inner.state.subscribe();
        let ready = rx.wait_for(|s| !s.loading()).await.map(|s| s.clone());
        // The sender lives as long as `self`, so the wait cannot fail
        ready.unwrap_or_else(|_| self.snapshot())
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        profile: SignUpProfile,
    ) -> ClubResult<()> {
        let credentials = Credentials::new(email, password)?;
        let profile = profile.checked()?;
        let start = self.snapshot().generation;

        if let Some(session) = self.inner.auth.sign_up(&credentials, &profile).await? {
            let user_id = session.user.id;
            self.settle(
                move |s| s.generation > start && s.user_id() == Some(user_id),
                Transition::SignedIn(session),
            )
            .await;
        }
        info!("Account created for {}", credentials.email);
        Ok(())
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> ClubResult<()> {
        let credentials = Credentials::new(email, password)?;
        let start = self.snapshot().generation;

        let session = self.inner.auth.sign_in_with_password(&credentials).await?;
        let user_id = session.user.id;
        self.settle(
            move |s| s.generation > start && s.is_authenticated() && s.user_id() == Some(user_id),
            Transition::SignedIn(session),
        )
        .await;
        Ok(())
    }

    /// Sign out. On success identity, session and admin flag are cleared in one step.
    pub async fn sign_out(&self) -> ClubResult<()> {
        let start = self.snapshot().generation;

        self.inner.auth.sign_out().await?;
        self.settle(
            move |s| s.generation > start && s.identity.is_none(),
            Transition::SignedOut,
        )
        .await;
        Ok(())
    }

    pub async fn reset_password(&self, email: &str) -> ClubResult<()> {
        let email = normalize_email(email)?;
        self.inner.auth.reset_password_for_email(&email).await?;
        info!("Password reset requested for {}", email);
        Ok(())
    }

    /// Stop all background work; no state is written afterwards
    pub fn shutdown(&self) {
        if self.inner.mounted.swap(false, Ordering::SeqCst) {
            if let Ok(mut tasks) = self.inner.tasks.lock() {
                for task in tasks.drain(..) {
                    task.abort();
                }
            }
            debug!("Session context shut down");
        }
    }

    /// Let the auth listener publish the outcome of a user action so that it is
    /// ordered after any event already queued; apply it directly if the
    /// listener stays silent.
    async fn settle<P>(&self, observed: P, transition: Transition)
    where
        P: Fn(&SessionSnapshot) -> bool,
    {
        let mut rx = self.inner.state.subscribe();
        let seen = matches!(
            timeout(AUTH_EVENT_GRACE, rx.wait_for(|s| observed(s))).await,
            Ok(Ok(_))
        );

        if !seen {
            let ticket = self.inner.issue();
            self.inner.apply(ticket, transition);
        }
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn is_initializing(&self) -> bool {
        self.state.borrow().loading()
    }

    fn issue(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_mounted() {
            return;
        }

        let handle = tokio::spawn(future);
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|task| !task.is_finished());
            tasks.push(handle);
        }
    }

    /// Apply a transition if it is not stale. Returns whether state changed.
    fn apply(self: &Arc<Self>, ticket: u64, transition: Transition) -> bool {
        if !self.is_mounted() {
            return false;
        }

        let mut admin_check = None;
        let gateway = &self.gateway;

        let applied = self.state.send_if_modified(|snap| {
            if ticket < snap.generation {
                debug!(ticket, generation = snap.generation, "Dropping stale session result");
                return false;
            }

            match transition {
                Transition::SignedIn(session) => {
                    let same_identity = snap.user_id() == Some(session.user.id);
                    if !same_identity {
                        admin_check = Some(session.user.id);
                    }
                    gateway.set_access_token(Some(session.access_token.clone()));
                    *snap = SessionSnapshot {
                        phase: SessionPhase::Authenticated,
                        identity: Some(session.user.clone()),
                        session: Some(session),
                        is_admin: same_identity && snap.is_admin,
                        connection_error: None,
                        generation: ticket,
                    };
                }
                Transition::SignedOut => {
                    gateway.set_access_token(None);
                    *snap = SessionSnapshot {
                        phase: SessionPhase::Anonymous,
                        identity: None,
                        session: None,
                        is_admin: false,
                        connection_error: None,
                        generation: ticket,
                    };
                }
                Transition::ConnectionFailed(message) => {
                    // Only the initializing phase can fail to connect
                    if snap.phase != SessionPhase::Initializing {
                        return false;
                    }
                    gateway.set_access_token(None);
                    *snap = SessionSnapshot {
                        phase: SessionPhase::Anonymous,
                        identity: None,
                        session: None,
                        is_admin: false,
                        connection_error: Some(message.to_string()),
                        generation: ticket,
                    };
                }
            }
            true
        });

        if applied {
            let snap = self.state.borrow().clone();
            match snap.user_id() {
                Some(user_id) => info!("Session authenticated as {}", user_id),
                None => info!("Session anonymous"),
            }
        }

        if let Some(user_id) = admin_check.filter(|_| applied) {
            self.spawn(Arc::clone(self).check_admin(user_id));
        }

        applied
    }

    async fn listen(self: Arc<Self>, mut events: broadcast::Receiver<AuthEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let ticket = self.issue();
                    let transition = match event {
                        AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => {
                            Transition::SignedIn(session)
                        }
                        AuthEvent::SignedOut => Transition::SignedOut,
                    };
                    self.apply(ticket, transition);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Auth listener missed {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Auth event stream closed");
                    return;
                }
            }
        }
    }

    async fn initialize(self: Arc<Self>) {
        let attempts = self.config.max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            if !self.is_initializing() {
                return;
            }

            let ticket = self.issue();
            match timeout(self.config.fetch_timeout, self.auth.get_session()).await {
                Ok(Ok(Some(session))) => {
                    self.apply(ticket, Transition::SignedIn(session));
                    return;
                }
                Ok(Ok(None)) => {
                    self.apply(ticket, Transition::SignedOut);
                    return;
                }
                Ok(Err(e)) => {
                    warn!("Session fetch attempt {}/{} failed: {}", attempt, attempts, e);
                }
                Err(_) => {
                    warn!(
                        "Session fetch attempt {}/{} timed out after {:?}",
                        attempt, attempts, self.config.fetch_timeout
                    );
                }
            }

            if attempt < attempts {
                sleep(self.config.retry_step.saturating_mul(attempt)).await;
            }
        }

        let ticket = self.issue();
        if self.apply(ticket, Transition::ConnectionFailed(CONNECTION_FAILED_MESSAGE)) {
            error!("Session initialization failed after {} attempts", attempts);
        }
    }

    async fn watchdog(self: Arc<Self>) {
        sleep(self.config.watchdog_timeout).await;

        if !self.is_initializing() {
            return;
        }

        let ticket = self.issue();
        if self.apply(ticket, Transition::ConnectionFailed(CONNECTION_TIMEOUT_MESSAGE)) {
            error!(
                "Session still initializing after {:?}; giving up",
                self.config.watchdog_timeout
            );
        }
    }

    /// Resolve the admin flag; any failure leaves it false
    async fn check_admin(self: Arc<Self>, user_id: Uuid) {
        let call = self.gateway.rpc("is_admin", json!({ "user_id": user_id }));

        let is_admin = match timeout(self.config.admin_check_timeout, call).await {
            Ok(Ok(value)) => value.as_bool().unwrap_or(false),
            Ok(Err(e)) => {
                debug!("Admin check failed for {}: {}", user_id, e);
                false
            }
            Err(_) => {
                debug!("Admin check for {} timed out", user_id);
                false
            }
        };

        if !is_admin || !self.is_mounted() {
            return;
        }

        let updated = self.state.send_if_modified(|snap| {
            let current = snap.is_authenticated() && snap.user_id() == Some(user_id);
            if current && !snap.is_admin {
                snap.is_admin = true;
                true
            } else {
                false
            }
        });

        if updated {
            info!("Admin privileges detected for {}", user_id);
        }
    }
}
