/// Session context timing and ordering tests
///
/// These run on paused tokio time, so the fetch timeout, retry backoff and
/// watchdog are exercised without real waiting.
mod common;

use common::{session_for, Fetch, ScriptedAuth, ScriptedGateway};
use humbl_club::{
    auth::{AuthEvent, SignUpProfile},
    config::SessionConfig,
    error::{ErrorKind, RemoteError},
    SessionContext, SessionPhase,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

fn start(auth: &Arc<ScriptedAuth>, gateway: &Arc<ScriptedGateway>) -> SessionContext {
    start_with(auth, gateway, SessionConfig::default())
}

fn start_with(
    auth: &Arc<ScriptedAuth>,
    gateway: &Arc<ScriptedGateway>,
    config: SessionConfig,
) -> SessionContext {
    SessionContext::start(auth.clone(), gateway.clone(), config)
}

#[tokio::test(start_paused = true)]
async fn test_hanging_fetch_leaves_initializing_at_watchdog() {
    let auth = Arc::new(ScriptedAuth::new(vec![Fetch::Hang, Fetch::Hang, Fetch::Hang], true));
    let gateway = Arc::new(ScriptedGateway::new());
    let ctx = start(&auth, &gateway);

    sleep(Duration::from_millis(9_900)).await;
    assert!(ctx.snapshot().loading());

    sleep(Duration::from_millis(200)).await;
    let snap = ctx.snapshot();
    assert_eq!(snap.phase, SessionPhase::Anonymous);
    assert!(snap.identity.is_none());
    assert!(!snap.is_admin);
    let message = snap.connection_error.expect("connection error should be set");
    assert!(message.contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_fetch_times_out_at_ten_seconds() {
    let auth = Arc::new(ScriptedAuth::new(
        vec![
            Fetch::After(Duration::from_secs(9), Some(session_for(Uuid::new_v4()))),
            Fetch::Hang,
        ],
        true,
    ));
    let gateway = Arc::new(ScriptedGateway::new());
    let started = Instant::now();
    let ctx = start(&auth, &gateway);

    sleep(Duration::from_millis(9_500)).await;
    let snap = ctx.snapshot();
    assert!(snap.loading());
    assert!(snap.connection_error.is_none());

    let snap = ctx.ready().await;
    assert!(snap.connection_error.is_some());
    assert!(snap.identity.is_none());
    assert_eq!(started.elapsed().as_secs(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_connection_error_applied_once() {
    let auth = Arc::new(ScriptedAuth::new(
        vec![Fetch::Hang, Fetch::Hang, Fetch::Hang, Fetch::Hang],
        true,
    ));
    let gateway = Arc::new(ScriptedGateway::new());
    let ctx = start(&auth, &gateway);

    let ready = ctx.ready().await;
    assert!(ready.connection_error.is_some());

    // Let every remaining attempt time out; none may publish a second error
    sleep(Duration::from_secs(60)).await;
    let later = ctx.snapshot();
    assert_eq!(later.generation, ready.generation);
    assert_eq!(later.connection_error, ready.connection_error);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_retries_with_linear_backoff() {
    let user_id = Uuid::new_v4();
    let auth = Arc::new(ScriptedAuth::new(
        vec![Fetch::Fail, Fetch::Fail, Fetch::Return(Some(session_for(user_id)))],
        true,
    ));
    let gateway = Arc::new(ScriptedGateway::new());
    let ctx = start(&auth, &gateway);

    // Attempts at 0s, 2s and 6s
    sleep(Duration::from_millis(5_900)).await;
    assert!(ctx.snapshot().loading());
    assert_eq!(auth.fetch_calls(), 2);

    sleep(Duration::from_millis(200)).await;
    let snap = ctx.snapshot();
    assert_eq!(snap.phase, SessionPhase::Authenticated);
    assert_eq!(snap.user_id(), Some(user_id));
    assert!(snap.connection_error.is_none());
    assert_eq!(auth.fetch_calls(), 3);
    assert!(gateway.token().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_report_connection_failure() {
    let auth = Arc::new(ScriptedAuth::new(
        vec![Fetch::Fail, Fetch::Fail, Fetch::Fail, Fetch::Fail],
        true,
    ));
    let gateway = Arc::new(ScriptedGateway::new());
    let config = SessionConfig {
        watchdog_timeout: Duration::from_secs(60),
        ..SessionConfig::default()
    };
    let ctx = start_with(&auth, &gateway, config);

    let snap = ctx.ready().await;
    assert_eq!(snap.phase, SessionPhase::Anonymous);
    assert!(snap
        .connection_error
        .as_deref()
        .is_some_and(|m| m.contains("Unable to reach")));
    assert_eq!(auth.fetch_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_stale_fetch_result_is_dropped() {
    let user_id = Uuid::new_v4();
    let auth = Arc::new(ScriptedAuth::new(
        vec![Fetch::After(Duration::from_secs(3), Some(session_for(user_id)))],
        true,
    ));
    let gateway = Arc::new(ScriptedGateway::new());
    let ctx = start(&auth, &gateway);

    // Fetch started first, the sign-out event arrives while it is in flight
    sleep(Duration::from_millis(500)).await;
    auth.emit(AuthEvent::SignedOut);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(ctx.snapshot().phase, SessionPhase::Anonymous);

    sleep(Duration::from_secs(5)).await;
    let snap = ctx.snapshot();
    assert_eq!(snap.phase, SessionPhase::Anonymous);
    assert!(snap.identity.is_none());
    assert!(gateway.token().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_clears_identity_session_and_admin_together() {
    let auth = Arc::new(ScriptedAuth::new(vec![Fetch::Return(None)], true));
    let gateway = Arc::new(ScriptedGateway::new());
    let admin_id = auth.user_id("admin@example.com");
    gateway.set_admin(admin_id, Duration::from_millis(50), true);
    let ctx = start(&auth, &gateway);
    ctx.ready().await;

    ctx.sign_in("admin@example.com", "hunter22").await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(ctx.snapshot().is_admin);

    let mut rx = ctx.subscribe();
    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            seen.push(rx.borrow_and_update().clone());
            if seen.last().is_some_and(|s| s.identity.is_none()) {
                break;
            }
        }
        seen
    });

    ctx.sign_out().await.unwrap();
    let seen = watcher.await.unwrap();
    assert!(!seen.is_empty());
    for snap in &seen {
        if snap.identity.is_none() {
            assert!(snap.session.is_none());
            assert!(!snap.is_admin);
        }
    }

    let snap = ctx.snapshot();
    assert_eq!(snap.phase, SessionPhase::Anonymous);
    assert!(snap.session.is_none());
    assert!(!snap.is_admin);
    assert!(gateway.token().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_admin_flag_follows_identity() {
    let auth = Arc::new(ScriptedAuth::new(vec![Fetch::Return(None)], true));
    let gateway = Arc::new(ScriptedGateway::new());
    let admin_id = auth.user_id("admin@example.com");
    let member_id = auth.user_id("member@example.com");
    // The admin answer arrives only after the identity has changed
    gateway.set_admin(admin_id, Duration::from_secs(5), true);
    gateway.set_admin(member_id, Duration::ZERO, false);
    let ctx = start(&auth, &gateway);
    ctx.ready().await;

    ctx.sign_in("admin@example.com", "hunter22").await.unwrap();
    assert_eq!(ctx.snapshot().user_id(), Some(admin_id));
    assert!(!ctx.snapshot().is_admin);

    ctx.sign_in("member@example.com", "hunter22").await.unwrap();
    sleep(Duration::from_secs(6)).await;

    let snap = ctx.snapshot();
    assert_eq!(snap.user_id(), Some(member_id));
    assert!(!snap.is_admin);
    assert_eq!(gateway.calls_to("is_admin").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_admin_check_leaves_flag_false() {
    let user_id = Uuid::new_v4();
    let auth = Arc::new(ScriptedAuth::new(vec![Fetch::Return(Some(session_for(user_id)))], true));
    let gateway = Arc::new(ScriptedGateway::new());
    gateway.reply("is_admin", Err(RemoteError::capability_missing("public.is_admin")));
    let ctx = start(&auth, &gateway);

    let snap = ctx.ready().await;
    assert!(snap.is_authenticated());
    sleep(Duration::from_secs(1)).await;
    assert!(!ctx.snapshot().is_admin);
    assert_eq!(gateway.calls_to("is_admin").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_token_refresh_keeps_admin_flag() {
    let user_id = Uuid::new_v4();
    let auth = Arc::new(ScriptedAuth::new(vec![Fetch::Return(Some(session_for(user_id)))], true));
    let gateway = Arc::new(ScriptedGateway::new());
    gateway.set_admin(user_id, Duration::ZERO, true);
    let ctx = start(&auth, &gateway);
    ctx.ready().await;
    sleep(Duration::from_millis(10)).await;
    assert!(ctx.snapshot().is_admin);

    let refreshed = session_for(user_id);
    auth.emit(AuthEvent::TokenRefreshed(refreshed.clone()));
    sleep(Duration::from_millis(10)).await;

    let snap = ctx.snapshot();
    assert!(snap.is_admin);
    assert_eq!(snap.session.map(|s| s.access_token), Some(refreshed.access_token.clone()));
    assert_eq!(gateway.token(), Some(refreshed.access_token));
    assert_eq!(gateway.calls_to("is_admin").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sign_in_applies_without_listener_event() {
    let auth = Arc::new(ScriptedAuth::new(vec![Fetch::Return(None)], false));
    let gateway = Arc::new(ScriptedGateway::new());
    let ctx = start(&auth, &gateway);
    ctx.ready().await;

    ctx.sign_in("quiet@example.com", "hunter22").await.unwrap();
    assert_eq!(ctx.snapshot().user_id(), Some(auth.user_id("quiet@example.com")));

    ctx.sign_out().await.unwrap();
    assert_eq!(ctx.snapshot().phase, SessionPhase::Anonymous);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_input_is_rejected_before_calling_auth() {
    let auth = Arc::new(ScriptedAuth::new(vec![Fetch::Return(None)], true));
    let gateway = Arc::new(ScriptedGateway::new());
    let ctx = start(&auth, &gateway);
    ctx.ready().await;

    let err = ctx.sign_in("not-an-email", "hunter22").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let profile = SignUpProfile {
        full_name: "Ada".to_string(),
        ..Default::default()
    };
    let err = ctx.sign_up("ada@example.com", "123", profile).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = ctx.reset_password("nobody").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(ctx.snapshot().phase, SessionPhase::Anonymous);
}

#[tokio::test(start_paused = true)]
async fn test_no_state_written_after_shutdown() {
    let auth = Arc::new(ScriptedAuth::new(vec![Fetch::Hang], true));
    let gateway = Arc::new(ScriptedGateway::new());
    let ctx = start(&auth, &gateway);

    sleep(Duration::from_millis(10)).await;
    ctx.shutdown();
    auth.emit(AuthEvent::SignedIn(session_for(Uuid::new_v4())));

    sleep(Duration::from_secs(30)).await;
    let snap = ctx.snapshot();
    assert!(snap.loading());
    assert!(snap.connection_error.is_none());
    assert_eq!(snap.generation, 0);
}
