/// Report and content moderation tests against the embedded backend
mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{create_user, local_backend, signed_in, ScriptedGateway, PASSWORD};
use humbl_club::{
    audit::{AdminAction, AuditLogger},
    auth::{AuthService, Credentials},
    error::{DomainCondition, ErrorKind, RemoteError},
    events::NewEvent,
    moderation::{
        ContentModerator, ContentStatus, ContentType, ReportStatus, Resolution, ResolutionSummary,
    },
    payments::ConnectMode,
    RpcGateway, Role, TableQuery,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn test_report_then_resolve_with_removal() {
    let backend = local_backend().await;
    let (admin, admin_id) = signed_in(&backend, "admin@example.com", Some(Role::Admin)).await;
    let (member, member_id) = signed_in(&backend, "member@example.com", None).await;
    let org = backend.create_organization("HUMBL Austin", "austin").await.unwrap();
    let post = backend.create_post(org, member_id, "buy followers here").await.unwrap();

    let report = member
        .reports
        .report(post, ContentType::Post, "  spam  ", Some("links everywhere"), member_id)
        .await
        .unwrap();
    assert_eq!(report.status, ReportStatus::Pending);
    assert_eq!(report.reason, "spam");
    assert_eq!(report.reporter_id, member_id);

    let mut queue = admin.moderation_queue(Some(ReportStatus::Pending));
    queue.reload().await.unwrap();
    assert_eq!(queue.reports().len(), 1);

    let summary = queue
        .resolve(&[report.id], Resolution::Approved, Some(ContentStatus::Removed), Some("spam"))
        .await
        .unwrap();
    assert_eq!(
        summary,
        ResolutionSummary {
            resolved: 1,
            content_updated: 1
        }
    );
    assert!(queue.reports().is_empty());

    assert_eq!(
        backend.content_status(ContentType::Post, post).await.unwrap(),
        Some(ContentStatus::Removed)
    );
    let stored = admin.reports.get(report.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReportStatus::Approved);
    assert_eq!(stored.reviewed_by, Some(admin_id));
    assert!(stored.reviewed_at.is_some());
    assert_eq!(stored.resolution_notes.as_deref(), Some("spam"));

    admin.shutdown().await;
    let log = backend.audit_log().await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, "reports_resolved");
    assert_eq!(log[0].admin_id, admin_id);
    assert_eq!(log[0].details["content_action"], json!("removed"));
}

#[tokio::test]
async fn test_second_resolution_is_already_resolved() {
    let backend = local_backend().await;
    let (admin, _) = signed_in(&backend, "admin@example.com", Some(Role::Admin)).await;
    let (member, member_id) = signed_in(&backend, "member@example.com", None).await;
    let org = backend.create_organization("HUMBL Austin", "austin").await.unwrap();
    let post = backend.create_post(org, member_id, "hello").await.unwrap();
    let report = member
        .reports
        .report(post, ContentType::Post, "rude", None, member_id)
        .await
        .unwrap();

    let mut queue = admin.moderation_queue(None);
    queue.reload().await.unwrap();
    queue
        .resolve(&[report.id], Resolution::Approved, None, None)
        .await
        .unwrap();

    let err = queue
        .resolve(&[report.id], Resolution::Rejected, None, None)
        .await
        .unwrap_err();
    assert!(err.is_condition(DomainCondition::AlreadyResolved));
    assert_eq!(err.user_message(), "This report has already been reviewed.");

    // The queue reloaded after the failure and shows the winning outcome
    assert_eq!(queue.get(report.id).unwrap().status, ReportStatus::Approved);
    assert_eq!(
        backend.content_status(ContentType::Post, post).await.unwrap(),
        Some(ContentStatus::Active)
    );
}

#[tokio::test]
async fn test_resolution_batch_is_all_or_nothing() {
    let backend = local_backend().await;
    let (admin, _) = signed_in(&backend, "admin@example.com", Some(Role::Admin)).await;
    let (member, member_id) = signed_in(&backend, "member@example.com", None).await;
    let org = backend.create_organization("HUMBL Austin", "austin").await.unwrap();
    let first = backend.create_post(org, member_id, "one").await.unwrap();
    let second = backend.create_post(org, member_id, "two").await.unwrap();

    let done = member
        .reports
        .report(first, ContentType::Post, "spam", None, member_id)
        .await
        .unwrap();
    let open = member
        .reports
        .report(second, ContentType::Post, "spam", None, member_id)
        .await
        .unwrap();
    admin
        .reports
        .resolve_reports(&[done.id], Resolution::Rejected, None, None)
        .await
        .unwrap();

    let err = admin
        .reports
        .resolve_reports(&[open.id, done.id], Resolution::Approved, Some(ContentStatus::Flagged), None)
        .await
        .unwrap_err();
    assert!(err.is_condition(DomainCondition::AlreadyResolved));

    let open = admin.reports.get(open.id).await.unwrap().unwrap();
    assert_eq!(open.status, ReportStatus::Pending);
    assert_eq!(
        backend.content_status(ContentType::Post, second).await.unwrap(),
        Some(ContentStatus::Active)
    );

    let missing = admin
        .reports
        .resolve_reports(&[Uuid::new_v4()], Resolution::Approved, None, None)
        .await
        .unwrap_err();
    assert!(missing.is_condition(DomainCondition::NotFound));
}

#[tokio::test]
async fn test_bulk_approve_selected_reports() {
    let backend = local_backend().await;
    let (admin, admin_id) = signed_in(&backend, "admin@example.com", Some(Role::Admin)).await;
    let (member, member_id) = signed_in(&backend, "member@example.com", None).await;
    let org = backend.create_organization("HUMBL Austin", "austin").await.unwrap();

    let mut ids = Vec::new();
    for n in 0..3 {
        let post = backend
            .create_post(org, member_id, &format!("post {}", n))
            .await
            .unwrap();
        let report = member
            .reports
            .report(post, ContentType::Post, "spam", None, member_id)
            .await
            .unwrap();
        ids.push(report.id);
    }

    let mut queue = admin.moderation_queue(Some(ReportStatus::Pending));
    queue.reload().await.unwrap();
    queue.select_all_pending();
    assert_eq!(queue.selected().len(), 3);

    let outcome = queue.approve_selected().await.unwrap();
    assert_eq!(outcome.updated.len(), 3);
    assert!(outcome.skipped.is_empty());
    assert!(queue.reports().is_empty());
    assert!(queue.selected().is_empty());

    for id in ids {
        let report = admin.reports.get(id).await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Approved);
        assert_eq!(report.reviewed_by, Some(admin_id));
    }

    admin.shutdown().await;
    let log = backend.audit_log().await.unwrap();
    let bulk: Vec<_> = log.iter().filter(|e| e.action == "reports_bulk_approved").collect();
    assert_eq!(bulk.len(), 1);
    assert_eq!(bulk[0].details["count"], json!(3));
}

#[tokio::test]
async fn test_bulk_update_skips_reviewed_reports() {
    let backend = local_backend().await;
    let (admin, admin_id) = signed_in(&backend, "admin@example.com", Some(Role::Admin)).await;
    let (member, member_id) = signed_in(&backend, "member@example.com", None).await;
    let org = backend.create_organization("HUMBL Austin", "austin").await.unwrap();
    let post = backend.create_post(org, member_id, "hello").await.unwrap();

    let reviewed = member
        .reports
        .report(post, ContentType::Post, "spam", None, member_id)
        .await
        .unwrap();
    let pending = member
        .reports
        .report(post, ContentType::Post, "harassment", None, member_id)
        .await
        .unwrap();
    admin
        .reports
        .resolve_reports(&[reviewed.id], Resolution::Approved, None, None)
        .await
        .unwrap();

    let outcome = admin
        .reports
        .bulk_update_status(&[reviewed.id, pending.id], Resolution::Rejected)
        .await
        .unwrap();
    assert_eq!(outcome.updated, vec![pending.id]);
    assert_eq!(outcome.skipped, vec![reviewed.id]);

    let rejected = admin.reports.get(pending.id).await.unwrap().unwrap();
    assert_eq!(rejected.status, ReportStatus::Rejected);
    assert_eq!(rejected.reviewed_by, Some(admin_id));
    assert!(rejected.reviewed_at.is_some());

    let reviewed = admin.reports.get(reviewed.id).await.unwrap().unwrap();
    assert_eq!(reviewed.status, ReportStatus::Approved);
}

#[tokio::test]
async fn test_bulk_update_stamps_the_acting_reviewer() {
    let backend = local_backend().await;
    let (admin, admin_id) = signed_in(&backend, "admin@example.com", Some(Role::Admin)).await;
    let (member, member_id) = signed_in(&backend, "member@example.com", None).await;
    let org = backend.create_organization("HUMBL Austin", "austin").await.unwrap();
    let post = backend.create_post(org, member_id, "hello").await.unwrap();

    let report = member
        .reports
        .report(post, ContentType::Post, "spam", None, member_id)
        .await
        .unwrap();

    // Reviewer columns cannot be supplied by the client
    let query = TableQuery::from("content_reports").eq("id", report.id.to_string());
    let err = admin
        .gateway
        .update(
            &query,
            json!({ "status": "approved", "reviewed_by": member_id, "reviewed_at": Utc::now() }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);

    let untouched = admin.reports.get(report.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, ReportStatus::Pending);
    assert_eq!(untouched.reviewed_by, None);

    let outcome = admin
        .reports
        .bulk_update_status(&[report.id], Resolution::Approved)
        .await
        .unwrap();
    assert_eq!(outcome.updated, vec![report.id]);

    let approved = admin.reports.get(report.id).await.unwrap().unwrap();
    assert_eq!(approved.reviewed_by, Some(admin_id));
    assert_ne!(approved.reviewed_by, Some(member_id));
    assert!(approved.reviewed_at.is_some());
}

#[tokio::test]
async fn test_members_cannot_resolve_or_see_others_reports() {
    let backend = local_backend().await;
    let (member, member_id) = signed_in(&backend, "member@example.com", None).await;
    let (other, other_id) = signed_in(&backend, "other@example.com", None).await;
    let org = backend.create_organization("HUMBL Austin", "austin").await.unwrap();
    let post = backend.create_post(org, other_id, "hello").await.unwrap();

    let mine = member
        .reports
        .report(post, ContentType::Post, "spam", None, member_id)
        .await
        .unwrap();
    other
        .reports
        .report(post, ContentType::Post, "off topic", None, other_id)
        .await
        .unwrap();

    let visible = member.reports.list(None, None).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, mine.id);

    let err = member
        .reports
        .resolve_reports(&[mine.id], Resolution::Approved, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);

    let err = member
        .reports
        .bulk_update_status(&[mine.id], Resolution::Approved)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);

    // Reports are always filed as the caller
    let err = member
        .reports
        .report(post, ContentType::Post, "spam", None, other_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);
}

#[tokio::test]
async fn test_moderator_resolves_without_admin_flag() {
    let backend = local_backend().await;
    let (moderator, moderator_id) =
        signed_in(&backend, "mod@example.com", Some(Role::Moderator)).await;
    let (member, member_id) = signed_in(&backend, "member@example.com", None).await;
    let org = backend.create_organization("HUMBL Austin", "austin").await.unwrap();
    let post = backend.create_post(org, member_id, "hello").await.unwrap();
    let comment = backend.create_comment(post, member_id, "rude reply").await.unwrap();

    assert!(!moderator.session.snapshot().is_admin);

    let report = member
        .reports
        .report(comment, ContentType::Comment, "rude", None, member_id)
        .await
        .unwrap();
    let summary = moderator
        .reports
        .resolve_reports(&[report.id], Resolution::Approved, Some(ContentStatus::Flagged), None)
        .await
        .unwrap();
    assert_eq!(summary.content_updated, 1);

    let report = moderator.reports.get(report.id).await.unwrap().unwrap();
    assert_eq!(report.reviewed_by, Some(moderator_id));
    assert_eq!(
        backend.content_status(ContentType::Comment, comment).await.unwrap(),
        Some(ContentStatus::Flagged)
    );
}

#[tokio::test]
async fn test_report_input_validation() {
    let backend = local_backend().await;
    let (member, member_id) = signed_in(&backend, "member@example.com", None).await;
    let org = backend.create_organization("HUMBL Austin", "austin").await.unwrap();
    let post = backend.create_post(org, member_id, "hello").await.unwrap();

    let err = member
        .reports
        .report(post, ContentType::Post, "   ", None, member_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let long = "x".repeat(501);
    let err = member
        .reports
        .report(post, ContentType::Post, &long, None, member_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = member
        .reports
        .report(Uuid::new_v4(), ContentType::Comment, "spam", None, member_id)
        .await
        .unwrap_err();
    assert!(err.is_condition(DomainCondition::NotFound));
}

#[tokio::test]
async fn test_content_status_state_machine() {
    let backend = local_backend().await;
    let (admin, admin_id) = signed_in(&backend, "admin@example.com", Some(Role::Admin)).await;
    let org = backend.create_organization("HUMBL Austin", "austin").await.unwrap();
    let post = backend.create_post(org, admin_id, "hello").await.unwrap();

    let flagged = admin
        .content
        .transition_content_status(&[post], ContentType::Post, ContentStatus::Flagged, "review", admin_id)
        .await
        .unwrap();
    assert_eq!(flagged, 1);

    // Asking for the current status changes nothing
    let again = admin
        .content
        .transition_content_status(&[post], ContentType::Post, ContentStatus::Flagged, "review", admin_id)
        .await
        .unwrap();
    assert_eq!(again, 0);

    let removed = admin
        .content
        .moderate_content_direct(&[post], ContentType::Post, ContentStatus::Removed, admin_id, "confirmed")
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let err = admin
        .content
        .transition_content_status(&[post], ContentType::Post, ContentStatus::Flagged, "undo", admin_id)
        .await
        .unwrap_err();
    assert!(err.is_condition(DomainCondition::InvalidTransition));
    assert_eq!(
        backend.content_status(ContentType::Post, post).await.unwrap(),
        Some(ContentStatus::Removed)
    );

    // Rejected before reaching the server
    let err = admin
        .content
        .transition_content_status(&[post], ContentType::Post, ContentStatus::Active, "restore", admin_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = admin
        .content
        .transition_content_status(&[post], ContentType::Event, ContentStatus::Removed, "x", admin_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = admin
        .content
        .transition_content_status(&[post], ContentType::Post, ContentStatus::Removed, " ", admin_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_moderation_requires_acting_as_caller() {
    let backend = local_backend().await;
    let (admin, _) = signed_in(&backend, "admin@example.com", Some(Role::Admin)).await;
    let (member, member_id) = signed_in(&backend, "member@example.com", None).await;
    let org = backend.create_organization("HUMBL Austin", "austin").await.unwrap();
    let post = backend.create_post(org, member_id, "hello").await.unwrap();

    let err = admin
        .content
        .transition_content_status(&[post], ContentType::Post, ContentStatus::Flagged, "x", member_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);

    let err = member
        .content
        .transition_content_status(&[post], ContentType::Post, ContentStatus::Flagged, "x", member_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);
}

#[tokio::test]
async fn test_content_action_on_event_report_fails_whole_resolution() {
    let backend = local_backend().await;
    let (admin, admin_id) = signed_in(&backend, "admin@example.com", Some(Role::Admin)).await;
    let (member, member_id) = signed_in(&backend, "member@example.com", None).await;
    let org = backend.create_organization("HUMBL Austin", "austin").await.unwrap();

    let event = admin
        .events
        .create_event(
            NewEvent {
                organization_id: org,
                title: "Book club".to_string(),
                description: None,
                location: None,
                start_time: Utc::now() + ChronoDuration::days(3),
                end_time: None,
                max_capacity: None,
                price_cents: 0,
                currency: "usd".to_string(),
            },
            admin_id,
        )
        .await
        .unwrap();
    let report = member
        .reports
        .report(event.id, ContentType::Event, "misleading", None, member_id)
        .await
        .unwrap();

    let err = admin
        .reports
        .resolve_reports(&[report.id], Resolution::Approved, Some(ContentStatus::Removed), None)
        .await
        .unwrap_err();
    assert!(err.is_condition(DomainCondition::InvalidTransition));
    let report = admin.reports.get(report.id).await.unwrap().unwrap();
    assert_eq!(report.status, ReportStatus::Pending);

    // Without a content action the event report resolves normally
    admin
        .reports
        .resolve_reports(&[report.id], Resolution::Rejected, None, Some("not misleading"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_undeployed_capabilities_are_reported_as_missing() {
    let backend = local_backend().await;
    let (admin, _) = signed_in(&backend, "admin@example.com", Some(Role::Admin)).await;

    let err = admin.gateway.rpc("award_points", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapabilityMissing);

    let err = admin
        .gateway
        .select(&TableQuery::from("points_ledger"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapabilityMissing);

    let err = admin
        .payments
        .connect_account(ConnectMode::Onboarding)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapabilityMissing);
    assert_eq!(
        err.user_message(),
        "This feature isn't available yet. Please try again later."
    );
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_the_action() {
    let gateway = Arc::new(ScriptedGateway::new());
    gateway.reply("moderate_content", Ok(json!({ "moderated": 2 })));
    gateway.reply(
        "log_admin_action",
        Err(RemoteError::capability_missing("public.log_admin_action")),
    );
    let audit = Arc::new(AuditLogger::spawn(gateway.clone(), 8));
    let moderator = ContentModerator::new(gateway.clone(), audit.clone());

    let moderated = moderator
        .transition_content_status(
            &[Uuid::new_v4(), Uuid::new_v4()],
            ContentType::Comment,
            ContentStatus::Removed,
            "spam wave",
            Uuid::new_v4(),
        )
        .await
        .unwrap();
    assert_eq!(moderated, 2);

    audit.close().await;
    let logged = gateway.calls_to("log_admin_action");
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0]["p_action"], json!("content_moderated"));
    assert_eq!(logged[0]["p_details"]["count"], json!(2));

    // Entries recorded after close are dropped quietly
    audit.record(AdminAction::new("late", "none", None, json!({})));
}

#[tokio::test]
async fn test_audit_entry_sent_with_token_current_at_record_time() {
    let gateway = Arc::new(ScriptedGateway::new());
    gateway.reply("log_admin_action", Ok(json!(null)));
    gateway.set_access_token(Some("first-admin".to_string()));
    let audit = AuditLogger::spawn(gateway.clone(), 8);

    audit.record(AdminAction::new("event_created", "event", None, json!({})));
    gateway.set_access_token(Some("second-admin".to_string()));
    audit.record(AdminAction::new("event_cancelled", "event", None, json!({})));
    gateway.set_access_token(None);
    audit.close().await;

    assert_eq!(
        gateway.tokens_sent_to("log_admin_action"),
        vec![Some("first-admin".to_string()), Some("second-admin".to_string())]
    );
}

#[tokio::test]
async fn test_queued_audit_entries_keep_their_actor() {
    let backend = local_backend().await;
    let (first, first_id) = signed_in(&backend, "first@example.com", Some(Role::Admin)).await;
    let second_id = create_user(&backend, "second@example.com", Some(Role::Admin)).await;
    let second = backend
        .client()
        .sign_in_with_password(&Credentials::new("second@example.com", PASSWORD).unwrap())
        .await
        .unwrap();

    first
        .audit
        .record(AdminAction::new("queued_before_switch", "none", None, json!({})));
    // Another admin's token lands on the shared gateway before the queue drains
    first.gateway.set_access_token(Some(second.access_token.clone()));
    first.shutdown().await;

    let log = backend.audit_log().await.unwrap();
    let entry = log
        .iter()
        .find(|e| e.action == "queued_before_switch")
        .expect("queued entry should be recorded");
    assert_eq!(entry.admin_id, first_id);
    assert_ne!(entry.admin_id, second_id);
}
