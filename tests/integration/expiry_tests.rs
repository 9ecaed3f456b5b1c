//! Pending-request expiry: lazy evaluation, the sweep, and resume after
//! the deadline.

use agent_waypoint::engine::expiry;
use agent_waypoint::models::session::{FailureKind, SessionStatus};
use agent_waypoint::ErrorCode;
use chrono::Duration;
use serde_json::json;

use super::test_helpers::{fast_settings, gate_agent, t0, HarnessBuilder};

#[tokio::test]
async fn status_read_after_deadline_reports_expired() {
    let h = HarnessBuilder::new(vec![gate_agent(Some(60))]).build().await;
    let started = h
        .service
        .start_session("gate", json!("go"))
        .await
        .expect("start");
    let pending = started.pending_request.expect("pending");
    assert_eq!(pending.expires_at, t0() + Duration::seconds(60));

    h.clock.advance(Duration::seconds(61));
    let view = h.service.get_status(&started.id).await.expect("status");

    assert_eq!(view.status, SessionStatus::Failed);
    assert!(view.pending_request.is_none());
    let error = view.error.expect("failure record");
    assert_eq!(error.kind, FailureKind::Expired);
    assert_eq!(error.step_id.as_deref(), Some("ask"));
    assert_eq!(view.revision, 2);
}

#[tokio::test]
async fn deadline_itself_is_not_expired() {
    let h = HarnessBuilder::new(vec![gate_agent(Some(60))]).build().await;
    let started = h
        .service
        .start_session("gate", json!("go"))
        .await
        .expect("start");

    h.clock.advance(Duration::seconds(60));
    let view = h.service.get_status(&started.id).await.expect("status");
    assert_eq!(view.status, SessionStatus::WaitingForHuman);
    assert_eq!(view.revision, started.revision);
}

#[tokio::test]
async fn resume_after_deadline_fails_the_session() {
    let h = HarnessBuilder::new(vec![gate_agent(Some(60))]).build().await;
    let started = h
        .service
        .start_session("gate", json!("go"))
        .await
        .expect("start");

    h.clock.advance(Duration::seconds(120));
    let err = h
        .service
        .resume(&started.id, started.revision, json!({"approved": true}))
        .await
        .expect_err("expired");
    assert_eq!(err.code(), ErrorCode::Expired);

    let view = h.service.get_status(&started.id).await.expect("status");
    assert_eq!(view.status, SessionStatus::Failed);
    assert_eq!(view.error.map(|e| e.kind), Some(FailureKind::Expired));
}

#[tokio::test]
async fn sweep_expires_only_lapsed_requests() {
    let h = HarnessBuilder::new(vec![gate_agent(Some(60))]).build().await;
    let lapsed = h
        .service
        .start_session("gate", json!("first"))
        .await
        .expect("start");

    h.clock.advance(Duration::seconds(45));
    let fresh = h
        .service
        .start_session("gate", json!("second"))
        .await
        .expect("start");

    h.clock.advance(Duration::seconds(30));
    let expired = expiry::sweep_once(&h.state).await.expect("sweep");
    assert_eq!(expired, 1);

    let lapsed = h.service.get_status(&lapsed.id).await.expect("status");
    assert_eq!(lapsed.status, SessionStatus::Failed);
    let fresh = h.service.get_status(&fresh.id).await.expect("status");
    assert_eq!(fresh.status, SessionStatus::WaitingForHuman);

    // A second pass finds nothing new.
    assert_eq!(expiry::sweep_once(&h.state).await.expect("sweep"), 0);
}

#[tokio::test]
async fn configured_ttl_applies_without_override() {
    let mut settings = super::test_helpers::fast_settings();
    settings.pending_ttl = std::time::Duration::from_secs(300);
    let h = HarnessBuilder::new(vec![gate_agent(None)])
        .settings(settings)
        .build()
        .await;

    let started = h
        .service
        .start_session("gate", json!("go"))
        .await
        .expect("start");
    let pending = started.pending_request.expect("pending");
    assert_eq!(pending.expires_at, t0() + Duration::seconds(300));
}

#[tokio::test]
async fn advance_on_lapsed_session_expires_it() {
    let h = HarnessBuilder::new(vec![gate_agent(Some(10))]).build().await;
    let started = h
        .service
        .start_session("gate", json!("go"))
        .await
        .expect("start");

    h.clock.advance(Duration::seconds(11));
    let view = h.service.advance(&started.id).await.expect("advance");
    assert_eq!(view.status, SessionStatus::Failed);
}

#[tokio::test]
async fn unrepresentable_deadline_fails_the_session() {
    let mut settings = fast_settings();
    settings.pending_ttl = std::time::Duration::from_secs(10_000_000_000_000);
    let h = HarnessBuilder::new(vec![gate_agent(None)])
        .settings(settings)
        .build()
        .await;

    let view = h
        .service
        .start_session("gate", json!("go"))
        .await
        .expect("start");

    assert_eq!(view.status, SessionStatus::Failed);
    assert_eq!(view.revision, 1);
    assert!(view.pending_request.is_none());
    let error = view.error.expect("failure record");
    assert_eq!(error.kind, FailureKind::Internal);
    assert_eq!(error.step_id.as_deref(), Some("ask"));

    let recovered = h.service.recover_running().await.expect("recover");
    assert!(recovered.is_empty());
}
