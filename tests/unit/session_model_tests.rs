use agent_waypoint::models::checkpoint::Checkpoint;
use agent_waypoint::models::pending::{PendingRequest, ResponseSchema};
use agent_waypoint::models::session::{
    value_to_content, ContextMessage, FailureKind, FailureRecord, MessageRole, SessionStatus,
};
use agent_waypoint::models::view::SessionView;
use agent_waypoint::AppError;
use chrono::{TimeZone, Utc};
use serde_json::json;

fn checkpoint() -> Checkpoint {
    let now = Utc
        .with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
        .single()
        .expect("valid timestamp");
    Checkpoint::initial(
        "writer",
        vec![ContextMessage::new(MessageRole::User, "hi")],
        now,
    )
}

// ─── Status ──────────────────────────────────────────────

#[test]
fn status_round_trips_through_storage_form() {
    for status in [
        SessionStatus::Running,
        SessionStatus::WaitingForHuman,
        SessionStatus::Completed,
        SessionStatus::Failed,
    ] {
        assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(SessionStatus::parse("paused"), None);
}

#[test]
fn terminal_statuses_allow_no_transitions() {
    for terminal in [SessionStatus::Completed, SessionStatus::Failed] {
        assert!(terminal.is_terminal());
        assert!(!terminal.can_transition_to(SessionStatus::Running));
        assert!(!terminal.can_transition_to(SessionStatus::Failed));
    }
}

#[test]
fn waiting_resumes_or_fails_only() {
    let waiting = SessionStatus::WaitingForHuman;
    assert!(waiting.can_transition_to(SessionStatus::Running));
    assert!(waiting.can_transition_to(SessionStatus::Failed));
    assert!(!waiting.can_transition_to(SessionStatus::Completed));
    assert!(!waiting.can_transition_to(SessionStatus::WaitingForHuman));
    assert!(SessionStatus::Running.can_transition_to(SessionStatus::Completed));
}

#[test]
fn status_serializes_in_snake_case() {
    assert_eq!(
        serde_json::to_value(SessionStatus::WaitingForHuman).expect("serialize"),
        json!("waiting_for_human")
    );
    assert_eq!(
        serde_json::to_value(FailureKind::RetriesExhausted).expect("serialize"),
        json!("RETRIES_EXHAUSTED")
    );
}

// ─── Checkpoint invariants ───────────────────────────────

#[test]
fn initial_checkpoint_is_running_at_revision_zero() {
    let cp = checkpoint();
    assert_eq!(cp.revision, 0);
    assert_eq!(cp.step_index, 0);
    assert_eq!(cp.status, SessionStatus::Running);
    assert!(cp.validate().is_ok());
    assert_eq!(cp.last_message().map(|m| m.content.as_str()), Some("hi"));
}

#[test]
fn pending_request_must_match_waiting_status() {
    let mut cp = checkpoint();
    cp.status = SessionStatus::WaitingForHuman;
    assert!(matches!(cp.validate(), Err(AppError::Internal(_))));

    cp.pending_request = Some(PendingRequest {
        step_id: "review".into(),
        prompt: "ok?".into(),
        response_schema: ResponseSchema::approval(),
        expires_at: cp.created_at,
        proposed_action: None,
    });
    assert!(cp.validate().is_ok());

    cp.status = SessionStatus::Running;
    assert!(cp.validate().is_err());
}

#[test]
fn result_and_error_follow_status() {
    let mut cp = checkpoint();
    cp.result = Some(json!("done"));
    assert!(cp.validate().is_err());
    cp.status = SessionStatus::Completed;
    assert!(cp.validate().is_ok());

    let mut failed = checkpoint();
    failed.status = SessionStatus::Failed;
    assert!(failed.validate().is_err());
}

#[test]
fn mark_failed_clears_pending_and_result() {
    let mut cp = checkpoint();
    cp.status = SessionStatus::WaitingForHuman;
    cp.pending_request = Some(PendingRequest {
        step_id: "review".into(),
        prompt: "ok?".into(),
        response_schema: ResponseSchema::any(),
        expires_at: cp.created_at,
        proposed_action: None,
    });

    let at = cp.created_at;
    cp.mark_failed(
        FailureRecord::new(FailureKind::Expired, "too late", at)
            .at_step("review")
            .with_attempts(1),
    );

    assert_eq!(cp.status, SessionStatus::Failed);
    assert!(cp.pending_request.is_none());
    assert!(cp.validate().is_ok());
    let error = cp.error.expect("failure record");
    assert_eq!(error.step_id.as_deref(), Some("review"));
    assert_eq!(error.attempts, Some(1));
}

// ─── Messages and views ──────────────────────────────────

#[test]
fn message_content_parses_as_json_when_possible() {
    let structured = ContextMessage::from_step(MessageRole::Human, r#"{"approved":true}"#, "review");
    assert_eq!(structured.json(), Some(json!({"approved": true})));
    assert_eq!(structured.step_id.as_deref(), Some("review"));

    let prose = ContextMessage::new(MessageRole::Assistant, "just words");
    assert_eq!(prose.json(), None);
}

#[test]
fn values_render_as_message_content() {
    assert_eq!(value_to_content(&json!("plain")), "plain");
    assert_eq!(value_to_content(&json!({"a": 1})), r#"{"a":1}"#);
    assert_eq!(value_to_content(&json!(7)), "7");
}

#[test]
fn view_exposes_only_status_relevant_fields() {
    let mut cp = checkpoint();
    cp.status = SessionStatus::Completed;
    cp.result = Some(json!({"ok": true}));

    let view = SessionView::from(&cp);
    assert_eq!(view.id, cp.session_id);
    assert_eq!(view.result, Some(json!({"ok": true})));
    assert!(view.error.is_none());
    assert!(view.pending_request.is_none());

    let encoded = serde_json::to_value(&view).expect("serialize");
    assert!(encoded.get("error").is_none());
    assert_eq!(encoded["status"], json!("completed"));
}
