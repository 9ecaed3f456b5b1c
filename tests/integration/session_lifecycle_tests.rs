//! End-to-end session lifecycle: start, pause, resume, complete.

use std::sync::Arc;

use agent_waypoint::models::agent::{AgentDefinition, StepAction, StepDefinition};
use agent_waypoint::models::ledger::EffectKind;
use agent_waypoint::models::pending::{ResponseSchema, SchemaType};
use agent_waypoint::models::session::{MessageRole, SessionStatus};
use agent_waypoint::policy::evaluator::ToolRulePolicy;
use agent_waypoint::ErrorCode;
use serde_json::json;

use super::test_helpers::{approval_agent, FakeModel, FakeTools, HarnessBuilder};

#[tokio::test]
async fn approved_session_runs_tool_and_completes() {
    let model = FakeModel::replying(r#"{"path":"notes.txt","content":"hi"}"#);
    let tools = FakeTools::new();
    let h = HarnessBuilder::new(vec![approval_agent()])
        .model(model.clone())
        .tools(tools.clone())
        .build()
        .await;

    let started = h
        .service
        .start_session("writer", json!({"task": "write notes"}))
        .await
        .expect("start");
    assert_eq!(started.status, SessionStatus::WaitingForHuman);
    assert_eq!(started.revision, 1);
    assert_eq!(started.step_index, 1);
    assert_eq!(model.calls(), 1);
    assert!(tools.calls().is_empty(), "tool must wait for approval");

    let pending = started.pending_request.clone().expect("pending request");
    assert_eq!(pending.step_id, "review");
    assert_eq!(pending.response_schema, ResponseSchema::approval());
    let proposed = pending.proposed_action.expect("gated tool call");
    assert_eq!(proposed.tool, "write_file");
    assert_eq!(proposed.args, json!({"path": "notes.txt", "content": "hi"}));
    assert!(pending.prompt.contains("write_file"));

    let status = h.service.get_status(&started.id).await.expect("status");
    assert_eq!(status, started);

    let done = h
        .service
        .resume(&started.id, 1, json!({"approved": true}))
        .await
        .expect("resume");
    assert_eq!(done.status, SessionStatus::Completed);
    assert!(done.pending_request.is_none());
    assert_eq!(done.result, Some(json!({"ok": true, "tool": "write_file"})));
    assert_eq!(
        tools.calls(),
        vec![(
            "write_file".to_owned(),
            json!({"path": "notes.txt", "content": "hi"})
        )]
    );
}

#[tokio::test]
async fn history_keeps_every_committed_revision() {
    let h = HarnessBuilder::new(vec![approval_agent()]).build().await;
    let started = h
        .service
        .start_session("writer", json!("go"))
        .await
        .expect("start");
    h.service
        .resume(&started.id, started.revision, json!({"approved": true}))
        .await
        .expect("resume");

    let history = h.service.history(&started.id).await.expect("history");
    let revisions: Vec<u64> = history.iter().map(|c| c.revision).collect();
    assert_eq!(revisions, vec![0, 1, 2, 3]);

    let statuses: Vec<SessionStatus> = history.iter().map(|c| c.status).collect();
    assert_eq!(
        statuses,
        vec![
            SessionStatus::Running,
            SessionStatus::WaitingForHuman,
            SessionStatus::Running,
            SessionStatus::Completed,
        ]
    );

    // Step indices never decrease across revisions.
    assert!(history
        .windows(2)
        .all(|pair| pair[0].step_index <= pair[1].step_index));

    // The resumed revision carries the human response in its context.
    let resumed = &history[2];
    let last = resumed.last_message().expect("human message");
    assert_eq!(last.role, MessageRole::Human);
    assert_eq!(last.step_id.as_deref(), Some("review"));
}

#[tokio::test]
async fn denied_response_takes_the_other_branch() {
    let tools = FakeTools::new();
    let h = HarnessBuilder::new(vec![approval_agent()])
        .tools(tools.clone())
        .build()
        .await;

    let started = h
        .service
        .start_session("writer", json!("go"))
        .await
        .expect("start");
    let done = h
        .service
        .resume(
            &started.id,
            1,
            json!({"approved": false, "comment": "not today"}),
        )
        .await
        .expect("resume");

    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(done.result, Some(json!({"status": "denied"})));
    assert_eq!(tools.calls_to("write_file"), 0);
}

#[tokio::test]
async fn policy_skip_runs_straight_through() {
    let tools = FakeTools::new();
    let h = HarnessBuilder::new(vec![approval_agent()])
        .tools(tools.clone())
        .policy(Arc::new(ToolRulePolicy::new([("write_*", false)])))
        .build()
        .await;

    let done = h
        .service
        .start_session("writer", json!("go"))
        .await
        .expect("start");

    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(done.revision, 1);
    assert_eq!(tools.calls_to("write_file"), 1);
}

#[tokio::test]
async fn context_starts_with_system_prompt_and_input() {
    let mut agent = approval_agent();
    agent.system_prompt = Some("You write files carefully.".into());
    let h = HarnessBuilder::new(vec![agent]).build().await;

    let started = h
        .service
        .start_session("writer", json!({"task": "x"}))
        .await
        .expect("start");
    let checkpoint = h.state.store.read_latest(&started.id).await.expect("read");

    let roles: Vec<MessageRole> = checkpoint.context.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::System, MessageRole::User, MessageRole::Assistant]
    );
    assert_eq!(checkpoint.context[1].content, r#"{"task":"x"}"#);
}

#[tokio::test]
async fn effecting_steps_are_recorded_in_the_ledger() {
    let h = HarnessBuilder::new(vec![approval_agent()]).build().await;
    let started = h
        .service
        .start_session("writer", json!("go"))
        .await
        .expect("start");
    h.service
        .resume(&started.id, 1, json!({"approved": true}))
        .await
        .expect("resume");

    let records = h
        .state
        .ledger
        .list_for_session(&started.id)
        .await
        .expect("ledger");
    let steps: Vec<&str> = records.iter().map(|r| r.step_id.as_str()).collect();
    assert_eq!(steps, vec!["draft", "apply"]);
    assert_eq!(
        h.state
            .ledger
            .count_for_session(&started.id, EffectKind::Model)
            .await
            .expect("count"),
        1
    );
}

#[tokio::test]
async fn unknown_agent_is_not_found() {
    let h = HarnessBuilder::new(vec![approval_agent()]).build().await;
    let err = h
        .service
        .start_session("nobody", json!({}))
        .await
        .expect_err("unknown agent");
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn input_schema_guards_session_creation() {
    let mut schema = ResponseSchema::of(SchemaType::Object);
    schema.required.push("task".into());
    schema
        .properties
        .insert("task".into(), ResponseSchema::of(SchemaType::String));

    let mut agent = AgentDefinition::new(
        "guarded",
        vec![StepDefinition::new(
            "end",
            StepAction::Terminal { result: None },
        )],
    );
    agent.input_schema = Some(schema);
    let h = HarnessBuilder::new(vec![agent]).build().await;

    let err = h
        .service
        .start_session("guarded", json!({"task": 7}))
        .await
        .expect_err("invalid input");
    assert_eq!(err.code(), ErrorCode::ValidationFailed);
    assert!(err.to_string().contains("$.task"));

    let ok = h
        .service
        .start_session("guarded", json!({"task": "fine"}))
        .await
        .expect("valid input");
    assert_eq!(ok.status, SessionStatus::Completed);
    assert_eq!(ok.result, Some(json!({"task": "fine"})));
}

#[tokio::test]
async fn get_status_of_unknown_session_is_not_found() {
    let h = HarnessBuilder::new(vec![approval_agent()]).build().await;
    let err = h
        .service
        .get_status("missing")
        .await
        .expect_err("missing session");
    assert_eq!(err.code(), ErrorCode::NotFound);
}
