//! Transient retries with backoff and permanent step failures.

use agent_waypoint::engine::invoker::InvokeError;
use agent_waypoint::models::session::{FailureKind, SessionStatus};
use serde_json::json;

use super::test_helpers::{single_tool_agent, FakeModel, FakeTools, HarnessBuilder, Reply};

#[tokio::test]
async fn transient_failure_is_retried_then_recorded() {
    let tools = FakeTools::scripted(
        "deploy",
        vec![
            Reply::Fail(InvokeError::Transient("registry busy".into())),
            Reply::Ok(json!({"deployed": true})),
        ],
    );
    let h = HarnessBuilder::new(vec![single_tool_agent("deployer", "deploy")])
        .tools(tools.clone())
        .build()
        .await;

    let view = h
        .service
        .start_session("deployer", json!("ship"))
        .await
        .expect("start");

    assert_eq!(view.status, SessionStatus::Completed);
    assert_eq!(view.result, Some(json!({"deployed": true})));
    assert_eq!(tools.calls_to("deploy"), 2);

    let outcome = h
        .state
        .ledger
        .has_outcome(&view.id, "call")
        .await
        .expect("ledger")
        .expect("recorded");
    assert_eq!(outcome.attempts, 2);
}

#[tokio::test]
async fn persistent_transient_failure_exhausts_retries() {
    let transient = || Reply::Fail(InvokeError::Transient("timeout".into()));
    let tools = FakeTools::scripted("deploy", vec![transient(), transient(), transient()]);
    let h = HarnessBuilder::new(vec![single_tool_agent("deployer", "deploy")])
        .tools(tools.clone())
        .build()
        .await;

    let view = h
        .service
        .start_session("deployer", json!("ship"))
        .await
        .expect("start");

    assert_eq!(view.status, SessionStatus::Failed);
    let error = view.error.expect("failure record");
    assert_eq!(error.kind, FailureKind::RetriesExhausted);
    assert_eq!(error.attempts, Some(3));
    assert_eq!(error.step_id.as_deref(), Some("call"));
    assert_eq!(tools.calls_to("deploy"), 3);
    assert!(h
        .state
        .ledger
        .has_outcome(&view.id, "call")
        .await
        .expect("ledger")
        .is_none());
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let tools = FakeTools::scripted(
        "deploy",
        vec![Reply::Fail(InvokeError::Permanent("bad manifest".into()))],
    );
    let h = HarnessBuilder::new(vec![single_tool_agent("deployer", "deploy")])
        .tools(tools.clone())
        .build()
        .await;

    let view = h
        .service
        .start_session("deployer", json!("ship"))
        .await
        .expect("start");

    assert_eq!(view.status, SessionStatus::Failed);
    let error = view.error.expect("failure record");
    assert_eq!(error.kind, FailureKind::StepFailed);
    assert_eq!(error.attempts, Some(1));
    assert!(error.message.contains("bad manifest"));
    assert_eq!(tools.calls_to("deploy"), 1);
    assert_eq!(view.revision, 1);
}

#[tokio::test]
async fn model_failures_follow_the_same_rules() {
    let model = FakeModel::new(vec![
        Reply::Fail(InvokeError::Transient("rate limited".into())),
        Reply::Ok("drafted".into()),
    ]);
    let h = HarnessBuilder::new(vec![super::test_helpers::approval_agent()])
        .model(model.clone())
        .build()
        .await;

    let view = h
        .service
        .start_session("writer", json!("go"))
        .await
        .expect("start");
    assert_eq!(view.status, SessionStatus::WaitingForHuman);
    assert_eq!(model.calls(), 2);
}
