use agent_waypoint::config::{GlobalConfig, LimitExit, ToolRuleConfig};
use agent_waypoint::models::agent::{StepAction, StepNext};
use agent_waypoint::models::pending::SchemaType;
use agent_waypoint::AppError;
use serde_json::json;

fn sample_toml() -> &'static str {
    r#"
db_path = "data/engine.db"

[timeouts]
pending_request_seconds = 900
model_seconds = 30
tool_seconds = 10

[retry]
max_attempts = 5
initial_backoff_ms = 100
max_backoff_ms = 2000

[limits]
model_calls_per_run = 10
tool_calls_per_session = 20
exit_behavior = "end"

[sweep]
interval_seconds = 15

[retention]
days = 7

[model]
command = "llm-cli"
args = ["--json"]

[tools.write_file]
command = "./tools/write_file.sh"
timeout_seconds = 5

[policy]
description_prefix = "Approval needed"
interrupt_on = [
    { pattern = "write_*", pause = true },
    { pattern = "*", pause = false },
]

[policy.risk]
threshold = 50
rules = [{ pattern = "rm -rf", score = 100 }]

[[agents]]
id = "writer"
system_prompt = "You write files."

[agents.input_schema]
type = "object"
required = ["task"]

[[agents.steps]]
id = "draft"
kind = "llm_call"
prompt = "Propose a file"

[[agents.steps]]
id = "review"
kind = "interrupt"
ttl_seconds = 120
next = { branch = { field = "approved", equals = true, then = "apply", otherwise = "denied" } }

[[agents.steps]]
id = "apply"
kind = "tool_call"
tool = "write_file"

[[agents.steps]]
id = "done"
kind = "terminal"

[[agents.steps]]
id = "denied"
kind = "terminal"
result = "denied"
"#
}

#[test]
fn parses_full_config() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("config parses");

    assert_eq!(config.db_path(), "data/engine.db");
    assert_eq!(config.timeouts.pending_request_seconds, 900);
    assert_eq!(config.pending_ttl(), std::time::Duration::from_secs(900));
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.limits.model_calls_per_run, Some(10));
    assert_eq!(config.limits.model_calls_per_session, None);
    assert_eq!(config.limits.exit_behavior, LimitExit::End);
    assert_eq!(config.sweep.interval_seconds, 15);
    assert!(config.sweep.enabled);
    assert_eq!(config.retention.days, 7);
    assert_eq!(config.model.as_ref().map(|m| m.command.as_str()), Some("llm-cli"));
    assert_eq!(config.tools["write_file"].timeout_seconds, Some(5));
    assert_eq!(
        config.policy.interrupt_on,
        vec![
            ToolRuleConfig {
                pattern: "write_*".into(),
                pause: true,
            },
            ToolRuleConfig {
                pattern: "*".into(),
                pause: false,
            },
        ]
    );
    assert_eq!(config.policy.risk.as_ref().map(|r| r.threshold), Some(50));
    assert_eq!(config.policy.description_prefix, "Approval needed");
}

#[test]
fn parses_agent_steps() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("config parses");
    let agent = &config.agents[0];
    agent.validate().expect("agent is valid");

    assert_eq!(agent.id, "writer");
    assert_eq!(
        agent.input_schema.as_ref().map(|s| s.kind),
        Some(SchemaType::Object)
    );
    assert_eq!(agent.steps.len(), 5);
    assert!(matches!(agent.steps[0].action, StepAction::LlmCall { .. }));
    assert!(matches!(
        agent.steps[1].action,
        StepAction::Interrupt {
            ttl_seconds: Some(120),
            ..
        }
    ));
    assert!(matches!(agent.steps[1].next, StepNext::Branch { .. }));
    assert!(matches!(
        agent.steps[2].action,
        StepAction::ToolCall { args: None, .. }
    ));
    assert_eq!(agent.steps[2].next, StepNext::Sequential);
    assert_eq!(
        agent.steps[4].action,
        StepAction::Terminal {
            result: Some(json!("denied"))
        }
    );
}

#[test]
fn minimal_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("db_path = \"engine.db\"").expect("minimal config");

    assert_eq!(config.timeouts.pending_request_seconds, 3600);
    assert_eq!(config.timeouts.model_seconds, 120);
    assert_eq!(config.timeouts.tool_seconds, 60);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.initial_backoff_ms, 250);
    assert_eq!(config.retry.max_backoff_ms, 5000);
    assert_eq!(config.limits.exit_behavior, LimitExit::Error);
    assert_eq!(config.sweep.interval_seconds, 30);
    assert!(config.retention.enabled);
    assert_eq!(config.retention.days, 30);
    assert!(config.model.is_none());
    assert!(config.tools.is_empty());
    assert!(config.agents.is_empty());
    assert!(!config.policy.always_pause);
    assert_eq!(
        config.policy.description_prefix,
        "Tool execution pending approval"
    );
}

#[test]
fn zero_attempts_is_rejected() {
    let err = GlobalConfig::from_toml_str("db_path = \"x.db\"\n[retry]\nmax_attempts = 0")
        .expect_err("invalid retry");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn inverted_backoff_is_rejected() {
    let raw = "db_path = \"x.db\"\n[retry]\ninitial_backoff_ms = 900\nmax_backoff_ms = 100";
    let err = GlobalConfig::from_toml_str(raw).expect_err("invalid backoff");
    assert!(err.to_string().contains("initial_backoff_ms"));
}

#[test]
fn zero_pending_timeout_is_rejected() {
    let raw = "db_path = \"x.db\"\n[timeouts]\npending_request_seconds = 0";
    assert!(GlobalConfig::from_toml_str(raw).is_err());
}

#[test]
fn oversized_pending_timeout_is_rejected() {
    let raw = "db_path = \"x.db\"\n[timeouts]\npending_request_seconds = 10000000000000";
    let err = GlobalConfig::from_toml_str(raw).expect_err("unbounded ttl");
    assert!(err.to_string().contains("pending_request_seconds"));
}

#[test]
fn agent_ttl_beyond_bound_fails_agent_validation() {
    let raw = r#"
db_path = "x.db"

[[agents]]
id = "gate"

[[agents.steps]]
id = "ask"
kind = "interrupt"
ttl_seconds = 10000000000000

[[agents.steps]]
id = "end"
kind = "terminal"
"#;
    let config = GlobalConfig::from_toml_str(raw).expect("parses");
    assert!(config.agents[0].validate().is_err());
}

#[test]
fn zero_risk_threshold_is_rejected() {
    let raw = "db_path = \"x.db\"\n[policy.risk]\nthreshold = 0";
    assert!(GlobalConfig::from_toml_str(raw).is_err());
}

#[test]
fn missing_db_path_is_rejected() {
    let err = GlobalConfig::from_toml_str("[retry]\nmax_attempts = 2").expect_err("no db_path");
    assert!(err.to_string().starts_with("config:"));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, sample_toml()).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.agents.len(), 1);

    let missing = GlobalConfig::load_from_path(dir.path().join("absent.toml"));
    assert!(matches!(missing, Err(AppError::Config(_))));
}
