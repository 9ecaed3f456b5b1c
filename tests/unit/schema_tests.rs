//! Response schema parsing and validation paths.

use agent_waypoint::models::pending::{ResponseSchema, SchemaType};
use serde_json::json;

fn parse(raw: serde_json::Value) -> ResponseSchema {
    serde_json::from_value(raw).expect("schema parses")
}

#[test]
fn missing_type_means_any() {
    let schema = parse(json!({}));
    assert_eq!(schema.kind, SchemaType::Any);
    assert!(schema.validate(&json!(null)).is_ok());
    assert!(schema.validate(&json!([1, "two"])).is_ok());
}

#[test]
fn nested_properties_report_their_path() {
    let schema = parse(json!({
        "type": "object",
        "required": ["decision"],
        "properties": {
            "decision": {
                "type": "object",
                "required": ["choice"],
                "properties": {
                    "choice": {"type": "string", "enum": ["ship", "hold"]},
                    "priority": {"type": "integer"}
                }
            }
        }
    }));

    assert!(schema
        .validate(&json!({"decision": {"choice": "ship", "priority": 2}}))
        .is_ok());
    assert_eq!(
        schema
            .validate(&json!({"decision": {"choice": "later"}}))
            .expect_err("not permitted"),
        "$.decision.choice: value not in permitted set"
    );
    assert_eq!(
        schema
            .validate(&json!({"decision": {"choice": "ship", "priority": 1.5}}))
            .expect_err("not integral"),
        "$.decision.priority: expected integer"
    );
    assert_eq!(
        schema.validate(&json!({"decision": {}})).expect_err("missing"),
        "$.decision: missing required key `choice`"
    );
}

#[test]
fn top_level_type_mismatch() {
    let schema = ResponseSchema::of(SchemaType::Object);
    assert_eq!(
        schema.validate(&json!("approve")).expect_err("string"),
        "$: expected object"
    );
}

#[test]
fn number_accepts_integers_and_floats() {
    let schema = ResponseSchema::of(SchemaType::Number);
    assert!(schema.validate(&json!(3)).is_ok());
    assert!(schema.validate(&json!(3.5)).is_ok());
    assert!(schema.validate(&json!("3")).is_err());
}

#[test]
fn approval_schema_serializes_compactly() {
    let encoded = serde_json::to_value(ResponseSchema::approval()).expect("serialize");
    assert_eq!(
        encoded,
        json!({
            "type": "object",
            "required": ["approved"],
            "properties": {
                "approved": {"type": "boolean"},
                "comment": {"type": "string"}
            }
        })
    );
}
