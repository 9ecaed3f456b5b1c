//! Pending human request and response schema validation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound for a pending-request time-to-live: one year.
pub const MAX_PENDING_TTL_SECONDS: u64 = 366 * 24 * 60 * 60;

/// Action an interrupt is gating, surfaced to the approver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposedAction {
    /// Tool that will be invoked after approval.
    pub tool: String,
    /// Resolved tool arguments.
    pub args: Value,
}

/// Request for human input; exists only while a session waits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingRequest {
    /// Interrupt step that raised the request.
    pub step_id: String,
    /// Description shown to the approver.
    pub prompt: String,
    /// Shape the human answer must satisfy.
    pub response_schema: ResponseSchema,
    /// Deadline after which the session fails.
    pub expires_at: DateTime<Utc>,
    /// Tool call gated by this request, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_action: Option<ProposedAction>,
}

impl PendingRequest {
    /// Expiry rule shared by lazy evaluation and the background sweep.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// JSON value type accepted by a [`ResponseSchema`] node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// JSON string.
    String,
    /// Any JSON number.
    Number,
    /// Integral JSON number.
    Integer,
    /// JSON boolean.
    Boolean,
    /// JSON null.
    Null,
    /// Anything.
    Any,
}

impl SchemaType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Null => value.is_null(),
            Self::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Null => "null",
            Self::Any => "any",
        }
    }
}

fn default_schema_type() -> SchemaType {
    SchemaType::Any
}

/// Subset of JSON Schema used to validate human responses and agent input.
///
/// Supports `type`, `required`, `properties`, `items` and `enum`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseSchema {
    /// Expected value type.
    #[serde(rename = "type", default = "default_schema_type")]
    pub kind: SchemaType,
    /// Keys that must be present on an object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Per-key schemas for object members.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, ResponseSchema>,
    /// Schema applied to each array element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ResponseSchema>>,
    /// Closed set of permitted values.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl ResponseSchema {
    /// Schema accepting any value.
    #[must_use]
    pub fn any() -> Self {
        Self::of(SchemaType::Any)
    }

    /// Schema accepting a single value type.
    #[must_use]
    pub fn of(kind: SchemaType) -> Self {
        Self {
            kind,
            required: Vec::new(),
            properties: BTreeMap::new(),
            items: None,
            allowed: None,
        }
    }

    /// Default approval shape: `{"approved": <bool>}` with an optional
    /// free-text `comment`.
    #[must_use]
    pub fn approval() -> Self {
        let mut schema = Self::of(SchemaType::Object);
        schema.required.push("approved".into());
        schema
            .properties
            .insert("approved".into(), Self::of(SchemaType::Boolean));
        schema
            .properties
            .insert("comment".into(), Self::of(SchemaType::String));
        schema
    }

    /// Validate `value` against the schema.
    ///
    /// # Errors
    ///
    /// Returns a description of the first mismatch, prefixed with the JSON
    /// path at which it was found.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        self.validate_at("$", value)
    }

    fn validate_at(&self, path: &str, value: &Value) -> std::result::Result<(), String> {
        if !self.kind.matches(value) {
            return Err(format!("{path}: expected {}", self.kind.name()));
        }

        if let Some(ref allowed) = self.allowed {
            if !allowed.contains(value) {
                return Err(format!("{path}: value not in permitted set"));
            }
        }

        if let Value::Object(map) = value {
            for key in &self.required {
                if !map.contains_key(key) {
                    return Err(format!("{path}: missing required key `{key}`"));
                }
            }
            for (key, schema) in &self.properties {
                if let Some(member) = map.get(key) {
                    schema.validate_at(&format!("{path}.{key}"), member)?;
                }
            }
        }

        if let (Value::Array(elements), Some(items)) = (value, self.items.as_deref()) {
            for (idx, element) in elements.iter().enumerate() {
                items.validate_at(&format!("{path}[{idx}]"), element)?;
            }
        }

        Ok(())
    }
}
