//! Declarative payload schemas.
//!
//! A [`Schema`] is a flat list of field checks applied to a JSON payload
//! map. It covers the validation the dispatch and storage layers need
//! (presence and primitive shape of payload fields) without pulling in a
//! full schema language. Failures produce a structured explain value that
//! travels inside an `incorrect` anomaly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Primitive shape a payload field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON boolean.
    Bool,
    /// JSON string parseable as a UUID.
    Uuid,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// Any JSON value.
    Any,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Uuid => value
                .as_str()
                .map(|s| Uuid::parse_str(s).is_ok())
                .unwrap_or(false),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => true,
        }
    }

    fn expectation(&self) -> &'static str {
        match self {
            FieldKind::String => "expected a string",
            FieldKind::Number => "expected a number",
            FieldKind::Bool => "expected a boolean",
            FieldKind::Uuid => "expected a UUID string",
            FieldKind::Object => "expected an object",
            FieldKind::Array => "expected an array",
            FieldKind::Any => "expected a value",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FieldSpec {
    name: String,
    kind: FieldKind,
    required: bool,
}

/// A flat payload schema: field name, shape, required-ness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    /// An empty schema accepting any payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field check.
    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec { name: name.into(), kind, required: true });
        self
    }

    /// Add an optional field check (shape is enforced only when present).
    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec { name: name.into(), kind, required: false });
        self
    }

    /// Check a payload map against the schema.
    ///
    /// Returns a structured explain value listing every problem found, so a
    /// caller gets all validation failures in one round trip.
    pub fn check(&self, payload: &Map<String, Value>) -> Result<(), Value> {
        let mut problems = Vec::new();
        for field in &self.fields {
            match payload.get(&field.name) {
                None if field.required => {
                    problems.push(json!({
                        "field": field.name,
                        "error": "missing required field",
                    }));
                }
                None => {}
                Some(value) => {
                    if !field.kind.matches(value) {
                        problems.push(json!({
                            "field": field.name,
                            "error": field.kind.expectation(),
                        }));
                    }
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(json!({ "problems": problems }))
        }
    }
}

/// Payload-name to schema lookup shared by the dispatch and storage layers.
///
/// One registry instance typically covers command names, another event
/// kinds. Names without a registered schema pass validation.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Schema>,
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema under a payload name, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, schema: Schema) {
        self.schemas.insert(name.into(), schema);
    }

    /// Look up the schema registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    /// Check `payload` against the schema registered under `name`, if any.
    pub fn check(&self, name: &str, payload: &Map<String, Value>) -> Result<(), Value> {
        match self.schemas.get(name) {
            Some(schema) => schema.check(payload),
            None => Ok(()),
        }
    }
}
