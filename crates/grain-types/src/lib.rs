#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **grain-types** – Shared primitive data structures for Grain.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It defines the persisted event envelope, the transient command and query
//! envelopes, the anomaly taxonomy used for error reporting across the whole
//! runtime, and the declarative payload schemas that the dispatch and storage
//! layers validate against.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

mod anomaly;
mod schema;

pub use anomaly::{Anomaly, AnomalyCategory};
pub use schema::{FieldKind, Schema, SchemaRegistry};

//─────────────────────────────
//  Validation limits
//─────────────────────────────

/// Maximum allowed length for command and query names.
pub const MAX_ENVELOPE_NAME_LEN: usize = 256;

/// Maximum allowed length for event kinds.
pub const MAX_EVENT_KIND_LEN: usize = 256;

/// Maximum allowed length for a tag kind or tag value.
pub const MAX_TAG_COMPONENT_LEN: usize = 256;

//─────────────────────────────
//  Events
//─────────────────────────────

/// Unique, time-ordered identifier of a committed event (UUID v7).
///
/// Sorting stored events by identifier equals sorting them by append time,
/// even across process restarts.
pub type EventId = Uuid;

/// Event kind of the synthetic transaction marker appended by the store at
/// the end of every append batch.
pub const TX_EVENT_KIND: &str = "grain.tx";

/// Secondary-index key attached to an event: a `(kind, value)` pair.
///
/// Tags are the store's only secondary index; a tag-filtered read returns
/// events carrying *all* queried tags.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Index dimension, e.g. `counter-id`.
    pub kind: String,
    /// Indexed value, e.g. a UUID rendered as text.
    pub value: String,
}

impl Tag {
    /// Build a tag from any string-ish pair.
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self { kind: kind.into(), value: value.into() }
    }

    /// Validate component lengths.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind.trim().is_empty() {
            return Err("Tag kind cannot be empty".to_string());
        }
        if self.kind.len() > MAX_TAG_COMPONENT_LEN || self.value.len() > MAX_TAG_COMPONENT_LEN {
            return Err("Tag component exceeds maximum length".to_string());
        }
        Ok(())
    }
}

/// An immutable domain fact.
///
/// Handlers construct events without an identifier; the event store assigns
/// a v7 identifier at append time, so `id` is `None` exactly while the event
/// is in flight between a handler and the log. Events handed out by the
/// store always carry `Some(id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned identifier; `None` until the event is appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EventId>,
    /// Namespaced kind, e.g. `counter.created`.
    pub kind: String,
    /// Wall-clock UTC timestamp taken when the event was constructed.
    pub timestamp: DateTime<Utc>,
    /// Opaque structured body.
    #[serde(default)]
    pub body: Map<String, Value>,
    /// Secondary-index tags.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<Tag>,
}

impl Event {
    /// Create a new unstored event with the given kind and body.
    pub fn new(kind: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            timestamp: Utc::now(),
            body,
            tags: BTreeSet::new(),
        }
    }

    /// Attach a tag, consuming and returning the event for chaining.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.insert(tag);
        self
    }

    /// Whether this event is the synthetic transaction marker closing an
    /// append batch.
    pub fn is_tx_marker(&self) -> bool {
        self.kind == TX_EVENT_KIND
    }

    /// Validate the envelope fields.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind.trim().is_empty() {
            return Err("Event kind cannot be empty".to_string());
        }
        if self.kind.len() > MAX_EVENT_KIND_LEN {
            return Err("Event kind exceeds maximum length".to_string());
        }
        for tag in &self.tags {
            tag.validate()?;
        }
        Ok(())
    }
}

//─────────────────────────────
//  Commands and queries
//─────────────────────────────

/// An intent to change state.
///
/// Commands are transient: they exist only for the duration of processing
/// and are never persisted. The transport boundary stamps `id` and
/// `timestamp`; application code normally only supplies `name` and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Namespaced handler name, e.g. `counter.create`.
    pub name: String,
    /// Per-invocation identifier generated at the transport boundary.
    pub id: Uuid,
    /// Wall-clock UTC timestamp stamped at the transport boundary.
    pub timestamp: DateTime<Utc>,
    /// Handler-specific payload fields, kept apart from the envelope so
    /// payload keys can never shadow `name`, `id` or `timestamp`.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Command {
    /// Create a command with a fresh id and current timestamp.
    pub fn new(name: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Validate the generic command envelope.
    pub fn validate(&self) -> Result<(), String> {
        validate_envelope_name(&self.name)
    }
}

/// A request for data.
///
/// Same shape and lifecycle as [`Command`]; queries never write to the
/// event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Namespaced handler name, e.g. `counter.by-id`.
    pub name: String,
    /// Per-invocation identifier generated at the transport boundary.
    pub id: Uuid,
    /// Wall-clock UTC timestamp stamped at the transport boundary.
    pub timestamp: DateTime<Utc>,
    /// Handler-specific payload fields.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Query {
    /// Create a query with a fresh id and current timestamp.
    pub fn new(name: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Validate the generic query envelope.
    pub fn validate(&self) -> Result<(), String> {
        validate_envelope_name(&self.name)
    }
}

fn validate_envelope_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name cannot be empty".to_string());
    }
    if name.len() > MAX_ENVELOPE_NAME_LEN {
        return Err(format!(
            "Name too long: {} > {}",
            name.len(),
            MAX_ENVELOPE_NAME_LEN
        ));
    }
    Ok(())
}

//─────────────────────────────
//  Handler outcomes
//─────────────────────────────

/// Success value of a command handler.
///
/// Until the processor stores them, `emitted_events` carry no identifiers;
/// after storage the assigned identifiers are merged back in, so callers
/// observing a processed outcome can correlate with the log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Events the handler wants appended to the log.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emitted_events: Vec<Event>,
    /// Optional caller-facing result value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl CommandOutcome {
    /// An outcome with neither events nor result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An outcome carrying only a result value.
    pub fn with_result(result: Value) -> Self {
        Self { emitted_events: Vec::new(), result: Some(result) }
    }

    /// An outcome carrying only emitted events.
    pub fn with_events(events: Vec<Event>) -> Self {
        Self { emitted_events: events, result: None }
    }

    /// Attach a result value, consuming and returning the outcome.
    pub fn and_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// Success value of a query handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    /// The query result value.
    pub result: Value,
}

impl QueryOutcome {
    /// Wrap a result value.
    pub fn new(result: Value) -> Self {
        Self { result }
    }
}

/// Success value of a todo-processor handler.
///
/// Unlike [`CommandOutcome`] there is no caller to hand a result to, so the
/// only channel back into the system is further events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodoOutcome {
    /// Events the handler wants appended to the log.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_events: Vec<Event>,
}

impl TodoOutcome {
    /// An outcome with no resulting events.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An outcome carrying events to append.
    pub fn with_events(events: Vec<Event>) -> Self {
        Self { result_events: events }
    }
}
