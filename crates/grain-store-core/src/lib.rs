#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **grain-store-core** – Core event store abstraction for Grain.
//!
//! This crate defines the contract for event persistence without providing
//! concrete implementations. A store is an ordered, append-only log of typed
//! events with a tag index: appends are atomic per batch, identifiers are
//! strictly increasing in append order, and every appended record is fanned
//! out to the pub/sub bus before the append call returns. Storage drivers
//! (in-memory, postgres, …) implement [`EventStore`] in separate crates that
//! depend on this core abstraction.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use grain_types::{Anomaly, Event, EventId, Tag};

//─────────────────────────────
//  Read queries
//─────────────────────────────

/// Filter over the event log. All fields are optional; an empty query
/// matches every stored record, transaction markers included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventQuery {
    /// Match events of any of these kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<BTreeSet<String>>,
    /// Match events carrying *all* of these tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<Tag>>,
    /// Only events with identifier strictly greater than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<EventId>,
    /// Only events with identifier less than or equal to this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<EventId>,
    /// Cap on the number of returned events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl EventQuery {
    /// A query matching everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a single kind.
    pub fn of_kind(kind: impl Into<String>) -> Self {
        Self {
            kinds: Some(BTreeSet::from([kind.into()])),
            ..Self::default()
        }
    }

    /// Restrict to any of the given kinds.
    pub fn of_kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kinds: Some(kinds.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Require a tag; repeated calls accumulate (AND semantics).
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.get_or_insert_with(BTreeSet::new).insert(tag);
        self
    }

    /// Lower identifier bound (exclusive).
    pub fn with_after(mut self, after: EventId) -> Self {
        self.after = Some(after);
        self
    }

    /// Upper identifier bound (inclusive).
    pub fn with_before(mut self, before: EventId) -> Self {
        self.before = Some(before);
        self
    }

    /// Cap the number of returned events.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a stored event matches the kind, tag and range filters.
    ///
    /// `limit` is a pagination concern and not part of per-event matching.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            if !tags.iter().all(|t| event.tags.contains(t)) {
                return false;
            }
        }
        match (event.id, self.after, self.before) {
            (None, _, _) => {
                // Unstored events carry no identifier and can never fall
                // inside an identifier range.
                self.after.is_none() && self.before.is_none()
            }
            (Some(id), after, before) => {
                after.map_or(true, |a| id > a) && before.map_or(true, |b| id <= b)
            }
        }
    }
}

//─────────────────────────────
//  Store contract
//─────────────────────────────

/// Ordered, append-only log of typed events with a tag index.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a batch of events atomically.
    ///
    /// Each event is validated against the schema registered for its kind
    /// (`incorrect` on failure, nothing is written). Events without an
    /// identifier are assigned a fresh time-ordered one. The batch plus one
    /// trailing transaction marker becomes visible to readers all at once,
    /// and every appended record is published to the bus before this call
    /// returns, so a subscriber observing an event may assume it is durable.
    ///
    /// Returns the identifiers assigned to the batch events, in order. The
    /// marker's identifier is not included.
    async fn append(&self, events: Vec<Event>) -> Result<Vec<EventId>, Anomaly>;

    /// Read events matching `query` in ascending identifier order.
    ///
    /// Transaction markers are stored records like any other: they show up
    /// unless the query's kind or tag filters exclude them, and callers
    /// wanting only domain events filter with [`Event::is_tx_marker`].
    async fn read(&self, query: &EventQuery) -> Result<Vec<Event>, Anomaly>;
}

/// Drop transaction markers from a read result.
pub fn domain_events(events: Vec<Event>) -> Vec<Event> {
    events.into_iter().filter(|e| !e.is_tx_marker()).collect()
}

//─────────────────────────────
//  Configuration
//─────────────────────────────

/// Event store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend connection settings.
    pub conn: ConnConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { conn: ConnConfig::InMemory }
    }
}

/// Backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnConfig {
    /// Non-persistent in-memory log.
    InMemory,
    /// Postgres-backed log. Accepted by configuration; the driver lives out
    /// of tree, so opening a store with it yields `unavailable`.
    Postgres {
        /// Connection string.
        url: String,
    },
}

//─────────────────────────────
//  Convenience re-exports
//─────────────────────────────

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use super::{domain_events, ConnConfig, EventQuery, EventStore, StoreConfig};
    pub use grain_types::{Anomaly, AnomalyCategory, Event, EventId, Tag, TX_EVENT_KIND};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use uuid::Uuid;

    fn stored(kind: &str, id: EventId) -> Event {
        let mut event = Event::new(kind, Map::new());
        event.id = Some(id);
        event
    }

    #[test]
    fn empty_query_matches_markers_too() {
        let query = EventQuery::all();
        let marker = stored(grain_types::TX_EVENT_KIND, Uuid::now_v7());
        assert!(query.matches(&marker));
    }

    #[test]
    fn kind_filter_matches_any() {
        let query = EventQuery::of_kinds(["a.x", "a.y"]);
        assert!(query.matches(&stored("a.x", Uuid::now_v7())));
        assert!(query.matches(&stored("a.y", Uuid::now_v7())));
        assert!(!query.matches(&stored("a.z", Uuid::now_v7())));
    }

    #[test]
    fn tag_filter_matches_all() {
        let query = EventQuery::all()
            .with_tag(Tag::new("k1", "v1"))
            .with_tag(Tag::new("k2", "v2"));
        let both = stored("t.x", Uuid::now_v7())
            .with_tag(Tag::new("k1", "v1"))
            .with_tag(Tag::new("k2", "v2"));
        let one = stored("t.x", Uuid::now_v7()).with_tag(Tag::new("k1", "v1"));
        assert!(query.matches(&both));
        assert!(!query.matches(&one));
    }

    #[test]
    fn range_is_half_open() {
        let low = Uuid::from_u128(0x1000);
        let mid = Uuid::from_u128(0x2000);
        let high = Uuid::from_u128(0x3000);
        let query = EventQuery::all().with_after(low).with_before(high);
        assert!(!query.matches(&stored("t.x", low)));
        assert!(query.matches(&stored("t.x", mid)));
        assert!(query.matches(&stored("t.x", high)));
    }

    #[test]
    fn conn_config_serde_tags_by_type() {
        let json = serde_json::to_value(StoreConfig::default()).unwrap();
        assert_eq!(json["conn"]["type"], serde_json::json!("in_memory"));
    }
}
