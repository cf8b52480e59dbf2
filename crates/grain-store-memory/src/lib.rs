#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **grain-store-memory** – In-memory event store driver for Grain.
//!
//! A fast, non-persistent backend suitable for testing, development, and
//! for specifying the store contract: an ordered log plus a `(kind, value)`
//! tag index, serialized appends, and publication to the bus while the
//! append lock is held so that a subscriber observing an event may assume
//! it is already durable in the log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use uuid::{ContextV7, Timestamp, Uuid};

use grain_bus_core::PubSub;
use grain_store_core::{ConnConfig, EventQuery, EventStore, StoreConfig};
use grain_types::{Anomaly, Event, EventId, SchemaRegistry, Tag, TX_EVENT_KIND};

//─────────────────────────────
//  Log state
//─────────────────────────────

#[derive(Default)]
struct Log {
    // ascending by identifier; append-only
    events: Vec<Event>,
    // identifier → position in `events`
    positions: HashMap<EventId, usize>,
    // (kind, value) → ascending posting list of identifiers
    tag_index: HashMap<Tag, Vec<EventId>>,
    last_id: Option<EventId>,
}

impl Log {
    fn insert(&mut self, id: EventId, event: Event) {
        for tag in &event.tags {
            self.tag_index.entry(tag.clone()).or_default().push(id);
        }
        self.positions.insert(id, self.events.len());
        self.events.push(event);
        self.last_id = Some(id);
    }
}

//─────────────────────────────
//  In-memory store
//─────────────────────────────

/// An in-memory, non-persistent event store.
///
/// All data is lost when the process terminates. Appends serialize on one
/// write lock; reads take a shared lock and never block each other.
#[derive(Clone)]
pub struct MemoryStore {
    log: Arc<RwLock<Log>>,
    bus: PubSub,
    schemas: Arc<SchemaRegistry>,
    clock: Arc<Mutex<ContextV7>>,
}

impl MemoryStore {
    /// Open a store publishing onto `bus`, validating appends against
    /// `schemas`.
    pub fn new(bus: PubSub, schemas: Arc<SchemaRegistry>) -> Self {
        Self {
            log: Arc::new(RwLock::new(Log::default())),
            bus,
            schemas,
            clock: Arc::new(Mutex::new(ContextV7::new())),
        }
    }

    /// Open a store from configuration.
    ///
    /// Only the in-memory connection type is supported by this driver.
    pub fn open(
        config: &StoreConfig,
        bus: PubSub,
        schemas: Arc<SchemaRegistry>,
    ) -> Result<Self, Anomaly> {
        match &config.conn {
            ConnConfig::InMemory => Ok(Self::new(bus, schemas)),
            ConnConfig::Postgres { .. } => Err(Anomaly::unavailable(
                "postgres event store driver is not available in this build",
            )),
        }
    }

    /// Stop the store: closes the bus, so outstanding subscribers observe
    /// end-of-stream. The log itself stays readable until dropped.
    pub fn stop(&self) {
        self.bus.close();
    }

    /// Number of stored records, transaction markers included.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }

    /// Identifier of the most recently appended record.
    pub async fn last_id(&self) -> Option<EventId> {
        self.log.read().await.last_id
    }

    /// Clear the log. Testing helper; subscriptions stay live.
    pub async fn clear(&self) {
        let mut log = self.log.write().await;
        *log = Log::default();
    }

    /// Mint an identifier strictly greater than `last`.
    ///
    /// `ContextV7` sequences ids minted within the same millisecond; the
    /// comparison loop turns that into a checked guarantee instead of a
    /// clock assumption.
    fn mint_id(&self, last: Option<EventId>) -> EventId {
        loop {
            let id = Uuid::new_v7(Timestamp::now(self.clock.as_ref()));
            if last.map_or(true, |l| id > l) {
                return id;
            }
        }
    }

    fn validate_batch(&self, events: &[Event]) -> Result<(), Anomaly> {
        for event in events {
            if let Err(reason) = event.validate() {
                return Err(Anomaly::incorrect("Invalid event")
                    .with_explain(serde_json::json!({
                        "kind": event.kind,
                        "error": reason,
                    })));
            }
            if let Err(explain) = self.schemas.check(&event.kind, &event.body) {
                return Err(Anomaly::incorrect(format!(
                    "Event failed schema validation: {}",
                    event.kind
                ))
                .with_explain(explain));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn append(&self, events: Vec<Event>) -> Result<Vec<EventId>, Anomaly> {
        self.validate_batch(&events)?;

        let mut log = self.log.write().await;

        // Assign identifiers first so the whole batch can be rejected
        // before anything becomes visible.
        let mut assigned = Vec::with_capacity(events.len());
        let mut prepared = Vec::with_capacity(events.len() + 1);
        let mut last = log.last_id;
        for mut event in events {
            let id = match event.id {
                Some(id) if log.positions.contains_key(&id) => {
                    return Err(Anomaly::conflict(format!(
                        "Event {id} is already in the log"
                    )));
                }
                Some(id) if last.map_or(false, |l| id <= l) => {
                    return Err(Anomaly::incorrect(format!(
                        "Event {id} would break identifier ordering"
                    )));
                }
                Some(id) => id,
                None => self.mint_id(last),
            };
            event.id = Some(id);
            last = Some(id);
            assigned.push(id);
            prepared.push((id, event));
        }

        let marker_id = self.mint_id(last);
        let mut marker = Event::new(TX_EVENT_KIND, serde_json::Map::new());
        marker.id = Some(marker_id);
        prepared.push((marker_id, marker));

        for (id, event) in &prepared {
            log.insert(*id, event.clone());
        }
        trace!(batch = assigned.len(), "appended batch");

        // Publish while still holding the append lock: a subscriber that
        // sees an event can rely on it being in the log, and batches reach
        // each subscription contiguously in append order.
        for (_, event) in &prepared {
            self.bus.publish(event).await;
        }

        Ok(assigned)
    }

    async fn read(&self, query: &EventQuery) -> Result<Vec<Event>, Anomaly> {
        let log = self.log.read().await;
        let limit = query.limit.unwrap_or(usize::MAX);

        // Tag-filtered reads intersect the posting lists, then join back to
        // the main log for the remaining filters.
        let events: Vec<Event> = match &query.tags {
            Some(tags) if !tags.is_empty() => {
                let mut lists: Vec<&Vec<EventId>> = Vec::with_capacity(tags.len());
                for tag in tags {
                    match log.tag_index.get(tag) {
                        Some(list) => lists.push(list),
                        None => return Ok(Vec::new()),
                    }
                }
                lists.sort_by_key(|l| l.len());
                let Some((shortest, rest)) = lists.split_first() else {
                    return Ok(Vec::new());
                };
                shortest
                    .iter()
                    .copied()
                    .filter(|id| rest.iter().all(|list| list.binary_search(id).is_ok()))
                    .filter_map(|id| log.positions.get(&id).map(|&pos| &log.events[pos]))
                    .filter(|event| query.matches(event))
                    .take(limit)
                    .cloned()
                    .collect()
            }
            _ => log
                .events
                .iter()
                .filter(|event| query.matches(event))
                .take(limit)
                .cloned()
                .collect(),
        };

        debug!(matched = events.len(), "read");
        Ok(events)
    }
}
