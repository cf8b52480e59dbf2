#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **grain-projection** – Read model projector for Grain.
//!
//! A projection folds events matching a query into state. The projector
//! keeps a `(state, watermark)` snapshot per `(name, version)` in the KV
//! store, reads only events newer than the watermark, and folds them on top
//! of the cached state - so projection cost tracks the write rate, not the
//! log size. The cache is an optimization only: the returned state always
//! equals the fold over every matching event at call time, and deleting a
//! snapshot changes latency, never the result.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use grain_kv::SnapshotStore;
use grain_store_core::{EventQuery, EventStore};
use grain_types::{Anomaly, Event, EventId};

/// On a cache hit, the snapshot is rewritten only when at least this many
/// events were folded on top of it. Amortizes serialization cost against
/// projection frequency; a cache miss always writes back.
pub const SNAPSHOT_WRITEBACK_THRESHOLD: usize = 10;

/// Fold step applied per event, oldest first.
pub type FoldFn<S> = Arc<dyn Fn(S, &Event) -> S + Send + Sync>;

//─────────────────────────────
//  Projection definition
//─────────────────────────────

/// A named, versioned fold over a slice of the event log.
///
/// Incrementing `version` changes the snapshot key and therefore forces a
/// full rebuild - the correct way to deploy a changed fold.
pub struct Projection<S> {
    /// Snapshot namespace, e.g. `counters`.
    pub name: String,
    /// Fold version; part of the snapshot key.
    pub version: u32,
    /// Which events feed the fold.
    pub query: EventQuery,
    /// The fold step.
    pub fold: FoldFn<S>,
}

impl<S> Projection<S> {
    /// Define a projection.
    pub fn new(
        name: impl Into<String>,
        version: u32,
        query: EventQuery,
        fold: impl Fn(S, &Event) -> S + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            query,
            fold: Arc::new(fold),
        }
    }

    /// The snapshot key for this `(name, version)` pair.
    pub fn snapshot_key(&self) -> Vec<u8> {
        format!("{}@v{}", self.name, self.version).into_bytes()
    }
}

impl<S> Clone for Projection<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            version: self.version,
            query: self.query.clone(),
            fold: Arc::clone(&self.fold),
        }
    }
}

impl<S> std::fmt::Debug for Projection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projection")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

//─────────────────────────────
//  Snapshot encoding
//─────────────────────────────

#[derive(Deserialize)]
struct Snapshot<S> {
    state: S,
    watermark: Option<EventId>,
}

#[derive(Serialize)]
struct SnapshotRef<'a, S> {
    state: &'a S,
    watermark: Option<EventId>,
}

//─────────────────────────────
//  Projector
//─────────────────────────────

/// Fold all events matching the projection's query into state, using and
/// maintaining the snapshot cache.
///
/// The invariant is cache transparency: for a fixed `(name, version, query,
/// fold)` the result equals the left-fold over every matching event at call
/// time, whether the snapshot was present, absent, or corrupt.
pub async fn project<S>(
    store: &dyn EventStore,
    cache: &dyn SnapshotStore,
    projection: &Projection<S>,
) -> Result<S, Anomaly>
where
    S: Serialize + DeserializeOwned + Default + Send,
{
    let key = projection.snapshot_key();

    let cached = match cache.get(&key).await? {
        Some(bytes) => match rmp_serde::from_slice::<Snapshot<S>>(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                // Undecodable snapshots fall back to a full rebuild.
                warn!(name = %projection.name, version = projection.version, error = %e,
                    "discarding corrupt snapshot");
                None
            }
        },
        None => None,
    };
    let cache_hit = cached.is_some();
    let (mut state, mut watermark) = match cached {
        Some(snapshot) => (snapshot.state, snapshot.watermark),
        None => (S::default(), None),
    };

    let mut query = projection.query.clone();
    query.after = match (query.after, watermark) {
        (Some(a), Some(w)) => Some(a.max(w)),
        (a, w) => a.or(w),
    };

    let events = store.read(&query).await?;
    let folded = events.len();
    for event in &events {
        state = (projection.fold)(state, event);
        if event.id.is_some() {
            watermark = event.id;
        }
    }

    if !cache_hit || folded >= SNAPSHOT_WRITEBACK_THRESHOLD {
        let bytes = rmp_serde::to_vec_named(&SnapshotRef { state: &state, watermark })
            .map_err(|e| Anomaly::fault(format!("failed to encode snapshot: {e}")))?;
        cache.put(&key, bytes).await?;
        debug!(name = %projection.name, version = projection.version, folded,
            "snapshot written");
    } else {
        debug!(name = %projection.name, version = projection.version, folded,
            "snapshot kept");
    }

    Ok(state)
}
