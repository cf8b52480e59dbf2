#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **grain-runtime** – Runtime wiring for Grain.
//!
//! This crate assembles the individual subsystems into one running unit:
//! bus → event store → handler registries → snapshot cache, plus the todo
//! processors reacting to committed events. It owns component lifecycle -
//! construction order, processor spawning and graceful shutdown - and
//! provides the convenient entry points applications use instead of wiring
//! contexts by hand.

use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use grain_bus_core::{PubSub, PubSubConfig, Subscription};
use grain_http::AppState;
use grain_kernel::{
    default_commands, default_queries, process_command, process_query, CommandRegistry, Context,
    QueryRegistry, TodoHandler, TodoProcessor, TodoProcessorConfig,
};
use grain_kv::{KvConfig, MemoryKv, SledKv, SnapshotStore};
use grain_projection::{project, Projection};
use grain_store_core::{EventStore, StoreConfig};
use grain_store_memory::MemoryStore;
use grain_types::{
    Anomaly, Command, CommandOutcome, Query, QueryOutcome, SchemaRegistry,
};

//─────────────────────────────
//  Configuration
//─────────────────────────────

/// Configuration for a Grain runtime instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Event store backend settings.
    pub store: StoreConfig,
    /// Per-subscription bus queue capacity.
    pub bus_buffer: usize,
    /// Snapshot cache backend settings.
    pub snapshots: SnapshotConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            bus_buffer: grain_bus_core::DEFAULT_BUFFER,
            snapshots: SnapshotConfig::Memory,
        }
    }
}

/// Snapshot cache backend options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SnapshotConfig {
    /// In-memory snapshot cache (non-persistent).
    Memory,
    /// Sled-backed persistent snapshot cache.
    Sled(KvConfig),
}

/// Configuration suitable for unit and integration tests: in-memory
/// everything and a small bus buffer.
pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        store: StoreConfig::default(),
        bus_buffer: 16,
        snapshots: SnapshotConfig::Memory,
    }
}

//─────────────────────────────
//  Runtime
//─────────────────────────────

/// A complete Grain instance: bus, event store, registries, snapshot cache
/// and the todo processors spawned on it.
pub struct Runtime {
    bus: PubSub,
    store: MemoryStore,
    store_handle: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    commands: Arc<CommandRegistry>,
    queries: Arc<QueryRegistry>,
    processors: Mutex<Vec<TodoProcessor>>,
}

impl Runtime {
    /// Construct a runtime from configuration and explicit registries.
    ///
    /// `schemas` drives append-time event validation in the store.
    pub fn new(
        config: RuntimeConfig,
        commands: CommandRegistry,
        queries: QueryRegistry,
        schemas: SchemaRegistry,
    ) -> Result<Self, Anomaly> {
        info!(?config, "initializing grain runtime");

        let bus = PubSub::new(PubSubConfig {
            buffer: config.bus_buffer,
            ..PubSubConfig::default()
        });
        debug!(buffer = config.bus_buffer, "created bus");

        let store = MemoryStore::open(&config.store, bus.clone(), Arc::new(schemas))?;
        let store_handle: Arc<dyn EventStore> = Arc::new(store.clone());
        debug!("opened event store");

        let snapshots: Arc<dyn SnapshotStore> = match &config.snapshots {
            SnapshotConfig::Memory => Arc::new(MemoryKv::new()),
            SnapshotConfig::Sled(kv) => Arc::new(SledKv::open(kv)?),
        };
        debug!("opened snapshot store");

        info!("grain runtime initialized");
        Ok(Self {
            bus,
            store,
            store_handle,
            snapshots,
            commands: Arc::new(commands),
            queries: Arc::new(queries),
            processors: Mutex::new(Vec::new()),
        })
    }

    /// Construct a runtime over the process-wide default registries.
    pub fn with_default_registries(
        config: RuntimeConfig,
        schemas: SchemaRegistry,
    ) -> Result<Self, Anomaly> {
        Self::new(config, default_commands(), default_queries(), schemas)
    }

    /// A fresh processing context over this runtime's collaborators.
    pub fn context(&self) -> Context {
        Context::new(
            self.store_handle.clone(),
            self.commands.clone(),
            self.queries.clone(),
        )
    }

    /// Validate, dispatch and persist one command.
    pub async fn process_command(&self, command: Command) -> Result<CommandOutcome, Anomaly> {
        process_command(self.context().with_command(command)).await
    }

    /// Validate and dispatch one query.
    pub async fn process_query(&self, query: Query) -> Result<QueryOutcome, Anomaly> {
        process_query(self.context().with_query(query)).await
    }

    /// Project a read model using this runtime's store and snapshot cache.
    pub async fn project<S>(&self, projection: &Projection<S>) -> Result<S, Anomaly>
    where
        S: Serialize + DeserializeOwned + Default + Send,
    {
        project(self.store_handle.as_ref(), self.snapshots.as_ref(), projection).await
    }

    /// Spawn a todo processor reacting to `topics`.
    ///
    /// The processor is owned by the runtime and stopped during
    /// [`Runtime::shutdown`].
    pub fn spawn_todo_processor(
        &self,
        name: impl Into<String>,
        topics: Vec<String>,
        handler: TodoHandler,
    ) {
        let processor = TodoProcessor::start(TodoProcessorConfig {
            name: name.into(),
            bus: self.bus.clone(),
            topics,
            handler,
            context: self.context(),
        });
        self.processors
            .lock()
            .expect("processor table poisoned")
            .push(processor);
    }

    /// Per-processor `(name, events_processed)` counters.
    pub fn processor_stats(&self) -> Vec<(String, u64)> {
        self.processors
            .lock()
            .expect("processor table poisoned")
            .iter()
            .map(|p| (p.name().to_string(), p.events_processed()))
            .collect()
    }

    /// Subscribe directly to the bus.
    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription {
        self.bus.subscribe(topic)
    }

    /// The event store handle.
    pub fn event_store(&self) -> Arc<dyn EventStore> {
        self.store_handle.clone()
    }

    /// The snapshot store handle.
    pub fn snapshot_store(&self) -> Arc<dyn SnapshotStore> {
        self.snapshots.clone()
    }

    /// The bus handle.
    pub fn bus(&self) -> PubSub {
        self.bus.clone()
    }

    /// Build an axum router serving this runtime over HTTP.
    ///
    /// `additional_context` is merged into every request's processing
    /// context (transport identity and the like).
    pub fn router(
        &self,
        additional_context: serde_json::Map<String, serde_json::Value>,
    ) -> axum::Router {
        let state = AppState::new(
            self.store_handle.clone(),
            self.commands.clone(),
            self.queries.clone(),
        )
        .with_additional_context(additional_context);
        grain_http::router(state)
    }

    /// Shutdown gracefully: stop every todo processor (letting in-flight
    /// handlers finish), then stop the store, which closes the bus and
    /// signals end-of-stream to any remaining subscribers.
    pub async fn shutdown(self) {
        info!("shutting down grain runtime");

        let processors = {
            let mut guard = self.processors.lock().expect("processor table poisoned");
            std::mem::take(&mut *guard)
        };
        for processor in processors {
            processor.stop().await;
        }

        self.store.stop();
        info!("grain runtime shutdown complete");
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}
