#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **grain-kernel** – Dispatch core of Grain.
//!
//! The kernel owns the write and read pipelines: commands are validated
//! against their registered schema, dispatched to a handler inside an error
//! boundary, and the events they emit are appended to the log in one atomic
//! batch; queries run the same validation and dispatch without the storage
//! step. Todo processors subscribe to the bus and react to committed events
//! asynchronously, one event at a time.
//!
//! Handlers live in explicit [`CommandRegistry`]/[`QueryRegistry`] objects
//! constructed at startup; a process-wide default instance exists for
//! convenience and the [`Context`] always takes precedence.

use std::sync::Arc;

use serde_json::{Map, Value};

use grain_store_core::EventStore;
use grain_types::{Command, Event, Query};

mod command;
mod query;
mod registry;
mod todo;

pub use command::process_command;
pub use query::process_query;
pub use registry::{
    command_handler, default_commands, default_queries, query_handler, register_command,
    register_query, todo_handler, CommandHandler, CommandRegistry, QueryHandler, QueryRegistry,
    TodoHandler,
};
pub use todo::{TodoProcessor, TodoProcessorConfig};

//─────────────────────────────
//  Processing context
//─────────────────────────────

/// The structured value threaded through every processing layer.
///
/// Well-known collaborators get typed fields; anything application-specific
/// (transport identity, tenant, trace ids) rides in the `extra` bag, which
/// the HTTP boundary merges from its configured `additional_context`.
#[derive(Clone)]
pub struct Context {
    /// The command being processed, if any.
    pub command: Option<Command>,
    /// The query being processed, if any.
    pub query: Option<Query>,
    /// The event being reacted to, if any (todo processors).
    pub event: Option<Event>,
    /// The event store handlers append through.
    pub event_store: Arc<dyn EventStore>,
    /// Command handler registry for this invocation.
    pub commands: Arc<CommandRegistry>,
    /// Query handler registry for this invocation.
    pub queries: Arc<QueryRegistry>,
    /// When set, emitted events are returned to the caller unstored so a
    /// parent command can aggregate them into its own append.
    pub skip_event_storage: bool,
    /// Open extension bag for application-specific entries.
    pub extra: Map<String, Value>,
}

impl Context {
    /// Build a context around a store and explicit registries.
    pub fn new(
        event_store: Arc<dyn EventStore>,
        commands: Arc<CommandRegistry>,
        queries: Arc<QueryRegistry>,
    ) -> Self {
        Self {
            command: None,
            query: None,
            event: None,
            event_store,
            commands,
            queries,
            skip_event_storage: false,
            extra: Map::new(),
        }
    }

    /// Attach the command under processing.
    pub fn with_command(mut self, command: Command) -> Self {
        self.command = Some(command);
        self
    }

    /// Attach the query under processing.
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    /// Attach the event being reacted to.
    pub fn with_event(mut self, event: Event) -> Self {
        self.event = Some(event);
        self
    }

    /// Set the skip-storage flag.
    pub fn skipping_event_storage(mut self, skip: bool) -> Self {
        self.skip_event_storage = skip;
        self
    }

    /// Merge entries into the extension bag; later entries win.
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra.extend(extra);
        self
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("command", &self.command.as_ref().map(|c| &c.name))
            .field("query", &self.query.as_ref().map(|q| &q.name))
            .field("event", &self.event.as_ref().map(|e| &e.kind))
            .field("skip_event_storage", &self.skip_event_storage)
            .finish_non_exhaustive()
    }
}
