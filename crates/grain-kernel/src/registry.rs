//! Handler registries.
//!
//! A registry maps a namespaced name onto a handler plus the payload schema
//! validated before dispatch. Registries are explicit objects assembled at
//! startup and shared read-only behind `Arc`s afterwards; the process-wide
//! defaults below exist for applications that prefer registration at module
//! init over passing registries around, and the invocation [`Context`]
//! always wins over the defaults.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use once_cell::sync::Lazy;

use grain_types::{Anomaly, CommandOutcome, QueryOutcome, Schema, TodoOutcome};

use crate::Context;

/// Boxed async command handler.
pub type CommandHandler =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<CommandOutcome, Anomaly>> + Send + Sync>;

/// Boxed async query handler.
pub type QueryHandler =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<QueryOutcome, Anomaly>> + Send + Sync>;

/// Boxed async todo-processor handler.
pub type TodoHandler =
    Arc<dyn Fn(Context) -> BoxFuture<'static, Result<TodoOutcome, Anomaly>> + Send + Sync>;

/// Wrap an `async fn(Context) -> Result<CommandOutcome, Anomaly>` as a
/// [`CommandHandler`].
pub fn command_handler<F, Fut>(f: F) -> CommandHandler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<CommandOutcome, Anomaly>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Wrap an `async fn(Context) -> Result<QueryOutcome, Anomaly>` as a
/// [`QueryHandler`].
pub fn query_handler<F, Fut>(f: F) -> QueryHandler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<QueryOutcome, Anomaly>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Wrap an `async fn(Context) -> Result<TodoOutcome, Anomaly>` as a
/// [`TodoHandler`].
pub fn todo_handler<F, Fut>(f: F) -> TodoHandler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<TodoOutcome, Anomaly>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

#[derive(Clone)]
pub(crate) struct CommandEntry {
    pub(crate) handler: CommandHandler,
    pub(crate) schema: Option<Schema>,
}

#[derive(Clone)]
pub(crate) struct QueryEntry {
    pub(crate) handler: QueryHandler,
    pub(crate) schema: Option<Schema>,
}

/// Name → command handler registry.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    entries: HashMap<String, CommandEntry>,
}

impl CommandRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler and optional payload schema under `name`,
    /// replacing any previous registration.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: CommandHandler,
        schema: Option<Schema>,
    ) {
        self.entries.insert(name.into(), CommandEntry { handler, schema });
    }

    /// Whether a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, for diagnostics.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&CommandEntry> {
        self.entries.get(name)
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Name → query handler registry.
#[derive(Clone, Default)]
pub struct QueryRegistry {
    entries: HashMap<String, QueryEntry>,
}

impl QueryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler and optional payload schema under `name`,
    /// replacing any previous registration.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: QueryHandler,
        schema: Option<Schema>,
    ) {
        self.entries.insert(name.into(), QueryEntry { handler, schema });
    }

    /// Whether a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, for diagnostics.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&QueryEntry> {
        self.entries.get(name)
    }
}

impl std::fmt::Debug for QueryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

//─────────────────────────────
//  Process-wide defaults
//─────────────────────────────

static DEFAULT_COMMANDS: Lazy<RwLock<CommandRegistry>> =
    Lazy::new(|| RwLock::new(CommandRegistry::new()));

static DEFAULT_QUERIES: Lazy<RwLock<QueryRegistry>> =
    Lazy::new(|| RwLock::new(QueryRegistry::new()));

/// Register a command handler in the process-wide default registry.
///
/// Intended for startup; returns an error instead of panicking if the
/// registry lock is poisoned.
pub fn register_command(
    name: impl Into<String>,
    handler: CommandHandler,
    schema: Option<Schema>,
) -> Result<(), String> {
    DEFAULT_COMMANDS
        .write()
        .map_err(|_| "Command registry lock poisoned".to_string())?
        .register(name, handler, schema);
    Ok(())
}

/// Register a query handler in the process-wide default registry.
pub fn register_query(
    name: impl Into<String>,
    handler: QueryHandler,
    schema: Option<Schema>,
) -> Result<(), String> {
    DEFAULT_QUERIES
        .write()
        .map_err(|_| "Query registry lock poisoned".to_string())?
        .register(name, handler, schema);
    Ok(())
}

/// Snapshot of the process-wide default command registry.
pub fn default_commands() -> CommandRegistry {
    DEFAULT_COMMANDS
        .read()
        .map(|r| r.clone())
        .unwrap_or_default()
}

/// Snapshot of the process-wide default query registry.
pub fn default_queries() -> QueryRegistry {
    DEFAULT_QUERIES.read().map(|r| r.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grain_types::CommandOutcome;

    #[test]
    fn registration_replaces_previous() {
        let mut registry = CommandRegistry::new();
        registry.register(
            "counter.create",
            command_handler(|_ctx| async { Ok(CommandOutcome::empty()) }),
            None,
        );
        registry.register(
            "counter.create",
            command_handler(|_ctx| async { Ok(CommandOutcome::empty()) }),
            Some(Schema::new()),
        );
        assert!(registry.contains("counter.create"));
        assert_eq!(registry.names().len(), 1);
    }

    #[test]
    fn default_registry_snapshot_is_detached() {
        register_command(
            "registry-test.snapshot",
            command_handler(|_ctx| async { Ok(CommandOutcome::empty()) }),
            None,
        )
        .unwrap();
        let snapshot = default_commands();
        assert!(snapshot.contains("registry-test.snapshot"));

        register_command(
            "registry-test.later",
            command_handler(|_ctx| async { Ok(CommandOutcome::empty()) }),
            None,
        )
        .unwrap();
        // The earlier snapshot does not see later registrations.
        assert!(!snapshot.contains("registry-test.later"));
    }
}
