#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **grain-http** – HTTP boundary for Grain.
//!
//! Two endpoints: `POST /command` and `POST /query`, JSON bodies of the
//! shape `{"command": {"name": …, "payload": {…}}}`. The adapter stamps a
//! fresh invocation id and current-UTC timestamp into the envelope (clients
//! do not set these), merges the transport's `additional_context` into the
//! processing context, invokes the kernel, and maps the outcome onto a
//! status code via the anomaly taxonomy.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use grain_kernel::{process_command, process_query, CommandRegistry, Context, QueryRegistry};
use grain_store_core::EventStore;
use grain_types::{Anomaly, AnomalyCategory, Command, Query};

//─────────────────────────────
//  Service state
//─────────────────────────────

/// Everything a request handler needs, cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// The event store handlers append through.
    pub event_store: Arc<dyn EventStore>,
    /// Command handler registry.
    pub commands: Arc<CommandRegistry>,
    /// Query handler registry.
    pub queries: Arc<QueryRegistry>,
    /// Transport-layer entries (auth identity, tenant, …) merged into the
    /// processing context's extension bag on every request.
    pub additional_context: Map<String, Value>,
}

impl AppState {
    /// Build a state with an empty additional context.
    pub fn new(
        event_store: Arc<dyn EventStore>,
        commands: Arc<CommandRegistry>,
        queries: Arc<QueryRegistry>,
    ) -> Self {
        Self {
            event_store,
            commands,
            queries,
            additional_context: Map::new(),
        }
    }

    /// Replace the additional context merged into every request.
    pub fn with_additional_context(mut self, extra: Map<String, Value>) -> Self {
        self.additional_context = extra;
        self
    }

    fn context(&self) -> Context {
        Context::new(
            self.event_store.clone(),
            self.commands.clone(),
            self.queries.clone(),
        )
        .with_extra(self.additional_context.clone())
    }
}

/// Build the router serving `POST /command` and `POST /query`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/command", post(handle_command))
        .route("/query", post(handle_query))
        .with_state(state)
}

//─────────────────────────────
//  Wire envelopes
//─────────────────────────────

// Client-supplied `id`/`timestamp` fields are ignored: the boundary stamps
// its own.
#[derive(Debug, Deserialize)]
struct WireEnvelope {
    name: String,
    #[serde(default)]
    payload: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    command: WireEnvelope,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: WireEnvelope,
}

//─────────────────────────────
//  Handlers
//─────────────────────────────

async fn handle_command(
    State(state): State<AppState>,
    body: Result<Json<CommandRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return reject(rejection),
    };
    let command = Command::new(request.command.name, request.command.payload);
    debug!(name = %command.name, id = %command.id, "command received");

    match process_command(state.context().with_command(command)).await {
        Ok(outcome) => success(outcome.result),
        Err(anomaly) => anomaly_response(anomaly),
    }
}

async fn handle_query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return reject(rejection),
    };
    let query = Query::new(request.query.name, request.query.payload);
    debug!(name = %query.name, id = %query.id, "query received");

    match process_query(state.context().with_query(query)).await {
        Ok(outcome) => success(Some(outcome.result)),
        Err(anomaly) => anomaly_response(anomaly),
    }
}

fn reject(rejection: JsonRejection) -> Response {
    anomaly_response(Anomaly::incorrect(format!(
        "Undecodable request envelope: {rejection}"
    )))
}

fn success(result: Option<Value>) -> Response {
    match result {
        Some(value) => (StatusCode::OK, Json(value)).into_response(),
        None => (StatusCode::OK, Json(json!("OK"))).into_response(),
    }
}

//─────────────────────────────
//  Status mapping
//─────────────────────────────

/// The HTTP status an anomaly category maps onto.
pub fn status_for(category: AnomalyCategory) -> StatusCode {
    match category {
        AnomalyCategory::Incorrect => StatusCode::BAD_REQUEST,
        AnomalyCategory::Forbidden => StatusCode::FORBIDDEN,
        AnomalyCategory::NotFound => StatusCode::NOT_FOUND,
        AnomalyCategory::Conflict => StatusCode::CONFLICT,
        AnomalyCategory::Fault
        | AnomalyCategory::Unavailable
        | AnomalyCategory::Busy
        | AnomalyCategory::Interrupted => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn anomaly_response(anomaly: Anomaly) -> Response {
    let status = status_for(anomaly.category);
    let mut body = Map::new();
    body.insert("message".to_string(), json!(anomaly.message));
    if let Some(explain) = anomaly.explain {
        body.insert("explain".to_string(), explain);
    }
    (status, Json(Value::Object(body))).into_response()
}
