use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Map, Value};
use tower::ServiceExt;

use grain_bus_core::PubSub;
use grain_http::{router, AppState};
use grain_kernel::{command_handler, query_handler, CommandRegistry, Context, QueryRegistry};
use grain_store_core::{domain_events, EventQuery, EventStore};
use grain_store_memory::MemoryStore;
use grain_types::{
    Anomaly, CommandOutcome, Event, FieldKind, QueryOutcome, Schema, SchemaRegistry, Tag,
};

fn app() -> (axum::Router, MemoryStore) {
    let store = MemoryStore::new(PubSub::default(), Arc::new(SchemaRegistry::new()));

    let mut commands = CommandRegistry::new();
    commands.register(
        "example.create-counter",
        command_handler(|ctx: Context| async move {
            let command = ctx
                .command
                .ok_or_else(|| Anomaly::fault("No command in context"))?;
            let counter_id = uuid::Uuid::new_v4();
            let mut body = Map::new();
            body.insert("counter-id".to_string(), json!(counter_id.to_string()));
            body.insert("name".to_string(), command.payload["name"].clone());
            let event = Event::new("example.counter-created", body)
                .with_tag(Tag::new("counter-id", counter_id.to_string()));
            Ok(CommandOutcome::with_events(vec![event])
                .and_result(json!({ "counter-id": counter_id.to_string() })))
        }),
        Some(Schema::new().required("name", FieldKind::String)),
    );
    commands.register(
        "example.forbidden",
        command_handler(|_ctx| async { Err(Anomaly::forbidden("not yours")) }),
        None,
    );
    commands.register(
        "example.noop",
        command_handler(|_ctx| async { Ok(CommandOutcome::empty()) }),
        None,
    );

    let mut queries = QueryRegistry::new();
    queries.register(
        "example.counter-count",
        query_handler(|ctx: Context| async move {
            let events = ctx
                .event_store
                .read(&EventQuery::of_kind("example.counter-created"))
                .await?;
            Ok(QueryOutcome::new(json!(events.len())))
        }),
        None,
    );
    queries.register(
        "example.whoami",
        query_handler(|ctx: Context| async move {
            Ok(QueryOutcome::new(
                ctx.extra.get("user").cloned().unwrap_or(Value::Null),
            ))
        }),
        None,
    );

    let mut extra = Map::new();
    extra.insert("user".to_string(), json!("alice"));

    let state = AppState::new(
        Arc::new(store.clone()),
        Arc::new(commands),
        Arc::new(queries),
    )
    .with_additional_context(extra);

    (router(state), store)
}

async fn post(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn create_counter_happy_path() {
    let (app, store) = app();

    let (status, body) = post(
        &app,
        "/command",
        json!({ "command": { "name": "example.create-counter", "payload": { "name": "n" } } }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let counter_id = body["counter-id"].as_str().unwrap();
    uuid::Uuid::parse_str(counter_id).unwrap();

    let events = domain_events(store.read(&EventQuery::all()).await.unwrap());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "example.counter-created");
    assert_eq!(events[0].body["name"], json!("n"));
}

#[tokio::test]
async fn missing_field_is_400_with_explain() {
    let (app, _store) = app();

    let (status, body) = post(
        &app,
        "/command",
        json!({ "command": { "name": "example.create-counter" } }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
    assert!(body["explain"].is_object());
}

#[tokio::test]
async fn unknown_command_is_404() {
    let (app, _store) = app();

    let (status, body) = post(
        &app,
        "/command",
        json!({ "command": { "name": "unknown.x" } }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], json!("Unknown Command"));
}

#[tokio::test]
async fn forbidden_maps_to_403() {
    let (app, _store) = app();

    let (status, body) = post(
        &app,
        "/command",
        json!({ "command": { "name": "example.forbidden" } }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], json!("not yours"));
}

#[tokio::test]
async fn success_without_result_returns_ok_string() {
    let (app, _store) = app();

    let (status, body) = post(
        &app,
        "/command",
        json!({ "command": { "name": "example.noop" } }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
}

#[tokio::test]
async fn query_roundtrip() {
    let (app, _store) = app();

    post(
        &app,
        "/command",
        json!({ "command": { "name": "example.create-counter", "payload": { "name": "a" } } }),
    )
    .await;

    let (status, body) = post(
        &app,
        "/query",
        json!({ "query": { "name": "example.counter-count" } }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(1));
}

#[tokio::test]
async fn additional_context_reaches_handlers() {
    let (app, _store) = app();

    let (status, body) = post(
        &app,
        "/query",
        json!({ "query": { "name": "example.whoami" } }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("alice"));
}

#[tokio::test]
async fn client_supplied_id_and_timestamp_are_ignored() {
    let (app, _store) = app();

    // A stale id/timestamp in the envelope is overwritten at the boundary,
    // not echoed or rejected.
    let (status, body) = post(
        &app,
        "/command",
        json!({ "command": {
            "name": "example.noop",
            "id": "00000000-0000-0000-0000-000000000000",
            "timestamp": "1970-01-01T00:00:00Z"
        } }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
}

#[tokio::test]
async fn undecodable_envelope_is_400() {
    let (app, _store) = app();

    let (status, body) = post(&app, "/command", json!({ "nope": {} })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Undecodable request envelope"));
}
