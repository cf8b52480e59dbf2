use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Map};

use grain_bus_core::PubSub;
use grain_kernel::{
    command_handler, process_command, todo_handler, CommandRegistry, Context, QueryRegistry,
    TodoProcessor, TodoProcessorConfig,
};
use grain_store_core::{domain_events, EventQuery, EventStore};
use grain_store_memory::MemoryStore;
use grain_types::{Anomaly, Command, CommandOutcome, Event, SchemaRegistry, TodoOutcome};

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

/// A parent command aggregates a child invocation's events via
/// skip-storage, so the store ends up with exactly one append.
#[tokio::test]
async fn e2e_parent_child_composition_appends_once() -> Result<()> {
    let mut commands = CommandRegistry::new();
    commands.register(
        "order.reserve",
        command_handler(|_ctx| async {
            let event = Event::new(
                "order.reserved",
                [("sku".to_string(), json!("widget"))].into_iter().collect(),
            );
            Ok(CommandOutcome::with_events(vec![event]))
        }),
        None,
    );
    commands.register(
        "order.place",
        command_handler(|ctx: Context| async move {
            let child = Command::new("order.reserve", Map::new());
            let child_outcome = process_command(
                ctx.clone().with_command(child).skipping_event_storage(true),
            )
            .await?;
            Ok(CommandOutcome::with_events(child_outcome.emitted_events)
                .and_result(json!({ "aggregated": true })))
        }),
        None,
    );

    let store = MemoryStore::new(PubSub::default(), Arc::new(SchemaRegistry::new()));
    let ctx = Context::new(
        Arc::new(store.clone()),
        Arc::new(commands),
        Arc::new(QueryRegistry::new()),
    );

    let outcome = process_command(
        ctx.with_command(Command::new("order.place", Map::new())),
    )
    .await?;

    assert_eq!(outcome.result, Some(json!({ "aggregated": true })));

    // One domain event, written by the parent's single append.
    let events = domain_events(store.read(&EventQuery::all()).await?);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, "order.reserved");
    Ok(())
}

/// Commands feed reactors: a processor subscribed to the emitted kind runs
/// its handler, and the events the handler returns land in the same log.
#[tokio::test]
async fn e2e_todo_processor_reacts_and_appends() -> Result<()> {
    let bus = PubSub::default();
    let store = MemoryStore::new(bus.clone(), Arc::new(SchemaRegistry::new()));
    let ctx = Context::new(
        Arc::new(store.clone()),
        Arc::new(CommandRegistry::new()),
        Arc::new(QueryRegistry::new()),
    );

    let processor = TodoProcessor::start(TodoProcessorConfig {
        name: "auditor".to_string(),
        bus: bus.clone(),
        topics: vec!["counter.created".to_string()],
        handler: todo_handler(|ctx: Context| async move {
            let event = ctx
                .event
                .ok_or_else(|| Anomaly::fault("No event in context"))?;
            let mut body = Map::new();
            body.insert("source".to_string(), json!(event.kind));
            Ok(TodoOutcome::with_events(vec![Event::new("audit.logged", body)]))
        }),
        context: ctx,
    });

    store
        .append(vec![Event::new("counter.created", Map::new())])
        .await?;

    // The counter increments only after the handler (and its append)
    // finished, so the audit event is visible once this returns.
    wait_until(|| processor.events_processed() >= 1).await;

    let audits = store.read(&EventQuery::of_kind("audit.logged")).await?;
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].body["source"], json!("counter.created"));

    processor.stop().await;
    Ok(())
}

/// A handler anomaly is logged, not fatal: the processor keeps handling
/// subsequent events.
#[tokio::test]
async fn e2e_todo_processor_survives_handler_failures() -> Result<()> {
    let bus = PubSub::default();
    let store = MemoryStore::new(bus.clone(), Arc::new(SchemaRegistry::new()));
    let ctx = Context::new(
        Arc::new(store.clone()),
        Arc::new(CommandRegistry::new()),
        Arc::new(QueryRegistry::new()),
    );

    let processor = TodoProcessor::start(TodoProcessorConfig {
        name: "flaky".to_string(),
        bus: bus.clone(),
        topics: vec!["t.x".to_string()],
        handler: todo_handler(|ctx: Context| async move {
            let event = ctx.event.ok_or_else(|| Anomaly::fault("No event"))?;
            if event.body.get("explode").is_some() {
                panic!("handler exploded");
            }
            if event.body.get("fail").is_some() {
                return Err(Anomaly::fault("handler failed"));
            }
            Ok(TodoOutcome::empty())
        }),
        context: ctx,
    });

    let mut explode = Map::new();
    explode.insert("explode".to_string(), json!(true));
    let mut fail = Map::new();
    fail.insert("fail".to_string(), json!(true));

    store
        .append(vec![
            Event::new("t.x", explode),
            Event::new("t.x", fail),
            Event::new("t.x", Map::new()),
        ])
        .await?;

    wait_until(|| processor.events_processed() >= 3).await;
    assert_eq!(processor.events_processed(), 3);

    processor.stop().await;
    Ok(())
}

/// Two processors make independent progress over the same topic.
#[tokio::test]
async fn e2e_processors_have_independent_progress() -> Result<()> {
    let bus = PubSub::default();
    let store = MemoryStore::new(bus.clone(), Arc::new(SchemaRegistry::new()));
    let ctx = Context::new(
        Arc::new(store.clone()),
        Arc::new(CommandRegistry::new()),
        Arc::new(QueryRegistry::new()),
    );

    let fast = TodoProcessor::start(TodoProcessorConfig {
        name: "fast".to_string(),
        bus: bus.clone(),
        topics: vec!["t.x".to_string()],
        handler: todo_handler(|_ctx| async { Ok(TodoOutcome::empty()) }),
        context: ctx.clone(),
    });
    let slow = TodoProcessor::start(TodoProcessorConfig {
        name: "slow".to_string(),
        bus: bus.clone(),
        topics: vec!["t.x".to_string()],
        handler: todo_handler(|_ctx| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(TodoOutcome::empty())
        }),
        context: ctx,
    });

    for _ in 0..10 {
        store
            .append(vec![Event::new("t.x", Map::new())])
            .await?;
    }

    wait_until(|| fast.events_processed() == 10).await;
    wait_until(|| slow.events_processed() == 10).await;

    fast.stop().await;
    slow.stop().await;
    Ok(())
}
