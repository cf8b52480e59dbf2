//! The command processing pipeline.

use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

use grain_types::{Anomaly, Command, CommandOutcome};

use crate::Context;

/// Validate, dispatch and persist one command.
///
/// Pipeline: registry lookup, envelope and payload-schema validation,
/// handler invocation inside an error boundary, then a single atomic append
/// of whatever the handler emitted. With `skip_event_storage` set on the
/// context the append is skipped and the events are handed back to the
/// caller, which is how a parent command aggregates a child invocation's
/// events into its own batch.
pub async fn process_command(ctx: Context) -> Result<CommandOutcome, Anomaly> {
    let command = ctx
        .command
        .clone()
        .ok_or_else(|| Anomaly::incorrect("No command in context"))?;

    let entry = ctx
        .commands
        .get(&command.name)
        .cloned()
        .ok_or_else(|| Anomaly::not_found("Unknown Command"))?;

    validate(&command, entry.schema.as_ref())?;

    debug!(name = %command.name, id = %command.id, "dispatching command");

    let store = ctx.event_store.clone();
    let skip_storage = ctx.skip_event_storage;
    let outcome = match AssertUnwindSafe((entry.handler)(ctx)).catch_unwind().await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(anomaly)) => return Err(anomaly),
        Err(panic) => {
            let message = panic_message(&panic);
            error!(name = %command.name, message, "command handler panicked");
            return Err(Anomaly::fault(format!(
                "Error executing command handler: {message}"
            )));
        }
    };

    if outcome.emitted_events.is_empty() || skip_storage {
        return Ok(outcome);
    }

    let CommandOutcome { emitted_events: mut events, result } = outcome;
    let ids = store.append(events.clone()).await.map_err(|anomaly| {
        error!(name = %command.name, %anomaly, "failed to store emitted events");
        Anomaly::fault("Error storing events")
    })?;
    for (event, id) in events.iter_mut().zip(ids) {
        event.id = Some(id);
    }

    Ok(CommandOutcome { emitted_events: events, result })
}

fn validate(command: &Command, schema: Option<&grain_types::Schema>) -> Result<(), Anomaly> {
    if let Err(reason) = command.validate() {
        return Err(Anomaly::incorrect("Invalid Command")
            .with_explain(json!({ "problems": [{ "error": reason }] })));
    }
    if let Some(schema) = schema {
        schema
            .check(&command.payload)
            .map_err(|explain| Anomaly::incorrect("Invalid Command").with_explain(explain))?;
    }
    Ok(())
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
