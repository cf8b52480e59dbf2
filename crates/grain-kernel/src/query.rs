//! The query processing pipeline.

use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

use grain_types::{Anomaly, Query, QueryOutcome};

use crate::Context;

/// Validate and dispatch one query.
///
/// Mirrors the command pipeline without the storage step; query handlers
/// must be pure with respect to the event store.
pub async fn process_query(ctx: Context) -> Result<QueryOutcome, Anomaly> {
    let query = ctx
        .query
        .clone()
        .ok_or_else(|| Anomaly::incorrect("No query in context"))?;

    let entry = ctx
        .queries
        .get(&query.name)
        .cloned()
        .ok_or_else(|| Anomaly::not_found("Unknown Query"))?;

    validate(&query, entry.schema.as_ref())?;

    debug!(name = %query.name, id = %query.id, "dispatching query");

    match AssertUnwindSafe((entry.handler)(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = crate::command::panic_message(&panic);
            error!(name = %query.name, message, "query handler panicked");
            Err(Anomaly::fault(format!(
                "Error executing query handler: {message}"
            )))
        }
    }
}

fn validate(query: &Query, schema: Option<&grain_types::Schema>) -> Result<(), Anomaly> {
    if let Err(reason) = query.validate() {
        return Err(Anomaly::incorrect("Invalid Query")
            .with_explain(json!({ "problems": [{ "error": reason }] })));
    }
    if let Some(schema) = schema {
        schema
            .check(&query.payload)
            .map_err(|explain| Anomaly::incorrect("Invalid Query").with_explain(explain))?;
    }
    Ok(())
}
