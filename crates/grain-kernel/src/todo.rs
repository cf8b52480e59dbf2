//! Asynchronous event reactors.
//!
//! A todo processor subscribes to one or more topics on the bus and invokes
//! its handler for each delivered event, strictly one at a time, so every
//! processor has a linear view of the event kinds it subscribed to.
//! Failures are logged rather than propagated - there is no caller to
//! report to - and processing continues with the next event. Parallelism
//! comes from running several processors, each with independent progress.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::SelectAll;
use futures::{FutureExt, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use grain_bus_core::{PubSub, Subscription};
use grain_types::Event;

use crate::command::panic_message;
use crate::registry::TodoHandler;
use crate::Context;

/// Configuration for one todo processor.
pub struct TodoProcessorConfig {
    /// Operator-facing name used in logs and metrics.
    pub name: String,
    /// Bus to subscribe on.
    pub bus: PubSub,
    /// Topics to react to.
    pub topics: Vec<String>,
    /// Handler invoked once per delivered event.
    pub handler: TodoHandler,
    /// Base context cloned per invocation; the delivered event is attached
    /// to the clone.
    pub context: Context,
}

/// A running event reactor: one subscription per topic, one worker task.
pub struct TodoProcessor {
    name: String,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    processed: Arc<AtomicU64>,
}

impl TodoProcessor {
    /// Subscribe and start the worker.
    pub fn start(config: TodoProcessorConfig) -> Self {
        let TodoProcessorConfig { name, bus, topics, handler, context } = config;

        let mut merged: SelectAll<Subscription> = SelectAll::new();
        for topic in &topics {
            merged.push(bus.subscribe(topic));
        }

        let processed = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let worker = {
            let name = name.clone();
            let processed = Arc::clone(&processed);
            tokio::spawn(async move {
                info!(processor = %name, topics = ?topics, "todo processor started");
                loop {
                    tokio::select! {
                        biased;
                        _ = &mut shutdown_rx => break,
                        next = merged.next() => match next {
                            // Dropping `merged` on exit unsubscribes.
                            None => break,
                            Some(event) => {
                                handle_one(&name, &handler, &context, event).await;
                                processed.fetch_add(1, Ordering::Relaxed);
                            }
                        },
                    }
                }
                info!(processor = %name, "todo processor stopped");
            })
        };

        Self {
            name,
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
            processed,
        }
    }

    /// Operator-facing name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of events handled so far. Feed for per-processor rate
    /// metrics; reactor loops show up here long before they show up as CPU.
    pub fn events_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Unsubscribe, let any in-flight handler finish, and join the worker.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(processor = %self.name, error = %e, "todo worker join failed");
            }
        }
    }
}

impl Drop for TodoProcessor {
    fn drop(&mut self) {
        // Best effort: signal the worker even if `stop` was never called.
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn handle_one(name: &str, handler: &TodoHandler, base: &Context, event: Event) {
    let kind = event.kind.clone();
    let store = base.event_store.clone();
    let ctx = base.clone().with_event(event);

    match AssertUnwindSafe(handler(ctx)).catch_unwind().await {
        Ok(Ok(outcome)) => {
            if outcome.result_events.is_empty() {
                debug!(processor = %name, kind = %kind, "event handled");
            } else if let Err(anomaly) = store.append(outcome.result_events).await {
                error!(
                    processor = %name,
                    kind = %kind,
                    %anomaly,
                    "Error storing events."
                );
            }
        }
        Ok(Err(anomaly)) => {
            error!(processor = %name, kind = %kind, %anomaly, "todo handler returned anomaly");
        }
        Err(panic) => {
            error!(
                processor = %name,
                kind = %kind,
                message = panic_message(&panic),
                "todo handler panicked"
            );
        }
    }
}
