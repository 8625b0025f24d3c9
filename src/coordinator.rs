//! Batch deadline coordinator (C9): races per-message processing against
//! a wall-clock deadline and reports unfinished messages for redelivery.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::event::WorkflowEvent;
use crate::registry::Registry;

/// Stable identifier for a raw message in a batch, echoed back in the
/// `failures` list so the caller's broker can redeliver exactly those.
pub type MessageId = String;

/// One raw message handed to the coordinator: an opaque JSON body the
/// coordinator decodes into a [`WorkflowEvent`].
#[derive(Debug, Clone)]
pub struct BatchMessage {
    pub id: MessageId,
    pub body: serde_json::Value,
}

/// Reports remaining wall-clock time before the worker's execution
/// budget elapses.
pub trait DeadlineClock: Send + Sync {
    fn remaining(&self) -> Duration;
}

/// Fixed-remaining-time clock, for tests and for callers that already
/// know their budget at call time.
pub struct FixedDeadlineClock(pub Duration);

impl DeadlineClock for FixedDeadlineClock {
    fn remaining(&self) -> Duration {
        self.0
    }
}

/// Result of one `run_batch` call: the cloud-provider `batchItemFailures`
/// convention — only unfinished/failed message ids are reported, a
/// message processed successfully is simply absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub failures: Vec<MessageId>,
}

/// Run `messages` concurrently against `registry`, racing each unit
/// against `clock.remaining() - safety_margin`.
///
/// Messages whose body fails to decode, whose route is unknown, whose
/// `transit` call errors, or that are still in flight when the grace
/// deadline elapses are all reported as failed; nothing panics out of
/// this function.
pub async fn run_batch(
    registry: &Registry,
    messages: Vec<BatchMessage>,
    clock: &dyn DeadlineClock,
    safety_margin: Duration,
) -> BatchOutcome {
    let grace_deadline = clock.remaining().saturating_sub(safety_margin);

    let mut join_set: JoinSet<(MessageId, bool)> = JoinSet::new();

    for message in messages {
        let event: WorkflowEvent = match serde_json::from_value(message.body) {
            Ok(event) => event,
            Err(err) => {
                warn!(message_id = %message.id, %err, "message body failed to decode");
                join_set.spawn(async move { (message.id, false) });
                continue;
            }
        };

        let route = match registry.lookup(&event.topic) {
            Ok(route) => route,
            Err(err) => {
                warn!(message_id = %message.id, topic = %event.topic, %err, "no route for event");
                join_set.spawn(async move { (message.id, false) });
                continue;
            }
        };

        let message_id = message.id.clone();
        let unit = async move { route.dispatch(event).await };

        join_set.spawn(async move {
            match tokio::time::timeout(grace_deadline, unit).await {
                Ok(Ok(_outcome)) => (message_id, true),
                Ok(Err(err)) => {
                    error!(message_id = %message_id, %err, "transit failed");
                    (message_id, false)
                }
                Err(_elapsed) => {
                    warn!(message_id = %message_id, "deadline elapsed before message finished");
                    (message_id, false)
                }
            }
        });
    }

    let mut failures = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((_message_id, true)) => {}
            Ok((message_id, false)) => failures.push(message_id),
            Err(join_err) => {
                error!(%join_err, "batch task panicked");
            }
        }
    }

    BatchOutcome { failures }
}
