//! `tokio::sync::mpsc`-backed in-memory broker.
//!
//! Doubles as the `channel` deployment profile for local development and
//! as the broker test double for the acceptance suite: no external bus is
//! wired up, so nothing other than `tokio` is required to exercise a full
//! emit/retry round trip.

#![cfg(feature = "channel")]

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use super::{Broker, BrokerError};
use crate::event::WorkflowEvent;

/// In-memory broker: `emit` and `retry` both push onto the same channel,
/// an mpsc queue per topic would require a routing table this crate has
/// no reason to own, so all in-flight events share one receiver.
pub struct ChannelBroker {
    sender: mpsc::UnboundedSender<WorkflowEvent>,
    receiver: Mutex<mpsc::UnboundedReceiver<WorkflowEvent>>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Pop the next published event, for tests driving the loop manually.
    pub async fn recv(&self) -> Option<WorkflowEvent> {
        self.receiver.lock().await.recv().await
    }
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for ChannelBroker {
    async fn emit(&self, event: WorkflowEvent) -> Result<(), BrokerError> {
        self.sender
            .send(event)
            .map_err(|e| BrokerError::Backend(e.to_string()))
    }

    async fn retry(
        &self,
        event: WorkflowEvent,
        _max_attempts: u32,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        if delay.is_zero() {
            return self
                .sender
                .send(event)
                .map_err(|e| BrokerError::Backend(e.to_string()));
        }

        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(event);
        });
        Ok(())
    }
}
