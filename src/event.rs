//! The on-wire unit of work and the entity identifier it targets.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for the entity a workflow instance operates on.
///
/// Producers may key entities by a string or an integer id; both are
/// accepted on the wire and normalized to a string internally so `Urn`
/// can serve as a `HashMap` key and a FIFO partition key uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "UrnWire", into = "UrnWire")]
pub struct Urn(String);

impl Urn {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Urn {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Urn {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Wire representation accepting either a JSON string or number for `urn`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum UrnWire {
    Text(String),
    Number(i64),
}

impl From<UrnWire> for Urn {
    fn from(wire: UrnWire) -> Self {
        match wire {
            UrnWire::Text(s) => Urn(s),
            UrnWire::Number(n) => Urn(n.to_string()),
        }
    }
}

impl From<Urn> for UrnWire {
    fn from(urn: Urn) -> Self {
        UrnWire::Text(urn.0)
    }
}

/// The unit of work on the wire: `{ topic, urn, attempt, payload }`.
///
/// `attempt` defaults to 0 when absent, so a first-arrival event need not
/// carry it. `P` defaults to [`serde_json::Value`] for the type-erased
/// boundary the registry dispatches through; typed orchestrators decode
/// it into their own payload type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent<P = serde_json::Value> {
    pub topic: String,
    pub urn: Urn,
    #[serde(default)]
    pub attempt: u32,
    pub payload: P,
}

impl<P> WorkflowEvent<P> {
    pub fn new(topic: impl Into<String>, urn: Urn, attempt: u32, payload: P) -> Self {
        Self {
            topic: topic.into(),
            urn,
            attempt,
            payload,
        }
    }

    /// Build the retry event for the same logical step, one attempt further.
    pub fn next_attempt(&self, payload: P) -> Self
    where
        P: Clone,
    {
        Self {
            topic: self.topic.clone(),
            urn: self.urn.clone(),
            attempt: self.attempt + 1,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_defaults_to_zero_when_absent() {
        let json = r#"{"topic":"order.created","urn":"o1","payload":{"approved":true}}"#;
        let event: WorkflowEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.attempt, 0);
        assert_eq!(event.urn, Urn::from("o1"));
    }

    #[test]
    fn numeric_urn_normalizes_to_string() {
        let json = r#"{"topic":"t","urn":42,"attempt":1,"payload":null}"#;
        let event: WorkflowEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.urn, Urn::from("42"));
    }

    #[test]
    fn next_attempt_increments_and_preserves_topic_and_urn() {
        let event = WorkflowEvent::new("order.processing", Urn::from("o1"), 0, serde_json::json!({}));
        let retried = event.next_attempt(serde_json::json!({"x": 1}));
        assert_eq!(retried.attempt, 1);
        assert_eq!(retried.topic, "order.processing");
        assert_eq!(retried.urn, Urn::from("o1"));
    }
}
