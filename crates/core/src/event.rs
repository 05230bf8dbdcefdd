//! Domain events: progress reporting without coupling.
//!
//! The gateway and the agent loop publish events when something a user
//! might want to see happens (a retry countdown, a tool step, a mode change).
//! Front ends subscribe and render them however they like.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A free-form status line for the user
    SystemOutput {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A backend call failed and will be retried
    RetryScheduled {
        attempt: u32,
        max_attempts: u32,
        backoff_secs: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The model completed a request
    ResponseGenerated {
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// The agent is about to run a tool
    StepStarted {
        sequence: usize,
        tool_name: String,
        label: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A large result was handed off for background summarization
    SummarizationStarted {
        tool_name: String,
        approx_tokens: usize,
        timestamp: DateTime<Utc>,
    },

    /// The agent is restricted to finalize tools from now on
    BeastModeEngaged {
        history_tokens: usize,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Shorthand for a status line stamped now.
    pub fn system(message: impl Into<String>) -> Self {
        DomainEvent::SystemOutput {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ToolExecuted {
            tool_name: "searchSymbols".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, .. } => {
                assert_eq!(tool_name, "searchSymbols");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::system("nobody is listening"));
    }
}
