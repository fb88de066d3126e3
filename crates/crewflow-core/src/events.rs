//! Event bus for run transparency and trace collection.
//!
//! The executor reports every task start/finish, tool call, delegation and
//! persisted artifact through this channel.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use crate::graph::{AgentId, TaskId};

/// Unique identifier for an event
pub type EventId = String;

/// Executor lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task execution started
    Start {
        event_id: EventId,
        timestamp: u64,
        crew: String,
        task_id: TaskId,
        agent: AgentId,
    },
    /// Task execution finished
    Finish {
        event_id: EventId,
        timestamp: u64,
        crew: String,
        task_id: TaskId,
        agent: AgentId,
        outcome: TaskOutcome,
        duration_ms: u64,
    },
    /// The backend asked for a tool
    ToolCall {
        event_id: EventId,
        timestamp: u64,
        task_id: TaskId,
        tool: String,
        input: String,
        succeeded: bool,
    },
    /// A hierarchical manager handed a task to its owner
    Delegation {
        event_id: EventId,
        timestamp: u64,
        crew: String,
        manager: AgentId,
        task_id: TaskId,
    },
    /// A task output was written to its destination
    Persisted {
        event_id: EventId,
        timestamp: u64,
        task_id: TaskId,
        path: String,
        succeeded: bool,
    },
}

impl Event {
    pub fn event_id(&self) -> &str {
        match self {
            Event::Start { event_id, .. }
            | Event::Finish { event_id, .. }
            | Event::ToolCall { event_id, .. }
            | Event::Delegation { event_id, .. }
            | Event::Persisted { event_id, .. } => event_id,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Event::Start { timestamp, .. }
            | Event::Finish { timestamp, .. }
            | Event::ToolCall { timestamp, .. }
            | Event::Delegation { timestamp, .. }
            | Event::Persisted { timestamp, .. } => *timestamp,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            Event::Start { task_id, .. }
            | Event::Finish { task_id, .. }
            | Event::ToolCall { task_id, .. }
            | Event::Delegation { task_id, .. }
            | Event::Persisted { task_id, .. } => task_id,
        }
    }

    /// One-line human readable description.
    pub fn describe(&self) -> String {
        match self {
            Event::Start { agent, .. } => format!("started by {agent}"),
            Event::Finish {
                outcome,
                duration_ms,
                ..
            } => match outcome {
                TaskOutcome::Success => format!("completed in {duration_ms} ms"),
                TaskOutcome::Failure { reason } => format!("failed after {duration_ms} ms: {reason}"),
            },
            Event::ToolCall {
                tool, succeeded, ..
            } => {
                let status = if *succeeded { "ok" } else { "error" };
                format!("tool {tool} ({status})")
            }
            Event::Delegation { manager, .. } => format!("delegated by {manager}"),
            Event::Persisted {
                path, succeeded, ..
            } => {
                if *succeeded {
                    format!("saved to {path}")
                } else {
                    format!("failed to save to {path}")
                }
            }
        }
    }
}

/// Outcome of a task execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failure { reason: String },
}

/// Sending half of the event bus
#[derive(Clone)]
pub struct EventCollector {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventCollector {
    /// Create a new event collector
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit_start(&self, crew: &str, task_id: &str, agent: &str) {
        self.send(Event::Start {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            crew: crew.to_string(),
            task_id: task_id.to_string(),
            agent: agent.to_string(),
        });
    }

    pub fn emit_finish(
        &self,
        crew: &str,
        task_id: &str,
        agent: &str,
        outcome: TaskOutcome,
        duration_ms: u64,
    ) {
        self.send(Event::Finish {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            crew: crew.to_string(),
            task_id: task_id.to_string(),
            agent: agent.to_string(),
            outcome,
            duration_ms,
        });
    }

    pub fn emit_tool_call(&self, task_id: &str, tool: &str, input: &str, succeeded: bool) {
        self.send(Event::ToolCall {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            task_id: task_id.to_string(),
            tool: tool.to_string(),
            input: input.to_string(),
            succeeded,
        });
    }

    pub fn emit_delegation(&self, crew: &str, manager: &str, task_id: &str) {
        self.send(Event::Delegation {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            crew: crew.to_string(),
            manager: manager.to_string(),
            task_id: task_id.to_string(),
        });
    }

    pub fn emit_persisted(&self, task_id: &str, path: &str, succeeded: bool) {
        self.send(Event::Persisted {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            task_id: task_id.to_string(),
            path: path.to_string(),
            succeeded,
        });
    }

    fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event) {
            tracing::trace!(error = %e, "event receiver dropped");
        }
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new().0
    }
}

/// Take every event currently buffered in the channel.
pub fn drain_events(receiver: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Generate a unique event ID
fn generate_event_id() -> EventId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("evt_{}", id)
}

/// Get current Unix timestamp in milliseconds
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_collector() {
        let (collector, mut receiver) = EventCollector::new();

        collector.emit_start("background", "task1", "researcher");

        let event = receiver.recv().await.unwrap();
        match event {
            Event::Start { task_id, crew, .. } => {
                assert_eq!(task_id, "task1");
                assert_eq!(crew, "background");
            }
            _ => panic!("Expected Start event"),
        }
    }

    #[test]
    fn drain_returns_buffered_events_in_order() {
        let (collector, mut receiver) = EventCollector::new();
        collector.emit_start("c", "a", "agent");
        collector.emit_tool_call("a", "search", "acme", true);
        collector.emit_finish("c", "a", "agent", TaskOutcome::Success, 12);

        let events = drain_events(&mut receiver);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Event::Start { .. }));
        assert_eq!(events[1].describe(), "tool search (ok)");
        assert_eq!(events[2].describe(), "completed in 12 ms");
        assert!(drain_events(&mut receiver).is_empty());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let (collector, mut receiver) = EventCollector::new();
        collector.emit_persisted("writer", "outputs/a.txt", false);
        let event = drain_events(&mut receiver).remove(0);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "persisted");
        assert_eq!(json["succeeded"], false);
    }
}
