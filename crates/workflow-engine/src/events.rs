//! Side-channel progress events
//!
//! The orchestrator reports scheduling decisions and stream chunks to an
//! [`EventSink`] as they happen, independently of the run's final result.

use serde::{Deserialize, Serialize};

use crate::definitions::NodeStatus;

/// Trait for delivering workflow events
///
/// Abstracts over the transport (channel, websocket bridge, test buffer) so
/// the engine stays host-agnostic. Sends are synchronous and must not block.
pub trait EventSink: Send + Sync {
    /// Deliver one event
    ///
    /// Returns an error if the consumer is gone (e.g. channel closed)
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// Error when delivering an event fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkflowEvent {
    /// A run began
    #[serde(rename_all = "camelCase")]
    ExecutionStarted { execution_id: String },

    /// A run finished, successfully or not
    #[serde(rename_all = "camelCase")]
    ExecutionEnded {
        execution_id: String,
        success: bool,
        error: Option<String>,
    },

    /// A node left the queue and began executing
    #[serde(rename_all = "camelCase")]
    NodeStarted {
        node_id: String,
        execution_id: String,
    },

    /// A node reached a terminal status
    #[serde(rename_all = "camelCase")]
    NodeFinished {
        node_id: String,
        execution_id: String,
        status: NodeStatus,
        output: Option<serde_json::Value>,
    },

    /// A node exhausted its policy and failed
    #[serde(rename_all = "camelCase")]
    NodeError {
        node_id: String,
        execution_id: String,
        error: String,
    },

    /// A node was finalized as SKIPPED
    #[serde(rename_all = "camelCase")]
    NodeSkipped {
        node_id: String,
        execution_id: String,
    },

    /// A stream began producing
    #[serde(rename_all = "camelCase")]
    StreamStarted {
        node_id: String,
        execution_id: String,
    },

    /// One incremental chunk of streamed text
    #[serde(rename_all = "camelCase")]
    StreamChunk {
        node_id: String,
        execution_id: String,
        chunk: String,
    },

    /// A stream reached its terminal result
    #[serde(rename_all = "camelCase")]
    StreamEnded {
        node_id: String,
        execution_id: String,
    },
}

impl WorkflowEvent {
    pub fn node_finished(
        node_id: &str,
        execution_id: &str,
        status: NodeStatus,
        output: Option<serde_json::Value>,
    ) -> Self {
        Self::NodeFinished {
            node_id: node_id.to_string(),
            execution_id: execution_id.to_string(),
            status,
            output,
        }
    }

    pub fn stream_chunk(node_id: &str, execution_id: &str, chunk: impl Into<String>) -> Self {
        Self::StreamChunk {
            node_id: node_id.to_string(),
            execution_id: execution_id.to_string(),
            chunk: chunk.into(),
        }
    }
}

/// A no-op sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based sink that collects events
///
/// Useful in tests to assert on the emission order.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// All collected events so far
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink_collects_in_order() {
        let sink = VecEventSink::new();
        sink.send(WorkflowEvent::ExecutionStarted {
            execution_id: "exec1".to_string(),
        })
        .unwrap();
        sink.send(WorkflowEvent::stream_chunk("n1", "exec1", "hi")).unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        match &events[1] {
            WorkflowEvent::StreamChunk { node_id, chunk, .. } => {
                assert_eq!(node_id, "n1");
                assert_eq!(chunk, "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_event_wire_format_is_tagged_camel_case() {
        let event = WorkflowEvent::node_finished("n1", "exec1", NodeStatus::Completed, None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "nodeFinished");
        assert_eq!(json["nodeId"], "n1");
        assert_eq!(json["status"], "COMPLETED");
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        sink.send(WorkflowEvent::stream_chunk("n1", "exec1", "x")).unwrap();
    }
}
