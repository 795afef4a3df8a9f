//! Error types for the workflow engine

use thiserror::Error;

/// Result type alias using WorkflowError
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors that can occur while validating or executing a workflow
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Structural validation of the graph failed (bad start/end count,
    /// cycle, unreachable node). Raised before any execution begins.
    #[error("Invalid workflow structure: {0}")]
    Structure(String),

    /// The raw definition could not be parsed into a `WorkflowGraphDef`
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// No executor registered for a node's registry id. Raised at schedule
    /// time, not validation time.
    #[error("No executor registered for node type '{0}'")]
    UnknownNodeType(String),

    /// Node id referenced but not present in the graph
    #[error("Node '{0}' not found in graph")]
    NodeNotFound(String),

    /// A node executor failed
    #[error("Node execution failed: {0}")]
    Execution(String),

    /// A single execution attempt exceeded its timeout budget
    #[error("Node '{node_id}' timed out after {timeout_ms}ms")]
    Timeout { node_id: String, timeout_ms: u64 },

    /// A stream did not resolve within the node's remaining timeout budget
    #[error("Stream for node '{node_id}' timed out after {timeout_ms}ms")]
    StreamTimeout { node_id: String, timeout_ms: u64 },

    /// The run was cancelled externally
    #[error("Workflow cancelled")]
    Cancelled,

    /// The scheduler drained without the end node reaching COMPLETED
    #[error("Workflow finished without completing its end node")]
    IncompleteRun,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Create an execution error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Short taxonomy name, used in the `errorBody.type` field of rescued
    /// node outputs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Structure(_) => "StructureError",
            Self::InvalidDefinition(_) => "InvalidDefinition",
            Self::UnknownNodeType(_) => "UnknownNodeType",
            Self::NodeNotFound(_) => "NodeNotFound",
            Self::Execution(_) => "ExecutionError",
            Self::Timeout { .. } => "TimeoutError",
            Self::StreamTimeout { .. } => "StreamTimeoutError",
            Self::Cancelled => "CancellationError",
            Self::IncompleteRun => "IncompleteRun",
            Self::Serialization(_) => "SerializationError",
        }
    }
}
