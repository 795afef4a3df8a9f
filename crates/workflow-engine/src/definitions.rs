//! Core definitions for workflow graphs
//!
//! These types are the static blueprint the engine executes: nodes, edges,
//! per-node configuration and execution policy, plus the result containers
//! produced at runtime. Field names serialize to the canonical camelCase
//! definition format.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::params::ParameterSchema;
use crate::stream::StreamBroadcaster;

/// Unique identifier for a node
pub type NodeId = String;

/// Identifier for an output/input port on a node
pub type PortId = String;

/// JSON object shorthand used for inputs, outputs and variables
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Default per-attempt timeout when no execution policy is configured
pub const DEFAULT_TIMEOUT_MS: u64 = 180_000;

/// Port a node emits from when it does not branch
pub const DEFAULT_PORT: &str = "0";

/// Port activated when a failure is rescued with `FallbackErrorPort`
pub const ERROR_PORT: &str = "error";

/// Lifecycle status of a node within a single run
///
/// Statuses are monotonic per run: retries happen inside a single RUNNING
/// attempt and never re-expose PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "SKIPPED")]
    Skipped,
    /// The node returned a live stream handle; a monitor task is awaiting
    /// its terminal result in the background.
    #[serde(rename = "STREAMTASK")]
    StreamTask,
    #[serde(rename = "FAILED")]
    Failed,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl NodeStatus {
    /// Whether successor evaluation may proceed past a node in this state
    pub fn is_terminal_ready(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::StreamTask)
    }
}

/// Error details attached to a rescued node output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    /// Fallback data substituted by the failure policy, if any
    pub data: Option<serde_json::Value>,
}

/// Runtime success/failure marker injected into a node's output map under
/// the `"runtimeStatus"` key, so downstream nodes can branch on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    pub is_success: bool,
    pub error_body: Option<ErrorBody>,
}

impl RuntimeStatus {
    pub fn success() -> Self {
        Self {
            is_success: true,
            error_body: None,
        }
    }

    pub fn failure(body: ErrorBody) -> Self {
        Self {
            is_success: false,
            error_body: Some(body),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Business data produced by a node execution
///
/// This is the shape stored in the context's variable map for every
/// completed node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResultData {
    /// Structured output, the root of the node's variable tree
    #[serde(default)]
    pub output: JsonMap,
    /// Rendered text content (End nodes with a Text return type)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

impl NodeResultData {
    pub fn with_output(output: JsonMap) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    pub fn with_error(msg: impl Into<String>) -> Self {
        Self {
            error_msg: Some(msg.into()),
            ..Self::default()
        }
    }
}

/// Either a finished payload or a handle to an in-progress stream
#[derive(Clone)]
pub enum NodeOutput {
    Data(NodeResultData),
    Stream(Arc<StreamBroadcaster>),
}

impl std::fmt::Debug for NodeOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data(data) => f.debug_tuple("Data").field(data).finish(),
            Self::Stream(b) => f.debug_tuple("Stream").field(&b.node_id()).finish(),
        }
    }
}

/// Container returned by every node executor
#[derive(Debug, Clone)]
pub struct NodeExecutionResult {
    /// Materialized runtime input the node actually executed with
    pub input: JsonMap,
    pub data: NodeOutput,
    /// Output port this execution emits from
    pub activated_port: PortId,
}

impl NodeExecutionResult {
    /// Finished result on the default port
    pub fn data(input: JsonMap, data: NodeResultData) -> Self {
        Self {
            input,
            data: NodeOutput::Data(data),
            activated_port: DEFAULT_PORT.to_string(),
        }
    }

    /// In-progress stream on the default port
    pub fn stream(input: JsonMap, broadcaster: Arc<StreamBroadcaster>) -> Self {
        Self {
            input,
            data: NodeOutput::Stream(broadcaster),
            activated_port: DEFAULT_PORT.to_string(),
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.activated_port = port.into();
        self
    }
}

/// What to do once a node's retry budget is exhausted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnFailure {
    /// Mark the node FAILED and stop routing through it
    #[default]
    Propagate,
    /// Rescue into a tagged COMPLETED output, continue on the default port
    FallbackContinue,
    /// Rescue into a tagged COMPLETED output, continue on the error port
    FallbackErrorPort,
}

/// Per-node retry/timeout/failure policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionPolicy {
    pub enabled: bool,
    pub retry_count: u32,
    pub timeout_ms: u64,
    pub on_failure: OnFailure,
    /// Substituted into the declared output shape when a failure is rescued
    pub fallback_value: Option<String>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_count: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            on_failure: OnFailure::Propagate,
            fallback_value: None,
        }
    }
}

/// Logical combinator for the conditions inside a branch group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchLogic {
    #[default]
    #[serde(rename = "&")]
    And,
    #[serde(rename = "|")]
    Or,
}

/// A single comparison inside a branch group
///
/// `left` and `right` are parameter declarations so either side can be a
/// literal or an upstream reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchCondition {
    /// Operator id (1..=10), see `nodes::control::BranchNode`
    pub operator: u8,
    pub left: ParameterSchema,
    pub right: ParameterSchema,
}

/// An ordered branch: first satisfied group activates its index as a port
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchGroup {
    pub id: Option<String>,
    pub logic: BranchLogic,
    pub conditions: Vec<BranchCondition>,
}

/// Type-specific node configuration
///
/// Core scheduling fields are strict; anything else a host node type needs
/// rides along in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    pub execution_policy: Option<ExecutionPolicy>,
    /// Whether this node may act as a stream producer
    pub stream: bool,
    /// Return type of the node, e.g. "Object" or "Text"
    pub return_type: Option<String>,
    /// Template content for End/Output nodes
    pub content: Option<String>,
    /// Loop source kind: "count" or "list"
    pub loop_type: Option<String>,
    pub loop_count: Option<ParameterSchema>,
    pub loop_list: Option<ParameterSchema>,
    #[serde(alias = "branchs")]
    pub branches: Vec<BranchGroup>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// Runtime payload of a node: executor anchor, configuration and parameter
/// declarations, plus the nested sub-graph for container (loop) nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    /// Anchors the executor registered under this id, e.g. "Start", "LLM"
    pub registry_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: NodeConfig,
    #[serde(default)]
    pub inputs: Vec<ParameterSchema>,
    #[serde(default)]
    pub outputs: Vec<ParameterSchema>,
    /// Inner nodes of a loop's sub-graph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<WorkflowNode>>,
    /// Inner edges of a loop's sub-graph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<WorkflowEdge>>,
}

impl NodeData {
    pub fn new(registry_id: impl Into<String>) -> Self {
        Self {
            registry_id: registry_id.into(),
            name: String::new(),
            description: String::new(),
            config: NodeConfig::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            blocks: None,
            edges: None,
        }
    }
}

/// A node instance in a workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique within the workflow
    pub id: NodeId,
    pub data: NodeData,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, data: NodeData) -> Self {
        Self { id: id.into(), data }
    }
}

/// A directed edge between two ports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "sourceNodeID")]
    pub source_node_id: NodeId,
    #[serde(rename = "targetNodeID")]
    pub target_node_id: NodeId,
    #[serde(rename = "sourcePortID")]
    pub source_port_id: PortId,
    #[serde(rename = "targetPortID")]
    pub target_port_id: PortId,
}

impl WorkflowEdge {
    pub fn new(
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            source_node_id: source.into(),
            target_node_id: target.into(),
            source_port_id: source_port.into(),
            target_port_id: target_port.into(),
        }
    }
}

/// The static blueprint the engine executes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraphDef {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = ExecutionPolicy::default();
        assert!(!policy.enabled);
        assert_eq!(policy.retry_count, 0);
        assert_eq!(policy.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(policy.on_failure, OnFailure::Propagate);
    }

    #[test]
    fn test_status_terminal_ready() {
        assert!(NodeStatus::Completed.is_terminal_ready());
        assert!(NodeStatus::Skipped.is_terminal_ready());
        assert!(NodeStatus::StreamTask.is_terminal_ready());
        assert!(!NodeStatus::Pending.is_terminal_ready());
        assert!(!NodeStatus::Running.is_terminal_ready());
        assert!(!NodeStatus::Failed.is_terminal_ready());
    }

    #[test]
    fn test_edge_serialization_uses_canonical_keys() {
        let edge = WorkflowEdge::new("a", "0", "b", "in");
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["sourceNodeID"], "a");
        assert_eq!(json["targetPortID"], "in");
    }

    #[test]
    fn test_on_failure_deserializes_kebab_case() {
        let policy: ExecutionPolicy = serde_json::from_str(
            r#"{"enabled": true, "retryCount": 1, "onFailure": "fallback-continue"}"#,
        )
        .unwrap();
        assert!(policy.enabled);
        assert_eq!(policy.on_failure, OnFailure::FallbackContinue);
        assert_eq!(policy.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_node_status_wire_format() {
        let json = serde_json::to_string(&NodeStatus::StreamTask).unwrap();
        assert_eq!(json, "\"STREAMTASK\"");
    }
}
