//! Workflow Engine - DAG-based workflow execution
//!
//! This crate executes workflow graphs defined as JSON: nodes with typed
//! input/output parameter declarations, edges between output ports and
//! target nodes, and per-node retry/timeout/fallback policies. It supports:
//!
//! - Parallel scheduling with AND-join / OR-activation semantics
//! - Transitive skip propagation through dead branches
//! - Streaming nodes that unblock their successors while still producing
//! - Loop nodes that expand their inner block into per-iteration sub-runs
//! - A pluggable node registry and interceptor chain
//!
//! # Architecture
//!
//! [`WorkflowEngine`] is the facade: parse a definition, validate it into a
//! [`graph::WorkflowGraph`], then let an [`orchestrator::Orchestrator`] drive
//! it. Node behavior lives behind [`registry::NodeExecutor`]; the built-in
//! control nodes (Start, Output, End, Branch, Loop) register themselves at
//! link time and hosts add their own types at runtime.

pub mod context;
pub mod definitions;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod interceptor;
pub mod nodes;
pub mod orchestrator;
pub mod params;
pub mod registry;
pub mod stream;

// Re-export key types
pub use context::{NodeState, Variable, WorkflowContext};
pub use definitions::{
    BranchCondition, BranchGroup, BranchLogic, ExecutionPolicy, JsonMap, NodeConfig, NodeData,
    NodeExecutionResult, NodeOutput, NodeResultData, NodeStatus, OnFailure, WorkflowEdge,
    WorkflowGraphDef, WorkflowNode,
};
pub use engine::WorkflowEngine;
pub use error::{Result, WorkflowError};
pub use events::{EventSink, NullEventSink, VecEventSink, WorkflowEvent};
pub use graph::WorkflowGraph;
pub use interceptor::{NodeInterceptor, Next};
pub use orchestrator::{CancelHandle, Orchestrator};
pub use params::{ParameterSchema, ParameterValue, RefContent};
pub use registry::{NodeExecutor, NodeRegistration, NodeRegistry, RuntimeContext};
pub use stream::{StreamBroadcaster, StreamEvent};
