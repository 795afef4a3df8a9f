//! Shared execution state for one workflow run
//!
//! The orchestrator owns a single [`WorkflowContext`] behind a
//! `tokio::sync::RwLock`. Node tasks read a snapshot of the variable map to
//! resolve their inputs and the scheduler writes results back between
//! batches, so per-node execution never holds the lock across an await.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::definitions::{
    JsonMap, NodeExecutionResult, NodeId, NodeOutput, NodeResultData, NodeStatus, PortId,
};
use crate::stream::StreamBroadcaster;

/// A value in the context's variable map: either a finished JSON tree or a
/// handle to a stream still being produced.
#[derive(Debug, Clone)]
pub enum Variable {
    Value(Value),
    Stream(Arc<StreamBroadcaster>),
}

/// Per-node runtime record
#[derive(Debug, Clone, Default)]
pub struct NodeState {
    pub status: NodeStatus,
    /// Materialized input the node executed with
    pub input: JsonMap,
    pub result: Option<NodeResultData>,
    pub activated_port: Option<PortId>,
    pub error: Option<String>,
}

/// Mutable state of a single run: the variable map keyed by node id, one
/// [`NodeState`] per node, and the payload the run started with.
#[derive(Debug, Default)]
pub struct WorkflowContext {
    payload: JsonMap,
    variables: HashMap<String, Variable>,
    states: HashMap<NodeId, NodeState>,
    /// Bumped on every variable write; lets late re-renders detect staleness
    version: u64,
}

impl WorkflowContext {
    pub fn new(payload: JsonMap) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    /// Child context for a loop iteration: inherits the parent's variables,
    /// starts with fresh node states. `seed` lands under `seed_id` so inner
    /// nodes can reference the loop's per-iteration bindings.
    pub fn child(&self, seed_id: &str, seed: JsonMap) -> Self {
        let mut variables = self.variables.clone();
        variables.insert(seed_id.to_string(), Variable::Value(Value::Object(seed)));
        Self {
            payload: self.payload.clone(),
            variables,
            states: HashMap::new(),
            version: 0,
        }
    }

    pub fn payload(&self) -> &JsonMap {
        &self.payload
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn status(&self, node_id: &str) -> NodeStatus {
        self.states
            .get(node_id)
            .map(|s| s.status)
            .unwrap_or(NodeStatus::Pending)
    }

    pub fn state(&self, node_id: &str) -> Option<&NodeState> {
        self.states.get(node_id)
    }

    pub fn states(&self) -> &HashMap<NodeId, NodeState> {
        &self.states
    }

    pub fn set_status(&mut self, node_id: &str, status: NodeStatus) {
        self.states.entry(node_id.to_string()).or_default().status = status;
    }

    pub fn variables(&self) -> &HashMap<String, Variable> {
        &self.variables
    }

    pub fn variable(&self, node_id: &str) -> Option<&Variable> {
        self.variables.get(node_id)
    }

    pub fn set_variable(&mut self, node_id: impl Into<String>, variable: Variable) {
        self.variables.insert(node_id.into(), variable);
        self.version += 1;
    }

    /// Record a node's execution outcome: status, state and variable map.
    /// A stream output parks the node as `STREAMTASK` with the live handle
    /// as its variable.
    pub fn record_result(&mut self, node_id: &str, result: &NodeExecutionResult) {
        let state = self.states.entry(node_id.to_string()).or_default();
        state.input = result.input.clone();
        state.activated_port = Some(result.activated_port.clone());
        match &result.data {
            NodeOutput::Data(data) => {
                state.status = NodeStatus::Completed;
                state.result = Some(data.clone());
                self.variables.insert(
                    node_id.to_string(),
                    Variable::Value(Value::Object(data.output.clone())),
                );
            }
            NodeOutput::Stream(broadcaster) => {
                state.status = NodeStatus::StreamTask;
                self.variables
                    .insert(node_id.to_string(), Variable::Stream(broadcaster.clone()));
            }
        }
        self.version += 1;
    }

    pub fn record_failure(&mut self, node_id: &str, input: JsonMap, error: impl Into<String>) {
        let error = error.into();
        let state = self.states.entry(node_id.to_string()).or_default();
        state.status = NodeStatus::Failed;
        state.input = input;
        state.error = Some(error.clone());
        state.result = Some(NodeResultData::with_error(error));
    }

    /// Resolve a parked stream node to its final output map
    pub fn promote_stream(&mut self, node_id: &str, output: JsonMap) {
        let state = self.states.entry(node_id.to_string()).or_default();
        state.status = NodeStatus::Completed;
        state.result = Some(NodeResultData::with_output(output.clone()));
        self.variables
            .insert(node_id.to_string(), Variable::Value(Value::Object(output)));
        self.version += 1;
    }

    /// All broadcasters still present in the variable map, for cancellation
    pub fn live_streams(&self) -> Vec<Arc<StreamBroadcaster>> {
        self.variables
            .values()
            .filter_map(|v| match v {
                Variable::Stream(b) if !b.is_done() => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    /// Final result of the run: the End node's recorded state
    pub fn result_of(&self, node_id: &str) -> Option<NodeResultData> {
        self.states.get(node_id).and_then(|s| s.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_unknown_node_is_pending() {
        let ctx = WorkflowContext::new(JsonMap::new());
        assert_eq!(ctx.status("ghost"), NodeStatus::Pending);
    }

    #[test]
    fn test_record_result_updates_variables_and_version() {
        let mut ctx = WorkflowContext::new(JsonMap::new());
        let before = ctx.version();
        let result = NodeExecutionResult::data(
            JsonMap::new(),
            NodeResultData::with_output(object(json!({"x": 1}))),
        );
        ctx.record_result("n1", &result);
        assert_eq!(ctx.status("n1"), NodeStatus::Completed);
        assert!(ctx.version() > before);
        match ctx.variable("n1") {
            Some(Variable::Value(v)) => assert_eq!(v["x"], 1),
            other => panic!("unexpected variable: {other:?}"),
        }
    }

    #[test]
    fn test_stream_result_parks_as_streamtask() {
        let mut ctx = WorkflowContext::new(JsonMap::new());
        let broadcaster = Arc::new(StreamBroadcaster::new("n1"));
        let result = NodeExecutionResult::stream(JsonMap::new(), broadcaster);
        ctx.record_result("n1", &result);
        assert_eq!(ctx.status("n1"), NodeStatus::StreamTask);
        assert_eq!(ctx.live_streams().len(), 1);

        ctx.promote_stream("n1", object(json!({"text": "done"})));
        assert_eq!(ctx.status("n1"), NodeStatus::Completed);
        assert!(ctx.live_streams().is_empty());
    }

    #[test]
    fn test_child_context_seeds_and_isolates() {
        let mut parent = WorkflowContext::new(JsonMap::new());
        parent.set_variable("up", Variable::Value(json!({"a": 1})));
        parent.set_status("up", NodeStatus::Completed);

        let child = parent.child("loop-1", object(json!({"index": 0, "item": "x"})));
        assert!(matches!(child.variable("up"), Some(Variable::Value(_))));
        match child.variable("loop-1") {
            Some(Variable::Value(v)) => assert_eq!(v["item"], "x"),
            other => panic!("unexpected variable: {other:?}"),
        }
        assert_eq!(child.status("up"), NodeStatus::Pending);
    }
}
