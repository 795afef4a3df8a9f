//! Loop node: expands its inner block into one sub-workflow per iteration
//!
//! The loop's definition carries the inner nodes (`blocks`) and their edges,
//! wired to the loop itself through two pseudo-ports:
//! `"loop-function-inline-output"` (loop → inner entry) and
//! `"loop-function-inline-input"` (inner exit → loop). Each iteration rewires
//! those pseudo-edges onto synthetic Start/End nodes, seeds a child context
//! with `{index, item, ...inputs}` under the loop's id, and runs the
//! sub-workflow to completion. Iterations run sequentially; the per-iteration
//! outputs transpose into lists keyed by output name.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::definitions::{
    JsonMap, NodeData, NodeExecutionResult, NodeResultData, WorkflowEdge, WorkflowGraphDef,
    WorkflowNode,
};
use crate::error::{Result, WorkflowError};
use crate::params::{
    resolve_schemas, resolve_single, transpose_outputs, ParameterSchema, ParameterValue,
    RefContent,
};
use crate::registry::{NodeExecutor, NodeRegistration, RuntimeContext};

/// Ref source marking a loop output that collects from an inner node
const INNER_OUTPUT_SOURCE: &str = "loop-block-output";
/// Loop-side port feeding the inner block's entry nodes
const INLINE_OUTPUT_PORT: &str = "loop-function-inline-output";
/// Loop-side port collecting from the inner block's exit nodes
const INLINE_INPUT_PORT: &str = "loop-function-inline-input";

pub struct LoopNode {
    ctx: Arc<dyn RuntimeContext>,
    node: WorkflowNode,
}

#[async_trait]
impl NodeExecutor for LoopNode {
    async fn execute(&self) -> Result<NodeExecutionResult> {
        let variables = self.ctx.variables().await;
        let items = self.resolve_items(&variables).await?;
        let loop_inputs = resolve_schemas(&self.node.data.inputs, &variables, None).await?;

        let (inner_outputs, direct_outputs): (Vec<_>, Vec<_>) = self
            .node
            .data
            .outputs
            .iter()
            .cloned()
            .partition(is_inner_output);

        let mut iterations: Vec<JsonMap> = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if self.ctx.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }
            let def = build_iteration_def(&self.node, &inner_outputs, index)?;
            let mut seed = loop_inputs.clone();
            seed.insert("index".to_string(), Value::from(index));
            seed.insert("item".to_string(), item.clone());
            log::debug!("loop {} iteration {index} starting", self.node.id);
            let output = self.ctx.run_sub_workflow(def, &self.node.id, seed).await?;
            iterations.push(output);
        }

        let mut output = resolve_schemas(&direct_outputs, &variables, None).await?;
        for (key, value) in transpose_outputs(&iterations) {
            output.insert(key, value);
        }
        Ok(NodeExecutionResult::data(
            loop_inputs,
            NodeResultData::with_output(output),
        ))
    }
}

impl LoopNode {
    /// One JSON value per iteration: indices for "count", elements for "list"
    async fn resolve_items(
        &self,
        variables: &std::collections::HashMap<String, crate::context::Variable>,
    ) -> Result<Vec<Value>> {
        let config = &self.node.data.config;
        match config.loop_type.as_deref() {
            Some("count") => {
                let schema = config.loop_count.as_ref().ok_or_else(|| {
                    WorkflowError::failed(format!("loop {} has no loopCount", self.node.id))
                })?;
                let value = resolve_single(schema, variables).await?;
                let count = match &value {
                    Value::Number(n) => n.as_i64().unwrap_or(0),
                    Value::String(s) => s.parse::<i64>().map_err(|_| {
                        WorkflowError::failed(format!(
                            "loop {} count is not a number: {s:?}",
                            self.node.id
                        ))
                    })?,
                    other => {
                        return Err(WorkflowError::failed(format!(
                            "loop {} count is not a number: {other}",
                            self.node.id
                        )))
                    }
                };
                Ok((0..count.max(0)).map(Value::from).collect())
            }
            Some("list") => {
                let schema = config.loop_list.as_ref().ok_or_else(|| {
                    WorkflowError::failed(format!("loop {} has no loopList", self.node.id))
                })?;
                match resolve_single(schema, variables).await? {
                    Value::Array(items) => Ok(items),
                    other => Err(WorkflowError::failed(format!(
                        "loop {} list did not resolve to an array: {other}",
                        self.node.id
                    ))),
                }
            }
            other => Err(WorkflowError::failed(format!(
                "loop {} has unsupported loopType {other:?}",
                self.node.id
            ))),
        }
    }
}

fn is_inner_output(schema: &ParameterSchema) -> bool {
    matches!(
        &schema.value,
        Some(ParameterValue::Ref(r)) if r.source.as_deref() == Some(INNER_OUTPUT_SOURCE)
    )
}

/// Sub-workflow definition for one iteration: the inner blocks plus synthetic
/// Start/End nodes, with the loop's pseudo-port edges rewired onto them.
fn build_iteration_def(
    node: &WorkflowNode,
    inner_outputs: &[ParameterSchema],
    index: usize,
) -> Result<WorkflowGraphDef> {
    let blocks = node.data.blocks.clone().ok_or_else(|| {
        WorkflowError::failed(format!("loop {} has no inner blocks", node.id))
    })?;
    let inner_edges = node.data.edges.clone().unwrap_or_default();

    let start_id = format!("loop_{}_start_{index}", node.id);
    let end_id = format!("loop_{}_end_{index}", node.id);

    let mut end_data = NodeData::new("End");
    end_data.inputs = synthetic_end_inputs(inner_outputs);

    let mut nodes = blocks;
    nodes.push(WorkflowNode::new(start_id.clone(), NodeData::new("Start")));
    nodes.push(WorkflowNode::new(end_id.clone(), end_data));

    let mut edges = Vec::with_capacity(inner_edges.len() + 1);
    let mut end_has_incoming = false;
    for mut edge in inner_edges {
        if edge.source_node_id == node.id && edge.source_port_id == INLINE_OUTPUT_PORT {
            edge.source_node_id = start_id.clone();
            edge.source_port_id = "0".to_string();
        }
        if edge.target_node_id == node.id && edge.target_port_id == INLINE_INPUT_PORT {
            edge.target_node_id = end_id.clone();
            edge.target_port_id = "0".to_string();
            end_has_incoming = true;
        }
        edges.push(edge);
    }
    // an iteration with no collecting edge still needs a path to its end
    if !end_has_incoming {
        edges.push(WorkflowEdge::new(start_id, "0", end_id, "0"));
    }

    Ok(WorkflowGraphDef { nodes, edges })
}

/// Input declarations for the synthetic End: one per collected inner output,
/// shaped by its `items` blueprint and bound to the inner node's output.
fn synthetic_end_inputs(inner_outputs: &[ParameterSchema]) -> Vec<ParameterSchema> {
    inner_outputs
        .iter()
        .filter_map(|declaration| {
            let Some(ParameterValue::Ref(r)) = &declaration.value else {
                return None;
            };
            let blueprint = declaration.items.as_deref();
            let mut schema = ParameterSchema::new(
                declaration.name.clone(),
                blueprint.map(|b| b.param_type.clone()).unwrap_or_default(),
            );
            if let Some(b) = blueprint {
                schema.properties = b.properties.clone();
            }
            schema.value = Some(ParameterValue::Ref(RefContent {
                block_id: r.block_id.clone(),
                path: r.path.clone(),
                source: None,
            }));
            Some(schema)
        })
        .collect()
}

fn build_loop(
    ctx: Arc<dyn RuntimeContext>,
    node: WorkflowNode,
    _streaming: bool,
) -> Box<dyn NodeExecutor> {
    Box::new(LoopNode { ctx, node })
}

inventory::submit! {
    NodeRegistration { registry_id: "Loop", build: build_loop }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn loop_node_with_inner() -> (WorkflowNode, Vec<ParameterSchema>) {
        let mut inner = NodeData::new("Worker");
        inner.inputs = vec![ParameterSchema::reference("item", "string", "loop-1", "item")];

        let mut data = NodeData::new("Loop");
        data.blocks = Some(vec![WorkflowNode::new("w", inner)]);
        data.edges = Some(vec![
            WorkflowEdge::new("loop-1", INLINE_OUTPUT_PORT, "w", "in"),
            WorkflowEdge::new("w", "0", "loop-1", INLINE_INPUT_PORT),
        ]);

        let mut collected = ParameterSchema::new("results", "array");
        collected.items = Some(Box::new(ParameterSchema::new("", "string")));
        collected.value = Some(ParameterValue::Ref(RefContent {
            block_id: "w".to_string(),
            path: "out".to_string(),
            source: Some(INNER_OUTPUT_SOURCE.to_string()),
        }));
        data.outputs = vec![collected.clone()];
        (WorkflowNode::new("loop-1", data), vec![collected])
    }

    #[test]
    fn test_iteration_def_rewires_pseudo_ports() {
        let (node, inner_outputs) = loop_node_with_inner();
        let def = build_iteration_def(&node, &inner_outputs, 2).unwrap();

        let ids: Vec<&str> = def.nodes.iter().map(|n| n.id.as_str()).collect();
        assert!(ids.contains(&"loop_loop-1_start_2"));
        assert!(ids.contains(&"loop_loop-1_end_2"));
        assert!(ids.contains(&"w"));

        let entry = &def.edges[0];
        assert_eq!(entry.source_node_id, "loop_loop-1_start_2");
        assert_eq!(entry.source_port_id, "0");
        assert_eq!(entry.target_node_id, "w");

        let exit = &def.edges[1];
        assert_eq!(exit.target_node_id, "loop_loop-1_end_2");
        assert_eq!(exit.target_port_id, "0");

        // validates as a standalone workflow
        crate::graph::WorkflowGraph::build(def).unwrap();
    }

    #[test]
    fn test_synthetic_end_inputs_follow_blueprint() {
        let (_, inner_outputs) = loop_node_with_inner();
        let inputs = synthetic_end_inputs(&inner_outputs);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].name, "results");
        assert_eq!(inputs[0].param_type, "string");
        match &inputs[0].value {
            Some(ParameterValue::Ref(r)) => {
                assert_eq!(r.block_id, "w");
                assert_eq!(r.path, "out");
                assert!(r.source.is_none());
            }
            other => panic!("unexpected binding: {other:?}"),
        }
    }

    #[test]
    fn test_inner_output_partition() {
        let (node, _) = loop_node_with_inner();
        assert!(is_inner_output(&node.data.outputs[0]));
        let plain = ParameterSchema::literal("x", "string", json!("v"));
        assert!(!is_inner_output(&plain));
    }

    #[test]
    fn test_iteration_without_collector_still_validates() {
        let (mut node, _) = loop_node_with_inner();
        node.data.edges = Some(vec![WorkflowEdge::new(
            "loop-1",
            INLINE_OUTPUT_PORT,
            "w",
            "in",
        )]);
        let def = build_iteration_def(&node, &[], 0).unwrap();
        // fallback edge start -> end keeps the graph connected
        assert!(def
            .edges
            .iter()
            .any(|e| e.source_node_id == "loop_loop-1_start_0"
                && e.target_node_id == "loop_loop-1_end_0"));
        crate::graph::WorkflowGraph::build(def).unwrap();
    }
}
