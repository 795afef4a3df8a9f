//! Control-flow nodes: Start, Output, End and Branch

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::Variable;
use crate::definitions::{
    BranchGroup, BranchLogic, JsonMap, NodeExecutionResult, NodeResultData, WorkflowNode,
};
use crate::error::{Result, WorkflowError};
use crate::events::WorkflowEvent;
use crate::params::{
    find_ref_in_schemas, render_template, resolve_schemas, resolve_single, split_template,
    value_by_path, value_to_text, TemplateSegment,
};
use crate::registry::{NodeExecutor, NodeRegistration, RuntimeContext};
use crate::stream::StreamEvent;

/// Entry node: maps the run payload onto its declared outputs
pub struct StartNode {
    ctx: Arc<dyn RuntimeContext>,
    node: WorkflowNode,
}

#[async_trait]
impl NodeExecutor for StartNode {
    async fn execute(&self) -> Result<NodeExecutionResult> {
        let payload = self.ctx.payload().await;
        let variables = self.ctx.variables().await;
        let output = resolve_schemas(&self.node.data.outputs, &variables, Some(&payload)).await?;
        Ok(NodeExecutionResult::data(
            payload,
            NodeResultData::with_output(output),
        ))
    }
}

fn build_start(
    ctx: Arc<dyn RuntimeContext>,
    node: WorkflowNode,
    _streaming: bool,
) -> Box<dyn NodeExecutor> {
    Box::new(StartNode { ctx, node })
}

inventory::submit! {
    NodeRegistration { registry_id: "Start", build: build_start }
}

/// Side-channel marker node: resolves its inputs, produces nothing
pub struct OutputNode {
    ctx: Arc<dyn RuntimeContext>,
    node: WorkflowNode,
}

#[async_trait]
impl NodeExecutor for OutputNode {
    async fn execute(&self) -> Result<NodeExecutionResult> {
        let variables = self.ctx.variables().await;
        let input = resolve_schemas(&self.node.data.inputs, &variables, None).await?;
        Ok(NodeExecutionResult::data(input, NodeResultData::default()))
    }
}

fn build_output(
    ctx: Arc<dyn RuntimeContext>,
    node: WorkflowNode,
    _streaming: bool,
) -> Box<dyn NodeExecutor> {
    Box::new(OutputNode { ctx, node })
}

inventory::submit! {
    NodeRegistration { registry_id: "Output", build: build_output }
}

/// Exit node: its resolved inputs become the run's result.
///
/// In streaming mode (`config.stream` with a `Text` return type and a content
/// template) the template renders incrementally: references that resolve to a
/// live upstream stream are subscribed to and re-emitted as `StreamChunk`
/// events while the final text accumulates into `result.content`.
pub struct EndNode {
    ctx: Arc<dyn RuntimeContext>,
    node: WorkflowNode,
}

impl EndNode {
    fn streaming_template(&self) -> Option<&str> {
        let config = &self.node.data.config;
        if config.stream && config.return_type.as_deref() == Some("Text") {
            config.content.as_deref()
        } else {
            None
        }
    }

    async fn render_streaming(&self, template: &str) -> Result<String> {
        let mut text = String::new();
        for segment in split_template(template) {
            match segment {
                TemplateSegment::Text(chunk) => {
                    self.emit_chunk(&chunk);
                    text.push_str(&chunk);
                }
                TemplateSegment::Var(path) => {
                    // variables can advance while earlier streams drain, so
                    // each segment resolves against a fresh snapshot
                    let variables = self.ctx.variables().await;
                    let root = path.split(['.', '[']).next().unwrap_or_default();
                    let source = find_ref_in_schemas(&self.node.data.inputs, root)
                        .and_then(|r| variables.get(&r.block_id).cloned());
                    match source {
                        Some(Variable::Stream(broadcaster)) if !broadcaster.is_done() => {
                            let mut rx = broadcaster.subscribe();
                            while let Some(event) = rx.recv().await {
                                match event {
                                    StreamEvent::Chunk(chunk) => {
                                        self.emit_chunk(&chunk);
                                        text.push_str(&chunk);
                                    }
                                    StreamEvent::Start => {}
                                    StreamEvent::End => break,
                                }
                            }
                            // surfaces the producer's error, if any
                            broadcaster.result().await?;
                        }
                        _ => {
                            let resolved =
                                resolve_schemas(&self.node.data.inputs, &variables, None).await?;
                            let value = value_by_path(&Value::Object(resolved), &path)
                                .unwrap_or(Value::Null);
                            let chunk = value_to_text(&value);
                            self.emit_chunk(&chunk);
                            text.push_str(&chunk);
                        }
                    }
                }
            }
        }
        Ok(text)
    }

    fn emit_chunk(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.ctx.emit(WorkflowEvent::stream_chunk(
            &self.node.id,
            self.ctx.execution_id(),
            chunk,
        ));
    }
}

#[async_trait]
impl NodeExecutor for EndNode {
    async fn execute(&self) -> Result<NodeExecutionResult> {
        if let Some(template) = self.streaming_template() {
            let template = template.to_string();
            let content = self.render_streaming(&template).await?;
            let variables = self.ctx.variables().await;
            let output = resolve_schemas(&self.node.data.inputs, &variables, None).await?;
            let mut data = NodeResultData::with_output(output);
            data.content = Some(content);
            return Ok(NodeExecutionResult::data(JsonMap::new(), data));
        }

        let variables = self.ctx.variables().await;
        let output = resolve_schemas(&self.node.data.inputs, &variables, None).await?;
        let config = &self.node.data.config;
        let content = match (&config.return_type, &config.content) {
            (Some(rt), Some(template)) if rt == "Text" => {
                Some(render_template(template, &output))
            }
            _ => None,
        };
        let mut data = NodeResultData::with_output(output);
        data.content = content;
        Ok(NodeExecutionResult::data(JsonMap::new(), data))
    }
}

fn build_end(
    ctx: Arc<dyn RuntimeContext>,
    node: WorkflowNode,
    _streaming: bool,
) -> Box<dyn NodeExecutor> {
    Box::new(EndNode { ctx, node })
}

inventory::submit! {
    NodeRegistration { registry_id: "End", build: build_end }
}

/// Conditional router: the first satisfied branch group activates its index
/// as the output port; no match activates port `"-1"`.
pub struct BranchNode {
    ctx: Arc<dyn RuntimeContext>,
    node: WorkflowNode,
}

impl BranchNode {
    async fn group_satisfied(
        &self,
        group: &BranchGroup,
        variables: &std::collections::HashMap<String, Variable>,
    ) -> Result<bool> {
        if group.conditions.is_empty() {
            return Ok(false);
        }
        let mut results = Vec::with_capacity(group.conditions.len());
        for condition in &group.conditions {
            let left = resolve_single(&condition.left, variables).await?;
            let right = resolve_single(&condition.right, variables).await?;
            results.push(compare(condition.operator, &left, &right)?);
        }
        Ok(match group.logic {
            BranchLogic::And => results.iter().all(|r| *r),
            BranchLogic::Or => results.iter().any(|r| *r),
        })
    }
}

#[async_trait]
impl NodeExecutor for BranchNode {
    async fn execute(&self) -> Result<NodeExecutionResult> {
        let variables = self.ctx.variables().await;
        let mut port = "-1".to_string();
        for (index, group) in self.node.data.config.branches.iter().enumerate() {
            if self.group_satisfied(group, &variables).await? {
                port = index.to_string();
                break;
            }
        }
        log::debug!("branch {} activated port {port}", self.node.id);
        let mut output = JsonMap::new();
        output.insert("branch".to_string(), Value::String(port.clone()));
        Ok(
            NodeExecutionResult::data(JsonMap::new(), NodeResultData::with_output(output))
                .with_port(port),
        )
    }
}

fn build_branch(
    ctx: Arc<dyn RuntimeContext>,
    node: WorkflowNode,
    _streaming: bool,
) -> Box<dyn NodeExecutor> {
    Box::new(BranchNode { ctx, node })
}

inventory::submit! {
    NodeRegistration { registry_id: "Branch", build: build_branch }
}

/// Evaluate one branch operator by id
fn compare(operator: u8, left: &Value, right: &Value) -> Result<bool> {
    Ok(match operator {
        1 => values_equal(left, right),
        2 => !values_equal(left, right),
        3 => length_of(left) > length_of(right),
        4 => length_of(left) >= length_of(right),
        5 => length_of(left) < length_of(right),
        6 => length_of(left) <= length_of(right),
        7 => contains(left, right),
        8 => !contains(left, right),
        9 => is_empty(left),
        10 => !is_empty(left),
        other => {
            return Err(WorkflowError::failed(format!(
                "unknown branch operator {other}"
            )))
        }
    })
}

/// Equality with cross-representation numeric comparison (1 == 1.0)
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

/// Length of a value; numbers compare by their own magnitude so that
/// `len(x) > 3` style conditions work against literal thresholds
fn length_of(value: &Value) -> f64 {
    match value {
        Value::String(s) => s.chars().count() as f64,
        Value::Array(items) => items.len() as f64,
        Value::Object(map) => map.len() as f64,
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(_) | Value::Null => 0.0,
    }
}

fn contains(left: &Value, right: &Value) -> bool {
    match left {
        Value::String(s) => match right {
            Value::String(needle) => s.contains(needle.as_str()),
            other => s.contains(&value_to_text(other)),
        },
        Value::Array(items) => items.iter().any(|item| values_equal(item, right)),
        Value::Object(map) => match right {
            Value::String(key) => map.contains_key(key.as_str()),
            _ => false,
        },
        _ => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) | Value::Bool(_) => false,
    }
}
