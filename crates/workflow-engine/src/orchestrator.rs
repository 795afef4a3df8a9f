//! The scheduler
//!
//! One [`Orchestrator`] drives one run of one validated graph. The main loop
//! keeps a queue of ready nodes, a `JoinSet` of in-flight node tasks and a
//! second `JoinSet` of stream monitors, and multiplexes them with `select!`
//! alongside the cancel handle. Dropping the join sets aborts whatever is
//! still running, which is the cancellation backbone.
//!
//! Scheduling semantics: a node joins the queue exactly once, when every
//! incoming edge is resolved (AND-join) and at least one of them is activated
//! (OR-activation). A node whose predecessors all resolved without activating
//! any of its edges is finalized SKIPPED and the skip propagates.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;

use crate::context::{NodeState, Variable, WorkflowContext};
use crate::definitions::{
    ErrorBody, ExecutionPolicy, JsonMap, NodeExecutionResult, NodeId, NodeOutput, NodeResultData,
    NodeStatus, OnFailure, RuntimeStatus, WorkflowGraphDef, WorkflowNode, DEFAULT_PORT, ERROR_PORT,
};
use crate::error::{Result, WorkflowError};
use crate::events::{EventSink, WorkflowEvent};
use crate::graph::WorkflowGraph;
use crate::interceptor::{run_chain, NodeInterceptor};
use crate::params::{find_ref_in_schemas, split_template, TemplateSegment};
use crate::registry::{NodeRegistry, RuntimeContext};
use crate::stream::StreamTask;

/// Cloneable trigger for aborting a run from outside
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the handle is triggered
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// What a finished node task hands back to the main loop
struct TaskOutput {
    node_id: NodeId,
    /// `Err` is reserved for scheduling defects (unknown node type) and
    /// fails the run; ordinary node failures arrive settled.
    outcome: Result<NodeSettled>,
}

/// A node that reached a terminal state, one way or another
#[derive(Default)]
struct NodeSettled {
    /// `Some` when the node parked as STREAMTASK
    stream: Option<StreamTask>,
    /// `Some` when the node finalized FAILED; contained at the node
    /// boundary, but surfaced if the End node never completes
    failure: Option<WorkflowError>,
}

struct Inner {
    graph: Arc<WorkflowGraph>,
    context: Arc<RwLock<WorkflowContext>>,
    registry: Arc<NodeRegistry>,
    interceptors: Arc<Vec<Arc<dyn NodeInterceptor>>>,
    sink: Arc<dyn EventSink>,
    /// Nodes some downstream text template streams from; their executors are
    /// built in streaming mode.
    stream_producers: HashSet<NodeId>,
    execution_id: String,
    cancel: CancelHandle,
    /// Sub-runs skip the run-level start/end events
    root: bool,
}

/// Drives one workflow run to completion
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        graph: WorkflowGraph,
        payload: JsonMap,
        registry: Arc<NodeRegistry>,
        interceptors: Vec<Arc<dyn NodeInterceptor>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::build(
            graph,
            WorkflowContext::new(payload),
            registry,
            Arc::new(interceptors),
            sink,
            CancelHandle::new(),
            true,
        )
    }

    fn build(
        graph: WorkflowGraph,
        context: WorkflowContext,
        registry: Arc<NodeRegistry>,
        interceptors: Arc<Vec<Arc<dyn NodeInterceptor>>>,
        sink: Arc<dyn EventSink>,
        cancel: CancelHandle,
        root: bool,
    ) -> Self {
        let stream_producers = detect_stream_producers(&graph);
        Self {
            inner: Arc::new(Inner {
                graph: Arc::new(graph),
                context: Arc::new(RwLock::new(context)),
                registry,
                interceptors,
                sink,
                stream_producers,
                execution_id: uuid::Uuid::new_v4().to_string(),
                cancel,
                root,
            }),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.inner.execution_id
    }

    /// Handle for aborting this run (and its sub-runs) from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        self.inner.cancel.clone()
    }

    /// Run the workflow to completion and return the End node's result
    pub async fn run(&self) -> Result<NodeResultData> {
        let inner = &self.inner;
        if inner.root {
            inner.emit_event(WorkflowEvent::ExecutionStarted {
                execution_id: inner.execution_id.clone(),
            });
        }
        let outcome = self.drive().await;
        if outcome.is_err() {
            // Live producers keep running inside aborted tasks otherwise
            for broadcaster in inner.context.read().await.live_streams() {
                broadcaster.cancel();
            }
        }
        if inner.root {
            inner.emit_event(WorkflowEvent::ExecutionEnded {
                execution_id: inner.execution_id.clone(),
                success: outcome.is_ok(),
                error: outcome.as_ref().err().map(|e| e.to_string()),
            });
        }
        outcome
    }

    async fn drive(&self) -> Result<NodeResultData> {
        let inner = &self.inner;
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        let mut scheduled: HashSet<NodeId> = HashSet::new();
        let mut batch: JoinSet<TaskOutput> = JoinSet::new();
        let mut monitors: JoinSet<(Vec<NodeId>, Option<WorkflowError>)> = JoinSet::new();
        let mut first_failure: Option<WorkflowError> = None;

        let start = inner.graph.start_id().clone();
        scheduled.insert(start.clone());
        queue.push_back(start);

        loop {
            while let Some(node_id) = queue.pop_front() {
                let task_inner = inner.clone();
                batch.spawn(async move {
                    let outcome = run_with_policy(&task_inner, &node_id).await;
                    TaskOutput { node_id, outcome }
                });
            }
            if batch.is_empty() && monitors.is_empty() {
                break;
            }

            tokio::select! {
                _ = inner.cancel.cancelled() => {
                    batch.abort_all();
                    monitors.abort_all();
                    return Err(WorkflowError::Cancelled);
                }
                Some(joined) = batch.join_next(), if !batch.is_empty() => {
                    let output = joined
                        .map_err(|e| WorkflowError::failed(format!("node task panicked: {e}")))?;
                    let settled = output.outcome?;
                    if let Some(task) = settled.stream {
                        inner.emit_event(WorkflowEvent::StreamStarted {
                            node_id: output.node_id.clone(),
                            execution_id: inner.execution_id.clone(),
                        });
                        let monitor_inner = inner.clone();
                        monitors.spawn(monitor_stream(monitor_inner, task));
                    }
                    if let Some(err) = settled.failure {
                        first_failure.get_or_insert(err);
                    }
                    let ready = inner.evaluate_ready(&output.node_id).await;
                    for id in ready {
                        if scheduled.insert(id.clone()) {
                            queue.push_back(id);
                        }
                    }
                }
                Some(joined) = monitors.join_next(), if !monitors.is_empty() => {
                    let (ready, failure) = joined
                        .map_err(|e| WorkflowError::failed(format!("stream monitor panicked: {e}")))?;
                    if let Some(err) = failure {
                        first_failure.get_or_insert(err);
                    }
                    for id in ready {
                        if scheduled.insert(id.clone()) {
                            queue.push_back(id);
                        }
                    }
                }
            }
        }

        let ctx = inner.context.read().await;
        let end_id = inner.graph.end_id();
        if ctx.status(end_id) == NodeStatus::Completed {
            // failed dead-end branches do not abort an otherwise complete run
            ctx.result_of(end_id).ok_or(WorkflowError::IncompleteRun)
        } else {
            Err(first_failure.unwrap_or(WorkflowError::IncompleteRun))
        }
    }

    /// Snapshot of every node's runtime record, including FAILED nodes on
    /// branches that did not feed the End node.
    pub async fn node_states(&self) -> HashMap<NodeId, NodeState> {
        self.inner.context.read().await.states().clone()
    }
}

impl Inner {
    fn emit_event(&self, event: WorkflowEvent) {
        if let Err(e) = self.sink.send(event) {
            log::warn!("event sink rejected event: {e}");
        }
    }

    /// Re-evaluate the frontier after `from` reached a terminal state,
    /// finalizing skips transitively. Returns nodes that became ready.
    async fn evaluate_ready(&self, from: &str) -> Vec<NodeId> {
        let mut ctx = self.context.write().await;
        self.evaluate_from(from, &mut ctx)
    }

    fn evaluate_from(&self, from: &str, ctx: &mut WorkflowContext) -> Vec<NodeId> {
        let mut ready = Vec::new();
        let mut worklist: VecDeque<NodeId> = self.graph.successors(from).to_vec().into();
        let mut seen: HashSet<NodeId> = HashSet::new();
        while let Some(node_id) = worklist.pop_front() {
            if !seen.insert(node_id.clone()) {
                continue;
            }
            match self.evaluate_single(&node_id, ctx) {
                Evaluation::Ready => ready.push(node_id),
                Evaluation::Skip => {
                    log::debug!("node {node_id} skipped");
                    ctx.set_status(&node_id, NodeStatus::Skipped);
                    self.emit_event(WorkflowEvent::NodeSkipped {
                        node_id: node_id.clone(),
                        execution_id: self.execution_id.clone(),
                    });
                    for succ in self.graph.successors(&node_id) {
                        worklist.push_back(succ.clone());
                    }
                }
                Evaluation::Wait => {}
            }
        }
        ready
    }

    fn evaluate_single(&self, node_id: &str, ctx: &WorkflowContext) -> Evaluation {
        if ctx.status(node_id) != NodeStatus::Pending {
            return Evaluation::Wait;
        }
        let edges = self.graph.incoming_edges(node_id);
        if edges.is_empty() {
            return Evaluation::Wait;
        }
        let mut any_active = false;
        // terminal enough to schedule past (STREAMTASK counts)
        let mut all_ready = true;
        // fully settled, so a skip is final (STREAMTASK does not count)
        let mut all_settled = true;
        for edge in edges {
            let source = &edge.source_node_id;
            let status = ctx.status(source);
            if matches!(status, NodeStatus::Completed | NodeStatus::StreamTask) {
                let port_active = ctx
                    .state(source)
                    .and_then(|s| s.activated_port.as_deref())
                    .is_some_and(|port| port == edge.source_port_id);
                any_active |= port_active;
            }
            if !status.is_terminal_ready() {
                all_ready = false;
            }
            // FAILED does not settle a skip: descendants of a failed node
            // stay PENDING rather than being finalized SKIPPED
            if !matches!(status, NodeStatus::Completed | NodeStatus::Skipped) {
                all_settled = false;
            }
        }
        if any_active && all_ready {
            Evaluation::Ready
        } else if !any_active && all_settled {
            Evaluation::Skip
        } else {
            Evaluation::Wait
        }
    }
}

enum Evaluation {
    Ready,
    Skip,
    Wait,
}

/// Execute one node under its policy: per-attempt timeout, retries, and the
/// configured failure handling once the budget is exhausted.
///
/// An exhausted `propagate` node settles as FAILED here; it does not abort
/// sibling branches. Only scheduling defects return `Err`.
async fn run_with_policy(inner: &Arc<Inner>, node_id: &str) -> Result<NodeSettled> {
    let node = inner.graph.node(node_id)?.clone();
    inner.emit_event(WorkflowEvent::NodeStarted {
        node_id: node_id.to_string(),
        execution_id: inner.execution_id.clone(),
    });
    inner
        .context
        .write()
        .await
        .set_status(node_id, NodeStatus::Running);

    let is_producer = inner.stream_producers.contains(node_id);
    let ctx_handle: Arc<dyn RuntimeContext> = inner.clone();
    let executor = inner
        .registry
        .create(ctx_handle.clone(), node.clone(), is_producer)?;

    let policy = node
        .data
        .config
        .execution_policy
        .clone()
        .filter(|p| p.enabled)
        .unwrap_or_default();
    let attempts = if policy.enabled { policy.retry_count + 1 } else { 1 };
    let attempt_budget = Duration::from_millis(policy.timeout_ms);
    let rescue = matches!(
        policy.on_failure,
        OnFailure::FallbackContinue | OnFailure::FallbackErrorPort
    ) && policy.enabled;

    let mut last_err: Option<WorkflowError> = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            log::warn!(
                "node {node_id} attempt {} of {attempts} after: {}",
                attempt + 1,
                last_err.as_ref().map(|e| e.to_string()).unwrap_or_default()
            );
        }
        let started = Instant::now();
        let chain = run_chain(&inner.interceptors, &node, ctx_handle.clone(), executor.execute());
        match tokio::time::timeout(attempt_budget, chain).await {
            Ok(Ok(mut result)) => {
                if rescue {
                    if let NodeOutput::Data(data) = &mut result.data {
                        data.output
                            .insert("runtimeStatus".to_string(), RuntimeStatus::success().to_value());
                    }
                }
                let stream_task = match &result.data {
                    NodeOutput::Stream(broadcaster) => Some(StreamTask {
                        node_id: node_id.to_string(),
                        broadcaster: broadcaster.clone(),
                        started,
                        timeout: attempt_budget,
                    }),
                    NodeOutput::Data(_) => None,
                };
                let mut ctx = inner.context.write().await;
                ctx.record_result(node_id, &result);
                let status = ctx.status(node_id);
                let output = match &result.data {
                    NodeOutput::Data(data) => {
                        Some(serde_json::Value::Object(data.output.clone()))
                    }
                    NodeOutput::Stream(_) => None,
                };
                drop(ctx);
                inner.emit_event(WorkflowEvent::node_finished(
                    node_id,
                    &inner.execution_id,
                    status,
                    output,
                ));
                return Ok(NodeSettled {
                    stream: stream_task,
                    failure: None,
                });
            }
            Ok(Err(e)) => last_err = Some(e),
            Err(_) => {
                last_err = Some(WorkflowError::Timeout {
                    node_id: node_id.to_string(),
                    timeout_ms: policy.timeout_ms,
                })
            }
        }
    }

    let err = last_err.unwrap_or_else(|| WorkflowError::failed("node produced no result"));
    if rescue {
        log::warn!("node {node_id} rescued by fallback after: {err}");
        let result = rescued_result(&node, &policy, &err);
        let mut ctx = inner.context.write().await;
        ctx.record_result(node_id, &result);
        drop(ctx);
        let output = match &result.data {
            NodeOutput::Data(data) => Some(serde_json::Value::Object(data.output.clone())),
            NodeOutput::Stream(_) => None,
        };
        inner.emit_event(WorkflowEvent::node_finished(
            node_id,
            &inner.execution_id,
            NodeStatus::Completed,
            output,
        ));
        Ok(NodeSettled::default())
    } else {
        log::error!("node {node_id} failed: {err}");
        inner
            .context
            .write()
            .await
            .record_failure(node_id, JsonMap::new(), err.to_string());
        inner.emit_event(WorkflowEvent::NodeError {
            node_id: node_id.to_string(),
            execution_id: inner.execution_id.clone(),
            error: err.to_string(),
        });
        Ok(NodeSettled {
            stream: None,
            failure: Some(err),
        })
    }
}

/// Rescued COMPLETED output for an exhausted node: the fallback value shaped
/// onto the declared outputs plus the `runtimeStatus` failure marker.
fn rescued_result(
    node: &WorkflowNode,
    policy: &ExecutionPolicy,
    err: &WorkflowError,
) -> NodeExecutionResult {
    let fallback = policy
        .fallback_value
        .as_ref()
        .map(|raw| {
            serde_json::from_str::<serde_json::Value>(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.clone()))
        });
    let mut output = JsonMap::new();
    match &fallback {
        Some(serde_json::Value::Object(map)) => output = map.clone(),
        Some(value) => {
            for schema in &node.data.outputs {
                if !schema.name.is_empty() {
                    output.insert(schema.name.clone(), value.clone());
                }
            }
            if node.data.outputs.is_empty() {
                output.insert("value".to_string(), value.clone());
            }
        }
        None => {}
    }
    let body = ErrorBody {
        message: err.to_string(),
        error_type: err.kind().to_string(),
        data: fallback,
    };
    output.insert(
        "runtimeStatus".to_string(),
        RuntimeStatus::failure(body).to_value(),
    );
    let port = match policy.on_failure {
        OnFailure::FallbackErrorPort => ERROR_PORT,
        _ => DEFAULT_PORT,
    };
    NodeExecutionResult::data(JsonMap::new(), NodeResultData::with_output(output)).with_port(port)
}

/// Await a parked stream's terminal result under its remaining budget, then
/// finalize the node and report successors that became ready.
///
/// A failed or timed-out stream settles its node FAILED without aborting the
/// run; the failure is surfaced only if the End node never completes.
async fn monitor_stream(
    inner: Arc<Inner>,
    task: StreamTask,
) -> (Vec<NodeId>, Option<WorkflowError>) {
    let budget = task.remaining();
    let node_id = task.node_id.clone();
    let err = match tokio::time::timeout(budget, task.broadcaster.result()).await {
        Ok(Ok(output)) => {
            inner
                .context
                .write()
                .await
                .promote_stream(&node_id, output.clone());
            inner.emit_event(WorkflowEvent::node_finished(
                &node_id,
                &inner.execution_id,
                NodeStatus::Completed,
                Some(serde_json::Value::Object(output)),
            ));
            inner.emit_event(WorkflowEvent::StreamEnded {
                node_id: node_id.clone(),
                execution_id: inner.execution_id.clone(),
            });
            return (inner.evaluate_ready(&node_id).await, None);
        }
        Ok(Err(e)) => e,
        Err(_) => {
            task.broadcaster.cancel();
            WorkflowError::StreamTimeout {
                node_id: node_id.clone(),
                timeout_ms: budget.as_millis() as u64,
            }
        }
    };
    log::error!("stream for node {node_id} failed: {err}");
    inner
        .context
        .write()
        .await
        .record_failure(&node_id, JsonMap::new(), err.to_string());
    inner.emit_event(WorkflowEvent::NodeError {
        node_id: node_id.clone(),
        execution_id: inner.execution_id.clone(),
        error: err.to_string(),
    });
    (Vec::new(), Some(err))
}

/// Nodes some text-template consumer streams from. A consumer qualifies when
/// its config says `stream` with a `Text` return type and a content template;
/// each `{{path}}` root is resolved through the consumer's input declarations
/// to the producing node id.
fn detect_stream_producers(graph: &WorkflowGraph) -> HashSet<NodeId> {
    let mut producers = HashSet::new();
    for node in graph.nodes() {
        let config = &node.data.config;
        if !config.stream || config.return_type.as_deref() != Some("Text") {
            continue;
        }
        let Some(content) = &config.content else {
            continue;
        };
        for segment in split_template(content) {
            if let TemplateSegment::Var(path) = segment {
                let root = path.split(['.', '[']).next().unwrap_or_default();
                if let Some(r) = find_ref_in_schemas(&node.data.inputs, root) {
                    producers.insert(r.block_id);
                }
            }
        }
    }
    producers
}

#[async_trait]
impl RuntimeContext for Inner {
    fn execution_id(&self) -> &str {
        &self.execution_id
    }

    async fn payload(&self) -> JsonMap {
        self.context.read().await.payload().clone()
    }

    async fn variables(&self) -> HashMap<String, Variable> {
        self.context.read().await.variables().clone()
    }

    async fn context_version(&self) -> u64 {
        self.context.read().await.version()
    }

    fn emit(&self, event: WorkflowEvent) {
        self.emit_event(event);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn run_sub_workflow(
        &self,
        def: WorkflowGraphDef,
        seed_id: &str,
        seed: JsonMap,
    ) -> Result<JsonMap> {
        let graph = WorkflowGraph::build(def)?;
        let child_context = self.context.read().await.child(seed_id, seed);
        let orchestrator = Orchestrator::build(
            graph,
            child_context,
            self.registry.clone(),
            self.interceptors.clone(),
            self.sink.clone(),
            self.cancel.clone(),
            false,
        );
        let result = orchestrator.run().await?;
        Ok(result.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{NodeData, WorkflowEdge};
    use crate::events::NullEventSink;
    use crate::params::ParameterSchema;
    use crate::registry::NodeExecutor;
    use serde_json::json;

    struct ConstNode {
        value: serde_json::Value,
    }

    #[async_trait]
    impl NodeExecutor for ConstNode {
        async fn execute(&self) -> Result<NodeExecutionResult> {
            let mut output = JsonMap::new();
            output.insert("v".to_string(), self.value.clone());
            Ok(NodeExecutionResult::data(
                JsonMap::new(),
                NodeResultData::with_output(output),
            ))
        }
    }

    fn test_registry() -> Arc<NodeRegistry> {
        let mut registry = NodeRegistry::with_builtins();
        registry.register("Const", |_ctx, node, _streaming| {
            let value = node
                .data
                .config
                .extra
                .get("constValue")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            Box::new(ConstNode { value }) as Box<dyn NodeExecutor>
        });
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_linear_run_completes() {
        let mut const_data = NodeData::new("Const");
        const_data.config.extra.insert("constValue".to_string(), json!(41));
        let mut end_data = NodeData::new("End");
        end_data.inputs = vec![ParameterSchema::reference("answer", "integer", "c", "v")];

        let def = WorkflowGraphDef {
            nodes: vec![
                WorkflowNode::new("s", NodeData::new("Start")),
                WorkflowNode::new("c", const_data),
                WorkflowNode::new("e", end_data),
            ],
            edges: vec![
                WorkflowEdge::new("s", "0", "c", "in"),
                WorkflowEdge::new("c", "0", "e", "in"),
            ],
        };
        let graph = WorkflowGraph::build(def).unwrap();
        let orchestrator = Orchestrator::new(
            graph,
            JsonMap::new(),
            test_registry(),
            Vec::new(),
            Arc::new(NullEventSink),
        );
        let result = orchestrator.run().await.unwrap();
        assert_eq!(result.output["answer"], 41);
    }

    #[tokio::test]
    async fn test_cancel_before_slow_node_finishes() {
        struct SlowNode;
        #[async_trait]
        impl NodeExecutor for SlowNode {
            async fn execute(&self) -> Result<NodeExecutionResult> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(NodeExecutionResult::data(JsonMap::new(), NodeResultData::default()))
            }
        }
        let mut registry = NodeRegistry::with_builtins();
        registry.register("Slow", |_ctx, _node, _streaming| Box::new(SlowNode) as _);

        let def = WorkflowGraphDef {
            nodes: vec![
                WorkflowNode::new("s", NodeData::new("Start")),
                WorkflowNode::new("slow", NodeData::new("Slow")),
                WorkflowNode::new("e", NodeData::new("End")),
            ],
            edges: vec![
                WorkflowEdge::new("s", "0", "slow", "in"),
                WorkflowEdge::new("slow", "0", "e", "in"),
            ],
        };
        let orchestrator = Orchestrator::new(
            WorkflowGraph::build(def).unwrap(),
            JsonMap::new(),
            Arc::new(registry),
            Vec::new(),
            Arc::new(NullEventSink),
        );
        let handle = orchestrator.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });
        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled));
    }

    #[test]
    fn test_detect_stream_producers() {
        let mut consumer = NodeData::new("End");
        consumer.config.stream = true;
        consumer.config.return_type = Some("Text".to_string());
        consumer.config.content = Some("answer: {{reply.text}}".to_string());
        consumer.inputs = vec![ParameterSchema::reference("reply", "object", "llm-1", "")];

        let def = WorkflowGraphDef {
            nodes: vec![
                WorkflowNode::new("s", NodeData::new("Start")),
                WorkflowNode::new("llm-1", NodeData::new("Const")),
                WorkflowNode::new("e", consumer),
            ],
            edges: vec![
                WorkflowEdge::new("s", "0", "llm-1", "in"),
                WorkflowEdge::new("llm-1", "0", "e", "in"),
            ],
        };
        let graph = WorkflowGraph::build(def).unwrap();
        let producers = detect_stream_producers(&graph);
        assert!(producers.contains("llm-1"));
        assert_eq!(producers.len(), 1);
    }
}
