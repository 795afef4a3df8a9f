//! Node executor contract and registry
//!
//! Every node type is an implementation of [`NodeExecutor`] built by a
//! factory keyed on the node's `registryId`. Built-in control nodes register
//! themselves at link time through `inventory`; hosts and tests add their own
//! types with [`NodeRegistry::register`].
//!
//! Executors never touch the scheduler directly. Everything they may do at
//! runtime goes through the [`RuntimeContext`] capability handle: snapshot
//! the variable map, emit events, or drive a nested sub-workflow.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Variable;
use crate::definitions::{JsonMap, NodeExecutionResult, WorkflowGraphDef, WorkflowNode};
use crate::error::{Result, WorkflowError};
use crate::events::WorkflowEvent;

/// Capabilities the orchestrator lends to a node executor for one run
#[async_trait]
pub trait RuntimeContext: Send + Sync {
    fn execution_id(&self) -> &str;

    /// The payload the run was started with
    async fn payload(&self) -> JsonMap;

    /// Snapshot of the variable map at this moment
    async fn variables(&self) -> HashMap<String, Variable>;

    /// Monotonic counter bumped on every variable write. A consumer that
    /// cached resolved data can compare versions to detect staleness.
    async fn context_version(&self) -> u64;

    /// Fire-and-forget event emission; delivery failures are logged, not
    /// propagated.
    fn emit(&self, event: WorkflowEvent);

    fn is_cancelled(&self) -> bool;

    /// Validate and run a nested sub-workflow to completion, seeding its
    /// context with `seed` under `seed_id`. Returns the sub-run's end output.
    async fn run_sub_workflow(
        &self,
        def: WorkflowGraphDef,
        seed_id: &str,
        seed: JsonMap,
    ) -> Result<JsonMap>;
}

/// One executable node instance, bound to its definition and runtime context
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Run the node once. Retries and timeouts live outside this call.
    async fn execute(&self) -> Result<NodeExecutionResult>;
}

/// Factory signature for link-time registrations
pub type BuildFn = fn(Arc<dyn RuntimeContext>, WorkflowNode, bool) -> Box<dyn NodeExecutor>;

/// Link-time registration record, collected via `inventory`
pub struct NodeRegistration {
    pub registry_id: &'static str,
    pub build: BuildFn,
}

inventory::collect!(NodeRegistration);

type DynFactory =
    Arc<dyn Fn(Arc<dyn RuntimeContext>, WorkflowNode, bool) -> Box<dyn NodeExecutor> + Send + Sync>;

/// Registry mapping `registryId` strings to executor factories
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: HashMap<String, DynFactory>,
}

impl NodeRegistry {
    /// Empty registry, no built-ins
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with every link-time registration
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<NodeRegistration> {
            let build = registration.build;
            registry.register(registration.registry_id, move |ctx, node, streaming| {
                build(ctx, node, streaming)
            });
        }
        registry
    }

    /// Register (or override) a node type at runtime
    pub fn register<F>(&mut self, registry_id: impl Into<String>, factory: F)
    where
        F: Fn(Arc<dyn RuntimeContext>, WorkflowNode, bool) -> Box<dyn NodeExecutor>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(registry_id.into(), Arc::new(factory));
    }

    pub fn contains(&self, registry_id: &str) -> bool {
        self.factories.contains_key(registry_id)
    }

    /// Build the executor for one node.
    ///
    /// `is_stream_producer` tells the executor a downstream consumer will
    /// subscribe to it live, so it should return a stream handle instead of
    /// blocking until its output is complete.
    pub fn create(
        &self,
        ctx: Arc<dyn RuntimeContext>,
        node: WorkflowNode,
        is_stream_producer: bool,
    ) -> Result<Box<dyn NodeExecutor>> {
        let factory = self
            .factories
            .get(&node.data.registry_id)
            .ok_or_else(|| WorkflowError::UnknownNodeType(node.data.registry_id.clone()))?;
        Ok(factory(ctx, node, is_stream_producer))
    }

    pub fn registered_ids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::StaticContext;
    use super::*;
    use crate::definitions::{NodeData, NodeResultData};

    struct EchoNode {
        node: WorkflowNode,
    }

    #[async_trait]
    impl NodeExecutor for EchoNode {
        async fn execute(&self) -> Result<NodeExecutionResult> {
            let mut output = JsonMap::new();
            output.insert(
                "name".to_string(),
                serde_json::Value::String(self.node.data.name.clone()),
            );
            Ok(NodeExecutionResult::data(
                JsonMap::new(),
                NodeResultData::with_output(output),
            ))
        }
    }

    #[tokio::test]
    async fn test_register_and_create() {
        let mut registry = NodeRegistry::new();
        registry.register("Echo", |_ctx, node, _streaming| {
            Box::new(EchoNode { node }) as Box<dyn NodeExecutor>
        });
        assert!(registry.contains("Echo"));

        let mut data = NodeData::new("Echo");
        data.name = "hello".to_string();
        let executor = registry
            .create(StaticContext::empty(), WorkflowNode::new("n1", data), false)
            .unwrap();
        let result = executor.execute().await.unwrap();
        match result.data {
            crate::definitions::NodeOutput::Data(d) => assert_eq!(d.output["name"], "hello"),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_registry_id() {
        let registry = NodeRegistry::new();
        let node = WorkflowNode::new("n1", NodeData::new("Mystery"));
        let err = registry.create(StaticContext::empty(), node, false).err().unwrap();
        assert!(matches!(err, WorkflowError::UnknownNodeType(id) if id == "Mystery"));
    }

    #[test]
    fn test_builtins_are_collected() {
        let registry = NodeRegistry::with_builtins();
        for id in ["Start", "End", "Output", "Branch", "Loop"] {
            assert!(registry.contains(id), "missing builtin {id}");
        }
    }
}
