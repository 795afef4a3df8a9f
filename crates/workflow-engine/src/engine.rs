//! Engine facade
//!
//! [`WorkflowEngine`] bundles a node registry and an interceptor list and
//! turns raw JSON definitions into runs. Hosts typically build one engine at
//! startup, register their node types, and call [`run`](WorkflowEngine::run)
//! per execution.

use std::sync::Arc;

use crate::definitions::{JsonMap, NodeResultData, WorkflowGraphDef};
use crate::error::{Result, WorkflowError};
use crate::events::{EventSink, NullEventSink};
use crate::graph::WorkflowGraph;
use crate::interceptor::NodeInterceptor;
use crate::orchestrator::Orchestrator;
use crate::registry::NodeRegistry;

pub struct WorkflowEngine {
    registry: NodeRegistry,
    interceptors: Vec<Arc<dyn NodeInterceptor>>,
}

impl WorkflowEngine {
    /// Engine with the built-in control nodes registered
    pub fn new() -> Self {
        Self {
            registry: NodeRegistry::with_builtins(),
            interceptors: Vec::new(),
        }
    }

    /// Engine over a caller-supplied registry
    pub fn with_registry(registry: NodeRegistry) -> Self {
        Self {
            registry,
            interceptors: Vec::new(),
        }
    }

    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    /// Append an interceptor; earlier additions wrap later ones
    pub fn add_interceptor(&mut self, interceptor: Arc<dyn NodeInterceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Parse a raw JSON definition
    pub fn parse(def_json: &str) -> Result<WorkflowGraphDef> {
        serde_json::from_str(def_json)
            .map_err(|e| WorkflowError::InvalidDefinition(e.to_string()))
    }

    /// Structural validation only; cheap and side-effect free
    pub fn validate(def: &WorkflowGraphDef) -> Result<()> {
        WorkflowGraph::build(def.clone()).map(|_| ())
    }

    /// Build an orchestrator without starting it, for callers that need the
    /// cancel handle before the run begins.
    pub fn orchestrator(
        &self,
        def: WorkflowGraphDef,
        payload: JsonMap,
        sink: Arc<dyn EventSink>,
    ) -> Result<Orchestrator> {
        let graph = WorkflowGraph::build(def)?;
        Ok(Orchestrator::new(
            graph,
            payload,
            Arc::new(self.registry.clone()),
            self.interceptors.clone(),
            sink,
        ))
    }

    /// Validate and run a definition to completion
    pub async fn run(
        &self,
        def: WorkflowGraphDef,
        payload: JsonMap,
        sink: Arc<dyn EventSink>,
    ) -> Result<NodeResultData> {
        self.orchestrator(def, payload, sink)?.run().await
    }

    /// Parse, validate and run a raw JSON definition
    pub async fn run_json(&self, def_json: &str, payload: JsonMap) -> Result<NodeResultData> {
        let def = Self::parse(def_json)?;
        self.run(def, payload, Arc::new(NullEventSink)).await
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = WorkflowEngine::parse("{not json").unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidDefinition(_)));
    }

    #[test]
    fn test_parse_accepts_canonical_shape() {
        let def = WorkflowEngine::parse(
            r#"{
                "nodes": [
                    {"id": "s", "data": {"registryId": "Start"}},
                    {"id": "e", "data": {"registryId": "End"}}
                ],
                "edges": [
                    {"sourceNodeID": "s", "targetNodeID": "e",
                     "sourcePortID": "0", "targetPortID": "in"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(def.nodes.len(), 2);
        WorkflowEngine::validate(&def).unwrap();
    }

    #[tokio::test]
    async fn test_run_json_minimal_workflow() {
        let engine = WorkflowEngine::new();
        let result = engine
            .run_json(
                r#"{
                    "nodes": [
                        {"id": "s", "data": {"registryId": "Start"}},
                        {"id": "e", "data": {"registryId": "End"}}
                    ],
                    "edges": [
                        {"sourceNodeID": "s", "targetNodeID": "e",
                         "sourcePortID": "0", "targetPortID": "in"}
                    ]
                }"#,
                JsonMap::new(),
            )
            .await
            .unwrap();
        assert!(result.output.is_empty());
    }
}
