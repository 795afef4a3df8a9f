//! Node execution interceptors
//!
//! Interceptors wrap every node execution in an onion: the first interceptor
//! registered is the outermost layer. Each layer receives a [`Next`]
//! continuation and decides whether (and when) to call through, so they can
//! time, trace, short-circuit or rewrite results without the scheduler
//! knowing.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::definitions::{NodeExecutionResult, WorkflowNode};
use crate::error::Result;
use crate::registry::RuntimeContext;

/// Continuation handle: the rest of the chain plus the node itself
pub struct Next<'a> {
    fut: BoxFuture<'a, Result<NodeExecutionResult>>,
}

impl<'a> Next<'a> {
    pub fn new(fut: BoxFuture<'a, Result<NodeExecutionResult>>) -> Self {
        Self { fut }
    }

    /// Invoke the rest of the chain. Consumes the continuation so a layer
    /// can call through at most once.
    pub async fn run(self) -> Result<NodeExecutionResult> {
        self.fut.await
    }
}

/// A cross-cutting wrapper around node execution. The runtime context handle
/// lets a layer read variables or emit its own events.
#[async_trait]
pub trait NodeInterceptor: Send + Sync {
    async fn intercept(
        &self,
        node: &WorkflowNode,
        ctx: Arc<dyn RuntimeContext>,
        next: Next<'_>,
    ) -> Result<NodeExecutionResult>;
}

/// Run `terminal` through the interceptor chain. Interceptors wrap in list
/// order: index 0 is outermost.
pub async fn run_chain<'a>(
    interceptors: &'a [Arc<dyn NodeInterceptor>],
    node: &'a WorkflowNode,
    ctx: Arc<dyn RuntimeContext>,
    terminal: BoxFuture<'a, Result<NodeExecutionResult>>,
) -> Result<NodeExecutionResult> {
    let mut next = Next::new(terminal);
    for interceptor in interceptors.iter().rev() {
        let layer_ctx = ctx.clone();
        let fut: BoxFuture<'a, Result<NodeExecutionResult>> =
            Box::pin(async move { interceptor.intercept(node, layer_ctx, next).await });
        next = Next::new(fut);
    }
    next.run().await
}

/// Logs node execution at debug level with wall-clock duration
pub struct LoggingInterceptor;

#[async_trait]
impl NodeInterceptor for LoggingInterceptor {
    async fn intercept(
        &self,
        node: &WorkflowNode,
        ctx: Arc<dyn RuntimeContext>,
        next: Next<'_>,
    ) -> Result<NodeExecutionResult> {
        let started = std::time::Instant::now();
        log::debug!(
            "node {} ({}) starting in run {}",
            node.id,
            node.data.registry_id,
            ctx.execution_id()
        );
        let result = next.run().await;
        match &result {
            Ok(r) => log::debug!(
                "node {} finished on port {} in {:?}",
                node.id,
                r.activated_port,
                started.elapsed()
            ),
            Err(e) => log::debug!("node {} errored in {:?}: {e}", node.id, started.elapsed()),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{JsonMap, NodeData, NodeResultData};
    use crate::registry::test_support::StaticContext;
    use std::sync::Mutex;

    struct Tracer {
        label: &'static str,
        trace: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl NodeInterceptor for Tracer {
        async fn intercept(
            &self,
            _node: &WorkflowNode,
            _ctx: Arc<dyn RuntimeContext>,
            next: Next<'_>,
        ) -> Result<NodeExecutionResult> {
            self.trace.lock().unwrap().push(format!("{}:before", self.label));
            let result = next.run().await;
            self.trace.lock().unwrap().push(format!("{}:after", self.label));
            result
        }
    }

    #[tokio::test]
    async fn test_chain_wraps_in_list_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let interceptors: Vec<Arc<dyn NodeInterceptor>> = vec![
            Arc::new(Tracer { label: "outer", trace: trace.clone() }),
            Arc::new(Tracer { label: "inner", trace: trace.clone() }),
        ];
        let node = WorkflowNode::new("n1", NodeData::new("Task"));
        let inner_trace = trace.clone();
        let terminal: BoxFuture<'_, Result<NodeExecutionResult>> = Box::pin(async move {
            inner_trace.lock().unwrap().push("execute".to_string());
            Ok(NodeExecutionResult::data(
                JsonMap::new(),
                NodeResultData::default(),
            ))
        });

        run_chain(&interceptors, &node, StaticContext::empty(), terminal)
            .await
            .unwrap();
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["outer:before", "inner:before", "execute", "inner:after", "outer:after"]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_runs_terminal() {
        let node = WorkflowNode::new("n1", NodeData::new("Task"));
        let terminal: BoxFuture<'_, Result<NodeExecutionResult>> = Box::pin(async {
            Ok(NodeExecutionResult::data(JsonMap::new(), NodeResultData::default()))
        });
        let result = run_chain(&[], &node, StaticContext::empty(), terminal)
            .await
            .unwrap();
        assert_eq!(result.activated_port, "0");
    }

    #[tokio::test]
    async fn test_layer_sees_runtime_context() {
        struct RunTagger {
            seen: Arc<Mutex<Vec<String>>>,
        }

        #[async_trait]
        impl NodeInterceptor for RunTagger {
            async fn intercept(
                &self,
                _node: &WorkflowNode,
                ctx: Arc<dyn RuntimeContext>,
                next: Next<'_>,
            ) -> Result<NodeExecutionResult> {
                self.seen.lock().unwrap().push(ctx.execution_id().to_string());
                next.run().await
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let interceptors: Vec<Arc<dyn NodeInterceptor>> =
            vec![Arc::new(RunTagger { seen: seen.clone() })];
        let node = WorkflowNode::new("n1", NodeData::new("Task"));
        let terminal: BoxFuture<'_, Result<NodeExecutionResult>> = Box::pin(async {
            Ok(NodeExecutionResult::data(JsonMap::new(), NodeResultData::default()))
        });
        run_chain(&interceptors, &node, StaticContext::empty(), terminal)
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["test-exec"]);
    }
}
