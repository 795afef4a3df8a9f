//! Live stream handles
//!
//! A stream-producing node finishes its scheduling slot early by handing the
//! orchestrator a [`StreamBroadcaster`]. The producer task keeps pushing
//! chunks through it while downstream consumers either subscribe for live
//! replay or await the final resolved output. Subscribers attached late see
//! the full history first, so consumption order never races production.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use crate::definitions::{JsonMap, NodeId};
use crate::error::{Result, WorkflowError};

/// One event on a live stream
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum StreamEvent {
    Start,
    Chunk(String),
    End,
}

#[derive(Default)]
struct BroadcasterState {
    history: Vec<StreamEvent>,
    subscribers: Vec<mpsc::UnboundedSender<StreamEvent>>,
    result: Option<std::result::Result<JsonMap, String>>,
    cancelled: bool,
    abort: Option<AbortHandle>,
}

/// Fan-out handle for one node's live output.
///
/// The producer side calls [`emit`](Self::emit) for chunks and exactly one of
/// [`finish`](Self::finish) / [`fail`](Self::fail); the orchestrator may call
/// [`cancel`](Self::cancel) instead. Consumers use
/// [`subscribe`](Self::subscribe) for incremental chunks or
/// [`result`](Self::result) to await the terminal output map.
pub struct StreamBroadcaster {
    node_id: NodeId,
    state: Mutex<BroadcasterState>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl std::fmt::Debug for StreamBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBroadcaster")
            .field("node_id", &self.node_id)
            .field("done", &*self.done_rx.borrow())
            .finish()
    }
}

impl StreamBroadcaster {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            node_id: node_id.into(),
            state: Mutex::new(BroadcasterState::default()),
            done_tx,
            done_rx,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Attach the producer task so `cancel` can abort it
    pub fn attach_producer(&self, handle: AbortHandle) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.result.is_some() {
            handle.abort();
        } else {
            state.abort = Some(handle);
        }
    }

    /// Push an event to history and every live subscriber
    pub fn emit(&self, event: StreamEvent) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.result.is_some() {
            return;
        }
        state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        state.history.push(event);
    }

    /// Subscribe to the stream. The receiver first replays all history, then
    /// delivers live events; the channel closes after `End` or termination.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for event in &state.history {
            let _ = tx.send(event.clone());
        }
        if state.result.is_none() {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Resolve the stream successfully with its final output map
    pub fn finish(&self, output: JsonMap) {
        self.terminate(Ok(output), false);
    }

    /// Resolve the stream with a producer error
    pub fn fail(&self, message: impl Into<String>) {
        self.terminate(Err(message.into()), false);
    }

    /// Terminate the stream from outside, aborting the producer. Waiters on
    /// [`result`](Self::result) observe `WorkflowError::Cancelled`.
    pub fn cancel(&self) {
        self.terminate(Err("stream cancelled".to_string()), true);
    }

    fn terminate(&self, result: std::result::Result<JsonMap, String>, cancelled: bool) {
        let abort = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.result.is_some() {
                return;
            }
            let end = StreamEvent::End;
            state.subscribers.retain(|tx| tx.send(end.clone()).is_ok());
            state.history.push(end);
            state.subscribers.clear();
            state.result = Some(result);
            state.cancelled = cancelled;
            state.abort.take()
        };
        // Result is visible before the producer dies and before waiters wake
        let _ = self.done_tx.send(true);
        if let Some(handle) = abort {
            handle.abort();
        }
    }

    pub fn is_done(&self) -> bool {
        *self.done_rx.borrow()
    }

    /// Await the stream's terminal output map
    pub async fn result(&self) -> Result<JsonMap> {
        let mut done = self.done_rx.clone();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.cancelled {
            return Err(WorkflowError::Cancelled);
        }
        match &state.result {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(message)) => Err(WorkflowError::failed(message.clone())),
            None => Err(WorkflowError::Cancelled),
        }
    }
}

/// Hand-off record for a node that went `STREAMTASK`: the main loop turns it
/// into a monitor task bounded by the node's remaining timeout budget.
pub struct StreamTask {
    pub node_id: NodeId,
    pub broadcaster: std::sync::Arc<StreamBroadcaster>,
    pub started: Instant,
    pub timeout: Duration,
}

impl StreamTask {
    /// Remaining budget, floored at 100ms so a slow first attempt cannot
    /// produce a zero-length monitor window.
    pub fn remaining(&self) -> Duration {
        let spent = self.started.elapsed();
        self.timeout
            .checked_sub(spent)
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_replays_history() {
        let b = StreamBroadcaster::new("n1");
        b.emit(StreamEvent::Start);
        b.emit(StreamEvent::Chunk("a".to_string()));
        let mut rx = b.subscribe();
        b.emit(StreamEvent::Chunk("b".to_string()));
        b.finish(JsonMap::new());
        assert_eq!(rx.recv().await, Some(StreamEvent::Start));
        assert_eq!(rx.recv().await, Some(StreamEvent::Chunk("a".to_string())));
        assert_eq!(rx.recv().await, Some(StreamEvent::Chunk("b".to_string())));
        assert_eq!(rx.recv().await, Some(StreamEvent::End));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_result_awaits_finish() {
        let b = std::sync::Arc::new(StreamBroadcaster::new("n1"));
        let waiter = {
            let b = b.clone();
            tokio::spawn(async move { b.result().await })
        };
        tokio::task::yield_now().await;
        let mut output = JsonMap::new();
        output.insert("text".to_string(), serde_json::json!("done"));
        b.finish(output);
        let resolved = waiter.await.unwrap().unwrap();
        assert_eq!(resolved["text"], "done");
    }

    #[tokio::test]
    async fn test_fail_surfaces_as_execution_error() {
        let b = StreamBroadcaster::new("n1");
        b.fail("backend exploded");
        let err = b.result().await.unwrap_err();
        assert!(matches!(err, WorkflowError::Execution(_)));
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters_with_cancelled() {
        let b = std::sync::Arc::new(StreamBroadcaster::new("n1"));
        let waiter = {
            let b = b.clone();
            tokio::spawn(async move { b.result().await })
        };
        tokio::task::yield_now().await;
        b.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(WorkflowError::Cancelled)));
    }

    #[tokio::test]
    async fn test_events_after_finish_are_dropped() {
        let b = StreamBroadcaster::new("n1");
        b.finish(JsonMap::new());
        b.emit(StreamEvent::Chunk("late".to_string()));
        let mut rx = b.subscribe();
        assert_eq!(rx.recv().await, Some(StreamEvent::End));
        assert_eq!(rx.recv().await, None);
    }
}
