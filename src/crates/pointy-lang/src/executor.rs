//! Executor Pool: runs handler invocations off the scheduling loop and
//! reports completions back over one shared channel.
//!
//! Two flavors, matching the two kinds of work a handler can declare:
//! `IoExecutor` multiplexes invocations as ordinary `tokio` tasks behind a
//! `Semaphore`. `CpuExecutor` gives each invocation its own blocking OS thread via
//! `spawn_blocking`, for handlers that do real CPU work and would otherwise
//! stall the reactor. `Remote`-kind handlers are dispatched through the
//! `IoExecutor` like any other I/O-bound call — the handler implementation
//! is expected to own its `RemoteClient` internally; the pool doesn't need
//! to know it's talking to a remote endpoint.
//!
//! Cancellation is cooperative: a `RemoteClient` and any handler that
//! respects `InvokeContext::is_cancelled` can bail out early, but nothing
//! here forcibly aborts an in-flight tokio task. `tokio-util`'s
//! `CancellationToken` isn't in this workspace's dependency set, so
//! cancellation is plumbed by hand with a per-node `AtomicBool` flag the
//! scheduler flips when a node's result is no longer needed.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};

use crate::error::{PointyError, Result};
use crate::graph::NodeId;
use crate::registry::{InvokeContext, TaskHandler};

/// One handler invocation, ready to run. `origin` is `Some(predecessor)` for
/// a per-replica Broadcast delivery (see `scheduler`'s fan-out join), and
/// `None` for every other kind of node.
pub struct DispatchedTask {
    pub node_id: NodeId,
    pub origin: Option<NodeId>,
    pub node_path: String,
    pub attempt: u64,
    pub handler: Arc<dyn TaskHandler>,
    pub inputs: Vec<Value>,
    pub cancelled: Arc<AtomicBool>,
}

/// The outcome of one dispatched invocation, delivered back to whoever
/// owns the receiving end of the completion channel.
#[derive(Debug)]
pub struct Completion {
    pub node_id: NodeId,
    pub origin: Option<NodeId>,
    pub attempt: u64,
    pub outcome: Result<Value>,
}

/// Constructs the shared channel both pool flavors report completions on.
pub fn completion_channel(capacity: usize) -> (mpsc::Sender<Completion>, mpsc::Receiver<Completion>) {
    mpsc::channel(capacity)
}

#[async_trait]
pub trait ExecutorPool: Send + Sync {
    /// Hands the task off for execution. Returns once the task has been
    /// accepted (which may mean waiting for a free slot), not once it has
    /// run; the result arrives later on the completion channel.
    async fn submit(&self, task: DispatchedTask);
}

/// Runs invocations as ordinary `tokio::spawn` tasks, bounded by a
/// `Semaphore` so a run with thousands of ready I/O-bound nodes doesn't
/// flood the reactor with unbounded concurrent futures.
pub struct IoExecutor {
    semaphore: Arc<Semaphore>,
    completions: mpsc::Sender<Completion>,
}

impl IoExecutor {
    pub fn new(concurrency: usize, completions: mpsc::Sender<Completion>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            completions,
        }
    }
}

#[async_trait]
impl ExecutorPool for IoExecutor {
    async fn submit(&self, task: DispatchedTask) {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("IoExecutor semaphore is never closed");
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let ctx = InvokeContext::new(task.node_path, task.attempt, task.cancelled);
            let outcome = task.handler.invoke(task.inputs, ctx).await;
            let _ = tx
                .send(Completion {
                    node_id: task.node_id,
                    origin: task.origin,
                    attempt: task.attempt,
                    outcome,
                })
                .await;
        });
    }
}

/// Runs invocations on a fixed-size pool of blocking OS threads via
/// `spawn_blocking`. A handler's `invoke` future is driven to completion on
/// that thread with `Handle::block_on`, so a CPU-bound handler that
/// busy-loops never starves the async reactor the rest of the engine runs
/// on.
pub struct CpuExecutor {
    semaphore: Arc<Semaphore>,
    completions: mpsc::Sender<Completion>,
}

impl CpuExecutor {
    pub fn new(workers: usize, completions: mpsc::Sender<Completion>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            completions,
        }
    }
}

#[async_trait]
impl ExecutorPool for CpuExecutor {
    async fn submit(&self, task: DispatchedTask) {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("CpuExecutor semaphore is never closed");
        let tx = self.completions.clone();
        let handle = tokio::runtime::Handle::current();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let ctx = InvokeContext::new(task.node_path, task.attempt, task.cancelled);
            let outcome = handle.block_on(task.handler.invoke(task.inputs, ctx));
            let _ = tx.blocking_send(Completion {
                node_id: task.node_id,
                origin: task.origin,
                attempt: task.attempt,
                outcome,
            });
        });
    }
}

/// Request/response contract for a handler backed by a remote endpoint.
/// Only the shape of the exchange is in scope — wiring an actual transport
/// (gRPC, HTTP, a queue) is left to whoever implements `RemoteClient`.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub task_name: String,
    pub inputs: Vec<Value>,
}

#[derive(Debug, Clone)]
pub enum RemoteResponse {
    Ok(Value),
    Err { message: String, retryable: bool },
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn call(&self, request: RemoteRequest) -> Result<RemoteResponse>;
}

/// Adapts a `RemoteClient` into a `TaskHandler`, so `Remote`-kind tasks
/// flow through the same registry/dispatch path as any other handler.
pub struct RemoteHandler<C: RemoteClient> {
    task_name: String,
    client: C,
}

impl<C: RemoteClient> RemoteHandler<C> {
    pub fn new(task_name: impl Into<String>, client: C) -> Self {
        Self {
            task_name: task_name.into(),
            client,
        }
    }
}

impl<C: RemoteClient + 'static> TaskHandler for RemoteHandler<C> {
    fn invoke(&self, inputs: Vec<Value>, _ctx: InvokeContext) -> crate::registry::InvokeFuture<'_> {
        Box::pin(async move {
            let response = self
                .client
                .call(RemoteRequest {
                    task_name: self.task_name.clone(),
                    inputs,
                })
                .await?;
            match response {
                RemoteResponse::Ok(v) => Ok(v),
                RemoteResponse::Err { message, retryable } => {
                    if retryable {
                        Err(PointyError::HandlerError(Value::from(message)))
                    } else {
                        Err(PointyError::NonRetryable(Value::from(message)))
                    }
                }
            }
        })
    }

    fn kind(&self) -> crate::registry::HandlerKind {
        crate::registry::HandlerKind::Remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InvokeFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    impl TaskHandler for CountingHandler {
        fn invoke(&self, inputs: Vec<Value>, _ctx: InvokeContext) -> InvokeFuture<'_> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(inputs.into_iter().next().unwrap_or(Value::Null)) })
        }
    }

    #[tokio::test]
    async fn io_executor_reports_a_completion() {
        let (tx, mut rx) = completion_channel(8);
        let pool = IoExecutor::new(2, tx);
        let calls = Arc::new(AtomicUsize::new(0));
        pool.submit(DispatchedTask {
            node_id: NodeId(0),
            origin: None,
            node_path: "a".into(),
            attempt: 0,
            handler: Arc::new(CountingHandler { calls: calls.clone() }),
            inputs: vec![Value::from(7)],
            cancelled: Arc::new(AtomicBool::new(false)),
        })
        .await;

        let completion = rx.recv().await.expect("completion delivered");
        assert_eq!(completion.node_id, NodeId(0));
        assert_eq!(completion.outcome.unwrap(), Value::from(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cpu_executor_runs_the_handler_and_reports_a_completion() {
        let (tx, mut rx) = completion_channel(8);
        let pool = CpuExecutor::new(1, tx);
        let calls = Arc::new(AtomicUsize::new(0));
        pool.submit(DispatchedTask {
            node_id: NodeId(1),
            origin: None,
            node_path: "b".into(),
            attempt: 0,
            handler: Arc::new(CountingHandler { calls: calls.clone() }),
            inputs: vec![Value::from(9)],
            cancelled: Arc::new(AtomicBool::new(false)),
        })
        .await;

        let completion = rx.recv().await.expect("completion delivered");
        assert_eq!(completion.outcome.unwrap(), Value::from(9));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct EchoRemote;

    #[async_trait]
    impl RemoteClient for EchoRemote {
        async fn call(&self, request: RemoteRequest) -> Result<RemoteResponse> {
            Ok(RemoteResponse::Ok(Value::from(request.task_name)))
        }
    }

    #[tokio::test]
    async fn remote_handler_adapts_client_responses() {
        let handler = RemoteHandler::new("ping", EchoRemote);
        let ctx = InvokeContext::new("ping", 0, Arc::new(AtomicBool::new(false)));
        let result = handler.invoke(vec![], ctx).await.unwrap();
        assert_eq!(result, Value::from("ping"));
    }
}
