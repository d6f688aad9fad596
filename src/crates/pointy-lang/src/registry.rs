//! Task Registry: the external contract that resolves a task name to an
//! invocable handler. Only the `lookup`/`invoke` contract is in scope —
//! populating a registry from a persistent, externally-managed service is
//! left to callers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;

/// Which executor flavor a handler's invocation should run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    IoBound,
    CpuBound,
    /// Dispatched through a `RemoteClient` rather than a local executor pool.
    Remote,
}

/// Per-invocation context. Threaded through so handlers can observe
/// cooperative cancellation without the scheduler reaching into their state.
#[derive(Clone)]
pub struct InvokeContext {
    pub node_path: String,
    pub attempt: u64,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl InvokeContext {
    pub fn new(node_path: impl Into<String>, attempt: u64, cancelled: Arc<std::sync::atomic::AtomicBool>) -> Self {
        Self {
            node_path: node_path.into(),
            attempt,
            cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::Relaxed)
    }
}

pub type InvokeFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// A resolvable, invocable task. A boxed future keeps the trait object-safe
/// without `async_trait`'s per-call allocation being hidden behind a macro.
pub trait TaskHandler: Send + Sync {
    fn invoke(&self, inputs: Vec<Value>, ctx: InvokeContext) -> InvokeFuture<'_>;

    fn kind(&self) -> HandlerKind {
        HandlerKind::IoBound
    }

    /// Used only by Conditional nodes: given this handler's own result,
    /// names the child branch to activate, or `None` to skip all of them.
    fn select_branch(&self, _result: &Value) -> Option<String> {
        None
    }
}

/// Resolves task names to handlers. `lookup` must be pure and idempotent.
pub trait TaskRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Arc<dyn TaskHandler>>;
}

/// In-memory, `HashMap`-backed reference registry. Not itself "the
/// user-facing task registry" excluded from scope — it is the minimal
/// concrete collaborator needed to exercise the engine in tests and
/// examples, supplying closures-as-handlers the way graph-execution test
/// suites typically do.
#[derive(Default, Clone)]
pub struct StaticRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(name.into(), handler);
    }
}

impl TaskRegistry for StaticRegistry {
    fn lookup(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct Echo;

    impl TaskHandler for Echo {
        fn invoke(&self, inputs: Vec<Value>, _ctx: InvokeContext) -> InvokeFuture<'_> {
            Box::pin(async move { Ok(inputs.into_iter().next().unwrap_or(Value::Null)) })
        }
    }

    #[tokio::test]
    async fn lookup_returns_the_registered_handler() {
        let registry = StaticRegistry::new().register("echo", Arc::new(Echo));
        let handler = registry.lookup("echo").expect("handler registered");
        let ctx = InvokeContext::new("echo", 0, Arc::new(AtomicBool::new(false)));
        let result = handler.invoke(vec![Value::from(1)], ctx).await.unwrap();
        assert_eq!(result, Value::from(1));
    }

    #[test]
    fn lookup_of_unregistered_name_is_none() {
        let registry = StaticRegistry::new();
        assert!(registry.lookup("missing").is_none());
    }
}
