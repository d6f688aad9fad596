//! Pointy-Lang: a compact DSL for directed task graphs, and the scheduler
//! that drives a parsed graph to completion.
//!
//! The pipeline a caller drives end to end:
//!
//! ```text
//! source text -> lexer -> parser -> graph builder -> TaskGraph -> Scheduler
//! ```
//!
//! [`compile`] runs the first three stages; [`run`] (in [`scheduler`]) drives
//! the last one against a [`registry::TaskRegistry`] and an
//! [`config::EngineConfig`].

pub mod ast;
pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod lexer;
pub mod parser;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use config::EngineConfig;
pub use error::{PointyError, Result};
pub use graph::TaskGraph;
pub use registry::{HandlerKind, InvokeContext, InvokeFuture, StaticRegistry, TaskHandler, TaskRegistry};
pub use scheduler::{FailureReason, RunOutcome, RunStatus, Scheduler};

/// Lexes, parses, and lowers `src` into a validated [`TaskGraph`], the three
/// front-end stages that run before any node is dispatched.
pub fn compile(src: &str, registry: &dyn TaskRegistry) -> Result<TaskGraph> {
    let expr = parser::parse_source(src)?;
    builder::build(&expr, registry)
}

/// Compiles `src` and drives it to completion against `registry` and
/// `config` in one call. Equivalent to `compile` followed by
/// [`scheduler::run`], provided for callers that don't need the
/// intermediate [`TaskGraph`].
pub async fn compile_and_run(src: &str, registry: &dyn TaskRegistry, config: EngineConfig) -> Result<RunOutcome> {
    let graph = compile(src, registry)?;
    Ok(scheduler::run(&graph, registry, config).await)
}
