//! Scheduler: the coordinator that drives one run of a `TaskGraph` to
//! completion.
//!
//! A single `async fn` owns the whole run. It never blocks on a handler —
//! every suspension point is an `.await` on the completion channel, a
//! retry's backoff timer, or the executor pools' own back-pressure
//! semaphores. Concurrency comes entirely from the Executor Pool; the
//! coordinator itself is single-threaded, the same separation a Pregel-style
//! superstep loop draws between the stepping coordinator and its node
//! executors.
//!
//! ## Broadcast fan-out
//!
//! A node fed only by `Seq`/`Conditional` edges is an AND-join: it waits for
//! every live predecessor to succeed before it runs once. A node fed by
//! `Broadcast` edges is different — each broadcasting predecessor delivers
//! independently, and this scheduler dispatches one invocation per
//! delivery rather than waiting to collect all of them into one call
//! (**per-replica fan-out**, the policy this engine commits to where the
//! language reference leaves two behaviors on the table). The node's single
//! `ResultStore` entry holds the array of its per-delivery outputs in
//! delivery order, so anything downstream still sees one value. Its retry
//! budget applies per delivery, not once per node — invariant 2's
//! "`retryBudget(n) + 1` invocations" is evaluated per (node, delivering
//! predecessor) pair here, not globally per node id.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::error::PointyError;
use crate::executor::{completion_channel, Completion, CpuExecutor, DispatchedTask, ExecutorPool, IoExecutor};
use crate::graph::{EdgeKind, NodeId, TaskGraph};
use crate::registry::{HandlerKind, TaskRegistry};
use crate::store::{NodeOutcome, ResultStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gating {
    Entry,
    AndJoin,
    Broadcast,
}

fn classify(graph: &TaskGraph, node: NodeId) -> Gating {
    let preds = &graph.node(node).predecessors;
    match preds.first() {
        None => Gating::Entry,
        Some(&p) => match graph.edge_kind(p, node) {
            Some(EdgeKind::Broadcast) => Gating::Broadcast,
            _ => Gating::AndJoin,
        },
    }
}

/// Tracks the per-predecessor deliveries of a Broadcast-gated node until
/// every broadcasting predecessor has a final fate.
#[derive(Debug, Default)]
struct BroadcastJoin {
    resolved: usize,
    successes: Vec<Value>,
    saw_failure: bool,
    attempts_remaining: HashMap<NodeId, u64>,
    attempts_made: u64,
}

struct NodeState {
    status: NodeStatus,
    gating: Gating,
    attempts_remaining: u64,
    attempts_made: u64,
    cancelled: Arc<AtomicBool>,
    started: Option<Instant>,
    ended: Option<Instant>,
    broadcast: Option<BroadcastJoin>,
}

impl NodeState {
    fn new(graph: &TaskGraph, id: NodeId) -> Self {
        let gating = classify(graph, id);
        let retry_budget = graph.node(id).retry_budget;
        NodeState {
            status: NodeStatus::Pending,
            gating,
            attempts_remaining: retry_budget + 1,
            attempts_made: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
            started: None,
            ended: None,
            broadcast: if gating == Gating::Broadcast { Some(BroadcastJoin::default()) } else { None },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timing {
    pub started: Option<Instant>,
    pub ended: Option<Instant>,
    pub attempts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    NodeFailures,
    Deadline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed { reason: FailureReason, nodes: Vec<NodeId> },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub results: HashMap<NodeId, NodeOutcome>,
    pub timings: HashMap<NodeId, Timing>,
}

/// A freshly-ready invocation, either dispatched for the first time or
/// re-dispatched after a retry's backoff elapsed.
struct ReadyAttempt {
    node: NodeId,
    origin: Option<NodeId>,
    inputs: Vec<Value>,
}

/// Which pool flavor a queued `DispatchedTask` belongs in. Decided
/// synchronously at queue time (from `handler.kind()`); the actual
/// `submit().await` happens later, in `run`'s own async body, so nothing
/// in the synchronous state-machine cascade ever blocks on the pool.
enum PoolChoice {
    Io,
    Cpu,
}

pub struct Scheduler<'a> {
    graph: &'a TaskGraph,
    registry: &'a dyn TaskRegistry,
    config: EngineConfig,
    results: ResultStore,
    states: HashMap<NodeId, NodeState>,
    failed_nodes: HashSet<NodeId>,
    io_pool: IoExecutor,
    cpu_pool: CpuExecutor,
    completions_rx: mpsc::Receiver<Completion>,
    retry_tx: mpsc::Sender<ReadyAttempt>,
    retry_rx: mpsc::Receiver<ReadyAttempt>,
    pending_dispatch: Vec<(PoolChoice, DispatchedTask)>,
    deadline_failed: bool,
}

impl<'a> Scheduler<'a> {
    pub fn new(graph: &'a TaskGraph, registry: &'a dyn TaskRegistry, config: EngineConfig) -> Self {
        let (completions_tx, completions_rx) = completion_channel(graph.len().max(1) * 4);
        let (retry_tx, retry_rx) = mpsc::channel(graph.len().max(1) * 4);
        let io_pool = IoExecutor::new(config.io_pool_concurrency, completions_tx.clone());
        let cpu_pool = CpuExecutor::new(config.cpu_pool_workers, completions_tx);
        let states = graph.nodes().map(|n| (n.id, NodeState::new(graph, n.id))).collect();

        Scheduler {
            graph,
            registry,
            config,
            results: ResultStore::new(),
            states,
            failed_nodes: HashSet::new(),
            io_pool,
            cpu_pool,
            completions_rx,
            retry_tx,
            retry_rx,
            pending_dispatch: Vec::new(),
            deadline_failed: false,
        }
    }

    /// Drives the run to completion.
    pub async fn run(mut self) -> RunOutcome {
        tracing::info!(nodes = self.graph.len(), "scheduler run starting");

        let entries: Vec<NodeId> = self.graph.entry.clone();
        for id in entries {
            self.begin_fresh(id, Vec::new());
        }
        self.drain_pending_dispatch().await;

        let deadline_at = self.config.run_deadline.map(|d| Instant::now() + d);
        let far_future = Instant::now() + std::time::Duration::from_secs(60 * 60 * 24 * 365);

        loop {
            if self.is_done() {
                break;
            }

            tokio::select! {
                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion);
                }
                Some(attempt) = self.retry_rx.recv() => {
                    self.dispatch(attempt.node, attempt.origin, attempt.inputs);
                }
                _ = tokio::time::sleep_until(deadline_at.unwrap_or(far_future)), if deadline_at.is_some() => {
                    tracing::warn!("run-wide deadline exceeded, cancelling in-flight nodes");
                    self.cancel_all();
                    self.deadline_failed = true;
                    break;
                }
                else => break,
            }

            self.drain_pending_dispatch().await;
        }

        let outcome = self.assemble();
        tracing::info!(status = ?outcome.status, "scheduler run complete");
        outcome
    }

    fn is_done(&self) -> bool {
        self.states.values().all(|s| !matches!(s.status, NodeStatus::Pending | NodeStatus::Running))
    }

    fn cancel_all(&self) {
        for state in self.states.values() {
            state.cancelled.store(true, Ordering::Relaxed);
        }
    }

    // ---- dispatch ----------------------------------------------------

    fn begin_fresh(&mut self, node: NodeId, inputs: Vec<Value>) {
        self.dispatch(node, None, inputs);
    }

    fn dispatch(&mut self, node: NodeId, origin: Option<NodeId>, inputs: Vec<Value>) {
        let path = self.node_path(node, origin);
        let task_name = self.graph.node(node).task_name.clone();
        let handler = self
            .registry
            .lookup(&task_name)
            .expect("task name was validated against the registry at build time");

        let (attempt, cancelled) = {
            let state = self.states.get_mut(&node).unwrap();
            state.status = NodeStatus::Running;
            if state.started.is_none() {
                state.started = Some(Instant::now());
            }
            match origin {
                None => {
                    state.attempts_remaining -= 1;
                    let attempt = state.attempts_made;
                    state.attempts_made += 1;
                    (attempt, state.cancelled.clone())
                }
                Some(pred) => {
                    let join = state.broadcast.as_mut().expect("broadcast-gated node");
                    let budget = join.attempts_remaining.entry(pred).or_insert_with(|| self.graph.node(node).retry_budget + 1);
                    *budget -= 1;
                    join.attempts_made += 1;
                    (join.attempts_made - 1, state.cancelled.clone())
                }
            }
        };

        tracing::debug!(%node, path = %path, attempt, "dispatching task");

        let choice = match handler.kind() {
            HandlerKind::CpuBound => PoolChoice::Cpu,
            HandlerKind::IoBound | HandlerKind::Remote => PoolChoice::Io,
        };

        let task = DispatchedTask {
            node_id: node,
            origin,
            node_path: path,
            attempt,
            handler,
            inputs,
            cancelled,
        };

        // Queued, not submitted: `submit` awaits the pool's back-pressure
        // permit, and this method is called from synchronous cascades
        // (retry, skip/fail propagation) that must not themselves become
        // `async`. `run` drains this queue on its own turn of the loop.
        self.pending_dispatch.push((choice, task));
    }

    async fn drain_pending_dispatch(&mut self) {
        let batch = std::mem::take(&mut self.pending_dispatch);
        for (choice, task) in batch {
            match choice {
                PoolChoice::Io => self.io_pool.submit(task).await,
                PoolChoice::Cpu => self.cpu_pool.submit(task).await,
            }
        }
    }

    fn node_path(&self, node: NodeId, origin: Option<NodeId>) -> String {
        let base = &self.graph.node(node).path;
        match origin {
            Some(pred) => format!("{base}<-{}", self.graph.node(pred).path),
            None => base.clone(),
        }
    }

    fn schedule_retry(&mut self, node: NodeId, origin: Option<NodeId>, inputs: Vec<Value>, attempt_index: u64) {
        let delay = self.config.default_retry_policy.calculate_delay(attempt_index as usize);
        tracing::debug!(%node, ?delay, "scheduling retry after backoff");
        let tx = self.retry_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ReadyAttempt { node, origin, inputs }).await;
        });
    }

    // ---- completion handling ------------------------------------------

    fn handle_completion(&mut self, completion: Completion) {
        let Completion { node_id, origin, outcome, .. } = completion;
        match outcome {
            Ok(value) => self.on_success(node_id, origin, value),
            Err(err) => self.on_failure(node_id, origin, err),
        }
    }

    fn on_success(&mut self, node: NodeId, origin: Option<NodeId>, value: Value) {
        match origin {
            None => self.finish_node(node, NodeStatus::Succeeded, NodeOutcome::Value(value)),
            Some(_) => {
                {
                    let join = self.states.get_mut(&node).unwrap().broadcast.as_mut().unwrap();
                    join.successes.push(value);
                    join.resolved += 1;
                }
                self.maybe_finalize_broadcast(node);
            }
        }
    }

    fn on_failure(&mut self, node: NodeId, origin: Option<NodeId>, err: PointyError) {
        match origin {
            None => {
                let (remaining, attempt_index) = {
                    let state = self.states.get(&node).unwrap();
                    (state.attempts_remaining, state.attempts_made.saturating_sub(1))
                };
                if err.is_retryable() && remaining > 0 {
                    let inputs = self.results.resolved_inputs(&self.graph.node(node).predecessors.clone());
                    self.schedule_retry(node, None, inputs, attempt_index);
                } else {
                    self.finish_node(node, NodeStatus::Failed, NodeOutcome::Error(error_value(&err)));
                }
            }
            Some(pred) => {
                let (remaining, attempt_index) = {
                    let state = self.states.get(&node).unwrap();
                    let join = state.broadcast.as_ref().unwrap();
                    (*join.attempts_remaining.get(&pred).unwrap_or(&0), join.attempts_made.saturating_sub(1))
                };
                if err.is_retryable() && remaining > 0 {
                    let value = self.results.get(pred).and_then(NodeOutcome::value).cloned().unwrap_or(Value::Null);
                    self.schedule_retry(node, Some(pred), vec![value], attempt_index);
                } else {
                    {
                        let join = self.states.get_mut(&node).unwrap().broadcast.as_mut().unwrap();
                        join.saw_failure = true;
                        join.resolved += 1;
                    }
                    self.maybe_finalize_broadcast(node);
                }
            }
        }
    }

    fn maybe_finalize_broadcast(&mut self, node: NodeId) {
        let total = self.graph.node(node).predecessors.len();
        let (resolved, done) = {
            let join = self.states.get(&node).unwrap().broadcast.as_ref().unwrap();
            (join.resolved, join.resolved >= total)
        };
        if !done {
            let _ = resolved;
            return;
        }
        let join_successes;
        let saw_failure;
        {
            let join = self.states.get(&node).unwrap().broadcast.as_ref().unwrap();
            join_successes = join.successes.clone();
            saw_failure = join.saw_failure;
        }
        if !join_successes.is_empty() {
            self.finish_node(node, NodeStatus::Succeeded, NodeOutcome::Value(Value::Array(join_successes)));
        } else if saw_failure {
            self.finish_node(node, NodeStatus::Failed, NodeOutcome::Error(Value::from("every broadcast delivery failed")));
        } else {
            self.finish_node(node, NodeStatus::Skipped, NodeOutcome::Skipped);
        }
    }

    /// Finalizes one node's status, records its `ResultStore` entry,
    /// resolves conditional branch selection if this was a Call node, and
    /// notifies successors so the run keeps draining.
    fn finish_node(&mut self, node: NodeId, status: NodeStatus, outcome: NodeOutcome) {
        {
            let state = self.states.get_mut(&node).unwrap();
            if matches!(state.status, NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped) {
                return;
            }
            state.status = status;
            state.ended = Some(Instant::now());
        }
        if status == NodeStatus::Failed {
            self.failed_nodes.insert(node);
        }
        tracing::debug!(%node, ?status, "node settled");
        self.results.record(node, outcome.clone());

        let conditional_groups = self.graph.node(node).conditional_groups.clone();
        if status == NodeStatus::Succeeded && !conditional_groups.is_empty() {
            self.dispatch_conditional(node, &outcome, conditional_groups);
            return;
        }

        let successors = self.graph.node(node).successors.clone();
        for succ in successors {
            self.notify_predecessor_settled(succ, node);
        }
    }

    /// `groups` holds one entry per `task_group` member (so a branch written
    /// as `a || b` is one group of two entry nodes). The selector names a
    /// single branch; the whole group behind that name is activated
    /// together, every other group's entries are skipped together — a
    /// multi-entry branch never gets split by a name match on just one of
    /// its entries.
    fn dispatch_conditional(&mut self, node: NodeId, outcome: &NodeOutcome, groups: Vec<Vec<NodeId>>) {
        let task_name = self.graph.node(node).task_name.clone();
        let handler = self.registry.lookup(&task_name).expect("validated at build time");
        let value = outcome.value().cloned().unwrap_or(Value::Null);
        let selected_name = handler.select_branch(&value);
        let selected_group_idx = selected_name
            .as_ref()
            .and_then(|name| groups.iter().position(|group| group.iter().any(|&c| &self.graph.node(c).task_name == name)));

        tracing::info!(%node, selected = ?selected_name, "conditional branch selected");

        for (idx, group) in groups.into_iter().enumerate() {
            if Some(idx) == selected_group_idx {
                for child in group {
                    self.recheck_andjoin(child);
                }
            } else {
                for child in group {
                    self.finish_node(child, NodeStatus::Skipped, NodeOutcome::Skipped);
                }
            }
        }
    }

    fn notify_predecessor_settled(&mut self, succ: NodeId, origin: NodeId) {
        match self.states.get(&succ).unwrap().gating {
            Gating::Entry => unreachable!("a node with a predecessor can't be classified Entry"),
            Gating::AndJoin => self.recheck_andjoin(succ),
            Gating::Broadcast => self.broadcast_on_delivery(succ, origin),
        }
    }

    fn broadcast_on_delivery(&mut self, succ: NodeId, origin: NodeId) {
        match self.states.get(&origin).unwrap().status {
            NodeStatus::Succeeded => {
                let value = self.results.get(origin).and_then(NodeOutcome::value).cloned().unwrap_or(Value::Null);
                self.dispatch(succ, Some(origin), vec![value]);
            }
            NodeStatus::Skipped => {
                let join = self.states.get_mut(&succ).unwrap().broadcast.as_mut().unwrap();
                join.resolved += 1;
                self.maybe_finalize_broadcast(succ);
            }
            NodeStatus::Failed => {
                let join = self.states.get_mut(&succ).unwrap().broadcast.as_mut().unwrap();
                join.resolved += 1;
                join.saw_failure = true;
                self.maybe_finalize_broadcast(succ);
            }
            NodeStatus::Pending | NodeStatus::Running => unreachable!("origin must be terminal to notify"),
        }
    }

    /// Re-evaluates an AND-join node's readiness after one of its
    /// predecessors settled. Every predecessor must be Succeeded or Skipped
    /// (not all Skipped) for the node to run; any Failed predecessor fails
    /// it immediately regardless of the others' state.
    fn recheck_andjoin(&mut self, node: NodeId) {
        if self.states.get(&node).unwrap().status != NodeStatus::Pending {
            return;
        }
        let preds = self.graph.node(node).predecessors.clone();
        let mut any_failed = false;
        let mut any_pending = false;
        let mut any_succeeded = false;
        for p in &preds {
            match self.states.get(p).unwrap().status {
                NodeStatus::Failed => any_failed = true,
                NodeStatus::Succeeded => any_succeeded = true,
                NodeStatus::Skipped => {}
                NodeStatus::Pending | NodeStatus::Running => any_pending = true,
            }
        }
        if any_failed {
            self.finish_node(node, NodeStatus::Failed, NodeOutcome::Error(Value::from("upstream predecessor failed")));
        } else if any_pending {
            // wait for the rest
        } else if any_succeeded {
            let inputs = self.results.resolved_inputs(&preds);
            self.begin_fresh(node, inputs);
        } else {
            self.finish_node(node, NodeStatus::Skipped, NodeOutcome::Skipped);
        }
    }

    // ---- outcome assembly ----------------------------------------------

    fn assemble(&self) -> RunOutcome {
        let results: HashMap<NodeId, NodeOutcome> = self.results.iter().map(|(id, o)| (id, o.clone())).collect();
        let timings: HashMap<NodeId, Timing> = self
            .states
            .iter()
            .map(|(&id, s)| {
                (
                    id,
                    Timing {
                        started: s.started,
                        ended: s.ended,
                        attempts: s.attempts_made + s.broadcast.as_ref().map(|j| j.attempts_made).unwrap_or(0),
                    },
                )
            })
            .collect();

        // An exit-frontier node settles Skipped whenever it's the unchosen
        // side of a Conditional (or downstream of one) — that's the normal
        // shape of branching, not a failure. Only an actual Failed node
        // should flip the run's overall outcome.
        let status = if self.deadline_failed {
            RunStatus::Failed {
                reason: FailureReason::Deadline,
                nodes: self.failed_nodes.iter().copied().collect(),
            }
        } else if self.failed_nodes.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed {
                reason: FailureReason::NodeFailures,
                nodes: self.failed_nodes.iter().copied().collect(),
            }
        };

        RunOutcome { status, results, timings }
    }
}

fn error_value(err: &PointyError) -> Value {
    Value::from(err.to_string())
}

/// Runs `graph` to completion with the given registry and configuration.
/// Convenience wrapper around `Scheduler::new(..).run()`.
pub async fn run(graph: &TaskGraph, registry: &dyn TaskRegistry, config: EngineConfig) -> RunOutcome {
    Scheduler::new(graph, registry, config).run().await
}
