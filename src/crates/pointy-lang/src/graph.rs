//! Task Graph IR: the immutable, acyclic structure the Scheduler walks.

use std::collections::HashMap;
use std::fmt;

/// Stable identifier for one IR node. Carries a human-readable path so logs
/// and run outcomes can name replicas (`downloader#0`) and conditional
/// children (`router/success`) distinctly, the way a Pregel-style executor
/// names tasks by their path-segment chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Seq,
    Broadcast,
    Parallel,
    Conditional,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub task_name: String,
    /// Human-readable disambiguator, e.g. `downloader#2` for the third
    /// replica, or `router/success` for a conditional child. Purely for
    /// logging and run-outcome reporting — scheduling keys off `id`.
    pub path: String,
    pub predecessors: Vec<NodeId>,
    pub successors: Vec<NodeId>,
    pub retry_budget: u64,
    pub replica_count: u64,
    /// Populated only on nodes built from a `Call`: every conditional
    /// branch's entry node(s), flattened across all branches, in source
    /// order. Kept alongside `conditional_groups` for callers that just
    /// need "is this a conditional node" / "list every possible child".
    pub conditional_children: Vec<NodeId>,
    /// Populated only on nodes built from a `Call`: one entry per
    /// `task_group` member, each holding that branch's full set of entry
    /// nodes. A branch like `a || b` has two entries in one group — picking
    /// the branch must activate both, not just whichever one's name happens
    /// to match the selector's return value.
    pub conditional_groups: Vec<Vec<NodeId>>,
}

impl Node {
    fn new(id: NodeId, task_name: impl Into<String>, path: impl Into<String>) -> Self {
        Node {
            id,
            task_name: task_name.into(),
            path: path.into(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            retry_budget: 0,
            replica_count: 1,
            conditional_children: Vec::new(),
            conditional_groups: Vec::new(),
        }
    }
}

/// An immutable, acyclic-by-construction task graph.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: HashMap<NodeId, Node>,
    edges: Vec<Edge>,
    next_id: usize,
    /// Nodes with no predecessors: the initial ready set.
    pub entry: Vec<NodeId>,
    /// Nodes with no successors: their aggregate status is the run outcome.
    pub exit: Vec<NodeId>,
}

impl TaskGraph {
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(&id).expect("NodeId must belong to this graph")
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge_kind(&self, from: NodeId, to: NodeId) -> Option<EdgeKind> {
        self.edges.iter().find(|e| e.from == from && e.to == to).map(|e| e.kind)
    }
}

/// Builder used internally by the graph builder to assemble a `TaskGraph`
/// incrementally while lowering the syntax tree.
#[derive(Debug, Default)]
pub(crate) struct GraphBuilder {
    graph: TaskGraph,
}

impl GraphBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_node(&mut self, task_name: impl Into<String>, path: impl Into<String>) -> NodeId {
        let id = NodeId(self.graph.next_id);
        self.graph.next_id += 1;
        self.graph.nodes.insert(id, Node::new(id, task_name, path));
        id
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.graph.nodes.get_mut(&id).expect("NodeId must belong to this graph")
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        self.graph.node(id)
    }

    pub(crate) fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        if kind != EdgeKind::Parallel {
            self.node_mut(from).successors.push(to);
            self.node_mut(to).predecessors.push(from);
        }
        self.graph.edges.push(Edge { from, to, kind });
    }

    /// Finalizes the graph: computes entry/exit frontiers from edge
    /// membership.
    pub(crate) fn finish(mut self) -> TaskGraph {
        let mut entry = Vec::new();
        let mut exit = Vec::new();
        let mut ids: Vec<NodeId> = self.graph.nodes.keys().copied().collect();
        ids.sort();
        for id in ids {
            let node = self.graph.node(id);
            if node.predecessors.is_empty() {
                entry.push(id);
            }
            if node.successors.is_empty() {
                exit.push(id);
            }
        }
        self.graph.entry = entry;
        self.graph.exit = exit;
        self.graph
    }
}
