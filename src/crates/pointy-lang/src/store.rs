//! Result Store: the in-memory map from node id to completed result.
//!
//! Owned exclusively by the Scheduler for the duration of one run. Written
//! once per node, read when composing successor inputs and when assembling
//! the run outcome.

use std::collections::HashMap;

use serde_json::Value;

use crate::graph::NodeId;

#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Value(Value),
    Error(Value),
    Skipped,
}

impl NodeOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            NodeOutcome::Value(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ResultStore {
    results: HashMap<NodeId, NodeOutcome>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: NodeId, outcome: NodeOutcome) {
        self.results.insert(id, outcome);
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeOutcome> {
        self.results.get(&id)
    }

    pub fn is_settled(&self, id: NodeId) -> bool {
        self.results.contains_key(&id)
    }

    /// Collects the `Value` results of the given predecessors, in order,
    /// skipping any that failed or were skipped — those never occupy an
    /// input slot on their successor.
    pub fn resolved_inputs(&self, predecessors: &[NodeId]) -> Vec<Value> {
        predecessors
            .iter()
            .filter_map(|id| self.results.get(id).and_then(NodeOutcome::value).cloned())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NodeOutcome)> {
        self.results.iter().map(|(&id, outcome)| (id, outcome))
    }
}
