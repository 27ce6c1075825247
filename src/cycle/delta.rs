use std::collections::HashSet;

use crate::core::value_cache::ValueCache;
use crate::graph::{DependencyGraph, DependencyNode};

/// Splits a calc-config's nodes into those whose market data inputs changed
/// since the previous cycle and those that can carry their outputs over.
///
/// Market data sourcing nodes are compared by value between the two caches;
/// every other node inherits the status of its producers, so one changed
/// producer is enough to mark a consumer changed. Node ids are assumed stable
/// between the two cycles.
pub struct DeltaCalculator<'a> {
    graph: &'a DependencyGraph,
    current: &'a dyn ValueCache,
    previous: &'a dyn ValueCache,
    changed: HashSet<String>,
    unchanged: HashSet<String>,
}

impl<'a> DeltaCalculator<'a> {
    pub fn new(
        graph: &'a DependencyGraph,
        current: &'a dyn ValueCache,
        previous: &'a dyn ValueCache,
    ) -> Self {
        Self {
            graph,
            current,
            previous,
            changed: HashSet::new(),
            unchanged: HashSet::new(),
        }
    }

    pub fn compute_delta(&mut self) {
        // Topological order means every producer is classified before its
        // consumers.
        let graph = self.graph;
        for node in graph.topological_order() {
            if self.is_changed(node) {
                self.changed.insert(node.id.clone());
            } else {
                self.unchanged.insert(node.id.clone());
            }
        }
    }

    fn is_changed(&self, node: &DependencyNode) -> bool {
        if node.market_data_sourcing {
            return node
                .outputs
                .iter()
                .any(|spec| self.current.get_value(spec) != self.previous.get_value(spec));
        }
        self.graph
            .input_nodes(&node.id)
            .iter()
            .any(|producer| !self.unchanged.contains(&producer.id))
    }

    pub fn changed_nodes(&self) -> &HashSet<String> {
        &self.changed
    }

    pub fn unchanged_nodes(&self) -> &HashSet<String> {
        &self.unchanged
    }
}
