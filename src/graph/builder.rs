use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use xcalc_types::{ValueRequirement, ValueSpecification};

use crate::error::GraphError;

use super::types::*;

/// Dependency graph for one calc-config.
///
/// Edges run from producer to consumer, so a topological order lists every
/// node after the nodes whose outputs it reads. Inputs with no producer in
/// the graph are allowed; they are expected to be in the cache already.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    calc_config: String,
    graph: StableDiGraph<DependencyNode, ()>,
    node_index_map: NodeIndexMap,
    producers: HashMap<ValueSpecification, NodeIndex>,
    order: Vec<NodeIndex>,
    terminal_outputs: BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>>,
}

impl DependencyGraph {
    pub fn builder(calc_config: impl Into<String>) -> DependencyGraphBuilder {
        DependencyGraphBuilder::new(calc_config)
    }

    pub fn calc_config(&self) -> &str {
        &self.calc_config
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.node_index_map.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&DependencyNode> {
        self.node_index_map
            .get(node_id)
            .and_then(|idx| self.graph.node_weight(*idx))
    }

    /// Every node, producers before consumers.
    pub fn topological_order(&self) -> impl Iterator<Item = &DependencyNode> + '_ {
        self.order
            .iter()
            .filter_map(move |idx| self.graph.node_weight(*idx))
    }

    /// The node producing `spec`, if it is in this graph.
    pub fn producer_of(&self, spec: &ValueSpecification) -> Option<&DependencyNode> {
        self.producers
            .get(spec)
            .and_then(|idx| self.graph.node_weight(*idx))
    }

    /// Nodes whose outputs `node_id` consumes.
    pub fn input_nodes(&self, node_id: &str) -> Vec<&DependencyNode> {
        self.neighbors(node_id, petgraph::Direction::Incoming)
    }

    /// Nodes consuming outputs of `node_id`.
    pub fn dependent_nodes(&self, node_id: &str) -> Vec<&DependencyNode> {
        self.neighbors(node_id, petgraph::Direction::Outgoing)
    }

    fn neighbors(&self, node_id: &str, direction: petgraph::Direction) -> Vec<&DependencyNode> {
        match self.node_index_map.get(node_id) {
            Some(idx) => self
                .graph
                .neighbors_directed(*idx, direction)
                .filter_map(|n| self.graph.node_weight(n))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Outputs the view asked for, each with the requirements that resolved
    /// to it.
    pub fn terminal_outputs(&self) -> &BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>> {
        &self.terminal_outputs
    }

    pub fn is_terminal_output(&self, spec: &ValueSpecification) -> bool {
        self.terminal_outputs.contains_key(spec)
    }

    /// Nodes matching `filter`, with the edges between them and the terminal
    /// outputs they produce.
    pub fn subgraph<F>(&self, filter: F) -> DependencyGraph
    where
        F: Fn(&DependencyNode) -> bool,
    {
        let mut graph = StableDiGraph::new();
        let mut node_index_map = NodeIndexMap::new();
        let mut remap = HashMap::new();
        let mut order = Vec::new();

        for idx in &self.order {
            let Some(node) = self.graph.node_weight(*idx) else {
                continue;
            };
            if !filter(node) {
                continue;
            }
            let new_idx = graph.add_node(node.clone());
            node_index_map.insert(node.id.clone(), new_idx);
            remap.insert(*idx, new_idx);
            order.push(new_idx);
        }

        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                if let (Some(a), Some(b)) = (remap.get(&from), remap.get(&to)) {
                    graph.add_edge(*a, *b, ());
                }
            }
        }

        let producers: HashMap<_, _> = self
            .producers
            .iter()
            .filter_map(|(spec, idx)| remap.get(idx).map(|new_idx| (spec.clone(), *new_idx)))
            .collect();

        let terminal_outputs = self
            .terminal_outputs
            .iter()
            .filter(|(spec, _)| producers.contains_key(*spec))
            .map(|(spec, reqs)| (spec.clone(), reqs.clone()))
            .collect();

        DependencyGraph {
            calc_config: self.calc_config.clone(),
            graph,
            node_index_map,
            producers,
            order,
            terminal_outputs,
        }
    }
}

/// Collects nodes and terminal outputs, then links and validates them.
#[derive(Debug)]
pub struct DependencyGraphBuilder {
    calc_config: String,
    nodes: Vec<DependencyNode>,
    terminal_outputs: BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>>,
}

impl DependencyGraphBuilder {
    pub fn new(calc_config: impl Into<String>) -> Self {
        Self {
            calc_config: calc_config.into(),
            nodes: Vec::new(),
            terminal_outputs: BTreeMap::new(),
        }
    }

    pub fn node(mut self, node: DependencyNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Marks `spec` as requested by the view through `requirement`.
    pub fn terminal_output(mut self, spec: ValueSpecification, requirement: ValueRequirement) -> Self {
        self.terminal_outputs
            .entry(spec)
            .or_default()
            .insert(requirement);
        self
    }

    /// Marks `spec` as requested with its own fully constrained requirement.
    pub fn terminal(self, spec: ValueSpecification) -> Self {
        let requirement = spec.to_requirement();
        self.terminal_output(spec, requirement)
    }

    pub fn build(self) -> Result<DependencyGraph, GraphError> {
        let mut graph = StableDiGraph::<DependencyNode, ()>::new();
        let mut node_index_map = NodeIndexMap::new();
        let mut producers: HashMap<ValueSpecification, NodeIndex> = HashMap::new();

        // 1. nodes and producers
        for node in self.nodes {
            if node_index_map.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            let id = node.id.clone();
            let outputs: Vec<_> = node.outputs.iter().cloned().collect();
            let idx = graph.add_node(node);
            for spec in outputs {
                if let Some(existing) = producers.get(&spec) {
                    let first = graph
                        .node_weight(*existing)
                        .map(|n| n.id.clone())
                        .unwrap_or_default();
                    return Err(GraphError::DuplicateProducer {
                        spec: spec.to_string(),
                        first,
                        second: id,
                    });
                }
                producers.insert(spec, idx);
            }
            node_index_map.insert(id, idx);
        }

        // 2. producer -> consumer edges
        let consumers: Vec<(NodeIndex, Vec<NodeIndex>)> = graph
            .node_indices()
            .map(|idx| {
                let inputs = graph[idx]
                    .inputs
                    .iter()
                    .filter_map(|spec| producers.get(spec).copied())
                    .collect::<BTreeSet<_>>();
                (idx, inputs.into_iter().collect())
            })
            .collect();
        for (consumer, inputs) in consumers {
            for producer in inputs {
                graph.add_edge(producer, consumer, ());
            }
        }

        // 3. terminal outputs must be produced here
        for spec in self.terminal_outputs.keys() {
            if !producers.contains_key(spec) {
                return Err(GraphError::UnproducedTerminalOutput(spec.to_string()));
            }
        }

        // 4. order
        let order = petgraph::algo::toposort(&graph, None).map_err(|_| GraphError::CycleDetected)?;

        Ok(DependencyGraph {
            calc_config: self.calc_config,
            graph,
            node_index_map,
            producers,
            order,
            terminal_outputs: self.terminal_outputs,
        })
    }
}
