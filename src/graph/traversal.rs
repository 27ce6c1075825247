use std::collections::{HashMap, HashSet};

use super::builder::DependencyGraph;
use super::types::DependencyNode;

/// Nodes not yet completed whose in-graph producers have all completed.
pub fn ready_nodes<'a>(
    graph: &'a DependencyGraph,
    completed: &HashSet<String>,
) -> Vec<&'a DependencyNode> {
    graph
        .topological_order()
        .filter(|node| !completed.contains(&node.id))
        .filter(|node| {
            graph
                .input_nodes(&node.id)
                .iter()
                .all(|producer| completed.contains(&producer.id))
        })
        .collect()
}

/// Splits the graph into levels: every node's producers sit in earlier
/// levels, so the nodes of one level can run in parallel once the previous
/// levels are done. Within a level nodes keep topological order.
pub fn execution_levels(graph: &DependencyGraph) -> Vec<Vec<&DependencyNode>> {
    let position: HashMap<&str, usize> = graph
        .topological_order()
        .enumerate()
        .map(|(i, node)| (node.id.as_str(), i))
        .collect();
    let mut in_degree: HashMap<&str, usize> = graph
        .topological_order()
        .map(|node| (node.id.as_str(), graph.input_nodes(&node.id).len()))
        .collect();

    let mut level: Vec<&DependencyNode> = graph
        .topological_order()
        .filter(|node| in_degree[node.id.as_str()] == 0)
        .collect();
    let mut levels = Vec::new();
    while !level.is_empty() {
        let mut next = Vec::new();
        for node in &level {
            for dependent in graph.dependent_nodes(&node.id) {
                if let Some(remaining) = in_degree.get_mut(dependent.id.as_str()) {
                    *remaining -= 1;
                    if *remaining == 0 {
                        next.push(dependent);
                    }
                }
            }
        }
        next.sort_by_key(|node| position[node.id.as_str()]);
        levels.push(std::mem::replace(&mut level, next));
    }
    levels
}
