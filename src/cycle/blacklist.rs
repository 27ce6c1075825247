use dashmap::DashSet;

use crate::graph::DependencyNode;

/// Nodes that must not be invoked this cycle. Their outputs become
/// `SUPPRESSED` sentinels.
pub trait ExecutionBlacklist: Send + Sync {
    fn is_blacklisted(&self, node: &DependencyNode) -> bool;
}

/// Blacklists nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyBlacklist;

impl ExecutionBlacklist for EmptyBlacklist {
    fn is_blacklisted(&self, _node: &DependencyNode) -> bool {
        false
    }
}

/// Blacklist by function id or by node id.
#[derive(Debug, Default)]
pub struct FunctionBlacklist {
    functions: DashSet<String>,
    nodes: DashSet<String>,
}

impl FunctionBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_function(&self, function_id: impl Into<String>) {
        self.functions.insert(function_id.into());
    }

    pub fn block_node(&self, node_id: impl Into<String>) {
        self.nodes.insert(node_id.into());
    }

    pub fn unblock_function(&self, function_id: &str) {
        self.functions.remove(function_id);
    }

    pub fn unblock_node(&self, node_id: &str) {
        self.nodes.remove(node_id);
    }
}

impl ExecutionBlacklist for FunctionBlacklist {
    fn is_blacklisted(&self, node: &DependencyNode) -> bool {
        self.functions.contains(&node.function_id) || self.nodes.contains(&node.id)
    }
}
