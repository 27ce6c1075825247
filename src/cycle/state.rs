use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use xcalc_types::{CalculationJobResultItem, ValueSpecification};

/// Lifecycle of a computation cycle. Transitions only move forward:
/// `AwaitingExecution -> Executing -> (Executed | ExecutionInterrupted) -> Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    AwaitingExecution,
    Executing,
    Executed,
    ExecutionInterrupted,
    Destroyed,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleState::AwaitingExecution => "AWAITING_EXECUTION",
            CycleState::Executing => "EXECUTING",
            CycleState::Executed => "EXECUTED",
            CycleState::ExecutionInterrupted => "EXECUTION_INTERRUPTED",
            CycleState::Destroyed => "DESTROYED",
        };
        f.write_str(s)
    }
}

/// Execution state of one dependency node within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Executed,
    Failed,
    Suppressed,
}

/// Node execution states of one cycle, keyed by node id. Safe for
/// concurrent point updates and lookups.
#[derive(Debug, Default)]
pub struct NodeStateTable {
    states: DashMap<String, NodeState>,
}

impl NodeStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &str) -> Option<NodeState> {
        self.states.get(node_id).map(|s| *s)
    }

    pub fn set(&self, node_id: &str, state: NodeState) {
        self.states.insert(node_id.to_string(), state);
    }

    pub fn mark_executed(&self, node_id: &str) {
        self.set(node_id, NodeState::Executed);
    }

    pub fn mark_failed(&self, node_id: &str) {
        self.set(node_id, NodeState::Failed);
    }

    pub fn mark_suppressed(&self, node_id: &str) {
        self.set(node_id, NodeState::Suppressed);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.states.iter().filter(|e| *e.value() == state).count()
    }
}

/// Which node executed a value and how the job item went.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyNodeJobExecutionResult {
    pub compute_node_id: String,
    pub job_result_item: CalculationJobResultItem,
}

impl DependencyNodeJobExecutionResult {
    pub fn new(compute_node_id: impl Into<String>, job_result_item: CalculationJobResultItem) -> Self {
        Self {
            compute_node_id: compute_node_id.into(),
            job_result_item,
        }
    }
}

/// Execution results of one calc-config, keyed by output specification.
#[derive(Debug, Default)]
pub struct JobResultCache {
    results: DashMap<ValueSpecification, DependencyNodeJobExecutionResult>,
}

impl JobResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, spec: &ValueSpecification) -> Option<DependencyNodeJobExecutionResult> {
        self.results.get(spec).map(|r| r.clone())
    }

    pub fn put(&self, spec: ValueSpecification, result: DependencyNodeJobExecutionResult) {
        self.results.insert(spec, result);
    }

    /// The result recorded for any of `specs`.
    pub fn find(&self, specs: &BTreeSet<ValueSpecification>) -> Option<DependencyNodeJobExecutionResult> {
        specs.iter().find_map(|spec| self.get(spec))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
