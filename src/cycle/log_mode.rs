use dashmap::DashSet;
use std::collections::BTreeSet;

use xcalc_types::{ExecutionLogMode, ValueSpecification};

/// Decides how much execution log to keep for a value.
pub trait ExecutionLogModeSource: Send + Sync {
    fn log_mode_for(&self, spec: &ValueSpecification) -> ExecutionLogMode;

    /// The mode for a node producing `outputs`: `Full` if any output wants it.
    fn log_mode(&self, outputs: &BTreeSet<ValueSpecification>) -> ExecutionLogMode {
        if outputs
            .iter()
            .any(|spec| self.log_mode_for(spec) == ExecutionLogMode::Full)
        {
            ExecutionLogMode::Full
        } else {
            ExecutionLogMode::Indicators
        }
    }
}

/// Indicators everywhere except for explicitly elevated specifications.
#[derive(Debug, Default)]
pub struct InMemoryLogModeSource {
    full: DashSet<ValueSpecification>,
}

impl InMemoryLogModeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_full(&self, spec: ValueSpecification) {
        self.full.insert(spec);
    }

    pub fn clear(&self, spec: &ValueSpecification) {
        self.full.remove(spec);
    }
}

impl ExecutionLogModeSource for InMemoryLogModeSource {
    fn log_mode_for(&self, spec: &ValueSpecification) -> ExecutionLogMode {
        if self.full.contains(spec) {
            ExecutionLogMode::Full
        } else {
            ExecutionLogMode::Indicators
        }
    }
}
