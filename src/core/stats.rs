//! Invocation and dispatch statistics.
//!
//! Gatherers are ordinary objects owned by whoever builds the engine and
//! passed down explicitly (`Arc`), so two engines in one process never share
//! counters.

use dashmap::DashMap;
use std::time::Duration;

/// Cumulative figures for one function within one calc-config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionInvocationRecord {
    pub invocations: u64,
    pub invocation_time: Duration,
    pub input_bytes: u64,
    pub input_samples: u64,
    pub output_values: u64,
}

/// Collects per-function invocation statistics.
#[derive(Debug, Default)]
pub struct FunctionInvocationStatistics {
    records: DashMap<(String, String), FunctionInvocationRecord>,
}

impl FunctionInvocationStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_invocation(
        &self,
        calc_config: &str,
        function_id: &str,
        invocation_time: Duration,
        input_bytes: u64,
        input_samples: u64,
        output_values: u64,
    ) {
        let mut record = self
            .records
            .entry((calc_config.to_string(), function_id.to_string()))
            .or_default();
        record.invocations += 1;
        record.invocation_time += invocation_time;
        record.input_bytes += input_bytes;
        record.input_samples += input_samples;
        record.output_values += output_values;
    }

    pub fn get(&self, calc_config: &str, function_id: &str) -> Option<FunctionInvocationRecord> {
        self.records
            .get(&(calc_config.to_string(), function_id.to_string()))
            .map(|r| r.clone())
    }

    /// Invocations of `function_id` across every calc-config.
    pub fn invocation_count(&self, function_id: &str) -> u64 {
        self.records
            .iter()
            .filter(|r| r.key().1 == function_id)
            .map(|r| r.invocations)
            .sum()
    }
}

/// Cumulative dispatch figures for one calc-config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphExecutionRecord {
    pub graphs: u64,
    pub nodes: u64,
    pub jobs: u64,
    pub job_items: u64,
    pub job_time: Duration,
}

/// Collects graph executor statistics.
#[derive(Debug, Default)]
pub struct GraphExecutorStatistics {
    records: DashMap<String, GraphExecutionRecord>,
}

impl GraphExecutorStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph_processed(&self, calc_config: &str, nodes: usize) {
        let mut record = self.records.entry(calc_config.to_string()).or_default();
        record.graphs += 1;
        record.nodes += nodes as u64;
    }

    pub fn job_completed(&self, calc_config: &str, items: usize, duration: Duration) {
        let mut record = self.records.entry(calc_config.to_string()).or_default();
        record.jobs += 1;
        record.job_items += items as u64;
        record.job_time += duration;
    }

    pub fn get(&self, calc_config: &str) -> Option<GraphExecutionRecord> {
        self.records.get(calc_config).map(|r| r.clone())
    }
}
