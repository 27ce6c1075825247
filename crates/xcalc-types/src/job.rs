use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::result::ExecutionLogMode;
use crate::value::{ComputationTargetSpecification, ValueSpecification};

/// Identifies a job: which cycle and calc-config it belongs to, the
/// valuation time, and a monotonically increasing job id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalculationJobSpecification {
    pub cycle_id: String,
    pub calc_config: String,
    pub valuation_time: DateTime<Utc>,
    pub job_id: u64,
}

impl CalculationJobSpecification {
    pub fn new(
        cycle_id: impl Into<String>,
        calc_config: impl Into<String>,
        valuation_time: DateTime<Utc>,
        job_id: u64,
    ) -> Self {
        Self {
            cycle_id: cycle_id.into(),
            calc_config: calc_config.into(),
            valuation_time,
            job_id,
        }
    }
}

impl fmt::Display for CalculationJobSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job[{} {}/{}]",
            self.job_id, self.cycle_id, self.calc_config
        )
    }
}

/// One function invocation inside a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationJobItem {
    pub function_id: String,
    #[serde(default)]
    pub parameters: Value,
    pub target: ComputationTargetSpecification,
    pub inputs: BTreeSet<ValueSpecification>,
    pub outputs: BTreeSet<ValueSpecification>,
    #[serde(default)]
    pub log_mode: ExecutionLogMode,
}

impl CalculationJobItem {
    pub fn new(
        function_id: impl Into<String>,
        target: ComputationTargetSpecification,
        inputs: impl IntoIterator<Item = ValueSpecification>,
        outputs: impl IntoIterator<Item = ValueSpecification>,
    ) -> Self {
        Self {
            function_id: function_id.into(),
            parameters: Value::Null,
            target,
            inputs: inputs.into_iter().collect(),
            outputs: outputs.into_iter().collect(),
            log_mode: ExecutionLogMode::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_log_mode(mut self, log_mode: ExecutionLogMode) -> Self {
        self.log_mode = log_mode;
        self
    }
}

impl fmt::Display for CalculationJobItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.function_id, self.target)
    }
}

/// Which values a job reads and writes privately (only within the job's
/// node) rather than through the shared store. Everything not listed is
/// shared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSelectHint {
    private_values: BTreeSet<ValueSpecification>,
}

impl CacheSelectHint {
    pub fn all_shared() -> Self {
        Self::default()
    }

    pub fn private(values: impl IntoIterator<Item = ValueSpecification>) -> Self {
        Self {
            private_values: values.into_iter().collect(),
        }
    }

    pub fn is_private(&self, spec: &ValueSpecification) -> bool {
        self.private_values.contains(spec)
    }
}

/// Cooperative cancellation flag for a job, polled between items.
#[derive(Debug, Clone, Default)]
pub struct JobCancelHandle(Arc<AtomicBool>);

impl JobCancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// An ordered list of job items plus the specification and cache hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationJob {
    specification: CalculationJobSpecification,
    #[serde(default)]
    cache_select_hint: CacheSelectHint,
    items: Vec<CalculationJobItem>,
    #[serde(skip)]
    cancel: JobCancelHandle,
}

impl CalculationJob {
    pub fn new(
        specification: CalculationJobSpecification,
        cache_select_hint: CacheSelectHint,
        items: Vec<CalculationJobItem>,
    ) -> Self {
        Self {
            specification,
            cache_select_hint,
            items,
            cancel: JobCancelHandle::default(),
        }
    }

    pub fn specification(&self) -> &CalculationJobSpecification {
        &self.specification
    }

    pub fn cache_select_hint(&self) -> &CacheSelectHint {
        &self.cache_select_hint
    }

    pub fn items(&self) -> &[CalculationJobItem] {
        &self.items
    }

    /// A handle an external controller can use to cancel this job.
    pub fn cancel_handle(&self) -> JobCancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl fmt::Display for CalculationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} items)", self.specification, self.items.len())
    }
}
