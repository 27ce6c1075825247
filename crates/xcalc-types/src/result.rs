use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::job::{CalculationJobItem, CalculationJobSpecification};
use crate::value::ValueSpecification;

/// Outcome of one job item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvocationResult {
    Success,
    MissingInputs,
    FunctionThrewException,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// How much of a function's log output to keep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionLogMode {
    /// Keep only the warning/error indicators.
    #[default]
    Indicators,
    /// Keep every event.
    Full,
}

/// Log collected while executing one job item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub mode: ExecutionLogMode,
    /// Present only in `Full` mode.
    pub events: Option<Vec<LogEvent>>,
    pub has_warn: bool,
    pub has_error: bool,
}

impl ExecutionLog {
    pub fn new(mode: ExecutionLogMode) -> Self {
        Self {
            mode,
            events: match mode {
                ExecutionLogMode::Full => Some(Vec::new()),
                ExecutionLogMode::Indicators => None,
            },
            has_warn: false,
            has_error: false,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(event: LogEvent, mode: ExecutionLogMode) -> Self {
        let mut log = Self::new(mode);
        log.add(event);
        log
    }

    pub fn add(&mut self, event: LogEvent) {
        match event.level {
            LogLevel::Warn => self.has_warn = true,
            LogLevel::Error => self.has_error = true,
            _ => {}
        }
        if let Some(events) = self.events.as_mut() {
            events.push(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.has_warn
            && !self.has_error
            && self.events.as_ref().map(|e| e.is_empty()).unwrap_or(true)
    }
}

/// Outcome of one job item, with enough detail to render a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationJobResultItem {
    pub item: CalculationJobItem,
    pub result: InvocationResult,
    pub exception_class: Option<String>,
    pub exception_message: Option<String>,
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub missing_inputs: BTreeSet<ValueSpecification>,
    #[serde(default)]
    pub execution_log: ExecutionLog,
}

impl CalculationJobResultItem {
    pub fn success(item: CalculationJobItem, execution_log: ExecutionLog) -> Self {
        Self {
            item,
            result: InvocationResult::Success,
            exception_class: None,
            exception_message: None,
            stack_trace: None,
            missing_inputs: BTreeSet::new(),
            execution_log,
        }
    }

    pub fn missing_inputs(
        item: CalculationJobItem,
        missing: BTreeSet<ValueSpecification>,
        execution_log: ExecutionLog,
    ) -> Self {
        Self {
            item,
            result: InvocationResult::MissingInputs,
            exception_class: None,
            exception_message: None,
            stack_trace: None,
            missing_inputs: missing,
            execution_log,
        }
    }

    pub fn failed(
        item: CalculationJobItem,
        exception_class: impl Into<String>,
        exception_message: impl Into<String>,
        stack_trace: Option<String>,
        execution_log: ExecutionLog,
    ) -> Self {
        Self {
            item,
            result: InvocationResult::FunctionThrewException,
            exception_class: Some(exception_class.into()),
            exception_message: Some(exception_message.into()),
            stack_trace,
            missing_inputs: BTreeSet::new(),
            execution_log,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == InvocationResult::Success
    }
}

/// Outcome of a whole job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationJobResult {
    pub specification: CalculationJobSpecification,
    pub duration: Duration,
    pub items: Vec<CalculationJobResultItem>,
    pub compute_node_id: String,
}

impl CalculationJobResult {
    pub fn new(
        specification: CalculationJobSpecification,
        duration: Duration,
        items: Vec<CalculationJobResultItem>,
        compute_node_id: impl Into<String>,
    ) -> Self {
        Self {
            specification,
            duration,
            items,
            compute_node_id: compute_node_id.into(),
        }
    }
}
