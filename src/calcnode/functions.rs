use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use xcalc_types::{
    ComputedValue, ExecutionLog, ExecutionLogMode, LogEvent, LogLevel, ValueRequirement,
    ValueSpecification,
};

use super::target::ComputationTarget;
use crate::error::{FunctionError, FunctionResult};

/// Inputs handed to a function: the values found in the cache plus, for
/// functions that tolerate it, the specifications that were missing.
#[derive(Debug, Clone, Default)]
pub struct FunctionInputs {
    values: BTreeMap<ValueSpecification, Value>,
    missing: BTreeSet<ValueSpecification>,
}

impl FunctionInputs {
    pub fn new(
        values: impl IntoIterator<Item = (ValueSpecification, Value)>,
        missing: BTreeSet<ValueSpecification>,
    ) -> Self {
        Self {
            values: values.into_iter().collect(),
            missing,
        }
    }

    pub fn get(&self, spec: &ValueSpecification) -> Option<&Value> {
        self.values.get(spec)
    }

    /// First input with the given value name.
    pub fn get_by_name(&self, value_name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(spec, _)| spec.value_name == value_name)
            .map(|(_, v)| v)
    }

    pub fn get_f64(&self, value_name: &str) -> Option<f64> {
        self.get_by_name(value_name).and_then(Value::as_f64)
    }

    pub fn values(&self) -> impl Iterator<Item = (&ValueSpecification, &Value)> {
        self.values.iter()
    }

    pub fn missing(&self) -> &BTreeSet<ValueSpecification> {
        &self.missing
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Per-item context: valuation time, calc-config, the item's parameters and
/// a log sink whose events end up on the result item. Clones share the sink.
#[derive(Debug, Clone)]
pub struct FunctionExecutionContext {
    valuation_time: DateTime<Utc>,
    calc_config: String,
    parameters: Value,
    log: Arc<Mutex<ExecutionLog>>,
}

impl FunctionExecutionContext {
    pub fn new(
        valuation_time: DateTime<Utc>,
        calc_config: impl Into<String>,
        parameters: Value,
        log_mode: ExecutionLogMode,
    ) -> Self {
        Self {
            valuation_time,
            calc_config: calc_config.into(),
            parameters,
            log: Arc::new(Mutex::new(ExecutionLog::new(log_mode))),
        }
    }

    pub fn valuation_time(&self) -> DateTime<Utc> {
        self.valuation_time
    }

    pub fn calc_config(&self) -> &str {
        &self.calc_config
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.log.lock().add(LogEvent::new(level, message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn into_log(self) -> ExecutionLog {
        std::mem::take(&mut *self.log.lock())
    }
}

/// An executable function. Implementations must not assume anything about
/// which node or thread runs them.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    /// Whether the function runs with a partial input set.
    fn can_handle_missing_inputs(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        context: &FunctionExecutionContext,
        inputs: &FunctionInputs,
        target: &ComputationTarget,
        desired_outputs: &BTreeSet<ValueRequirement>,
    ) -> FunctionResult<Vec<ComputedValue>>;
}

type SyncFunctionBody = dyn Fn(
        &FunctionExecutionContext,
        &FunctionInputs,
        &ComputationTarget,
        &BTreeSet<ValueRequirement>,
    ) -> FunctionResult<Vec<ComputedValue>>
    + Send
    + Sync;

/// A [`FunctionInvoker`] backed by a plain closure. The closure runs on the
/// blocking thread pool so long computations do not stall the runtime.
pub struct SyncFunction {
    body: Arc<SyncFunctionBody>,
    tolerates_missing_inputs: bool,
}

impl SyncFunction {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(
                &FunctionExecutionContext,
                &FunctionInputs,
                &ComputationTarget,
                &BTreeSet<ValueRequirement>,
            ) -> FunctionResult<Vec<ComputedValue>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            body: Arc::new(body),
            tolerates_missing_inputs: false,
        }
    }

    pub fn tolerating_missing_inputs(mut self) -> Self {
        self.tolerates_missing_inputs = true;
        self
    }
}

#[async_trait]
impl FunctionInvoker for SyncFunction {
    fn can_handle_missing_inputs(&self) -> bool {
        self.tolerates_missing_inputs
    }

    async fn execute(
        &self,
        context: &FunctionExecutionContext,
        inputs: &FunctionInputs,
        target: &ComputationTarget,
        desired_outputs: &BTreeSet<ValueRequirement>,
    ) -> FunctionResult<Vec<ComputedValue>> {
        let body = self.body.clone();
        let context = context.clone();
        let inputs = inputs.clone();
        let target = target.clone();
        let desired_outputs = desired_outputs.clone();
        match tokio::task::spawn_blocking(move || body(&context, &inputs, &target, &desired_outputs)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(FunctionError::execution("Cancelled", e.to_string())),
        }
    }
}

/// Registry of function invokers by function id
#[derive(Default, Clone)]
pub struct FunctionRepository {
    invokers: HashMap<String, Arc<dyn FunctionInvoker>>,
}

impl FunctionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function_id: &str, invoker: Arc<dyn FunctionInvoker>) {
        self.invokers.insert(function_id.to_string(), invoker);
    }

    pub fn with(mut self, function_id: &str, invoker: impl FunctionInvoker + 'static) -> Self {
        self.register(function_id, Arc::new(invoker));
        self
    }

    pub fn get(&self, function_id: &str) -> Option<Arc<dyn FunctionInvoker>> {
        self.invokers.get(function_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.invokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invokers.is_empty()
    }
}
