use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use xcalc_types::{
    CacheEntry, ComputedValue, ExecutionLog, ExecutionLogMode, LogEvent, LogLevel,
    ValueSpecification,
};

use super::consumer::{publish_fragment, ResultConsumer};
use super::context::CycleContext;
use super::delta::DeltaCalculator;
use super::dump::{default_dump_dir, dump_cache};
use super::log_mode::{ExecutionLogModeSource, InMemoryLogModeSource};
use super::market_data::MarketDataSnapshot;
use super::result_model::{
    ComputationResultModel, ComputedValueResult, NoopResultListener, ResultListener,
};
use super::state::{CycleState, DependencyNodeJobExecutionResult, JobResultCache, NodeState, NodeStateTable};
use super::view::CompiledView;
use crate::core::interrupt::CycleInterrupt;
use crate::core::value_cache::ValueCache;
use crate::error::{CycleError, CycleResult};
use crate::executor::{GraphExecution, GraphExecutionRequest};
use crate::graph::DependencyGraph;

/// Everything a cycle keeps for one calc-config.
#[derive(Clone)]
pub(crate) struct CalcConfigRun {
    pub(crate) graph: Arc<DependencyGraph>,
    pub(crate) cache: Arc<dyn ValueCache>,
    pub(crate) job_results: Arc<JobResultCache>,
    pub(crate) node_states: Arc<NodeStateTable>,
}

impl CalcConfigRun {
    fn calc_config(&self) -> &str {
        self.graph.calc_config()
    }

    /// Adds `result` to `fragment` if its specification is a terminal
    /// output, together with the requirements it satisfies.
    pub(crate) fn publish_terminal(
        &self,
        fragment: &mut ComputationResultModel,
        result: ComputedValueResult,
    ) {
        let Some(requirements) = self.graph.terminal_outputs().get(&result.specification) else {
            return;
        };
        let mut satisfied = BTreeMap::new();
        satisfied.insert(result.specification.clone(), requirements.clone());
        fragment.add_requirements(&satisfied);
        fragment.add_value(self.graph.calc_config(), result);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Timing {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

/// One valuation pass over a compiled view.
///
/// A cycle is executed at most once and must be released exactly once,
/// whatever the outcome of execution:
///
/// ```text
/// AWAITING_EXECUTION --execute--> EXECUTING --> EXECUTED
///                                           \--> EXECUTION_INTERRUPTED
/// EXECUTED | EXECUTION_INTERRUPTED --release--> DESTROYED
/// ```
pub struct ComputationCycle {
    cycle_id: String,
    context: Arc<CycleContext>,
    view: Arc<CompiledView>,
    valuation_time: DateTime<Utc>,
    listener: Arc<dyn ResultListener>,
    log_modes: Arc<dyn ExecutionLogModeSource>,
    interrupt: CycleInterrupt,
    state: RwLock<CycleState>,
    timing: Mutex<Timing>,
    runs: RwLock<BTreeMap<String, CalcConfigRun>>,
    model: Arc<Mutex<ComputationResultModel>>,
}

impl ComputationCycle {
    pub fn builder(context: Arc<CycleContext>, view: Arc<CompiledView>) -> ComputationCycleBuilder {
        ComputationCycleBuilder::new(context, view)
    }

    pub fn cycle_id(&self) -> &str {
        &self.cycle_id
    }

    pub fn valuation_time(&self) -> DateTime<Utc> {
        self.valuation_time
    }

    pub fn view(&self) -> &Arc<CompiledView> {
        &self.view
    }

    pub fn state(&self) -> CycleState {
        *self.state.read()
    }

    /// Handle that interrupts [`execute`](Self::execute) while it waits on
    /// graph executions.
    pub fn interrupt_handle(&self) -> CycleInterrupt {
        self.interrupt.clone()
    }

    /// `None` before execution and after an interruption; time so far while
    /// executing.
    pub fn duration(&self) -> Option<Duration> {
        let state = self.state();
        let timing = *self.timing.lock();
        let start = timing.start?;
        let end = match (timing.end, state) {
            (Some(end), _) => end,
            (None, CycleState::Executing) => self.now(),
            (None, _) => return None,
        };
        (end - start).to_std().ok()
    }

    /// Snapshot of the results published so far.
    pub fn result_model(&self) -> ComputationResultModel {
        self.model.lock().clone()
    }

    pub fn node_state(&self, calc_config: &str, node_id: &str) -> Option<NodeState> {
        self.run(calc_config)?.node_states.get(node_id)
    }

    fn run(&self, calc_config: &str) -> Option<CalcConfigRun> {
        self.runs.read().get(calc_config).cloned()
    }

    fn now(&self) -> DateTime<Utc> {
        self.context.runtime.time_provider.now()
    }

    /// Raw cache entries of a calc-config.
    pub fn query_computation_caches(
        &self,
        calc_config: &str,
        specs: &[ValueSpecification],
    ) -> CycleResult<Vec<(ValueSpecification, Option<CacheEntry>)>> {
        let run = self
            .run(calc_config)
            .ok_or_else(|| CycleError::UnknownCalcConfig(calc_config.to_string()))?;
        Ok(run.cache.get_values(specs))
    }

    /// Values with their execution details. Specifications nothing executed
    /// this cycle are left out; an executed value missing from the cache is
    /// reported as an evaluation error.
    pub fn query_results(
        &self,
        calc_config: &str,
        specs: &[ValueSpecification],
    ) -> Option<BTreeMap<ValueSpecification, ComputedValueResult>> {
        let run = self.run(calc_config)?;
        let results = specs
            .iter()
            .filter_map(|spec| {
                let job_result = run.job_results.get(spec)?;
                let value = run.cache.get_value(spec).unwrap_or(CacheEntry::EVALUATION_ERROR);
                Some((
                    spec.clone(),
                    ComputedValueResult::from_job(spec.clone(), value, &job_result),
                ))
            })
            .collect();
        Some(results)
    }

    /// Runs the cycle. `previous`, when given, must be an executed and not
    /// yet released cycle of the same view; unchanged nodes reuse its
    /// outputs instead of being invoked.
    pub async fn execute(
        &self,
        previous: Option<&ComputationCycle>,
        snapshot: &dyn MarketDataSnapshot,
    ) -> CycleResult<()> {
        if let Some(previous) = previous {
            let state = previous.state();
            if state != CycleState::Executed {
                return Err(CycleError::InvalidPreviousCycle(state));
            }
        }
        self.transition(CycleState::AwaitingExecution, CycleState::Executing)?;
        self.timing.lock().start = Some(self.now());
        tracing::info!(
            cycle_id = %self.cycle_id,
            view = %self.view.name(),
            valuation_time = %self.valuation_time,
            "Executing cycle"
        );

        let runs = self.create_runs();
        *self.runs.write() = runs.clone();

        let mut fragment = self.model.lock().template();
        self.seed_market_data(&runs, snapshot, &mut fragment).await;
        if let Some(previous) = previous {
            self.reuse_previous(previous, &runs, &mut fragment);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let consumer = ResultConsumer::new(
            self.cycle_id.clone(),
            runs.clone(),
            self.model.clone(),
            self.listener.clone(),
        )
        .spawn(receiver);

        let mut executions = Vec::new();
        for run in runs.values() {
            let subgraph = self.executable_subgraph(run, &mut fragment);
            tracing::info!(
                cycle_id = %self.cycle_id,
                calc_config = %run.calc_config(),
                nodes = run.graph.len(),
                executable = subgraph.len(),
                "Submitting executable subgraph"
            );
            if subgraph.is_empty() {
                continue;
            }
            executions.push(self.context.graph_executor.execute(GraphExecutionRequest {
                cycle_id: self.cycle_id.clone(),
                valuation_time: self.valuation_time,
                graph: Arc::new(subgraph),
                results: sender.clone(),
                statistics: self.context.statistics.clone(),
                log_modes: self.log_modes.clone(),
            }));
        }
        drop(sender);
        publish_fragment(&self.cycle_id, &self.model, self.listener.as_ref(), fragment);

        if let Err(e) = self.await_executions(&mut executions).await {
            for execution in &executions {
                execution.cancel();
            }
            match &e {
                CycleError::Interrupted => {
                    tracing::info!(cycle_id = %self.cycle_id, "Execution interrupted")
                }
                other => {
                    tracing::error!(cycle_id = %self.cycle_id, error = %other, "Execution failed")
                }
            }
            self.set_state(CycleState::ExecutionInterrupted);
            return Err(e);
        }

        if let Err(e) = consumer.await {
            tracing::error!(cycle_id = %self.cycle_id, error = %e, "Result consumer failed");
        }

        let end = self.now();
        self.timing.lock().end = Some(end);
        let duration = self.duration();
        {
            let mut model = self.model.lock();
            model.calculation_time = Some(end);
            model.calculation_duration = duration;
        }
        self.set_state(CycleState::Executed);
        tracing::info!(
            cycle_id = %self.cycle_id,
            duration_ms = duration.map(|d| d.as_millis() as u64).unwrap_or_default(),
            "Executed cycle"
        );
        Ok(())
    }

    /// Dumps the caches if the view asks for it, frees them and destroys
    /// the cycle.
    pub fn release(&self) -> CycleResult<()> {
        let mut state = self.state.write();
        if *state == CycleState::Destroyed {
            return Err(CycleError::AlreadyReleased(self.cycle_id.clone()));
        }
        if self.view.dump_computation_caches() {
            let dir = self
                .context
                .config
                .dump_cache_dir
                .clone()
                .unwrap_or_else(default_dump_dir);
            for run in self.runs.read().values() {
                if let Err(e) = dump_cache(&dir, &self.cycle_id, &run.graph, run.cache.as_ref()) {
                    tracing::warn!(
                        cycle_id = %self.cycle_id,
                        calc_config = %run.calc_config(),
                        error = %e,
                        "Unable to dump computation cache"
                    );
                }
            }
        }
        self.context.cache_source.release_caches(&self.cycle_id);
        *state = CycleState::Destroyed;
        tracing::debug!(cycle_id = %self.cycle_id, "Released cycle");
        Ok(())
    }

    fn transition(&self, expected: CycleState, next: CycleState) -> CycleResult<()> {
        let mut state = self.state.write();
        if *state != expected {
            return Err(CycleError::IllegalState {
                expected,
                actual: *state,
            });
        }
        *state = next;
        Ok(())
    }

    fn set_state(&self, next: CycleState) {
        *self.state.write() = next;
    }

    fn create_runs(&self) -> BTreeMap<String, CalcConfigRun> {
        self.view
            .calc_configs()
            .map(|config| {
                let graph = config.graph().clone();
                let calc_config = graph.calc_config().to_string();
                let run = CalcConfigRun {
                    cache: self.context.cache_source.get_cache(&self.cycle_id, &calc_config),
                    graph,
                    job_results: Arc::new(JobResultCache::new()),
                    node_states: Arc::new(NodeStateTable::new()),
                };
                (calc_config, run)
            })
            .collect()
    }

    async fn seed_market_data(
        &self,
        runs: &BTreeMap<String, CalcConfigRun>,
        snapshot: &dyn MarketDataSnapshot,
        fragment: &mut ComputationResultModel,
    ) {
        let wanted = self.view.market_data_requirements();
        if wanted.is_empty() {
            return;
        }
        let requirements: Vec<_> = wanted.keys().cloned().collect();
        let available = snapshot.query(&requirements).await;

        let mut missing = BTreeSet::new();
        for (requirement, spec) in wanted {
            match available.get(requirement) {
                Some(value) => fragment.add_market_data(ComputedValueResult::new(
                    spec.clone(),
                    CacheEntry::Value(value.clone()),
                    ExecutionLog::empty(),
                )),
                None => {
                    missing.insert(spec.clone());
                }
            }
        }

        for run in runs.values() {
            let operation = self
                .view
                .calc_config(run.calc_config())
                .and_then(|config| config.market_data_override());
            let mut values = Vec::with_capacity(wanted.len());
            for (requirement, spec) in wanted {
                let (entry, log) = match available.get(requirement) {
                    Some(value) => {
                        let value = match &operation {
                            Some(op) => op.apply(requirement, value),
                            None => value.clone(),
                        };
                        (CacheEntry::Value(value), ExecutionLog::empty())
                    }
                    None => {
                        let event = LogEvent::new(
                            LogLevel::Warn,
                            format!("Missing market data for {}", requirement),
                        );
                        let log = ExecutionLog::single(event, self.log_modes.log_mode_for(spec));
                        (CacheEntry::MissingMarketData, log)
                    }
                };
                run.publish_terminal(
                    fragment,
                    ComputedValueResult::new(spec.clone(), entry.clone(), log),
                );
                values.push(ComputedValue::new(spec.clone(), entry));
            }
            run.cache.put_shared_values(values);
        }

        if !missing.is_empty() {
            let listed = missing
                .iter()
                .map(|spec| format!("[{} on {}]", spec.value_name, spec.target))
                .collect::<Vec<_>>()
                .join(", ");
            tracing::info!(
                cycle_id = %self.cycle_id,
                missing = missing.len(),
                "Missing market data: {}",
                listed
            );
        }
    }

    fn reuse_previous(
        &self,
        previous: &ComputationCycle,
        runs: &BTreeMap<String, CalcConfigRun>,
        fragment: &mut ComputationResultModel,
    ) {
        for run in runs.values() {
            let Some(previous_run) = previous.run(run.calc_config()) else {
                continue;
            };
            let mut delta =
                DeltaCalculator::new(&run.graph, run.cache.as_ref(), previous_run.cache.as_ref());
            delta.compute_delta();

            let mut reused = 0;
            let mut invocable = 0;
            for node in run.graph.topological_order() {
                if node.market_data_sourcing {
                    continue;
                }
                invocable += 1;
                if !delta.unchanged_nodes().contains(&node.id) {
                    continue;
                }
                let Some(previous_state) = previous_run.node_states.get(&node.id) else {
                    continue;
                };
                if self.log_modes.log_mode(&node.outputs) == ExecutionLogMode::Full {
                    let has_full_log = previous_run
                        .job_results
                        .find(&node.outputs)
                        .map(|r| r.job_result_item.execution_log.mode == ExecutionLogMode::Full)
                        .unwrap_or(false);
                    if !has_full_log {
                        continue;
                    }
                }

                if previous_state == NodeState::Executed {
                    let values: Vec<ComputedValue> = node
                        .outputs
                        .iter()
                        .map(|spec| {
                            let entry = previous_run
                                .cache
                                .get_value(spec)
                                .unwrap_or(CacheEntry::EVALUATION_ERROR);
                            ComputedValue::new(spec.clone(), entry)
                        })
                        .collect();
                    for value in &values {
                        let job_result = previous_run.job_results.get(&value.specification);
                        if let Some(job_result) = &job_result {
                            run.job_results.put(value.specification.clone(), job_result.clone());
                        }
                        run.publish_terminal(fragment, reused_result(value, job_result.as_ref()));
                    }
                    run.cache.put_shared_values(values);
                    run.node_states.mark_executed(&node.id);
                } else {
                    let values: Vec<ComputedValue> = node
                        .outputs
                        .iter()
                        .map(|spec| ComputedValue::new(spec.clone(), CacheEntry::SUPPRESSED))
                        .collect();
                    for value in &values {
                        run.publish_terminal(fragment, reused_result(value, None));
                    }
                    run.cache.put_shared_values(values);
                    run.node_states.set(&node.id, previous_state);
                }
                reused += 1;
            }
            tracing::info!(
                cycle_id = %self.cycle_id,
                calc_config = %run.calc_config(),
                previous_cycle_id = %previous.cycle_id(),
                "{} of {} nodes require recomputation",
                invocable - reused,
                invocable
            );
        }
    }

    /// Marks nodes that need no invocation and returns the rest.
    fn executable_subgraph(
        &self,
        run: &CalcConfigRun,
        fragment: &mut ComputationResultModel,
    ) -> DependencyGraph {
        let mut suppressed = Vec::new();
        for node in run.graph.topological_order() {
            if node.market_data_sourcing {
                run.node_states.mark_executed(&node.id);
                continue;
            }
            if run.node_states.get(&node.id).is_some() {
                continue;
            }
            if self.context.blacklist.is_blacklisted(node) {
                tracing::debug!(calc_config = %run.calc_config(), node = %node, "Suppressing blacklisted node");
                run.node_states.mark_suppressed(&node.id);
                for spec in &node.outputs {
                    run.publish_terminal(
                        fragment,
                        ComputedValueResult::new(spec.clone(), CacheEntry::SUPPRESSED, ExecutionLog::empty()),
                    );
                    suppressed.push(ComputedValue::new(spec.clone(), CacheEntry::SUPPRESSED));
                }
            }
        }
        if !suppressed.is_empty() {
            run.cache.put_shared_values(suppressed);
        }
        run.graph
            .subgraph(|node| run.node_states.get(&node.id).is_none())
    }

    async fn await_executions(&self, executions: &mut [GraphExecution]) -> CycleResult<()> {
        let poll_timeout = self.context.config.poll_timeout();
        for execution in executions.iter_mut() {
            let calc_config = execution.calc_config().to_string();
            loop {
                tokio::select! {
                    _ = self.interrupt.triggered() => return Err(CycleError::Interrupted),
                    polled = tokio::time::timeout(poll_timeout, &mut *execution) => match polled {
                        Ok(outcome) => {
                            outcome?;
                            break;
                        }
                        Err(_) => tracing::info!(
                            cycle_id = %self.cycle_id,
                            calc_config = %calc_config,
                            "Waiting for graph execution"
                        ),
                    }
                }
            }
        }
        Ok(())
    }
}

fn reused_result(
    value: &ComputedValue,
    job_result: Option<&DependencyNodeJobExecutionResult>,
) -> ComputedValueResult {
    match job_result {
        Some(job_result) => {
            ComputedValueResult::from_job(value.specification.clone(), value.value.clone(), job_result)
        }
        None => ComputedValueResult::new(
            value.specification.clone(),
            value.value.clone(),
            ExecutionLog::empty(),
        ),
    }
}

impl std::fmt::Debug for ComputationCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputationCycle")
            .field("cycle_id", &self.cycle_id)
            .field("view", &self.view.name())
            .field("valuation_time", &self.valuation_time)
            .field("state", &self.state())
            .finish()
    }
}

pub struct ComputationCycleBuilder {
    context: Arc<CycleContext>,
    view: Arc<CompiledView>,
    valuation_time: Option<DateTime<Utc>>,
    listener: Arc<dyn ResultListener>,
    log_modes: Arc<dyn ExecutionLogModeSource>,
}

impl ComputationCycleBuilder {
    pub fn new(context: Arc<CycleContext>, view: Arc<CompiledView>) -> Self {
        Self {
            context,
            view,
            valuation_time: None,
            listener: Arc::new(NoopResultListener),
            log_modes: Arc::new(InMemoryLogModeSource::new()),
        }
    }

    /// Defaults to the runtime's current time.
    pub fn valuation_time(mut self, valuation_time: DateTime<Utc>) -> Self {
        self.valuation_time = Some(valuation_time);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ResultListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn log_modes(mut self, log_modes: Arc<dyn ExecutionLogModeSource>) -> Self {
        self.log_modes = log_modes;
        self
    }

    pub fn build(self) -> ComputationCycle {
        let cycle_id = self.context.runtime.id_generator.next_id();
        let valuation_time = self
            .valuation_time
            .unwrap_or_else(|| self.context.runtime.time_provider.now());
        let model = ComputationResultModel::new(cycle_id.clone(), valuation_time);
        ComputationCycle {
            cycle_id,
            context: self.context,
            view: self.view,
            valuation_time,
            listener: self.listener,
            log_modes: self.log_modes,
            interrupt: CycleInterrupt::new(),
            state: RwLock::new(CycleState::AwaitingExecution),
            timing: Mutex::new(Timing::default()),
            runs: RwLock::new(BTreeMap::new()),
            model: Arc::new(Mutex::new(model)),
        }
    }
}
