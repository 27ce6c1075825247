use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use xcalc_types::{
    CacheEntry, CacheSelectHint, CalculationJob, CalculationJobItem, CalculationJobResult,
    CalculationJobResultItem, CalculationJobSpecification, ComputedValue, ValueRequirement,
};

use super::functions::{FunctionExecutionContext, FunctionInputs, FunctionRepository};
use super::target::ComputationTargetResolver;
use crate::core::deferred_cache::{
    DeferredValueCache, ImmediateValueCache, WriteBehindPool, WriteBehindValueCache,
};
use crate::core::stats::FunctionInvocationStatistics;
use crate::core::value_cache::ValueCacheSource;
use crate::error::{FunctionError, FunctionResult};

/// Executes calculation jobs, one at a time.
///
/// Every declared output of every processed item gets exactly one cache
/// entry: the produced value, or [`CacheEntry::EVALUATION_ERROR`] when the
/// item failed or the function left the output out.
pub struct CalculationNode {
    node_id: String,
    cache_source: Arc<dyn ValueCacheSource>,
    functions: Arc<FunctionRepository>,
    target_resolver: Arc<dyn ComputationTargetResolver>,
    write_behind: Option<WriteBehindPool>,
    statistics: Arc<FunctionInvocationStatistics>,
}

impl CalculationNode {
    pub fn new(
        node_id: impl Into<String>,
        cache_source: Arc<dyn ValueCacheSource>,
        functions: Arc<FunctionRepository>,
        target_resolver: Arc<dyn ComputationTargetResolver>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            cache_source,
            functions,
            target_resolver,
            write_behind: None,
            statistics: Arc::new(FunctionInvocationStatistics::new()),
        }
    }

    /// Queue cache writes on `pool` instead of writing them inline.
    pub fn with_write_behind(mut self, pool: WriteBehindPool) -> Self {
        self.write_behind = Some(pool);
        self
    }

    pub fn with_statistics(mut self, statistics: Arc<FunctionInvocationStatistics>) -> Self {
        self.statistics = statistics;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn statistics(&self) -> &Arc<FunctionInvocationStatistics> {
        &self.statistics
    }

    /// Runs the job's items in order.
    ///
    /// Returns `None` when the job was cancelled; items before the
    /// cancellation point have written their outputs, later items have not.
    pub async fn execute_job(&mut self, job: &CalculationJob) -> Option<CalculationJobResult> {
        let spec = job.specification();
        tracing::info!(node_id = %self.node_id, job = %spec, items = job.items().len(), "Executing job");
        let started = Instant::now();

        let cache = self.deferred_cache(spec, job.cache_select_hint());
        let items = self.execute_job_items(job, cache.as_ref()).await;
        cache.wait_for_pending_writes().await;

        let Some(items) = items else {
            tracing::info!(node_id = %self.node_id, job = %spec, "Job cancelled");
            return None;
        };
        let duration = started.elapsed();
        tracing::info!(
            node_id = %self.node_id,
            job = %spec,
            duration_us = duration.as_micros() as u64,
            "Executed job"
        );
        Some(CalculationJobResult::new(
            spec.clone(),
            duration,
            items,
            self.node_id.clone(),
        ))
    }

    fn deferred_cache(
        &self,
        spec: &CalculationJobSpecification,
        hint: &CacheSelectHint,
    ) -> Box<dyn DeferredValueCache> {
        let cache = self.cache_source.get_cache(&spec.cycle_id, &spec.calc_config);
        match &self.write_behind {
            Some(pool) => Box::new(WriteBehindValueCache::new(cache, hint.clone(), pool.clone())),
            None => Box::new(ImmediateValueCache::new(cache, hint.clone())),
        }
    }

    async fn execute_job_items(
        &self,
        job: &CalculationJob,
        cache: &dyn DeferredValueCache,
    ) -> Option<Vec<CalculationJobResultItem>> {
        let spec = job.specification();
        let mut result_items = Vec::with_capacity(job.items().len());
        for item in job.items() {
            tokio::task::yield_now().await;
            if job.is_cancelled() {
                return None;
            }
            let context = FunctionExecutionContext::new(
                spec.valuation_time,
                spec.calc_config.clone(),
                item.parameters.clone(),
                item.log_mode,
            );
            let outcome = self.invoke(spec, item, cache, &context).await;
            let log = context.into_log();
            let result_item = match outcome {
                Ok(()) => CalculationJobResultItem::success(item.clone(), log),
                Err(FunctionError::MissingInputs { missing, .. }) => {
                    tracing::info!(item = %item, "Unable to invoke due to missing inputs");
                    post_not_calculated(item, cache);
                    CalculationJobResultItem::missing_inputs(item.clone(), missing, log)
                }
                Err(e) => {
                    tracing::info!(item = %item, error = %e, "Function invocation failed");
                    post_not_calculated(item, cache);
                    CalculationJobResultItem::failed(
                        item.clone(),
                        e.class_name(),
                        e.message(),
                        e.stack_trace().map(str::to_string),
                        log,
                    )
                }
            };
            result_items.push(result_item);
        }
        Some(result_items)
    }

    async fn invoke(
        &self,
        spec: &CalculationJobSpecification,
        item: &CalculationJobItem,
        cache: &dyn DeferredValueCache,
        context: &FunctionExecutionContext,
    ) -> FunctionResult<()> {
        let target = self
            .target_resolver
            .resolve(&item.target)
            .ok_or_else(|| FunctionError::TargetResolution(item.target.to_string()))?;
        tracing::debug!(function_id = %item.function_id, target = %item.target, "Invoking function");
        let invoker = self
            .functions
            .get(&item.function_id)
            .ok_or_else(|| FunctionError::FunctionNotFound(item.function_id.clone()))?;

        let input_specs: Vec<_> = item.inputs.iter().cloned().collect();
        let mut values = Vec::with_capacity(input_specs.len());
        let mut missing = BTreeSet::new();
        let mut input_bytes = 0u64;
        let mut input_samples = 0u64;
        for (input, entry) in cache.get_values(&input_specs) {
            match entry {
                Some(CacheEntry::Value(value)) => {
                    let computed = ComputedValue::of(input, value);
                    if let Some(bytes) = cache.estimate_size(&computed) {
                        input_bytes += bytes as u64;
                        input_samples += 1;
                    }
                    if let CacheEntry::Value(value) = computed.value {
                        values.push((computed.specification, value));
                    }
                }
                _ => {
                    missing.insert(input);
                }
            }
        }
        if !missing.is_empty() {
            if invoker.can_handle_missing_inputs() {
                tracing::debug!(function_id = %item.function_id, missing = missing.len(), "Executing with missing inputs");
            } else {
                return Err(FunctionError::MissingInputs {
                    function_id: item.function_id.clone(),
                    missing,
                });
            }
        }
        let inputs = FunctionInputs::new(values, missing);
        let desired: BTreeSet<ValueRequirement> =
            item.outputs.iter().map(|s| s.to_requirement()).collect();

        let started = Instant::now();
        let outcome = AssertUnwindSafe(invoker.execute(context, &inputs, &target, &desired))
            .catch_unwind()
            .await;
        let results = match outcome {
            Ok(results) => results?,
            Err(payload) => return Err(FunctionError::Panicked(panic_message(payload.as_ref()))),
        };
        let elapsed = started.elapsed();

        let mut remaining = item.outputs.clone();
        let mut seen = HashSet::with_capacity(results.len());
        let mut stored = Vec::with_capacity(results.len() + remaining.len());
        for result in results {
            if !seen.insert(result.specification.clone()) {
                tracing::debug!(spec = %result.specification, "Ignoring duplicate result");
                continue;
            }
            if !remaining.remove(&result.specification) {
                tracing::debug!(spec = %result.specification, "Function produced non-requested result");
            }
            stored.push(result);
        }
        let produced = stored.len() as u64;
        stored.extend(
            remaining
                .into_iter()
                .map(|output| ComputedValue::new(output, CacheEntry::EVALUATION_ERROR)),
        );

        self.statistics.record_invocation(
            &spec.calc_config,
            &item.function_id,
            elapsed,
            input_bytes,
            input_samples,
            produced,
        );
        cache.put_values(stored);
        Ok(())
    }
}

fn post_not_calculated(item: &CalculationJobItem, cache: &dyn DeferredValueCache) {
    cache.put_values(
        item.outputs
            .iter()
            .map(|output| ComputedValue::new(output.clone(), CacheEntry::EVALUATION_ERROR))
            .collect(),
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
