use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use xcalc_types::CacheEntry;

use super::computation::CalcConfigRun;
use super::result_model::{ComputationResultModel, ComputedValueResult, ResultListener};
use super::state::DependencyNodeJobExecutionResult;
use crate::error::{CycleError, CycleResult};
use crate::executor::ExecutionResult;

/// Drains the job results a cycle's graph executions stream back, updating
/// node states and the result model and publishing fragments.
///
/// Failures are logged and never reach the cycle: a fragment that cannot be
/// processed is lost, the cycle carries on.
pub(crate) struct ResultConsumer {
    cycle_id: String,
    runs: BTreeMap<String, CalcConfigRun>,
    model: Arc<Mutex<ComputationResultModel>>,
    listener: Arc<dyn ResultListener>,
}

impl ResultConsumer {
    pub(crate) fn new(
        cycle_id: impl Into<String>,
        runs: BTreeMap<String, CalcConfigRun>,
        model: Arc<Mutex<ComputationResultModel>>,
        listener: Arc<dyn ResultListener>,
    ) -> Self {
        Self {
            cycle_id: cycle_id.into(),
            runs,
            model,
            listener,
        }
    }

    /// Runs until every sender of `results` is gone and the queue is empty.
    pub(crate) fn spawn(self, results: mpsc::UnboundedReceiver<ExecutionResult>) -> JoinHandle<()> {
        tokio::spawn(self.run(results))
    }

    async fn run(self, mut results: mpsc::UnboundedReceiver<ExecutionResult>) {
        while let Some(first) = results.recv().await {
            let mut batch = vec![first];
            while let Ok(next) = results.try_recv() {
                batch.push(next);
            }
            self.process_batch(batch);
        }
        tracing::debug!(cycle_id = %self.cycle_id, "Result stream drained");
    }

    fn process_batch(&self, batch: Vec<ExecutionResult>) {
        let mut fragment = self.model.lock().template();
        for result in batch {
            if let Err(e) = self.process_result(&mut fragment, result) {
                tracing::error!(cycle_id = %self.cycle_id, error = %e, "Unable to process job result");
            }
        }
        self.publish(fragment);
    }

    fn process_result(
        &self,
        fragment: &mut ComputationResultModel,
        result: ExecutionResult,
    ) -> CycleResult<()> {
        let ExecutionResult { nodes, result } = result;
        let calc_config = &result.specification.calc_config;
        let run = self
            .runs
            .get(calc_config)
            .ok_or_else(|| CycleError::Internal(format!("result for unknown calc-config {}", calc_config)))?;
        if nodes.len() != result.items.len() {
            return Err(CycleError::Internal(format!(
                "{} has {} items for {} nodes",
                result.specification,
                result.items.len(),
                nodes.len()
            )));
        }

        for (node, item) in nodes.iter().zip(result.items) {
            if item.is_success() {
                run.node_states.mark_executed(&node.id);
            } else {
                run.node_states.mark_failed(&node.id);
            }
            let job_result = DependencyNodeJobExecutionResult::new(result.compute_node_id.clone(), item);
            for output in &node.outputs {
                run.job_results.put(output.clone(), job_result.clone());
                if run.graph.is_terminal_output(output) {
                    let value = run
                        .cache
                        .get_value(output)
                        .unwrap_or(CacheEntry::EVALUATION_ERROR);
                    run.publish_terminal(
                        fragment,
                        ComputedValueResult::from_job(output.clone(), value, &job_result),
                    );
                }
            }
        }
        Ok(())
    }

    fn publish(&self, fragment: ComputationResultModel) {
        publish_fragment(&self.cycle_id, &self.model, self.listener.as_ref(), fragment);
    }
}

/// Merges a non-empty fragment into the full model and hands it to the
/// listener. Listener failures are logged and swallowed.
pub(crate) fn publish_fragment(
    cycle_id: &str,
    model: &Mutex<ComputationResultModel>,
    listener: &dyn ResultListener,
    fragment: ComputationResultModel,
) {
    if fragment.is_empty() {
        return;
    }
    model.lock().merge(&fragment);
    if let Err(e) = listener.result_available(&fragment) {
        tracing::warn!(cycle_id = %cycle_id, error = %e, "Result listener failed");
    }
}
