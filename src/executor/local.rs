use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use xcalc_types::{
    CacheSelectHint, CalculationJob, CalculationJobItem, CalculationJobResult,
    CalculationJobSpecification, JobCancelHandle,
};

use super::types::{ExecutionResult, GraphExecution, GraphExecutionRequest, GraphExecutor};
use crate::calcnode::{CalculationNode, ComputationTargetResolver, FunctionRepository};
use crate::config::{CacheWriteMode, EngineConfig};
use crate::core::deferred_cache::WriteBehindPool;
use crate::core::stats::FunctionInvocationStatistics;
use crate::core::value_cache::ValueCacheSource;
use crate::error::{CycleError, CycleResult};
use crate::graph::{execution_levels, DependencyNode};

/// Idle calculation nodes. A permit is held for as long as a node is out of
/// the pool, so a node never runs two jobs at once.
#[derive(Clone)]
struct NodePool {
    idle: Arc<Mutex<Vec<CalculationNode>>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl NodePool {
    fn new(nodes: Vec<CalculationNode>) -> Self {
        let size = nodes.len();
        Self {
            idle: Arc::new(Mutex::new(nodes)),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    async fn acquire(&self) -> Option<PooledNode> {
        let permit = self.permits.clone().acquire_owned().await.ok()?;
        let node = self.idle.lock().pop()?;
        Some(PooledNode {
            node: Some(node),
            idle: self.idle.clone(),
            _permit: permit,
        })
    }

    fn size(&self) -> usize {
        self.size
    }
}

/// A node checked out of the pool; goes back on drop, including when the
/// running task is aborted.
struct PooledNode {
    node: Option<CalculationNode>,
    idle: Arc<Mutex<Vec<CalculationNode>>>,
    _permit: OwnedSemaphorePermit,
}

impl PooledNode {
    async fn execute_job(&mut self, job: &CalculationJob) -> Option<CalculationJobResult> {
        match self.node.as_mut() {
            Some(node) => node.execute_job(job).await,
            None => None,
        }
    }
}

impl Drop for PooledNode {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            self.idle.lock().push(node);
        }
    }
}

/// In-process [`GraphExecutor`] over a fixed pool of [`CalculationNode`]s.
///
/// The graph is split into topological levels and each level into jobs of
/// at most `max_job_items` items. All jobs of a level run concurrently (as
/// far as the pool allows); the next level starts once they are done.
pub struct LocalGraphExecutor {
    pool: NodePool,
    max_job_items: usize,
    next_job_id: Arc<AtomicU64>,
}

impl LocalGraphExecutor {
    pub fn new(nodes: Vec<CalculationNode>, max_job_items: usize) -> Self {
        Self {
            pool: NodePool::new(nodes),
            max_job_items: max_job_items.max(1),
            next_job_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Builds `calculation_nodes` nodes sharing one write-behind pool when
    /// the config asks for write-behind caching. Must be called inside a
    /// tokio runtime.
    pub fn from_config(
        config: &EngineConfig,
        cache_source: Arc<dyn ValueCacheSource>,
        functions: Arc<FunctionRepository>,
        target_resolver: Arc<dyn ComputationTargetResolver>,
        statistics: Arc<FunctionInvocationStatistics>,
    ) -> Self {
        let write_behind = match config.cache_write_mode {
            CacheWriteMode::WriteBehind => Some(WriteBehindPool::new(config.write_behind_workers)),
            CacheWriteMode::Immediate => None,
        };
        let nodes = (0..config.calculation_nodes.max(1))
            .map(|i| {
                let node = CalculationNode::new(
                    format!("local-{}", i),
                    cache_source.clone(),
                    functions.clone(),
                    target_resolver.clone(),
                )
                .with_statistics(statistics.clone());
                match &write_behind {
                    Some(pool) => node.with_write_behind(pool.clone()),
                    None => node,
                }
            })
            .collect();
        Self::new(nodes, config.max_job_items)
    }

    pub fn node_count(&self) -> usize {
        self.pool.size()
    }
}

impl GraphExecutor for LocalGraphExecutor {
    fn execute(&self, request: GraphExecutionRequest) -> GraphExecution {
        let cancel = CancellationToken::new();
        let calc_config = request.graph.calc_config().to_string();
        let handle = tokio::spawn(run_graph(
            self.pool.clone(),
            request,
            self.max_job_items,
            self.next_job_id.clone(),
            cancel.clone(),
        ));
        GraphExecution::new(calc_config, handle, cancel)
    }
}

async fn run_graph(
    pool: NodePool,
    request: GraphExecutionRequest,
    max_job_items: usize,
    next_job_id: Arc<AtomicU64>,
    cancel: CancellationToken,
) -> CycleResult<()> {
    let graph = request.graph.clone();
    let calc_config = graph.calc_config().to_string();
    request.statistics.graph_processed(&calc_config, graph.len());

    for level in execution_levels(&graph) {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let mut join_set = JoinSet::new();
        let mut cancel_handles: Vec<JobCancelHandle> = Vec::new();

        for chunk in level.chunks(max_job_items) {
            let nodes: Vec<DependencyNode> = chunk.iter().map(|n| (*n).clone()).collect();
            let job_id = next_job_id.fetch_add(1, Ordering::SeqCst);
            let job = build_job(&request, &calc_config, job_id, &nodes);
            cancel_handles.push(job.cancel_handle());
            let pool = pool.clone();
            join_set.spawn(async move {
                let result = match pool.acquire().await {
                    Some(mut node) => node.execute_job(&job).await,
                    None => None,
                };
                (job_id, nodes, result)
            });
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    for handle in &cancel_handles {
                        handle.cancel();
                    }
                    while join_set.join_next().await.is_some() {}
                    return Ok(());
                }
                joined = join_set.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    let (job_id, nodes, result) = joined.map_err(|e| CycleError::DispatchFailed {
                        calc_config: calc_config.clone(),
                        reason: format!("job task failed: {}", e),
                    })?;
                    let Some(result) = result else {
                        if cancel.is_cancelled() {
                            continue;
                        }
                        return Err(CycleError::DispatchFailed {
                            calc_config: calc_config.clone(),
                            reason: format!("job {} returned no result", job_id),
                        });
                    };
                    request
                        .statistics
                        .job_completed(&calc_config, result.items.len(), result.duration);
                    if request.results.send(ExecutionResult { nodes, result }).is_err() {
                        tracing::debug!(calc_config = %calc_config, job_id, "Result consumer gone");
                    }
                }
            }
        }
    }
    Ok(())
}

fn build_job(
    request: &GraphExecutionRequest,
    calc_config: &str,
    job_id: u64,
    nodes: &[DependencyNode],
) -> CalculationJob {
    let specification = CalculationJobSpecification::new(
        request.cycle_id.clone(),
        calc_config,
        request.valuation_time,
        job_id,
    );
    let items = nodes
        .iter()
        .map(|node| {
            CalculationJobItem::new(
                node.function_id.clone(),
                node.target.clone(),
                node.inputs.iter().cloned(),
                node.outputs.iter().cloned(),
            )
            .with_parameters(node.parameters.clone())
            .with_log_mode(request.log_modes.log_mode(&node.outputs))
        })
        .collect();
    CalculationJob::new(specification, CacheSelectHint::all_shared(), items)
}
