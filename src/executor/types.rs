use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use xcalc_types::CalculationJobResult;

use crate::core::stats::GraphExecutorStatistics;
use crate::cycle::log_mode::ExecutionLogModeSource;
use crate::error::{CycleError, CycleResult};
use crate::graph::{DependencyGraph, DependencyNode};

/// A finished job together with the dependency nodes its items ran, in
/// item order.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub nodes: Vec<DependencyNode>,
    pub result: CalculationJobResult,
}

/// Everything a graph executor needs to run one calc-config's graph.
pub struct GraphExecutionRequest {
    pub cycle_id: String,
    pub valuation_time: DateTime<Utc>,
    pub graph: Arc<DependencyGraph>,
    /// Job results are streamed here as they complete.
    pub results: mpsc::UnboundedSender<ExecutionResult>,
    pub statistics: Arc<GraphExecutorStatistics>,
    pub log_modes: Arc<dyn ExecutionLogModeSource>,
}

/// Runs dependency graphs as calculation jobs.
pub trait GraphExecutor: Send + Sync {
    /// Starts executing the request's graph and returns at once.
    fn execute(&self, request: GraphExecutionRequest) -> GraphExecution;
}

/// Handle on a running graph execution.
///
/// Resolves when every job has completed; a dispatch-level failure
/// resolves to [`CycleError::DispatchFailed`].
pub struct GraphExecution {
    calc_config: String,
    handle: JoinHandle<CycleResult<()>>,
    cancel: CancellationToken,
}

impl GraphExecution {
    pub fn new(
        calc_config: impl Into<String>,
        handle: JoinHandle<CycleResult<()>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            calc_config: calc_config.into(),
            handle,
            cancel,
        }
    }

    pub fn calc_config(&self) -> &str {
        &self.calc_config
    }

    /// Asks every outstanding job to stop at its next item boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for GraphExecution {
    type Output = CycleResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(e)) => Poll::Ready(Err(CycleError::DispatchFailed {
                calc_config: this.calc_config.clone(),
                reason: e.to_string(),
            })),
        }
    }
}

impl std::fmt::Debug for GraphExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecution")
            .field("calc_config", &self.calc_config)
            .field("finished", &self.handle.is_finished())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
