//! # xcalc: a computation cycle engine
//!
//! `xcalc` executes dependency graphs of analytic functions over market data.
//! One valuation pass is a [`ComputationCycle`]:
//!
//! - **Value caches**: one per (cycle, calc-config), holding real values or
//!   typed sentinels (missing market data, evaluation error, suppressed).
//!   Writes are immediate or write-behind, chosen by [`EngineConfig`].
//! - **Calculation nodes**: run [`CalculationJob`]s item by item, turning every
//!   failure into a result item and a sentinel so each declared output always
//!   gets a cache entry.
//! - **Graph executors**: partition a calc-config's graph into jobs and stream
//!   results back to the cycle.
//! - **Delta reuse**: nodes whose market data inputs did not change since the
//!   previous cycle carry their outputs over without being invoked.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xcalc::{
//!     CompiledView, ComputationCycle, CycleContext, DependencyGraph, EngineConfig,
//!     FunctionInvocationStatistics, FunctionRepository, InMemoryMarketDataSnapshot,
//!     InMemoryTargetResolver, InMemoryValueCacheSource, LocalGraphExecutor,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let graph = DependencyGraph::builder("Default").build().unwrap();
//!     let view = Arc::new(CompiledView::builder("Example").graph(graph).build());
//!     let config = EngineConfig::default();
//!     let caches = Arc::new(InMemoryValueCacheSource::new());
//!     let executor = LocalGraphExecutor::from_config(
//!         &config,
//!         caches.clone(),
//!         Arc::new(FunctionRepository::new()),
//!         Arc::new(InMemoryTargetResolver::new()),
//!         Arc::new(FunctionInvocationStatistics::new()),
//!     );
//!     let context = CycleContext::builder(caches, Arc::new(executor))
//!         .config(config)
//!         .build();
//!     let cycle = ComputationCycle::builder(context, view).build();
//!     let snapshot = InMemoryMarketDataSnapshot::new(chrono::Utc::now());
//!     cycle.execute(None, &snapshot).await.unwrap();
//!     println!("{:?}", cycle.result_model());
//!     cycle.release().unwrap();
//! }
//! ```

pub mod calcnode;
pub mod config;
pub mod core;
pub mod cycle;
pub mod error;
pub mod executor;
pub mod graph;

pub use xcalc_types::{
    CacheEntry, CacheSelectHint, CalculationJob, CalculationJobItem, CalculationJobResult,
    CalculationJobResultItem, CalculationJobSpecification, ComputationTargetSpecification,
    ComputationTargetType, ComputedValue, ExecutionLog, ExecutionLogMode, InvocationResult,
    JobCancelHandle, LogEvent, LogLevel, NotCalculatedReason, ValueRequirement, ValueSpecification,
};

pub use crate::calcnode::{
    CalculationNode, ComputationTarget, ComputationTargetResolver, FunctionExecutionContext,
    FunctionInputs, FunctionInvoker, FunctionRepository, InMemoryTargetResolver, SyncFunction,
};
pub use crate::config::{parse_config, CacheWriteMode, ConfigFormat, EngineConfig};
pub use crate::core::{
    CycleInterrupt, FakeIdGenerator, FakeTimeProvider, FunctionInvocationStatistics,
    GraphExecutorStatistics, IdGenerator, InMemoryValueCache, InMemoryValueCacheSource,
    RealIdGenerator, RealTimeProvider, RuntimeContext, TimeProvider, ValueCache,
    ValueCacheSource,
};
pub use crate::cycle::{
    CompiledView, ComputationCycle, ComputationResultModel, ComputedValueResult, CycleContext,
    CycleState, ExecutionBlacklist, ExecutionLogModeSource, FunctionBlacklist,
    InMemoryLogModeSource, InMemoryMarketDataSnapshot, MarketDataShift, MarketDataSnapshot,
    NodeState, OverrideOperation, ResultListener,
};
pub use crate::error::{ConfigError, CycleError, CycleResult, FunctionError, FunctionResult, GraphError};
pub use crate::executor::{GraphExecution, GraphExecutor, LocalGraphExecutor};
pub use crate::graph::{DependencyGraph, DependencyNode};
