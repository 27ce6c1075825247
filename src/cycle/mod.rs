//! Computation cycles.
//!
//! A [`ComputationCycle`] runs one valuation pass over a [`CompiledView`]:
//! it seeds market data into a cache per calc-config, carries unchanged
//! results over from a previous cycle, dispatches what is left to a graph
//! executor and collects the streamed results into a
//! [`ComputationResultModel`].

pub mod blacklist;
pub mod computation;
mod consumer;
pub mod context;
pub mod delta;
pub mod dump;
pub mod log_mode;
pub mod market_data;
pub mod result_model;
pub mod state;
pub mod view;

pub use blacklist::{EmptyBlacklist, ExecutionBlacklist, FunctionBlacklist};
pub use computation::{ComputationCycle, ComputationCycleBuilder};
pub use context::{CycleContext, CycleContextBuilder};
pub use delta::DeltaCalculator;
pub use log_mode::{ExecutionLogModeSource, InMemoryLogModeSource};
pub use market_data::{
    InMemoryMarketDataSnapshot, MarketDataShift, MarketDataSnapshot, OverrideOperation,
};
pub use result_model::{
    ComputationResultModel, ComputedValueResult, NoopResultListener, ResultListener,
};
pub use state::{
    CycleState, DependencyNodeJobExecutionResult, JobResultCache, NodeState, NodeStateTable,
};
pub use view::{CalcConfigView, CompiledView, CompiledViewBuilder};
