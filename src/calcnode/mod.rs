//! Calculation nodes.
//!
//! A [`CalculationNode`] runs [`CalculationJob`](xcalc_types::CalculationJob)s
//! against a [`FunctionRepository`], reading inputs from and writing outputs
//! to the value cache of the job's cycle and calc-config. Item failures are
//! turned into result items and cache sentinels; they never fail the job.

pub mod functions;
pub mod node;
pub mod target;

pub use functions::{
    FunctionExecutionContext, FunctionInputs, FunctionInvoker, FunctionRepository, SyncFunction,
};
pub use node::CalculationNode;
pub use target::{ComputationTarget, ComputationTargetResolver, InMemoryTargetResolver};
