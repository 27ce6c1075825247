//! Graph executors: turn a calc-config's dependency graph into calculation
//! jobs, run them, and stream the results back to the cycle.

pub mod local;
pub mod types;

pub use local::LocalGraphExecutor;
pub use types::{ExecutionResult, GraphExecution, GraphExecutionRequest, GraphExecutor};
