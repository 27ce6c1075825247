//! Error types for the calculation engine.
//!
//! - [`FunctionError`]: errors raised while invoking a single job item. These
//!   never escape the calculation node; they are turned into result items and
//!   cache sentinels.
//! - [`CycleError`]: faults in cycle orchestration (illegal state transitions,
//!   dispatch failures, interruption). These are surfaced to the caller.
//! - [`ConfigError`]: engine configuration loading and validation.
//! - [`GraphError`]: dependency graph construction.

pub mod config_error;
pub mod cycle_error;
pub mod function_error;
pub mod graph_error;

pub use config_error::ConfigError;
pub use cycle_error::CycleError;
pub use function_error::FunctionError;
pub use graph_error::GraphError;

/// Convenience alias for cycle-level results.
pub type CycleResult<T> = Result<T, CycleError>;
/// Convenience alias for function invocation results.
pub type FunctionResult<T> = Result<T, FunctionError>;
