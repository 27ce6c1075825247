pub mod entry;
pub mod job;
pub mod result;
pub mod value;

pub use entry::{estimate_json_bytes, CacheEntry, NotCalculatedReason};
pub use job::{
    CacheSelectHint, CalculationJob, CalculationJobItem, CalculationJobSpecification,
    JobCancelHandle,
};
pub use result::{
    CalculationJobResult, CalculationJobResultItem, ExecutionLog, ExecutionLogMode,
    InvocationResult, LogEvent, LogLevel,
};
pub use value::{
    ComputationTargetSpecification, ComputationTargetType, ComputedValue, UniqueId,
    ValueProperties, ValueRequirement, ValueSpecification,
};
