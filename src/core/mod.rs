pub mod deferred_cache;
pub mod interrupt;
pub mod runtime_context;
pub mod stats;
pub mod value_cache;

pub use deferred_cache::{
    DeferredValueCache, ImmediateValueCache, WriteBehindPool, WriteBehindValueCache,
};
pub use interrupt::CycleInterrupt;
pub use runtime_context::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, TimeProvider,
};
pub use stats::{
    FunctionInvocationRecord, FunctionInvocationStatistics, GraphExecutionRecord,
    GraphExecutorStatistics,
};
pub use value_cache::{InMemoryValueCache, InMemoryValueCacheSource, ValueCache, ValueCacheSource};
