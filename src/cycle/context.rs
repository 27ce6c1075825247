use std::sync::Arc;

use super::blacklist::{EmptyBlacklist, ExecutionBlacklist};
use crate::config::EngineConfig;
use crate::core::runtime_context::RuntimeContext;
use crate::core::stats::GraphExecutorStatistics;
use crate::core::value_cache::ValueCacheSource;
use crate::executor::GraphExecutor;

/// Engine services shared by every cycle of a view process.
#[derive(Clone)]
pub struct CycleContext {
    pub config: EngineConfig,
    pub cache_source: Arc<dyn ValueCacheSource>,
    pub graph_executor: Arc<dyn GraphExecutor>,
    pub blacklist: Arc<dyn ExecutionBlacklist>,
    pub statistics: Arc<GraphExecutorStatistics>,
    pub runtime: RuntimeContext,
}

impl CycleContext {
    pub fn builder(
        cache_source: Arc<dyn ValueCacheSource>,
        graph_executor: Arc<dyn GraphExecutor>,
    ) -> CycleContextBuilder {
        CycleContextBuilder::new(cache_source, graph_executor)
    }
}

pub struct CycleContextBuilder {
    context: CycleContext,
}

impl CycleContextBuilder {
    pub fn new(
        cache_source: Arc<dyn ValueCacheSource>,
        graph_executor: Arc<dyn GraphExecutor>,
    ) -> Self {
        Self {
            context: CycleContext {
                config: EngineConfig::default(),
                cache_source,
                graph_executor,
                blacklist: Arc::new(EmptyBlacklist),
                statistics: Arc::new(GraphExecutorStatistics::new()),
                runtime: RuntimeContext::default(),
            },
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.context.config = config;
        self
    }

    pub fn blacklist(mut self, blacklist: Arc<dyn ExecutionBlacklist>) -> Self {
        self.context.blacklist = blacklist;
        self
    }

    pub fn statistics(mut self, statistics: Arc<GraphExecutorStatistics>) -> Self {
        self.context.statistics = statistics;
        self
    }

    pub fn runtime(mut self, runtime: RuntimeContext) -> Self {
        self.context.runtime = runtime;
        self
    }

    pub fn build(self) -> Arc<CycleContext> {
        Arc::new(self.context)
    }
}
