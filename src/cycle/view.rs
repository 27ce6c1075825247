//! Compiled views: the per-calc-config dependency graphs a cycle runs, and
//! the market data they need.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use xcalc_types::{ValueRequirement, ValueSpecification};

use super::market_data::{MarketDataShift, OverrideOperation};
use crate::graph::DependencyGraph;

/// One calc-config of a view.
#[derive(Clone)]
pub struct CalcConfigView {
    graph: Arc<DependencyGraph>,
    market_data_shift: Vec<String>,
    override_operation: Option<Arc<dyn OverrideOperation>>,
}

impl CalcConfigView {
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn market_data_shift(&self) -> &[String] {
        &self.market_data_shift
    }

    /// The operation applied to market data before it is seeded into this
    /// config's cache. An injected operation wins over shift expressions.
    /// More than one expression, or one that does not parse, is logged and
    /// yields no override.
    pub fn market_data_override(&self) -> Option<Arc<dyn OverrideOperation>> {
        if let Some(op) = &self.override_operation {
            return Some(op.clone());
        }
        match self.market_data_shift.as_slice() {
            [] => None,
            [expr] => match MarketDataShift::parse(expr) {
                Ok(shift) => Some(Arc::new(shift)),
                Err(e) => {
                    tracing::error!(
                        calc_config = %self.graph.calc_config(),
                        error = %e,
                        "Ignoring market data shift"
                    );
                    None
                }
            },
            exprs => {
                tracing::error!(
                    calc_config = %self.graph.calc_config(),
                    shifts = exprs.len(),
                    "Only one market data shift is supported, ignoring all of them"
                );
                None
            }
        }
    }
}

impl fmt::Debug for CalcConfigView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalcConfigView")
            .field("calc_config", &self.graph.calc_config())
            .field("nodes", &self.graph.len())
            .field("market_data_shift", &self.market_data_shift)
            .field("override_operation", &self.override_operation.is_some())
            .finish()
    }
}

/// A view compiled into one dependency graph per calc-config.
#[derive(Debug, Clone)]
pub struct CompiledView {
    name: String,
    configs: BTreeMap<String, CalcConfigView>,
    market_data_requirements: BTreeMap<ValueRequirement, ValueSpecification>,
    dump_computation_caches: bool,
}

impl CompiledView {
    pub fn builder(name: impl Into<String>) -> CompiledViewBuilder {
        CompiledViewBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn calc_config_names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(|k| k.as_str())
    }

    pub fn calc_configs(&self) -> impl Iterator<Item = &CalcConfigView> {
        self.configs.values()
    }

    pub fn calc_config(&self, name: &str) -> Option<&CalcConfigView> {
        self.configs.get(name)
    }

    pub fn graph(&self, calc_config: &str) -> Option<&Arc<DependencyGraph>> {
        self.configs.get(calc_config).map(|c| &c.graph)
    }

    /// Market data requirements and the specifications they resolve to.
    pub fn market_data_requirements(&self) -> &BTreeMap<ValueRequirement, ValueSpecification> {
        &self.market_data_requirements
    }

    pub fn dump_computation_caches(&self) -> bool {
        self.dump_computation_caches
    }
}

pub struct CompiledViewBuilder {
    name: String,
    configs: BTreeMap<String, CalcConfigView>,
    market_data_requirements: BTreeMap<ValueRequirement, ValueSpecification>,
    dump_computation_caches: bool,
}

impl CompiledViewBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            configs: BTreeMap::new(),
            market_data_requirements: BTreeMap::new(),
            dump_computation_caches: false,
        }
    }

    /// Adds a calc-config. Outputs of its market-data sourcing nodes become
    /// market data requirements.
    pub fn graph(mut self, graph: DependencyGraph) -> Self {
        for node in graph.topological_order().filter(|n| n.market_data_sourcing) {
            for spec in &node.outputs {
                self.market_data_requirements
                    .entry(spec.to_requirement())
                    .or_insert_with(|| spec.clone());
            }
        }
        self.configs.insert(
            graph.calc_config().to_string(),
            CalcConfigView {
                graph: Arc::new(graph),
                market_data_shift: Vec::new(),
                override_operation: None,
            },
        );
        self
    }

    /// Adds a shift expression to an already added calc-config.
    pub fn market_data_shift(mut self, calc_config: &str, expr: impl Into<String>) -> Self {
        if let Some(config) = self.configs.get_mut(calc_config) {
            config.market_data_shift.push(expr.into());
        }
        self
    }

    pub fn override_operation(
        mut self,
        calc_config: &str,
        operation: Arc<dyn OverrideOperation>,
    ) -> Self {
        if let Some(config) = self.configs.get_mut(calc_config) {
            config.override_operation = Some(operation);
        }
        self
    }

    pub fn market_data_requirement(
        mut self,
        requirement: ValueRequirement,
        spec: ValueSpecification,
    ) -> Self {
        self.market_data_requirements.insert(requirement, spec);
        self
    }

    pub fn dump_computation_caches(mut self, dump: bool) -> Self {
        self.dump_computation_caches = dump;
        self
    }

    pub fn build(self) -> CompiledView {
        CompiledView {
            name: self.name,
            configs: self.configs,
            market_data_requirements: self.market_data_requirements,
            dump_computation_caches: self.dump_computation_caches,
        }
    }
}
