use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use xcalc_types::{ComputationTargetSpecification, ValueSpecification};

/// Function id given to nodes that only source market data.
pub const MARKET_DATA_SOURCING_FUNCTION: &str = "MarketDataSourcingFunction";

/// One function invocation site in the computation DAG.
///
/// Node ids are stable across cycles of the same compiled view; execution
/// state and delta reuse are keyed by them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub id: String,
    pub function_id: String,
    #[serde(default)]
    pub parameters: Value,
    pub target: ComputationTargetSpecification,
    pub inputs: BTreeSet<ValueSpecification>,
    pub outputs: BTreeSet<ValueSpecification>,
    /// Outputs come straight from the market data snapshot; the node is
    /// never invoked.
    #[serde(default)]
    pub market_data_sourcing: bool,
}

impl DependencyNode {
    pub fn new(
        id: impl Into<String>,
        function_id: impl Into<String>,
        target: ComputationTargetSpecification,
    ) -> Self {
        Self {
            id: id.into(),
            function_id: function_id.into(),
            parameters: Value::Null,
            target,
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            market_data_sourcing: false,
        }
    }

    /// A node sourcing the given values from market data.
    pub fn market_data(
        id: impl Into<String>,
        target: ComputationTargetSpecification,
        outputs: impl IntoIterator<Item = ValueSpecification>,
    ) -> Self {
        let mut node = Self::new(id, MARKET_DATA_SOURCING_FUNCTION, target);
        node.outputs = outputs.into_iter().collect();
        node.market_data_sourcing = true;
        node
    }

    pub fn with_input(mut self, spec: ValueSpecification) -> Self {
        self.inputs.insert(spec);
        self
    }

    pub fn with_inputs(mut self, specs: impl IntoIterator<Item = ValueSpecification>) -> Self {
        self.inputs.extend(specs);
        self
    }

    pub fn with_output(mut self, spec: ValueSpecification) -> Self {
        self.outputs.insert(spec);
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

impl fmt::Display for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{} on {}]", self.id, self.function_id, self.target)
    }
}

pub type NodeIndexMap = std::collections::HashMap<String, NodeIndex>;
