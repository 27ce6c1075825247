use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use xcalc_types::{
    CacheEntry, ExecutionLog, InvocationResult, ValueRequirement, ValueSpecification,
};

use super::state::DependencyNodeJobExecutionResult;

/// A value as reported to consumers, with how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedValueResult {
    pub specification: ValueSpecification,
    pub value: CacheEntry,
    #[serde(default)]
    pub execution_log: ExecutionLog,
    #[serde(default)]
    pub compute_node_id: Option<String>,
    #[serde(default)]
    pub missing_inputs: BTreeSet<ValueSpecification>,
    #[serde(default)]
    pub invocation_result: Option<InvocationResult>,
}

impl ComputedValueResult {
    /// A value that did not come from a job, such as market data.
    pub fn new(specification: ValueSpecification, value: CacheEntry, execution_log: ExecutionLog) -> Self {
        Self {
            specification,
            value,
            execution_log,
            compute_node_id: None,
            missing_inputs: BTreeSet::new(),
            invocation_result: None,
        }
    }

    pub fn from_job(
        specification: ValueSpecification,
        value: CacheEntry,
        job_result: &DependencyNodeJobExecutionResult,
    ) -> Self {
        let item = &job_result.job_result_item;
        Self {
            specification,
            value,
            execution_log: item.execution_log.clone(),
            compute_node_id: Some(job_result.compute_node_id.clone()),
            missing_inputs: item.missing_inputs.clone(),
            invocation_result: Some(item.result),
        }
    }
}

/// Results of a cycle, or of a fragment of one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationResultModel {
    pub cycle_id: String,
    pub valuation_time: DateTime<Utc>,
    pub calculation_time: Option<DateTime<Utc>>,
    pub calculation_duration: Option<Duration>,
    /// Terminal output values by calc-config.
    #[serde(with = "nested_entries")]
    values: BTreeMap<String, BTreeMap<ValueSpecification, ComputedValueResult>>,
    #[serde(with = "entries")]
    market_data: BTreeMap<ValueSpecification, ComputedValueResult>,
    #[serde(with = "entries")]
    requirements: BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>>,
}

impl ComputationResultModel {
    pub fn new(cycle_id: impl Into<String>, valuation_time: DateTime<Utc>) -> Self {
        Self {
            cycle_id: cycle_id.into(),
            valuation_time,
            calculation_time: None,
            calculation_duration: None,
            values: BTreeMap::new(),
            market_data: BTreeMap::new(),
            requirements: BTreeMap::new(),
        }
    }

    /// An empty model with this model's identity, for fragments.
    pub fn template(&self) -> Self {
        Self::new(self.cycle_id.clone(), self.valuation_time)
    }

    pub fn add_value(&mut self, calc_config: &str, result: ComputedValueResult) {
        self.values
            .entry(calc_config.to_string())
            .or_default()
            .insert(result.specification.clone(), result);
    }

    pub fn add_market_data(&mut self, result: ComputedValueResult) {
        self.market_data.insert(result.specification.clone(), result);
    }

    pub fn add_requirements(&mut self, requirements: &BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>>) {
        for (spec, reqs) in requirements {
            self.requirements
                .entry(spec.clone())
                .or_default()
                .extend(reqs.iter().cloned());
        }
    }

    /// Copies every value, market data entry and requirement of `fragment`.
    pub fn merge(&mut self, fragment: &ComputationResultModel) {
        for (calc_config, values) in &fragment.values {
            for result in values.values() {
                self.add_value(calc_config, result.clone());
            }
        }
        for result in fragment.market_data.values() {
            self.add_market_data(result.clone());
        }
        self.add_requirements(&fragment.requirements);
    }

    pub fn value(&self, calc_config: &str, spec: &ValueSpecification) -> Option<&ComputedValueResult> {
        self.values.get(calc_config).and_then(|v| v.get(spec))
    }

    pub fn values(&self, calc_config: &str) -> impl Iterator<Item = &ComputedValueResult> {
        self.values.get(calc_config).into_iter().flat_map(|v| v.values())
    }

    pub fn calc_configs(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn market_data(&self) -> impl Iterator<Item = &ComputedValueResult> {
        self.market_data.values()
    }

    pub fn requirements(&self, spec: &ValueSpecification) -> Option<&BTreeSet<ValueRequirement>> {
        self.requirements.get(spec)
    }

    /// Every terminal value across calc-configs.
    pub fn all_results(&self) -> impl Iterator<Item = (&str, &ComputedValueResult)> {
        self.values
            .iter()
            .flat_map(|(config, values)| values.values().map(move |v| (config.as_str(), v)))
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(|v| v.is_empty()) && self.market_data.is_empty()
    }
}

// Specifications are structured, so JSON maps keyed by them are written as
// lists of `[key, value]` pairs.
mod entries {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Ok(Vec::<(K, V)>::deserialize(deserializer)?.into_iter().collect())
    }
}

mod nested_entries {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<K, V, S>(
        map: &BTreeMap<String, BTreeMap<K, V>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_map(
            map.iter()
                .map(|(outer, inner)| (outer, inner.iter().collect::<Vec<_>>())),
        )
    }

    pub fn deserialize<'de, K, V, D>(
        deserializer: D,
    ) -> Result<BTreeMap<String, BTreeMap<K, V>>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, Vec<(K, V)>>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(outer, inner)| (outer, inner.into_iter().collect()))
            .collect())
    }
}

/// Receives result fragments as a cycle produces them.
pub trait ResultListener: Send + Sync {
    fn result_available(&self, fragment: &ComputationResultModel) -> anyhow::Result<()>;
}

impl<F> ResultListener for F
where
    F: Fn(&ComputationResultModel) -> anyhow::Result<()> + Send + Sync,
{
    fn result_available(&self, fragment: &ComputationResultModel) -> anyhow::Result<()> {
        self(fragment)
    }
}

/// Discards every fragment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResultListener;

impl ResultListener for NoopResultListener {
    fn result_available(&self, _fragment: &ComputationResultModel) -> anyhow::Result<()> {
        Ok(())
    }
}
