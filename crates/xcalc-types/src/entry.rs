use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Why an output holds no real value even though its producer ran (or was
/// meant to run) this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotCalculatedReason {
    /// The producing function failed, or could not run for lack of inputs.
    EvaluationError,
    /// The producing function was suppressed by the execution blacklist.
    Suppressed,
}

/// What a value cache holds for one value specification.
///
/// "Never computed" is not a variant: it is the absence of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CacheEntry {
    Value(Value),
    MissingMarketData,
    NotCalculated(NotCalculatedReason),
}

impl CacheEntry {
    pub const EVALUATION_ERROR: CacheEntry =
        CacheEntry::NotCalculated(NotCalculatedReason::EvaluationError);
    pub const SUPPRESSED: CacheEntry = CacheEntry::NotCalculated(NotCalculatedReason::Suppressed);

    pub fn value(v: impl Into<Value>) -> Self {
        CacheEntry::Value(v.into())
    }

    /// True for every sentinel; a consumer reading one of these treats the
    /// input as missing.
    pub fn is_missing_input(&self) -> bool {
        !matches!(self, CacheEntry::Value(_))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            CacheEntry::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    /// Approximate payload size; `None` for sentinels.
    pub fn estimate_size(&self) -> Option<usize> {
        self.as_value().map(estimate_json_bytes)
    }
}

impl From<Value> for CacheEntry {
    fn from(v: Value) -> Self {
        CacheEntry::Value(v)
    }
}

impl fmt::Display for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEntry::Value(Value::String(s)) => write!(f, "{}", s),
            CacheEntry::Value(v) => write!(f, "{}", v),
            CacheEntry::MissingMarketData => write!(f, "N/A (missing data)"),
            CacheEntry::NotCalculated(NotCalculatedReason::EvaluationError) => {
                write!(f, "N/A (error)")
            }
            CacheEntry::NotCalculated(NotCalculatedReason::Suppressed) => {
                write!(f, "N/A (suppressed)")
            }
        }
    }
}

pub fn estimate_json_bytes(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) => s.len(),
        Value::Number(_) | Value::Bool(_) => 8,
        Value::Array(items) => items.iter().map(estimate_json_bytes).sum(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| k.len() + estimate_json_bytes(v))
            .sum(),
    }
}
