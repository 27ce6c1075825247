use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::entry::CacheEntry;

/// Kind of object a value is computed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComputationTargetType {
    PortfolioNode,
    Position,
    Trade,
    Security,
    Primitive,
}

impl ComputationTargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputationTargetType::PortfolioNode => "PORTFOLIO_NODE",
            ComputationTargetType::Position => "POSITION",
            ComputationTargetType::Trade => "TRADE",
            ComputationTargetType::Security => "SECURITY",
            ComputationTargetType::Primitive => "PRIMITIVE",
        }
    }
}

/// Scheme-qualified identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UniqueId {
    pub scheme: String,
    pub value: String,
}

impl UniqueId {
    pub fn of(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.scheme, self.value)
    }
}

/// Reference to a computation target, resolved into a real target by a
/// target resolver on the calculation node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComputationTargetSpecification {
    pub target_type: ComputationTargetType,
    pub identifier: UniqueId,
}

impl ComputationTargetSpecification {
    pub fn new(target_type: ComputationTargetType, identifier: UniqueId) -> Self {
        Self {
            target_type,
            identifier,
        }
    }

    pub fn primitive(scheme: &str, value: &str) -> Self {
        Self::new(ComputationTargetType::Primitive, UniqueId::of(scheme, value))
    }

    pub fn security(scheme: &str, value: &str) -> Self {
        Self::new(ComputationTargetType::Security, UniqueId::of(scheme, value))
    }

    pub fn position(scheme: &str, value: &str) -> Self {
        Self::new(ComputationTargetType::Position, UniqueId::of(scheme, value))
    }
}

impl fmt::Display for ComputationTargetSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.target_type.as_str(), self.identifier)
    }
}

/// Ordered property bag. Ordering keeps specifications hashable and gives
/// stable text for cache dumps.
pub type ValueProperties = BTreeMap<String, String>;

/// Resolved identity of one computable output: a named value on a target
/// with a fixed set of properties. Used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueSpecification {
    pub value_name: String,
    pub target: ComputationTargetSpecification,
    #[serde(default)]
    pub properties: ValueProperties,
}

impl ValueSpecification {
    pub fn new(value_name: impl Into<String>, target: ComputationTargetSpecification) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            properties: ValueProperties::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(|s| s.as_str())
    }

    /// The fully-constrained requirement this specification satisfies.
    pub fn to_requirement(&self) -> ValueRequirement {
        ValueRequirement {
            value_name: self.value_name.clone(),
            target: self.target.clone(),
            constraints: self.properties.clone(),
        }
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VSpec[{}, {}", self.value_name, self.target)?;
        if !self.properties.is_empty() {
            let props = self
                .properties
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            write!(f, ", {{{}}}", props)?;
        }
        write!(f, "]")
    }
}

/// Request for a named value on a target. Properties not listed in
/// `constraints` are wildcards.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueRequirement {
    pub value_name: String,
    pub target: ComputationTargetSpecification,
    #[serde(default)]
    pub constraints: BTreeMap<String, String>,
}

impl ValueRequirement {
    pub fn new(value_name: impl Into<String>, target: ComputationTargetSpecification) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            constraints: BTreeMap::new(),
        }
    }

    pub fn with_constraint(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.insert(name.into(), value.into());
        self
    }

    pub fn is_satisfied_by(&self, spec: &ValueSpecification) -> bool {
        self.value_name == spec.value_name
            && self.target == spec.target
            && self
                .constraints
                .iter()
                .all(|(k, v)| spec.properties.get(k) == Some(v))
    }
}

impl fmt::Display for ValueRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VReq[{}, {}]", self.value_name, self.target)
    }
}

/// A value specification paired with its cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedValue {
    pub specification: ValueSpecification,
    pub value: CacheEntry,
}

impl ComputedValue {
    pub fn new(specification: ValueSpecification, value: CacheEntry) -> Self {
        Self {
            specification,
            value,
        }
    }

    pub fn of(specification: ValueSpecification, value: serde_json::Value) -> Self {
        Self::new(specification, CacheEntry::Value(value))
    }
}
