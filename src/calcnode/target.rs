use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use xcalc_types::{ComputationTargetSpecification, ComputationTargetType};

/// A resolved computation target: the specification plus whatever the
/// resolver knows about the object (security terms, position quantity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationTarget {
    pub specification: ComputationTargetSpecification,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: Value,
}

impl ComputationTarget {
    pub fn new(specification: ComputationTargetSpecification) -> Self {
        Self {
            specification,
            name: None,
            attributes: Value::Null,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// Turns a target specification into a target; `None` when unknown.
pub trait ComputationTargetResolver: Send + Sync {
    fn resolve(&self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget>;
}

/// Resolver over registered targets.
///
/// Unregistered specifications resolve to a bare target carrying just the
/// specification. A [`strict`](Self::strict) resolver only does that for
/// primitive targets and treats every other unregistered one as unknown.
#[derive(Debug, Default)]
pub struct InMemoryTargetResolver {
    targets: DashMap<ComputationTargetSpecification, ComputationTarget>,
    strict: bool,
}

impl InMemoryTargetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    pub fn register(&self, target: ComputationTarget) {
        self.targets.insert(target.specification.clone(), target);
    }

    pub fn with(self, target: ComputationTarget) -> Self {
        self.register(target);
        self
    }
}

impl ComputationTargetResolver for InMemoryTargetResolver {
    fn resolve(&self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget> {
        if let Some(target) = self.targets.get(specification) {
            return Some(target.clone());
        }
        if self.strict && specification.target_type != ComputationTargetType::Primitive {
            return None;
        }
        Some(ComputationTarget::new(specification.clone()))
    }
}
