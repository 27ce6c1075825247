//! Market data collaborators: the snapshot a cycle seeds its caches from,
//! and the override operations applied to values on the way in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use xcalc_types::ValueRequirement;

use crate::error::ConfigError;

/// Point-in-time market data.
#[async_trait]
pub trait MarketDataSnapshot: Send + Sync {
    fn snapshot_time(&self) -> DateTime<Utc>;

    /// Values for the requirements the snapshot can satisfy; the rest are
    /// absent from the map.
    async fn query(&self, requirements: &[ValueRequirement]) -> HashMap<ValueRequirement, Value>;
}

/// Snapshot over a map, mutable between cycles.
#[derive(Debug)]
pub struct InMemoryMarketDataSnapshot {
    snapshot_time: DateTime<Utc>,
    values: DashMap<ValueRequirement, Value>,
}

impl InMemoryMarketDataSnapshot {
    pub fn new(snapshot_time: DateTime<Utc>) -> Self {
        Self {
            snapshot_time,
            values: DashMap::new(),
        }
    }

    pub fn with(self, requirement: ValueRequirement, value: Value) -> Self {
        self.set(requirement, value);
        self
    }

    pub fn set(&self, requirement: ValueRequirement, value: Value) {
        self.values.insert(requirement, value);
    }

    pub fn remove(&self, requirement: &ValueRequirement) {
        self.values.remove(requirement);
    }
}

#[async_trait]
impl MarketDataSnapshot for InMemoryMarketDataSnapshot {
    fn snapshot_time(&self) -> DateTime<Utc> {
        self.snapshot_time
    }

    async fn query(&self, requirements: &[ValueRequirement]) -> HashMap<ValueRequirement, Value> {
        requirements
            .iter()
            .filter_map(|req| self.values.get(req).map(|v| (req.clone(), v.clone())))
            .collect()
    }
}

/// Pure transformation applied to a market data value before it is written
/// to a calc-config's cache.
pub trait OverrideOperation: Send + Sync {
    fn apply(&self, requirement: &ValueRequirement, value: &Value) -> Value;
}

impl<F> OverrideOperation for F
where
    F: Fn(&ValueRequirement, &Value) -> Value + Send + Sync,
{
    fn apply(&self, requirement: &ValueRequirement, value: &Value) -> Value {
        self(requirement, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ShiftOp {
    Multiply,
    Add,
    Subtract,
    Divide,
}

/// Arithmetic shift of numeric market data, compiled from expressions like
/// `"* 1.01"`, `"+ 0.5"`, `"- 0.5"` or `"/ 2"`. Non-numeric values pass
/// through unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketDataShift {
    op: ShiftOp,
    amount: f64,
}

impl MarketDataShift {
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let trimmed = expr.trim();
        let mut chars = trimmed.chars();
        let op = match chars.next() {
            Some('*') => ShiftOp::Multiply,
            Some('+') => ShiftOp::Add,
            Some('-') => ShiftOp::Subtract,
            Some('/') => ShiftOp::Divide,
            _ => return Err(ConfigError::InvalidShift(expr.to_string())),
        };
        let amount: f64 = chars
            .as_str()
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidShift(expr.to_string()))?;
        if op == ShiftOp::Divide && amount == 0.0 {
            return Err(ConfigError::InvalidShift(expr.to_string()));
        }
        Ok(Self { op, amount })
    }

    pub fn shift(&self, x: f64) -> f64 {
        match self.op {
            ShiftOp::Multiply => x * self.amount,
            ShiftOp::Add => x + self.amount,
            ShiftOp::Subtract => x - self.amount,
            ShiftOp::Divide => x / self.amount,
        }
    }
}

impl OverrideOperation for MarketDataShift {
    fn apply(&self, _requirement: &ValueRequirement, value: &Value) -> Value {
        match value.as_f64() {
            Some(x) => serde_json::Number::from_f64(self.shift(x))
                .map(Value::Number)
                .unwrap_or_else(|| value.clone()),
            None => value.clone(),
        }
    }
}

impl fmt::Display for MarketDataShift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            ShiftOp::Multiply => '*',
            ShiftOp::Add => '+',
            ShiftOp::Subtract => '-',
            ShiftOp::Divide => '/',
        };
        write!(f, "{} {}", op, self.amount)
    }
}
