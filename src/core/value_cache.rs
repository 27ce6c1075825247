//! Value caches.
//!
//! One [`ValueCache`] exists per (cycle id, calc-config). It maps a
//! [`ValueSpecification`] to a [`CacheEntry`]; a missing key means the value
//! was never computed. Values are split into a *shared* store (market data,
//! values other jobs will read) and a *private* store (values only the
//! producing job's node needs). Reads without a hint look in both.

use dashmap::DashMap;
use std::sync::Arc;

use xcalc_types::{CacheEntry, CacheSelectHint, ComputedValue, ValueSpecification};

/// Key/value store for one cycle and calc-config.
///
/// Every method takes `&self`; implementations must allow concurrent
/// readers and writers. Writes through this trait are immediate: a `get`
/// after a `put` returns the written entry.
pub trait ValueCache: Send + Sync {
    fn get_value(&self, spec: &ValueSpecification) -> Option<CacheEntry>;

    fn get_value_with_hint(
        &self,
        spec: &ValueSpecification,
        hint: &CacheSelectHint,
    ) -> Option<CacheEntry>;

    fn put_value(&self, value: ComputedValue);

    fn put_shared_value(&self, value: ComputedValue);

    fn get_values(&self, specs: &[ValueSpecification]) -> Vec<(ValueSpecification, Option<CacheEntry>)> {
        specs
            .iter()
            .map(|spec| (spec.clone(), self.get_value(spec)))
            .collect()
    }

    fn get_values_with_hint(
        &self,
        specs: &[ValueSpecification],
        hint: &CacheSelectHint,
    ) -> Vec<(ValueSpecification, Option<CacheEntry>)> {
        specs
            .iter()
            .map(|spec| (spec.clone(), self.get_value_with_hint(spec, hint)))
            .collect()
    }

    fn put_values(&self, values: Vec<ComputedValue>) {
        for value in values {
            self.put_value(value);
        }
    }

    fn put_shared_values(&self, values: Vec<ComputedValue>) {
        for value in values {
            self.put_shared_value(value);
        }
    }

    /// Approximate size in bytes of a value, `None` if unknown.
    fn estimate_size(&self, value: &ComputedValue) -> Option<usize> {
        value.value.estimate_size()
    }
}

/// Process-local [`ValueCache`] backed by two concurrent maps.
#[derive(Debug, Default)]
pub struct InMemoryValueCache {
    shared: DashMap<ValueSpecification, CacheEntry>,
    private: DashMap<ValueSpecification, CacheEntry>,
}

impl InMemoryValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.shared.len() + self.private.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.private.is_empty()
    }

    pub fn estimate_total_bytes(&self) -> usize {
        self.shared
            .iter()
            .chain(self.private.iter())
            .map(|e| e.value().estimate_size().unwrap_or(0))
            .sum()
    }
}

impl ValueCache for InMemoryValueCache {
    fn get_value(&self, spec: &ValueSpecification) -> Option<CacheEntry> {
        if let Some(entry) = self.private.get(spec) {
            return Some(entry.clone());
        }
        self.shared.get(spec).map(|e| e.clone())
    }

    fn get_value_with_hint(
        &self,
        spec: &ValueSpecification,
        hint: &CacheSelectHint,
    ) -> Option<CacheEntry> {
        let store = if hint.is_private(spec) {
            &self.private
        } else {
            &self.shared
        };
        store.get(spec).map(|e| e.clone())
    }

    fn put_value(&self, value: ComputedValue) {
        self.private.insert(value.specification, value.value);
    }

    fn put_shared_value(&self, value: ComputedValue) {
        self.shared.insert(value.specification, value.value);
    }
}

/// Hands out the cache for a (cycle id, calc-config) and frees every cache
/// of a cycle when the cycle is released.
pub trait ValueCacheSource: Send + Sync {
    /// Returns the cache, creating it on first use.
    fn get_cache(&self, cycle_id: &str, calc_config: &str) -> Arc<dyn ValueCache>;

    fn release_caches(&self, cycle_id: &str);
}

/// [`ValueCacheSource`] handing out [`InMemoryValueCache`]s.
#[derive(Debug, Default)]
pub struct InMemoryValueCacheSource {
    caches: DashMap<(String, String), Arc<InMemoryValueCache>>,
}

impl InMemoryValueCacheSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live caches across all cycles.
    pub fn cache_count(&self) -> usize {
        self.caches.len()
    }

    pub fn has_caches_for(&self, cycle_id: &str) -> bool {
        self.caches.iter().any(|e| e.key().0 == cycle_id)
    }
}

impl ValueCacheSource for InMemoryValueCacheSource {
    fn get_cache(&self, cycle_id: &str, calc_config: &str) -> Arc<dyn ValueCache> {
        let cache = self
            .caches
            .entry((cycle_id.to_string(), calc_config.to_string()))
            .or_default()
            .clone();
        cache
    }

    fn release_caches(&self, cycle_id: &str) {
        self.caches.retain(|(cycle, _), _| cycle != cycle_id);
    }
}
