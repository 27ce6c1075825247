//! Job-scoped cache views used by calculation nodes.
//!
//! A [`DeferredValueCache`] wraps the shared [`ValueCache`] of a calc-config
//! with a job's [`CacheSelectHint`]. Two implementations exist:
//!
//! - [`ImmediateValueCache`] writes straight through.
//! - [`WriteBehindValueCache`] queues writes on a [`WriteBehindPool`] so the
//!   node can carry on with the next item while values are stored. Reads
//!   made through the same view see queued values immediately.
//!
//! Either way the node must call
//! [`wait_for_pending_writes`](DeferredValueCache::wait_for_pending_writes)
//! before it reports a job as complete.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use xcalc_types::{CacheEntry, CacheSelectHint, ComputedValue, ValueSpecification};

use super::value_cache::ValueCache;

#[async_trait]
pub trait DeferredValueCache: Send + Sync {
    fn get_values(&self, specs: &[ValueSpecification]) -> Vec<(ValueSpecification, Option<CacheEntry>)>;

    fn put_value(&self, value: ComputedValue);

    fn put_values(&self, values: Vec<ComputedValue>);

    fn estimate_size(&self, value: &ComputedValue) -> Option<usize>;

    /// Resolves once every write made through this view is visible in the
    /// underlying cache.
    async fn wait_for_pending_writes(&self);
}

fn store(cache: &dyn ValueCache, hint: &CacheSelectHint, values: Vec<ComputedValue>) {
    let (private, shared): (Vec<_>, Vec<_>) = values
        .into_iter()
        .partition(|v| hint.is_private(&v.specification));
    if !private.is_empty() {
        cache.put_values(private);
    }
    if !shared.is_empty() {
        cache.put_shared_values(shared);
    }
}

/// Writes go straight to the underlying cache.
pub struct ImmediateValueCache {
    cache: Arc<dyn ValueCache>,
    hint: CacheSelectHint,
}

impl ImmediateValueCache {
    pub fn new(cache: Arc<dyn ValueCache>, hint: CacheSelectHint) -> Self {
        Self { cache, hint }
    }
}

#[async_trait]
impl DeferredValueCache for ImmediateValueCache {
    fn get_values(&self, specs: &[ValueSpecification]) -> Vec<(ValueSpecification, Option<CacheEntry>)> {
        self.cache.get_values_with_hint(specs, &self.hint)
    }

    fn put_value(&self, value: ComputedValue) {
        store(self.cache.as_ref(), &self.hint, vec![value]);
    }

    fn put_values(&self, values: Vec<ComputedValue>) {
        store(self.cache.as_ref(), &self.hint, values);
    }

    fn estimate_size(&self, value: &ComputedValue) -> Option<usize> {
        self.cache.estimate_size(value)
    }

    async fn wait_for_pending_writes(&self) {}
}

struct WriteRequest {
    cache: Arc<dyn ValueCache>,
    hint: CacheSelectHint,
    values: Vec<ComputedValue>,
    pending: watch::Sender<usize>,
}

impl WriteRequest {
    fn apply(self) {
        store(self.cache.as_ref(), &self.hint, self.values);
        self.pending.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Bounded pool of write workers shared by calculation nodes.
///
/// Values are routed to a worker by hashing their specification, and each
/// worker applies its queue in order, so writes to one key land in the order
/// they were submitted. Nothing is promised across keys. Must be created
/// inside a tokio runtime.
#[derive(Clone)]
pub struct WriteBehindPool {
    workers: Arc<Vec<mpsc::UnboundedSender<WriteRequest>>>,
}

impl WriteBehindPool {
    pub fn new(size: usize) -> Self {
        let workers = (0..size.max(1))
            .map(|index| {
                let (tx, mut rx) = mpsc::unbounded_channel::<WriteRequest>();
                tokio::spawn(async move {
                    while let Some(request) = rx.recv().await {
                        request.apply();
                    }
                    tracing::trace!(worker = index, "write-behind worker stopped");
                });
                tx
            })
            .collect();
        Self {
            workers: Arc::new(workers),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    fn shard(&self, spec: &ValueSpecification) -> usize {
        let mut hasher = DefaultHasher::new();
        spec.hash(&mut hasher);
        (hasher.finish() % self.workers.len() as u64) as usize
    }

    fn submit(
        &self,
        cache: &Arc<dyn ValueCache>,
        hint: &CacheSelectHint,
        values: Vec<ComputedValue>,
        pending: &watch::Sender<usize>,
    ) {
        let mut shards: Vec<Vec<ComputedValue>> = vec![Vec::new(); self.workers.len()];
        for value in values {
            let shard = self.shard(&value.specification);
            shards[shard].push(value);
        }
        for (shard, values) in shards.into_iter().enumerate() {
            if values.is_empty() {
                continue;
            }
            pending.send_modify(|count| *count += 1);
            let request = WriteRequest {
                cache: Arc::clone(cache),
                hint: hint.clone(),
                values,
                pending: pending.clone(),
            };
            if let Err(mpsc::error::SendError(request)) = self.workers[shard].send(request) {
                tracing::warn!(worker = shard, "write-behind worker gone, writing inline");
                request.apply();
            }
        }
    }
}

/// Writes are queued on a [`WriteBehindPool`].
pub struct WriteBehindValueCache {
    cache: Arc<dyn ValueCache>,
    hint: CacheSelectHint,
    pool: WriteBehindPool,
    queued: DashMap<ValueSpecification, CacheEntry>,
    pending: watch::Sender<usize>,
}

impl WriteBehindValueCache {
    pub fn new(cache: Arc<dyn ValueCache>, hint: CacheSelectHint, pool: WriteBehindPool) -> Self {
        let (pending, _) = watch::channel(0usize);
        Self {
            cache,
            hint,
            pool,
            queued: DashMap::new(),
            pending,
        }
    }

    pub fn pending_writes(&self) -> usize {
        *self.pending.borrow()
    }
}

#[async_trait]
impl DeferredValueCache for WriteBehindValueCache {
    fn get_values(&self, specs: &[ValueSpecification]) -> Vec<(ValueSpecification, Option<CacheEntry>)> {
        specs
            .iter()
            .map(|spec| {
                let entry = match self.queued.get(spec) {
                    Some(entry) => Some(entry.clone()),
                    None => self.cache.get_value_with_hint(spec, &self.hint),
                };
                (spec.clone(), entry)
            })
            .collect()
    }

    fn put_value(&self, value: ComputedValue) {
        self.put_values(vec![value]);
    }

    fn put_values(&self, values: Vec<ComputedValue>) {
        for value in &values {
            self.queued
                .insert(value.specification.clone(), value.value.clone());
        }
        self.pool
            .submit(&self.cache, &self.hint, values, &self.pending);
    }

    fn estimate_size(&self, value: &ComputedValue) -> Option<usize> {
        self.cache.estimate_size(value)
    }

    async fn wait_for_pending_writes(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}
