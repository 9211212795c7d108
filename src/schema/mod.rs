//! Shared schema-element cache.
//!
//! One `SchemaCache` fronts a graph instance for all transactions. It maps
//! element names to schema ids and (schema id, system relation, direction)
//! triples to serialized relation lists, retrieving through a
//! [`SchemaSource`] on miss. Each map is two-tiered: a lock-free primary
//! map for the hot path, and a bounded sharded LRU fallback the map
//! permanently degrades to once the primary outgrows its configured bound.
//! Degradation is an operational signal, not an error; it caps worst-case
//! memory when a deployment creates pathological numbers of distinct
//! schema elements.

mod key;

use std::borrow::Borrow;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tracing::{trace, warn};

pub use key::RelationKey;

use crate::config::CacheConfig;
use crate::types::{Direction, RelationList, Result, SchemaId, SystemRelation};

/// Authoritative read access to schema data in the underlying store.
///
/// Implementations must read the store on every call (no caching inside
/// the source) and are invoked with no cache-internal lock held, so a slow
/// backend fetch never stalls concurrent cache hits.
pub trait SchemaSource: Send + Sync {
    /// Resolves a schema element's id by name, `None` if no such element.
    fn schema_by_name(&self, name: &str) -> Result<Option<SchemaId>>;

    /// Reads the relation list of a schema vertex. Never null; an empty
    /// list means the element has no relations of that category yet.
    fn schema_relations(
        &self,
        id: SchemaId,
        relation: SystemRelation,
        direction: Direction,
    ) -> Result<RelationList>;
}

// A shared source handle is itself a source, so one store can back
// several caches without a wrapper type.
impl<S: SchemaSource + ?Sized> SchemaSource for Arc<S> {
    fn schema_by_name(&self, name: &str) -> Result<Option<SchemaId>> {
        (**self).schema_by_name(name)
    }

    fn schema_relations(
        &self,
        id: SchemaId,
        relation: SystemRelation,
        direction: Direction,
    ) -> Result<RelationList> {
        (**self).schema_relations(id, relation, direction)
    }
}

/// Lookup counters, mirrored into snapshots for observability.
#[derive(Default)]
pub struct SchemaMetrics {
    name_hits: AtomicU64,
    name_misses: AtomicU64,
    relation_hits: AtomicU64,
    relation_misses: AtomicU64,
    expirations: AtomicU64,
}

/// Point-in-time copy of [`SchemaMetrics`].
#[derive(Copy, Clone, Debug, Default)]
pub struct SchemaMetricsSnapshot {
    /// Name lookups answered from either tier.
    pub name_hits: u64,
    /// Name lookups that invoked the source.
    pub name_misses: u64,
    /// Relation lookups answered from either tier.
    pub relation_hits: u64,
    /// Relation lookups that invoked the source.
    pub relation_misses: u64,
    /// Calls to `expire_schema_element`.
    pub expirations: u64,
}

impl SchemaMetrics {
    /// Copies the counters.
    pub fn snapshot(&self) -> SchemaMetricsSnapshot {
        SchemaMetricsSnapshot {
            name_hits: self.name_hits.load(Ordering::Relaxed),
            name_misses: self.name_misses.load(Ordering::Relaxed),
            relation_hits: self.relation_hits.load(Ordering::Relaxed),
            relation_misses: self.relation_misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl SchemaMetricsSnapshot {
    /// Fraction of name lookups served without touching the source.
    pub fn name_hit_rate(&self) -> f64 {
        let total = self.name_hits + self.name_misses;
        if total == 0 {
            return 0.0;
        }
        self.name_hits as f64 / total as f64
    }
}

/// Bounded, sharded LRU used once a primary tier has been disabled.
struct FallbackCache<K: Hash + Eq, V> {
    shards: Vec<Mutex<LruCache<K, V>>>,
}

impl<K: Hash + Eq, V: Clone> FallbackCache<K, V> {
    fn new(shards: usize, capacity: usize) -> Self {
        let shard_count = shards.max(1);
        let per_shard_cap = (capacity / shard_count).max(1);
        let mut shard_vec = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shard_vec.push(Mutex::new(LruCache::new(
                NonZeroUsize::new(per_shard_cap).expect("per-shard capacity is at least one"),
            )));
        }
        Self { shards: shard_vec }
    }

    fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.shard_for(key).lock();
        guard.get(key).cloned()
    }

    fn insert(&self, key: K, value: V) {
        let mut guard = self.shard_for(&key).lock();
        guard.put(key, value);
    }

    fn purge(&self, pred: impl Fn(&K, &V) -> bool)
    where
        K: Clone,
    {
        for shard in &self.shards {
            let mut guard = shard.lock();
            let doomed: Vec<K> = guard
                .iter()
                .filter(|(k, v)| pred(k, v))
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                guard.pop(&key);
            }
        }
    }

    fn shard_for<Q>(&self, key: &Q) -> &Mutex<LruCache<K, V>>
    where
        Q: Hash + ?Sized,
    {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }
}

/// One two-tier map: lock-free primary until it outgrows `limit`, then a
/// one-way transition onto the bounded fallback for the rest of its life.
struct TwoTier<K: Hash + Eq, V> {
    primary: RwLock<Option<DashMap<K, V>>>,
    fallback: FallbackCache<K, V>,
    limit: usize,
    label: &'static str,
}

impl<K: Hash + Eq + Clone, V: Clone> TwoTier<K, V> {
    fn new(limit: usize, shards: usize, label: &'static str) -> Self {
        Self {
            primary: RwLock::new(Some(DashMap::new())),
            fallback: FallbackCache::new(shards, CacheConfig::fallback_capacity(limit)),
            limit,
            label,
        }
    }

    fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        {
            let guard = self.primary.read();
            if let Some(map) = &*guard {
                return map.get(key).map(|entry| entry.value().clone());
            }
        }
        self.fallback.get(key)
    }

    fn insert(&self, key: K, value: V) {
        {
            let guard = self.primary.read();
            if let Some(map) = &*guard {
                map.insert(key.clone(), value.clone());
                if map.len() <= self.limit {
                    return;
                }
                drop(guard);
                self.degrade();
                // The tripping entry went down with the primary map;
                // retry it so the value that caused the transition is
                // still served from the fallback.
            }
        }
        self.fallback.insert(key, value);
    }

    /// Disables the primary map permanently. Entries it held are dropped
    /// and re-retrieved on demand; the fallback would evict most of them
    /// anyway.
    fn degrade(&self) {
        let mut guard = self.primary.write();
        if let Some(map) = guard.take() {
            warn!(
                tier = self.label,
                size = map.len(),
                limit = self.limit,
                "schema.tier.degraded"
            );
        }
    }

    fn remove_where(&self, pred: impl Fn(&K, &V) -> bool) {
        {
            let guard = self.primary.read();
            if let Some(map) = &*guard {
                map.retain(|k, v| !pred(k, v));
            }
        }
        self.fallback.purge(pred);
    }

    fn is_degraded(&self) -> bool {
        self.primary.read().is_none()
    }
}

/// Two-tier cache of schema-element names and relation lists.
pub struct SchemaCache<S> {
    source: S,
    names: TwoTier<String, SchemaId>,
    relations: TwoTier<u64, RelationList>,
    metrics: Arc<SchemaMetrics>,
}

impl<S: SchemaSource> SchemaCache<S> {
    /// Creates a cache over `source` with the bounds in `config`.
    pub fn new(source: S, config: &CacheConfig) -> Self {
        Self {
            source,
            names: TwoTier::new(config.max_cached_types, config.fallback_shards, "names"),
            relations: TwoTier::new(
                config.max_cached_relations,
                config.fallback_shards,
                "relations",
            ),
            metrics: Arc::new(SchemaMetrics::default()),
        }
    }

    /// Resolves a schema element's id by name.
    ///
    /// A hit never touches the source. On miss the source is consulted
    /// and only existing elements are cached: a `None` result is returned
    /// but not remembered, so concurrent schema creation is re-checked on
    /// every lookup rather than shadowed by a cached false negative.
    pub fn schema_id(&self, name: &str) -> Result<Option<SchemaId>> {
        if let Some(id) = self.names.get(name) {
            SchemaMetrics::inc(&self.metrics.name_hits);
            trace!(name, id = %id, "schema.name.hit");
            return Ok(Some(id));
        }
        SchemaMetrics::inc(&self.metrics.name_misses);
        let resolved = self.source.schema_by_name(name)?;
        match resolved {
            Some(id) => {
                self.names.insert(name.to_owned(), id);
                trace!(name, id = %id, "schema.name.load");
            }
            None => trace!(name, "schema.name.unknown"),
        }
        Ok(resolved)
    }

    /// Reads the relation list of a schema vertex for one category and
    /// direction. Never null; may be empty. Empty lists are returned but
    /// not cached, forcing re-retrieval until the element's relations
    /// exist.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a well-formed schema id; that is an internal
    /// invariant violation of the caller, not bad input.
    pub fn schema_relations(
        &self,
        id: SchemaId,
        relation: SystemRelation,
        direction: Direction,
    ) -> Result<RelationList> {
        let key = RelationKey::new(id, relation, direction);
        if let Some(list) = self.relations.get(&key.raw()) {
            SchemaMetrics::inc(&self.metrics.relation_hits);
            trace!(id = %id, ?relation, ?direction, "schema.relations.hit");
            return Ok(list);
        }
        SchemaMetrics::inc(&self.metrics.relation_misses);
        let list = self.source.schema_relations(id, relation, direction)?;
        if list.is_empty() {
            trace!(id = %id, ?relation, ?direction, "schema.relations.empty_uncached");
        } else {
            self.relations.insert(key.raw(), list.clone());
            trace!(
                id = %id,
                ?relation,
                ?direction,
                entries = list.len(),
                "schema.relations.load"
            );
        }
        Ok(list)
    }

    /// Drops every cached trace of a schema element after it was altered:
    /// its block of eight relation keys and any name entry resolving to
    /// it, from both tiers of both maps. Idempotent, and safe to call
    /// concurrently with lookups; an in-flight retrieval that began before
    /// the expire may re-cache the prior state, which a later expire or
    /// miss converges.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a well-formed schema id.
    pub fn expire_schema_element(&self, id: SchemaId) {
        assert!(id.is_schema_id(), "expiry requires a schema id, got {id}");
        self.relations
            .remove_where(|raw, _| RelationKey::from_raw(*raw).covers(id));
        self.names.remove_where(|_, cached| *cached == id);
        SchemaMetrics::inc(&self.metrics.expirations);
        trace!(id = %id, "schema.expire");
    }

    /// Whether the name map has fallen back to its bounded tier.
    pub fn names_degraded(&self) -> bool {
        self.names.is_degraded()
    }

    /// Whether the relation map has fallen back to its bounded tier.
    pub fn relations_degraded(&self) -> bool {
        self.relations.is_degraded()
    }

    /// Copies the lookup counters.
    pub fn metrics_snapshot(&self) -> SchemaMetricsSnapshot {
        self.metrics.snapshot()
    }
}
