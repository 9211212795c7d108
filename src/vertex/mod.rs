//! Per-transaction vertex cache.
//!
//! Each open transaction owns one `VertexCache`. Materialized vertices
//! live in a bounded [`LruEngine`] tier; vertices that are new or carry
//! uncommitted modifications additionally live in an unbounded volatile
//! tier so eviction can never silently drop transaction state. Both tiers
//! share `Arc` instances, which is what upholds the
//! at-most-one-instance-per-id rule: a vertex id observed twice within one
//! cache resolves to the same object for as long as the first is
//! reachable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::lru::LruEngine;
use crate::types::{Result, VertexId};

/// State a cached vertex reports to the cache.
pub trait CachedVertex: Send + Sync + 'static {
    /// Whether the vertex was created in the owning transaction.
    fn is_new(&self) -> bool;

    /// Whether the vertex has uncommitted local modifications
    /// (e.g. added relations).
    fn is_modified(&self) -> bool;

    /// New or modified: must survive eviction until the transaction ends.
    fn is_volatile(&self) -> bool {
        self.is_new() || self.is_modified()
    }
}

/// Materializes a vertex from the underlying store on cache miss.
///
/// Must raise on fetch failure and be idempotent; it is invoked with no
/// cache-internal lock held. A failure propagates to the caller uncached,
/// so the next lookup retries.
pub trait VertexLoader<V>: Send + Sync {
    /// Loads the vertex for `id` from the store.
    fn load(&self, id: VertexId) -> Result<Arc<V>>;
}

/// Lookup counters for one cache's lifetime.
#[derive(Default)]
pub struct VertexMetrics {
    engine_hits: AtomicU64,
    volatile_hits: AtomicU64,
    loads: AtomicU64,
}

/// Point-in-time copy of [`VertexMetrics`].
#[derive(Copy, Clone, Debug, Default)]
pub struct VertexMetricsSnapshot {
    /// Lookups served by the bounded tier.
    pub engine_hits: u64,
    /// Lookups served by the volatile tier.
    pub volatile_hits: u64,
    /// Lookups that invoked the loader.
    pub loads: u64,
}

impl VertexMetrics {
    fn snapshot(&self) -> VertexMetricsSnapshot {
        VertexMetricsSnapshot {
            engine_hits: self.engine_hits.load(Ordering::Relaxed),
            volatile_hits: self.volatile_hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
        }
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Bounded vertex cache with an unbounded volatile tier for dirty state.
pub struct VertexCache<V: CachedVertex> {
    engine: LruEngine<VertexId, Arc<V>>,
    volatile: Arc<DashMap<VertexId, Arc<V>>>,
    metrics: Arc<VertexMetrics>,
}

impl<V: CachedVertex> VertexCache<V> {
    /// Creates a cache whose bounded tier sweeps down to `capacity`.
    ///
    /// The engine's eviction callback checks each evictee before it
    /// drops: a vertex that is still volatile migrates into the volatile
    /// tier, preserving the live instance.
    pub fn new(capacity: usize) -> Self {
        let volatile: Arc<DashMap<VertexId, Arc<V>>> = Arc::new(DashMap::new());
        let preserve = Arc::clone(&volatile);
        let engine = LruEngine::new(
            capacity,
            Box::new(move |id: VertexId, vertex: &Arc<V>| {
                if vertex.is_volatile() {
                    preserve
                        .entry(id)
                        .or_insert_with(|| Arc::clone(vertex));
                    trace!(id = %id, "vertex.evicted.preserved");
                }
            }),
        );
        Self {
            engine,
            volatile,
            metrics: Arc::new(VertexMetrics::default()),
        }
    }

    /// Whether `id` is present in either tier.
    pub fn contains(&self, id: VertexId) -> bool {
        self.engine.contains(&id) || self.volatile.contains_key(&id)
    }

    /// Returns the vertex for `id`, materializing it through `loader` on
    /// a miss in both tiers.
    ///
    /// A volatile-tier hit re-promotes the instance into the bounded tier
    /// so hot modified vertices keep their fast path. A loaded vertex is
    /// inserted race-safely: when another caller inserted first, the
    /// freshly loaded instance is discarded and the existing one returned.
    pub fn get<L: VertexLoader<V>>(&self, id: VertexId, loader: &L) -> Result<Arc<V>> {
        if let Some(vertex) = self.engine.get(&id) {
            VertexMetrics::inc(&self.metrics.engine_hits);
            return Ok(vertex);
        }
        if let Some(entry) = self.volatile.get(&id) {
            let vertex = Arc::clone(entry.value());
            drop(entry);
            VertexMetrics::inc(&self.metrics.volatile_hits);
            return Ok(self
                .engine
                .put_if_absent(id, Arc::clone(&vertex))
                .unwrap_or(vertex));
        }
        VertexMetrics::inc(&self.metrics.loads);
        let loaded = loader.load(id)?;
        trace!(id = %id, "vertex.load");
        match self.engine.put_if_absent(id, Arc::clone(&loaded)) {
            Some(existing) => Ok(existing),
            None => Ok(loaded),
        }
    }

    /// Stores a vertex, overwriting any bounded-tier entry for `id`.
    /// Volatile vertices are additionally pinned in the volatile tier.
    pub fn add(&self, vertex: Arc<V>, id: VertexId) {
        self.engine.put(id, Arc::clone(&vertex));
        if vertex.is_volatile() {
            self.volatile.insert(id, vertex);
        }
    }

    /// Every vertex created in the owning transaction, for commit
    /// preparation. Modified-but-preexisting vertices are not included.
    pub fn new_vertices(&self) -> Vec<Arc<V>> {
        self.volatile
            .iter()
            .filter(|entry| entry.value().is_new())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Suspends or resumes recency tracking in the bounded tier; bulk
    /// loads disable it since eviction order does not matter there.
    pub fn set_alive(&self, alive: bool) {
        self.engine.set_alive(alive);
    }

    /// Runs one blocking eviction pass. Callers that need the bounded
    /// tier back at capacity before proceeding (and tests) use this as a
    /// barrier; normal operation relies on the background sweeps.
    pub fn sweep_now(&self) {
        self.engine.force_sweep();
    }

    /// Tears the cache down at transaction close: clears the volatile
    /// tier and destroys the bounded tier, stopping its sweep worker.
    /// The cache must not be used afterwards.
    pub fn close(&self) {
        self.volatile.clear();
        self.engine.destroy();
        trace!("vertex.cache.closed");
    }

    /// Copies the lookup counters.
    pub fn metrics_snapshot(&self) -> VertexMetricsSnapshot {
        self.metrics.snapshot()
    }
}
