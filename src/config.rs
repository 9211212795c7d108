//! Cache sizing configuration.

/// Size thresholds derived from a configured capacity.
///
/// The tracked size of the LRU engine is allowed to drift above the
/// acceptable size between sweeps; crossing `low` schedules a background
/// sweep and crossing `high` forces one before the insert returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    /// Target size a sweep evicts down to (the configured capacity).
    pub acceptable: usize,
    /// Size above which a background sweep is scheduled.
    pub low: usize,
    /// Hard ceiling; an insert observing this blocks on a sweep.
    pub high: usize,
}

impl Watermarks {
    /// Derives the watermark set for a capacity: acceptable = capacity,
    /// low = capacity + capacity/3, high = 2 x capacity.
    pub fn for_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Watermarks {
            acceptable: capacity,
            low: capacity + capacity / 3,
            high: capacity * 2,
        }
    }
}

/// Sizing bounds for the schema and vertex caches.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Primary name-map entries before the one-way fallback transition.
    pub max_cached_types: usize,
    /// Primary relation-map entries before the one-way fallback transition.
    pub max_cached_relations: usize,
    /// Shards of each bounded fallback cache.
    pub fallback_shards: usize,
    /// Per-transaction vertex cache capacity (the acceptable sweep size).
    pub vertex_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cached_types: 10_000,
            // Each schema element contributes up to eight relation lists.
            max_cached_relations: 80_000,
            fallback_shards: 8,
            vertex_capacity: 20_000,
        }
    }
}

impl CacheConfig {
    /// Small footprint for memory-constrained deployments.
    pub fn constrained() -> Self {
        Self {
            max_cached_types: 1_000,
            max_cached_relations: 8_000,
            fallback_shards: 4,
            vertex_capacity: 2_000,
        }
    }

    /// Sizing for bulk-load transactions that touch many vertices once.
    pub fn bulk_load() -> Self {
        Self {
            vertex_capacity: 100_000,
            ..Self::default()
        }
    }

    /// Capacity of one bounded fallback cache. Half the primary bound:
    /// the fallback only holds the hot subset once the primary is gone.
    pub fn fallback_capacity(limit: usize) -> usize {
        (limit / 2).max(1)
    }
}
