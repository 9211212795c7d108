//! End-to-end tests of the shared schema cache against an in-memory
//! source that counts every store round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use tenebra::config::CacheConfig;
use tenebra::schema::{SchemaCache, SchemaSource};
use tenebra::types::{CacheError, Direction, RelationList, Result, SchemaId, SystemRelation};

#[derive(Default)]
struct MemorySource {
    names: Mutex<HashMap<String, SchemaId>>,
    relations: Mutex<HashMap<(SchemaId, SystemRelation, Direction), RelationList>>,
    name_calls: AtomicUsize,
    relation_calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySource {
    fn define(&self, name: &str, id: SchemaId) {
        self.names.lock().insert(name.to_owned(), id);
        // Every category/direction of a defined element gets one entry so
        // cache fills are non-empty by default.
        let mut relations = self.relations.lock();
        for relation in SystemRelation::ALL {
            for direction in Direction::BOTH {
                relations.insert(
                    (id, relation, direction),
                    Arc::from(vec![Bytes::from(format!("{id}:{relation:?}:{direction:?}"))]),
                );
            }
        }
    }

    fn name_calls(&self) -> usize {
        self.name_calls.load(Ordering::Relaxed)
    }

    fn relation_calls(&self) -> usize {
        self.relation_calls.load(Ordering::Relaxed)
    }
}

impl SchemaSource for MemorySource {
    fn schema_by_name(&self, name: &str) -> Result<Option<SchemaId>> {
        self.name_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.load(Ordering::Relaxed) {
            return Err(CacheError::Backend("store unavailable".into()));
        }
        Ok(self.names.lock().get(name).copied())
    }

    fn schema_relations(
        &self,
        id: SchemaId,
        relation: SystemRelation,
        direction: Direction,
    ) -> Result<RelationList> {
        self.relation_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.load(Ordering::Relaxed) {
            return Err(CacheError::Backend("store unavailable".into()));
        }
        Ok(self
            .relations
            .lock()
            .get(&(id, relation, direction))
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::<Bytes>::new())))
    }
}

fn cache_over(source: &Arc<MemorySource>, config: &CacheConfig) -> SchemaCache<Arc<MemorySource>> {
    SchemaCache::new(Arc::clone(source), config)
}

#[test]
fn name_hits_skip_the_source() -> Result<()> {
    let source = Arc::new(MemorySource::default());
    source.define("person", SchemaId::vertex_label(1));
    let cache = cache_over(&source, &CacheConfig::default());

    assert_eq!(cache.schema_id("person")?, Some(SchemaId::vertex_label(1)));
    assert_eq!(cache.schema_id("person")?, Some(SchemaId::vertex_label(1)));
    assert_eq!(source.name_calls(), 1);

    let metrics = cache.metrics_snapshot();
    assert_eq!(metrics.name_hits, 1);
    assert_eq!(metrics.name_misses, 1);
    Ok(())
}

#[test]
fn unknown_names_are_never_cached() -> Result<()> {
    let source = Arc::new(MemorySource::default());
    let cache = cache_over(&source, &CacheConfig::default());

    assert_eq!(cache.schema_id("ghost")?, None);
    assert_eq!(cache.schema_id("ghost")?, None);
    // Both lookups must reach the source so a concurrently created
    // element becomes visible on the next call.
    assert_eq!(source.name_calls(), 2);

    source.define("ghost", SchemaId::property_key(3));
    assert_eq!(cache.schema_id("ghost")?, Some(SchemaId::property_key(3)));
    Ok(())
}

#[test]
fn relation_hits_return_the_same_instance() -> Result<()> {
    let source = Arc::new(MemorySource::default());
    let id = SchemaId::edge_label(4);
    source.define("knows", id);
    let cache = cache_over(&source, &CacheConfig::default());

    let first = cache.schema_relations(id, SystemRelation::Name, Direction::Out)?;
    let second = cache.schema_relations(id, SystemRelation::Name, Direction::Out)?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(source.relation_calls(), 1);
    Ok(())
}

#[test]
fn empty_relation_lists_are_returned_but_not_cached() -> Result<()> {
    let source = Arc::new(MemorySource::default());
    let cache = cache_over(&source, &CacheConfig::default());
    let id = SchemaId::property_key(9);

    // Nothing defined for the id: the source answers with empty lists.
    let list = cache.schema_relations(id, SystemRelation::Category, Direction::In)?;
    assert!(list.is_empty());
    let again = cache.schema_relations(id, SystemRelation::Category, Direction::In)?;
    assert!(again.is_empty());
    assert_eq!(source.relation_calls(), 2);

    // Once the element exists the next miss caches the real list.
    source.define("weight", id);
    let loaded = cache.schema_relations(id, SystemRelation::Category, Direction::In)?;
    assert_eq!(loaded.len(), 1);
    assert_eq!(source.relation_calls(), 3);
    cache.schema_relations(id, SystemRelation::Category, Direction::In)?;
    assert_eq!(source.relation_calls(), 3);
    Ok(())
}

#[test]
fn expire_drops_all_eight_relation_entries_and_the_name() -> Result<()> {
    let source = Arc::new(MemorySource::default());
    let id = SchemaId::edge_label(7);
    source.define("follows", id);
    let other = SchemaId::edge_label(8);
    source.define("likes", other);
    let cache = cache_over(&source, &CacheConfig::default());

    for relation in SystemRelation::ALL {
        for direction in Direction::BOTH {
            cache.schema_relations(id, relation, direction)?;
            cache.schema_relations(other, relation, direction)?;
        }
    }
    cache.schema_id("follows")?;
    cache.schema_id("likes")?;
    let primed = source.relation_calls();
    assert_eq!(primed, 16);

    cache.expire_schema_element(id);

    // Every entry of the expired element misses again; the neighbour's
    // block is untouched.
    for relation in SystemRelation::ALL {
        for direction in Direction::BOTH {
            cache.schema_relations(id, relation, direction)?;
            cache.schema_relations(other, relation, direction)?;
        }
    }
    assert_eq!(source.relation_calls(), primed + 8);

    assert_eq!(cache.schema_id("likes")?, Some(other));
    cache.schema_id("follows")?;
    assert_eq!(source.name_calls(), 3);
    assert_eq!(cache.metrics_snapshot().expirations, 1);
    Ok(())
}

#[test]
fn name_map_degrades_past_its_bound_and_keeps_serving() -> Result<()> {
    let source = Arc::new(MemorySource::default());
    for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
        source.define(name, SchemaId::vertex_label(i as u64 + 1));
    }
    let config = CacheConfig {
        max_cached_types: 2,
        ..CacheConfig::default()
    };
    let cache = cache_over(&source, &config);

    cache.schema_id("a")?;
    cache.schema_id("b")?;
    assert!(!cache.names_degraded());

    // Third distinct name trips the bound; the primary tier is gone for
    // good and its contents with it.
    cache.schema_id("c")?;
    assert!(cache.names_degraded());

    let calls = source.name_calls();
    assert_eq!(cache.schema_id("a")?, Some(SchemaId::vertex_label(1)));
    assert_eq!(source.name_calls(), calls + 1);

    // The fallback still caches: the refetched entry now hits.
    assert_eq!(cache.schema_id("a")?, Some(SchemaId::vertex_label(1)));
    assert_eq!(source.name_calls(), calls + 1);
    assert!(cache.names_degraded());
    assert!(!cache.relations_degraded());
    Ok(())
}

#[test]
fn tripping_insert_survives_into_the_fallback() -> Result<()> {
    let source = Arc::new(MemorySource::default());
    for (i, name) in ["a", "b", "c"].iter().enumerate() {
        source.define(name, SchemaId::vertex_label(i as u64 + 1));
    }
    let config = CacheConfig {
        max_cached_types: 2,
        ..CacheConfig::default()
    };
    let cache = cache_over(&source, &config);

    cache.schema_id("a")?;
    cache.schema_id("b")?;
    cache.schema_id("c")?;
    assert!(cache.names_degraded());

    // The entry that forced the transition was re-inserted into the
    // fallback, so repeating its lookup never reaches the source.
    assert_eq!(cache.schema_id("c")?, Some(SchemaId::vertex_label(3)));
    assert_eq!(source.name_calls(), 3);
    Ok(())
}

#[test]
fn expire_is_idempotent() -> Result<()> {
    let source = Arc::new(MemorySource::default());
    let id = SchemaId::edge_label(7);
    source.define("follows", id);
    let cache = cache_over(&source, &CacheConfig::default());

    cache.schema_id("follows")?;
    for relation in SystemRelation::ALL {
        for direction in Direction::BOTH {
            cache.schema_relations(id, relation, direction)?;
        }
    }
    assert_eq!(source.relation_calls(), 8);

    // A second expire on an already-expired element must leave the
    // cache in exactly the state the first one did.
    cache.expire_schema_element(id);
    cache.expire_schema_element(id);

    for relation in SystemRelation::ALL {
        for direction in Direction::BOTH {
            cache.schema_relations(id, relation, direction)?;
        }
    }
    assert_eq!(source.relation_calls(), 16);
    cache.schema_id("follows")?;
    assert_eq!(source.name_calls(), 2);

    // Re-primed entries hit again; the stale expires left no tombstones.
    for relation in SystemRelation::ALL {
        for direction in Direction::BOTH {
            cache.schema_relations(id, relation, direction)?;
        }
    }
    assert_eq!(source.relation_calls(), 16);
    assert_eq!(cache.metrics_snapshot().expirations, 2);
    Ok(())
}

#[test]
fn source_failures_propagate_and_are_not_cached() {
    let source = Arc::new(MemorySource::default());
    source.define("person", SchemaId::vertex_label(1));
    let cache = cache_over(&source, &CacheConfig::default());

    source.failing.store(true, Ordering::Relaxed);
    assert!(cache.schema_id("person").is_err());
    assert!(cache
        .schema_relations(SchemaId::vertex_label(1), SystemRelation::Name, Direction::Out)
        .is_err());

    source.failing.store(false, Ordering::Relaxed);
    assert_eq!(
        cache.schema_id("person").unwrap(),
        Some(SchemaId::vertex_label(1))
    );
}

#[test]
fn hit_rate_reflects_traffic() -> Result<()> {
    let source = Arc::new(MemorySource::default());
    source.define("person", SchemaId::vertex_label(1));
    let cache = cache_over(&source, &CacheConfig::default());

    for _ in 0..4 {
        cache.schema_id("person")?;
    }
    let metrics = cache.metrics_snapshot();
    assert_eq!(metrics.name_hits, 3);
    assert_eq!(metrics.name_misses, 1);
    assert!((metrics.name_hit_rate() - 0.75).abs() < f64::EPSILON);
    Ok(())
}
