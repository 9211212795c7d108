//! Composite keys for the relation cache.
//!
//! A key concatenates, arithmetically rather than by bit-packing the full
//! id, the tag-stripped schema id, the system-relation code, and the
//! direction bit: `stripped * 8 + code * 2 + bit`. Each schema element
//! therefore owns a contiguous block of exactly eight keys, which is what
//! makes prefix matching during expiry a single integer division.

use crate::types::{Direction, SchemaId, SystemRelation};

/// Keys per schema element: four relation categories times two directions.
const KEY_STRIDE: u64 = 8;

/// Composite key of one (schema id, relation category, direction) triple.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct RelationKey(u64);

impl RelationKey {
    /// Builds the key for a triple.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not a well-formed schema id; passing ordinary
    /// graph data here is an internal logic error, not bad input.
    pub fn new(id: SchemaId, relation: SystemRelation, direction: Direction) -> Self {
        assert!(
            id.is_schema_id(),
            "relation cache key requires a schema id, got {id}"
        );
        RelationKey(id.stripped() * KEY_STRIDE + relation.code() * 2 + direction.bit())
    }

    /// Rebuilds a key from its raw map representation.
    pub fn from_raw(raw: u64) -> Self {
        RelationKey(raw)
    }

    /// Raw representation used as the relation-map key.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Whether this key belongs to `id`'s block of eight keys.
    pub fn covers(self, id: SchemaId) -> bool {
        self.0 / KEY_STRIDE == id.stripped()
    }
}
