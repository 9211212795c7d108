//! Identifiers, relation categories, and error types shared by the caches.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// Number of low bits of a [`SchemaId`] reserved for the element-category tag.
pub const SCHEMA_ID_TAG_BITS: u32 = 3;

const TAG_PROPERTY_KEY: u64 = 1;
const TAG_EDGE_LABEL: u64 = 2;
const TAG_VERTEX_LABEL: u64 = 3;

/// Identifier of a schema element (property key, edge label, vertex label).
///
/// The low [`SCHEMA_ID_TAG_BITS`] bits carry the element-category tag; the
/// remaining bits are the element's counter value. A well-formed schema id
/// has a schema-category tag and a non-zero counter.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SchemaId(pub u64);

impl SchemaId {
    /// Builds a property-key id from a raw counter value.
    pub fn property_key(counter: u64) -> Self {
        SchemaId(counter << SCHEMA_ID_TAG_BITS | TAG_PROPERTY_KEY)
    }

    /// Builds an edge-label id from a raw counter value.
    pub fn edge_label(counter: u64) -> Self {
        SchemaId(counter << SCHEMA_ID_TAG_BITS | TAG_EDGE_LABEL)
    }

    /// Builds a vertex-label id from a raw counter value.
    pub fn vertex_label(counter: u64) -> Self {
        SchemaId(counter << SCHEMA_ID_TAG_BITS | TAG_VERTEX_LABEL)
    }

    /// The id with its category tag bits stripped.
    pub fn stripped(self) -> u64 {
        self.0 >> SCHEMA_ID_TAG_BITS
    }

    fn tag(self) -> u64 {
        self.0 & ((1 << SCHEMA_ID_TAG_BITS) - 1)
    }

    /// Whether this id denotes a schema element, as opposed to ordinary
    /// graph data. Relation-cache operations require this to hold.
    pub fn is_schema_id(self) -> bool {
        matches!(
            self.tag(),
            TAG_PROPERTY_KEY | TAG_EDGE_LABEL | TAG_VERTEX_LABEL
        ) && self.stripped() != 0
    }
}

/// Identifier of a vertex held in the vertex cache.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct VertexId(pub u64);

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four system relation categories a schema vertex's own metadata
/// edges fall into. Relation-cache keys encode the fixed code of each
/// variant; no other relation category is representable.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[repr(u8)]
pub enum SystemRelation {
    /// Edge tying a schema vertex to its definition records.
    DefinitionEdge = 0,
    /// Edge carrying the element's name.
    Name = 1,
    /// Edge carrying the element's category.
    Category = 2,
    /// Property edges holding definition attributes.
    DefinitionProperty = 3,
}

impl SystemRelation {
    /// All four categories, in code order.
    pub const ALL: [SystemRelation; 4] = [
        SystemRelation::DefinitionEdge,
        SystemRelation::Name,
        SystemRelation::Category,
        SystemRelation::DefinitionProperty,
    ];

    /// Fixed integer code used in composite cache keys.
    pub fn code(self) -> u64 {
        self as u64
    }
}

/// Direction of a relation relative to the schema vertex.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[repr(u8)]
pub enum Direction {
    /// Outgoing relation.
    Out = 0,
    /// Incoming relation.
    In = 1,
}

impl Direction {
    /// Both directions, in bit order.
    pub const BOTH: [Direction; 2] = [Direction::Out, Direction::In];

    /// Single-bit code used in composite cache keys.
    pub fn bit(self) -> u64 {
        self as u64
    }
}

/// Opaque serialized relation entries associated with one schema vertex.
///
/// Never null; may be empty (empty lists are returned to callers but never
/// cached). The `Arc` lets both cache tiers share one allocation.
pub type RelationList = Arc<[Bytes]>;

/// Errors surfaced by cache operations.
///
/// The caches themselves do not fail; every variant originates in a
/// retrieval callback or a caller contract violation.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The backing store could not serve a retrieval call. The cache is
    /// left unpopulated for the key, so the next lookup retries.
    #[error("backend read failed: {0}")]
    Backend(String),
    /// A caller contract violation that is recoverable for the caller.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;
