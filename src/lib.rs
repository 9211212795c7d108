//! Bounded caching core for a graph storage engine.
//!
//! Two caches sit in front of the byte-keyed store: a [`schema::SchemaCache`]
//! shared by every transaction against a graph, and a per-transaction
//! [`vertex::VertexCache`] backed by the concurrent [`lru::LruEngine`].
//! Both retrieve through injected source traits on miss and are invalidated
//! explicitly by the owning transaction lifecycle, never by a timer.

#![forbid(unsafe_code)]

pub mod config;
pub mod lru;
pub mod schema;
pub mod types;
pub mod vertex;

pub use config::CacheConfig;
pub use types::{CacheError, Result};
