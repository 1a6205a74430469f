//! Named, versioned response stores for offline serving.
//!
//! This module provides:
//! - Multiple named stores (e.g. static and runtime) in one backend
//! - Whole-entry replacement keyed by request fingerprint
//! - Age-based freshness for API reads, version-based for everything else
//! - Best-effort write-through that never blocks the response path

mod entry;
mod layer;
mod policy;
mod storage;

pub use entry::CacheEntry;
pub use layer::CacheLayer;
pub use policy::FreshnessPolicy;
pub use storage::{CacheStorage, SqliteStorage};

pub(crate) use entry::truncate_millis;
pub(crate) use storage::parse_millis;
