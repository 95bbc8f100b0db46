//! Caching for Lumen: the generation-aware artifact cache and the bounded,
//! single-flight parse-tree cache.
//!
//! Both caches are in-memory performance layers, not sources of truth. Their
//! invalidation contracts are what the indexer's correctness argument rests
//! on, so every deviation from "drop and recompute" is documented at the
//! method level.

mod artifact_cache;
mod error;
mod fingerprint;
mod tree_cache;

pub use artifact_cache::*;
pub use error::*;
pub use fingerprint::*;
pub use tree_cache::*;
