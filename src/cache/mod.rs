//! Versioned, partitioned response cache.
//!
//! Responses are stored in named partitions (shell, assets, api, documents),
//! each prefixed with the active deployment tag. Bumping the tag orphans
//! every partition from the previous generation; `purge_stale` removes them
//! on activation.

mod manager;
mod store;
mod traits;

pub use manager::{CacheConfig, CacheManager, Purpose};
pub use store::SqliteStore;
pub use traits::{CachedResponse, PartitionStore};
