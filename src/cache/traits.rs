//! Storage seam for cache partitions.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::net::ResponseSnapshot;

/// A cached response plus storage metadata.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// The stored response
  pub response: ResponseSnapshot,
  /// URL the response was stored under (for display; lookups go by key)
  pub url: String,
  /// When the response was cached
  pub cached_at: DateTime<Utc>,
}

/// Trait for partition storage backends.
///
/// Writes are last-write-wins per (partition, key); a lookup miss is `None`,
/// never an error. Concurrent same-key writers race benignly — per-statement
/// atomicity is the only guarantee.
pub trait PartitionStore: Send + Sync {
  /// Create a partition if it does not exist. Idempotent.
  fn create_partition(&self, name: &str) -> Result<()>;

  /// Store a response under (partition, key), replacing any prior entry.
  fn put(&self, partition: &str, key: &str, url: &str, response: &ResponseSnapshot)
    -> Result<()>;

  /// Look up a stored response by key within one partition.
  fn lookup(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// All partition names, in creation order.
  fn list_partitions(&self) -> Result<Vec<String>>;

  /// Drop a partition and all of its entries.
  fn delete_partition(&self, name: &str) -> Result<()>;

  /// Number of entries in a partition.
  fn count_entries(&self, partition: &str) -> Result<u64>;
}
