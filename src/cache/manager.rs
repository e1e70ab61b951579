//! Partition naming, generational cleanup, and install-time precaching.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::net::{Fetch, RequestSnapshot, ResponseSnapshot};

use super::traits::{CachedResponse, PartitionStore};

/// What a partition holds. Exactly four per generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
  Shell,
  Assets,
  Api,
  Documents,
}

impl Purpose {
  pub fn as_str(&self) -> &'static str {
    match self {
      Purpose::Shell => "shell",
      Purpose::Assets => "assets",
      Purpose::Api => "api",
      Purpose::Documents => "documents",
    }
  }
}

/// Explicit cache configuration; the version tag comes from the deploy
/// process via `Config::version_tag`, never from a module-level constant.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  pub version_tag: String,
}

/// Owns partition naming and lifecycle on top of a storage backend.
pub struct CacheManager<S: PartitionStore> {
  store: Arc<S>,
  config: CacheConfig,
}

impl<S: PartitionStore> CacheManager<S> {
  pub fn new(store: S, config: CacheConfig) -> Self {
    Self {
      store: Arc::new(store),
      config,
    }
  }

  /// Partition name for a purpose under the active generation.
  pub fn partition_name(&self, purpose: Purpose) -> String {
    format!("{}-{}", self.config.version_tag, purpose.as_str())
  }

  /// Create the partition for a purpose if absent. Idempotent.
  pub fn open_partition(&self, purpose: Purpose) -> Result<String> {
    let name = self.partition_name(purpose);
    self.store.create_partition(&name)?;
    Ok(name)
  }

  /// Write-through a response under the request's identity.
  /// Overwrites are last-write-wins; no error on replace.
  pub fn put(
    &self,
    purpose: Purpose,
    request: &RequestSnapshot,
    response: &ResponseSnapshot,
  ) -> Result<()> {
    let partition = self.open_partition(purpose)?;
    self
      .store
      .put(&partition, &request.cache_key(), request.url.as_str(), response)
  }

  /// Look up a cached response, searching partitions in the caller's order.
  pub fn lookup_in(
    &self,
    purposes: &[Purpose],
    request: &RequestSnapshot,
  ) -> Result<Option<CachedResponse>> {
    let key = request.cache_key();
    for purpose in purposes {
      let partition = self.partition_name(*purpose);
      if let Some(cached) = self.store.lookup(&partition, &key)? {
        return Ok(Some(cached));
      }
    }
    Ok(None)
  }

  /// Delete every partition from a previous generation.
  ///
  /// Best-effort: a partition that fails to delete is logged and skipped so
  /// its siblings still get purged. Idempotent.
  pub fn purge_stale(&self) -> Result<Vec<String>> {
    let prefix = format!("{}-", self.config.version_tag);
    let mut purged = Vec::new();

    for name in self.store.list_partitions()? {
      if name.starts_with(&prefix) {
        continue;
      }
      match self.store.delete_partition(&name) {
        Ok(()) => {
          info!(partition = %name, "purged stale cache partition");
          purged.push(name);
        }
        Err(e) => {
          warn!(partition = %name, error = %e, "failed to purge stale partition");
        }
      }
    }

    Ok(purged)
  }

  /// Install-time shell caching: fetch every manifest URL and store the lot.
  ///
  /// All-or-nothing: any single fetch failure (transport or non-2xx) aborts
  /// the install before anything is written. An incomplete shell is worse
  /// than no update.
  pub async fn precache<N: Fetch>(
    &self,
    backend: &N,
    origin: &Url,
    manifest: &[String],
  ) -> Result<usize> {
    let fetches = manifest.iter().map(|path| {
      let url = origin.join(path);
      async move {
        let url = url.map_err(|e| eyre!("Invalid manifest path '{}': {}", path, e))?;
        let request = RequestSnapshot::get(url);
        let response = backend.send(&request).await?;
        if !response.is_success() {
          return Err(eyre!(
            "Manifest fetch for {} returned status {}",
            request.url,
            response.status
          ));
        }
        Ok::<_, color_eyre::eyre::Report>((request, response))
      }
    });

    let fetched = try_join_all(fetches).await?;

    for (request, response) in &fetched {
      self.put(Purpose::Shell, request, response)?;
    }
    info!(count = fetched.len(), "precached app shell");

    Ok(fetched.len())
  }

  /// Partition names with entry counts, for status reporting.
  pub fn partition_counts(&self) -> Result<Vec<(String, u64)>> {
    let mut counts = Vec::new();
    for name in self.store.list_partitions()? {
      let count = self.store.count_entries(&name)?;
      counts.push((name, count));
    }
    Ok(counts)
  }
}

impl<S: PartitionStore> Clone for CacheManager<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      config: self.config.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::net::ResponseSnapshot;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn manager(tag: &str) -> CacheManager<SqliteStore> {
    CacheManager::new(
      SqliteStore::open_in_memory().unwrap(),
      CacheConfig {
        version_tag: tag.to_string(),
      },
    )
  }

  fn request(url: &str) -> RequestSnapshot {
    RequestSnapshot::get(Url::parse(url).unwrap())
  }

  struct FakeBackend {
    calls: AtomicUsize,
    fail_path: Option<String>,
  }

  impl FakeBackend {
    fn new() -> Self {
      Self {
        calls: AtomicUsize::new(0),
        fail_path: None,
      }
    }

    fn failing_on(path: &str) -> Self {
      Self {
        calls: AtomicUsize::new(0),
        fail_path: Some(path.to_string()),
      }
    }
  }

  #[async_trait]
  impl Fetch for FakeBackend {
    async fn send(&self, request: &RequestSnapshot) -> Result<ResponseSnapshot> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if let Some(fail) = &self.fail_path {
        if request.url.path() == fail {
          return Err(eyre!("connection refused"));
        }
      }
      Ok(ResponseSnapshot::text(200, "text/html", "<html></html>"))
    }
  }

  #[test]
  fn test_partition_names_are_version_prefixed() {
    let manager = manager("v2");
    assert_eq!(manager.partition_name(Purpose::Api), "v2-api");
    assert_eq!(manager.partition_name(Purpose::Shell), "v2-shell");
  }

  #[test]
  fn test_lookup_respects_search_order() {
    let manager = manager("v1");
    let req = request("https://app.example.com/thing");

    let shell_copy = ResponseSnapshot::text(200, "text/html", "shell");
    let asset_copy = ResponseSnapshot::text(200, "text/html", "asset");
    manager.put(Purpose::Shell, &req, &shell_copy).unwrap();
    manager.put(Purpose::Assets, &req, &asset_copy).unwrap();

    let hit = manager
      .lookup_in(&[Purpose::Assets, Purpose::Shell], &req)
      .unwrap()
      .unwrap();
    assert_eq!(hit.response.body_text(), "asset");

    let hit = manager
      .lookup_in(&[Purpose::Shell, Purpose::Assets], &req)
      .unwrap()
      .unwrap();
    assert_eq!(hit.response.body_text(), "shell");
  }

  #[test]
  fn test_purge_stale_removes_only_old_generations() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.create_partition("v1-api").unwrap();
    store.create_partition("v1-shell").unwrap();
    store.create_partition("v2-api").unwrap();

    let manager = CacheManager::new(store, CacheConfig {
      version_tag: "v2".to_string(),
    });

    let purged = manager.purge_stale().unwrap();
    assert_eq!(purged.len(), 2);
    assert_eq!(manager.partition_counts().unwrap().len(), 1);

    // Idempotent: a second purge with no intervening writes is a no-op
    let purged = manager.purge_stale().unwrap();
    assert!(purged.is_empty());
    assert_eq!(manager.partition_counts().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_precache_stores_whole_manifest() {
    let manager = manager("v1");
    let backend = FakeBackend::new();
    let origin = Url::parse("https://app.example.com").unwrap();
    let manifest = vec!["/".to_string(), "/offline.html".to_string()];

    let count = manager
      .precache(&backend, &origin, &manifest)
      .await
      .unwrap();

    assert_eq!(count, 2);
    let shell = manager
      .lookup_in(&[Purpose::Shell], &request("https://app.example.com/offline.html"))
      .unwrap();
    assert!(shell.is_some());
  }

  #[tokio::test]
  async fn test_precache_is_all_or_nothing() {
    let manager = manager("v1");
    let backend = FakeBackend::failing_on("/offline.html");
    let origin = Url::parse("https://app.example.com").unwrap();
    let manifest = vec!["/".to_string(), "/offline.html".to_string()];

    let result = manager.precache(&backend, &origin, &manifest).await;

    assert!(result.is_err());
    // The batch failed, so nothing from it is visible in the shell partition
    let shell = manager
      .lookup_in(&[Purpose::Shell], &request("https://app.example.com/"))
      .unwrap();
    assert!(shell.is_none());
  }
}
