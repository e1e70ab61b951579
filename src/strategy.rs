//! Strategy handlers: how each class of request is served.
//!
//! Four fixed policies compose the cache manager, the outbox, and the live
//! network. Transport failures are handled inside each strategy — every
//! same-origin request resolves to a response (possibly degraded), never to
//! a propagated network error.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::cache::{CacheManager, PartitionStore, Purpose};
use crate::config::RouteConfig;
use crate::net::{Fetch, RequestSnapshot, ResponseSnapshot};
use crate::outbox::Outbox;
use crate::router::{classify, Route};
use crate::sync::SyncRegistration;

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
  /// Live network response
  Network,
  /// Cached copy (possibly stale; staleness is the availability tradeoff)
  Cache,
  /// Synthesized fallback (offline shell, placeholder, offline error)
  Fallback,
  /// Mutation accepted into the outbox for later replay
  Queued,
  /// Cross-origin request, not intercepted
  PassThrough,
}

impl ServeSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      ServeSource::Network => "network",
      ServeSource::Cache => "cache",
      ServeSource::Fallback => "fallback",
      ServeSource::Queued => "queued",
      ServeSource::PassThrough => "pass-through",
    }
  }
}

/// A response plus the source it was served from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: ResponseSnapshot,
  pub source: ServeSource,
}

impl Served {
  fn network(response: ResponseSnapshot) -> Self {
    Self {
      response,
      source: ServeSource::Network,
    }
  }

  fn cache(response: ResponseSnapshot) -> Self {
    Self {
      response,
      source: ServeSource::Cache,
    }
  }

  fn fallback(response: ResponseSnapshot) -> Self {
    Self {
      response,
      source: ServeSource::Fallback,
    }
  }
}

/// Synthesized offline response bodies.
///
/// This is a contract surface: callers branch on the `status` tag to tell
/// "queued for later" apart from a hard failure.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OfflineBody {
  /// Mutation accepted into the outbox; it will replay when the network
  /// comes back
  Queued {
    message: String,
    replay_key: String,
    queued_at: DateTime<Utc>,
  },
  /// Read that could not be served: offline and no cached copy
  Offline { message: String },
}

/// Offline shell page served when navigation has no network and no cache.
const OFFLINE_SHELL_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
<style>
  body { font-family: system-ui, sans-serif; display: flex; align-items: center;
         justify-content: center; min-height: 100vh; margin: 0; background: #f5f5f4; }
  main { text-align: center; max-width: 28rem; padding: 2rem; }
  h1 { font-size: 1.25rem; color: #292524; }
  p { color: #57534e; }
</style>
</head>
<body>
<main>
  <h1>You&rsquo;re offline</h1>
  <p>This page isn&rsquo;t cached yet. Previously opened projects, drawings and
  documents are still available, and changes you make will sync when you&rsquo;re
  back on the network.</p>
</main>
</body>
</html>
"#;

/// Placeholder served for image assets with no network and no cache.
const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="160" height="120" viewBox="0 0 160 120">
  <rect width="160" height="120" fill="#e7e5e4"/>
  <path d="M50 80l20-24 14 16 10-12 16 20z" fill="#a8a29e"/>
  <circle cx="58" cy="44" r="8" fill="#a8a29e"/>
  <text x="80" y="108" text-anchor="middle" font-family="sans-serif" font-size="10" fill="#78716c">offline</text>
</svg>
"##;

/// Placeholder document served when a drawing or file is requested offline.
const PLACEHOLDER_DOCUMENT_HTML: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>Document unavailable offline</title></head>
<body>
<h1>Document unavailable offline</h1>
<p>This document hasn&rsquo;t been opened on this device yet. Reconnect to
download it; documents you&rsquo;ve viewed before stay available offline.</p>
</body>
</html>
"#;

/// Accept-header fragments identifying document types we placeholder for.
const DOCUMENT_ACCEPT_TYPES: &[&str] = &[
  "application/pdf",
  "image/vnd.dwg",
  "image/vnd.dxf",
  "application/acad",
  "application/msword",
  "application/vnd.openxmlformats",
  "application/vnd.ms-excel",
];

/// Routes requests through the strategy handlers.
pub struct Coordinator<S: PartitionStore, N: Fetch> {
  cache: CacheManager<S>,
  outbox: Arc<Outbox>,
  sync: SyncRegistration,
  backend: N,
  origin: Url,
  routes: RouteConfig,
}

impl<S: PartitionStore, N: Fetch> Coordinator<S, N> {
  pub fn new(
    cache: CacheManager<S>,
    outbox: Arc<Outbox>,
    sync: SyncRegistration,
    backend: N,
    origin: Url,
    routes: RouteConfig,
  ) -> Self {
    Self {
      cache,
      outbox,
      sync,
      backend,
      origin,
      routes,
    }
  }

  /// Resolve one intercepted request.
  ///
  /// Same-origin requests always resolve to `Ok` — transport failures turn
  /// into cached copies, queued acknowledgements, or placeholders inside the
  /// strategy. Cross-origin requests are not intercepted, so their transport
  /// errors propagate to the caller as-is.
  pub async fn handle(&self, request: &RequestSnapshot) -> Result<Served> {
    match classify(&request.url, &self.origin, &self.routes) {
      Route::PassThrough => {
        let response = self.backend.send(request).await?;
        Ok(Served {
          response,
          source: ServeSource::PassThrough,
        })
      }
      Route::Api => self.handle_api(request).await,
      Route::Document => self.cache_first(request, Purpose::Documents).await,
      Route::Asset => self.cache_first(request, Purpose::Assets).await,
      Route::Navigation => self.handle_navigation(request).await,
    }
  }

  /// API strategy: network-first, outbox for failed mutations.
  async fn handle_api(&self, request: &RequestSnapshot) -> Result<Served> {
    match self.backend.send(request).await {
      Ok(response) => {
        if request.is_read() && response.is_success() {
          self.cache.put(Purpose::Api, request, &response)?;
        }
        Ok(Served::network(response))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "api fetch failed, going offline path");

        if let Some(cached) = self.cache.lookup_in(&[Purpose::Api], request)? {
          return Ok(Served::cache(cached.response));
        }

        if request.is_mutation() {
          let entry = self.outbox.enqueue(request)?;
          self.sync.register_pending_changes();

          let body = OfflineBody::Queued {
            message: "Saved offline; this change will sync when you reconnect".to_string(),
            replay_key: entry.replay_key,
            queued_at: entry.enqueued_at,
          };
          return Ok(Served {
            response: ResponseSnapshot::json(202, &body)?,
            source: ServeSource::Queued,
          });
        }

        let body = OfflineBody::Offline {
          message: "Offline and no cached copy of this resource".to_string(),
        };
        Ok(Served::fallback(ResponseSnapshot::json(503, &body)?))
      }
    }
  }

  /// Document and asset strategy: cache-first, placeholder on total failure.
  async fn cache_first(&self, request: &RequestSnapshot, purpose: Purpose) -> Result<Served> {
    if let Some(cached) = self.cache.lookup_in(&[purpose], request)? {
      return Ok(Served::cache(cached.response));
    }

    match self.backend.send(request).await {
      Ok(response) => {
        if request.is_read() && response.is_success() {
          self.cache.put(purpose, request, &response)?;
        }
        Ok(Served::network(response))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "cache-first fetch failed, serving placeholder");
        let response = match purpose {
          Purpose::Documents => document_fallback(request),
          _ => asset_fallback(request),
        };
        Ok(Served::fallback(response))
      }
    }
  }

  /// Navigation strategy: network-first, cache, then the offline shell.
  /// Always resolves to something renderable.
  async fn handle_navigation(&self, request: &RequestSnapshot) -> Result<Served> {
    match self.backend.send(request).await {
      Ok(response) => {
        if request.is_read() && response.is_success() {
          self.cache.put(Purpose::Shell, request, &response)?;
        }
        Ok(Served::network(response))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "navigation fetch failed, falling back");

        if let Some(cached) = self.cache.lookup_in(&[Purpose::Shell], request)? {
          return Ok(Served::cache(cached.response));
        }

        Ok(Served::fallback(ResponseSnapshot::text(
          200,
          "text/html; charset=utf-8",
          OFFLINE_SHELL_HTML,
        )))
      }
    }
  }
}

fn document_fallback(request: &RequestSnapshot) -> ResponseSnapshot {
  let accept = request.header("accept").unwrap_or("");
  if DOCUMENT_ACCEPT_TYPES.iter().any(|t| accept.contains(t)) {
    ResponseSnapshot::text(200, "text/html; charset=utf-8", PLACEHOLDER_DOCUMENT_HTML)
  } else {
    ResponseSnapshot::text(503, "text/plain", "Document unavailable offline")
  }
}

fn asset_fallback(request: &RequestSnapshot) -> ResponseSnapshot {
  let accept = request.header("accept").unwrap_or("");
  let is_image = accept.contains("image/") || has_image_extension(&request.url);
  if is_image {
    ResponseSnapshot::text(200, "image/svg+xml", PLACEHOLDER_SVG)
  } else {
    ResponseSnapshot::text(503, "text/plain", "Asset unavailable offline")
  }
}

fn has_image_extension(url: &Url) -> bool {
  let path = url.path().to_lowercase();
  ["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"]
    .iter()
    .any(|ext| path.ends_with(&format!(".{}", ext)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheConfig, SqliteStore};
  use async_trait::async_trait;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex as StdMutex;

  /// Scriptable network: canned responses by path, plus an offline switch.
  struct FakeNet {
    responses: StdMutex<HashMap<String, ResponseSnapshot>>,
    offline: AtomicBool,
    calls: AtomicUsize,
  }

  impl FakeNet {
    fn new() -> Self {
      Self {
        responses: StdMutex::new(HashMap::new()),
        offline: AtomicBool::new(false),
        calls: AtomicUsize::new(0),
      }
    }

    fn respond(&self, path: &str, response: ResponseSnapshot) {
      self.responses.lock().unwrap().insert(path.to_string(), response);
    }

    fn go_offline(&self) {
      self.offline.store(true, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Fetch for FakeNet {
    async fn send(&self, request: &RequestSnapshot) -> Result<ResponseSnapshot> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.offline.load(Ordering::SeqCst) {
        return Err(color_eyre::eyre::eyre!("network unreachable"));
      }
      let responses = self.responses.lock().unwrap();
      Ok(
        responses
          .get(request.url.path())
          .cloned()
          .unwrap_or_else(|| ResponseSnapshot::text(200, "text/plain", "ok")),
      )
    }
  }

  struct Fixture {
    coordinator: Coordinator<SqliteStore, Arc<FakeNet>>,
    net: Arc<FakeNet>,
    outbox: Arc<Outbox>,
    sync: SyncRegistration,
  }

  fn fixture() -> Fixture {
    let cache = CacheManager::new(
      SqliteStore::open_in_memory().unwrap(),
      CacheConfig {
        version_tag: "v1".to_string(),
      },
    );
    let outbox = Arc::new(Outbox::open_in_memory().unwrap());
    let sync = SyncRegistration::new();
    let net = Arc::new(FakeNet::new());
    let coordinator = Coordinator::new(
      cache,
      Arc::clone(&outbox),
      sync.clone(),
      Arc::clone(&net),
      Url::parse("https://app.example.com").unwrap(),
      RouteConfig::default(),
    );

    Fixture {
      coordinator,
      net,
      outbox,
      sync,
    }
  }

  fn get(path: &str) -> RequestSnapshot {
    RequestSnapshot::get(Url::parse("https://app.example.com").unwrap().join(path).unwrap())
  }

  fn post(path: &str, body: &str) -> RequestSnapshot {
    RequestSnapshot::new(
      "POST",
      Url::parse("https://app.example.com").unwrap().join(path).unwrap(),
    )
    .with_body(body)
  }

  #[tokio::test]
  async fn test_cross_origin_not_intercepted() {
    let f = fixture();
    let request = RequestSnapshot::get(Url::parse("https://cdn.other.com/lib.js").unwrap());

    let served = f.coordinator.handle(&request).await.unwrap();

    assert_eq!(served.source, ServeSource::PassThrough);
    // No cache partition was touched
    assert!(f.coordinator.cache.partition_counts().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_api_network_first_refreshes_cache() {
    let f = fixture();
    f.net.respond(
      "/api/projects",
      ResponseSnapshot::text(200, "application/json", r#"[{"id":1}]"#),
    );

    let served = f.coordinator.handle(&get("/api/projects")).await.unwrap();
    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.body_text(), r#"[{"id":1}]"#);

    // Now offline: the cached copy from the successful GET is served verbatim
    f.net.go_offline();
    let served = f.coordinator.handle(&get("/api/projects")).await.unwrap();
    assert_eq!(served.source, ServeSource::Cache);
    assert_eq!(served.response.body_text(), r#"[{"id":1}]"#);
  }

  #[tokio::test]
  async fn test_api_prefers_live_over_stale_cache() {
    let f = fixture();
    f.net.respond(
      "/api/projects",
      ResponseSnapshot::text(200, "application/json", "old"),
    );
    f.coordinator.handle(&get("/api/projects")).await.unwrap();

    f.net.respond(
      "/api/projects",
      ResponseSnapshot::text(200, "application/json", "new"),
    );
    let served = f.coordinator.handle(&get("/api/projects")).await.unwrap();

    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.body_text(), "new");

    // And the cache now holds the refreshed copy
    f.net.go_offline();
    let served = f.coordinator.handle(&get("/api/projects")).await.unwrap();
    assert_eq!(served.response.body_text(), "new");
  }

  #[tokio::test]
  async fn test_api_offline_read_without_cache_is_offline_error() {
    let f = fixture();
    f.net.go_offline();

    let served = f.coordinator.handle(&get("/api/projects")).await.unwrap();

    assert_eq!(served.source, ServeSource::Fallback);
    assert_eq!(served.response.status, 503);
    let body: OfflineBody = serde_json::from_slice(&served.response.body).unwrap();
    assert!(matches!(body, OfflineBody::Offline { .. }));
  }

  #[tokio::test]
  async fn test_api_offline_mutation_is_queued_not_failed() {
    let f = fixture();
    f.net.go_offline();

    let served = f
      .coordinator
      .handle(&post("/api/tasks", r#"{"name":"inspect forms"}"#))
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::Queued);
    assert_eq!(served.response.status, 202);
    let body: OfflineBody = serde_json::from_slice(&served.response.body).unwrap();
    assert!(matches!(body, OfflineBody::Queued { .. }));

    // Exactly one entry landed in the outbox, and sync was registered
    assert_eq!(f.outbox.pending_count().unwrap(), 1);
    assert!(f.sync.is_registered());
  }

  #[tokio::test]
  async fn test_document_cache_first_skips_network_when_warm() {
    let f = fixture();
    f.net.respond(
      "/drawings/site-plan.pdf",
      ResponseSnapshot::text(200, "application/pdf", "pdf-bytes"),
    );

    // Cold: fetches and caches
    f.coordinator
      .handle(&get("/drawings/site-plan.pdf"))
      .await
      .unwrap();
    assert_eq!(f.net.calls(), 1);

    // Warm: served from cache with no network fetch at all
    let served = f
      .coordinator
      .handle(&get("/drawings/site-plan.pdf"))
      .await
      .unwrap();
    assert_eq!(served.source, ServeSource::Cache);
    assert_eq!(served.response.body_text(), "pdf-bytes");
    assert_eq!(f.net.calls(), 1);
  }

  #[tokio::test]
  async fn test_document_offline_placeholder_by_accept_type() {
    let f = fixture();
    f.net.go_offline();

    let request = get("/drawings/site-plan.pdf").with_header("accept", "application/pdf");
    let served = f.coordinator.handle(&request).await.unwrap();
    assert_eq!(served.source, ServeSource::Fallback);
    assert_eq!(served.response.status, 200);
    assert!(served.response.body_text().contains("unavailable offline"));

    let request = get("/documents/notes.docx").with_header("accept", "text/csv");
    let served = f.coordinator.handle(&request).await.unwrap();
    assert_eq!(served.response.status, 503);
    assert_eq!(served.response.content_type(), Some("text/plain"));
  }

  #[tokio::test]
  async fn test_asset_offline_image_gets_placeholder() {
    let f = fixture();
    f.net.go_offline();

    let served = f.coordinator.handle(&get("/logo.png")).await.unwrap();
    assert_eq!(served.source, ServeSource::Fallback);
    assert_eq!(served.response.content_type(), Some("image/svg+xml"));

    let served = f.coordinator.handle(&get("/static/app.js")).await.unwrap();
    assert_eq!(served.response.status, 503);
  }

  #[tokio::test]
  async fn test_navigation_always_resolves() {
    let f = fixture();
    f.net.respond(
      "/tasks/42",
      ResponseSnapshot::text(200, "text/html", "<html>task</html>"),
    );

    // Online: live page, cached into the shell partition
    let served = f.coordinator.handle(&get("/tasks/42")).await.unwrap();
    assert_eq!(served.source, ServeSource::Network);

    // Offline with cache: cached page
    f.net.go_offline();
    let served = f.coordinator.handle(&get("/tasks/42")).await.unwrap();
    assert_eq!(served.source, ServeSource::Cache);
    assert_eq!(served.response.body_text(), "<html>task</html>");

    // Offline without cache: the built-in shell, never an error
    let served = f.coordinator.handle(&get("/projects/7/board")).await.unwrap();
    assert_eq!(served.source, ServeSource::Fallback);
    assert_eq!(served.response.status, 200);
    assert!(served.response.body_text().contains("offline"));
  }

  #[tokio::test]
  async fn test_api_error_response_is_returned_unmodified_and_uncached() {
    let f = fixture();
    f.net
      .respond("/api/projects", ResponseSnapshot::text(500, "text/plain", "boom"));

    let served = f.coordinator.handle(&get("/api/projects")).await.unwrap();
    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.status, 500);

    // The 500 was not written through; offline now yields the offline error
    f.net.go_offline();
    let served = f.coordinator.handle(&get("/api/projects")).await.unwrap();
    assert_eq!(served.response.status, 503);
  }
}
