//! Request/response snapshots and the network backend seam.
//!
//! Snapshots are plain serializable values: intercepted requests survive
//! being queued in the outbox, and stored responses survive the cache.
//! The live network sits behind the `Fetch` trait so strategy and drain
//! logic can be exercised against fakes.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use url::Url;

/// A captured HTTP request: method, URL, headers, and body text.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<String>,
}

impl RequestSnapshot {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_uppercase(),
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: &str) -> Self {
    self.body = Some(body.to_string());
    self
  }

  /// First header value with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Reads carry no body-mutation semantics; everything else is a mutation.
  pub fn is_read(&self) -> bool {
    matches!(self.method.as_str(), "GET" | "HEAD")
  }

  pub fn is_mutation(&self) -> bool {
    !self.is_read()
  }

  /// Stable fixed-length identity for cache storage, keyed by method + URL.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
  }
}

/// A captured HTTP response: status, headers, and body bytes.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  /// Build a response with a JSON body.
  pub fn json(status: u16, value: &impl Serialize) -> Result<Self> {
    let body = serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize body: {}", e))?;
    Ok(Self {
      status,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body,
    })
  }

  /// Build a response with a text body and explicit content type.
  pub fn text(status: u16, content_type: &str, body: &str) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), content_type.to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Body as UTF-8 text (lossy), for display and JSON bodies.
  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Live-network seam.
///
/// `Err` means transport failure (unreachable, reset, DNS) — the offline
/// branch. A server that answered at all, with any status, is `Ok`.
#[async_trait]
pub trait Fetch: Send + Sync {
  async fn send(&self, request: &RequestSnapshot) -> Result<ResponseSnapshot>;
}

#[async_trait]
impl<T: Fetch + ?Sized> Fetch for Arc<T> {
  async fn send(&self, request: &RequestSnapshot) -> Result<ResponseSnapshot> {
    self.as_ref().send(request).await
  }
}

/// reqwest-backed implementation of `Fetch`.
#[derive(Clone)]
pub struct HttpBackend {
  client: reqwest::Client,
}

impl HttpBackend {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offsite/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetch for HttpBackend {
  async fn send(&self, request: &RequestSnapshot) -> Result<ResponseSnapshot> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?
      .to_vec();

    Ok(ResponseSnapshot {
      status,
      headers,
      body,
    })
  }
}
