//! Request classification.
//!
//! A pure function of the URL: the same URL always maps to the same route,
//! and every same-origin URL maps to exactly one. Predicates run in a fixed
//! priority order — API prefix, then documents, then assets, then
//! navigation — so a URL matching both an asset extension and generic
//! navigation resolves to the asset route.

use url::Url;

use crate::config::RouteConfig;

/// Handling strategy for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Cross-origin: not intercepted, goes straight to the network
  PassThrough,
  /// Network-first with offline queueing for mutations
  Api,
  /// Cache-first, placeholder document on total failure
  Document,
  /// Cache-first, placeholder image on total failure
  Asset,
  /// Network-first, offline shell on total failure
  Navigation,
}

/// Classify a request URL against the configured origin and route rules.
pub fn classify(url: &Url, origin: &Url, routes: &RouteConfig) -> Route {
  if url.origin() != origin.origin() {
    return Route::PassThrough;
  }

  let path = url.path();

  if path.starts_with(&routes.api_prefix) {
    return Route::Api;
  }

  let extension = path_extension(path);

  if routes.document_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    || matches_extension(&extension, &routes.document_extensions)
  {
    return Route::Document;
  }

  if routes.asset_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    || matches_extension(&extension, &routes.asset_extensions)
  {
    return Route::Asset;
  }

  Route::Navigation
}

/// Lowercased extension of the final path segment, if any.
fn path_extension(path: &str) -> Option<String> {
  let segment = path.rsplit('/').next()?;
  let (_, ext) = segment.rsplit_once('.')?;
  if ext.is_empty() {
    None
  } else {
    Some(ext.to_lowercase())
  }
}

fn matches_extension(extension: &Option<String>, allowed: &[String]) -> bool {
  match extension {
    Some(ext) => allowed.iter().any(|a| a == ext),
    None => false,
  }
}
