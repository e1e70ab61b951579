//! Push payloads and notification routing.
//!
//! Payloads are parsed defensively at the boundary: an absent payload is a
//! no-op, a malformed one is a typed error, and every field is optional
//! with a default. Click routing reuses an open client window for the
//! target URL instead of opening a duplicate.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

/// Raw push payload schema. All fields optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub url: Option<String>,
  #[serde(default)]
  pub actions: Vec<PushAction>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PushAction {
  pub action: String,
  pub title: String,
}

/// Parse a push payload.
///
/// Absent or blank input is `Ok(None)` — push events without data are
/// ignored, not errors. Malformed JSON is an error the caller logs.
pub fn parse_push_payload(raw: Option<&str>) -> Result<Option<PushPayload>> {
  let raw = match raw {
    Some(r) if !r.trim().is_empty() => r,
    _ => return Ok(None),
  };

  let payload: PushPayload =
    serde_json::from_str(raw).map_err(|e| eyre!("Malformed push payload: {}", e))?;

  Ok(Some(payload))
}

/// A displayable notification, fully defaulted.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibration: Vec<u32>,
  pub actions: Vec<PushAction>,
  pub data: NotificationData,
}

/// Data carried on the notification for click handling.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationData {
  pub url: String,
  pub timestamp: DateTime<Utc>,
}

impl Notification {
  pub fn from_payload(payload: PushPayload, now: DateTime<Utc>) -> Self {
    Self {
      title: payload.title.unwrap_or_else(|| "Site update".to_string()),
      body: payload
        .body
        .unwrap_or_else(|| "Something changed on one of your projects".to_string()),
      icon: "/icons/icon-192.png".to_string(),
      badge: "/icons/badge-72.png".to_string(),
      vibration: vec![100, 50, 100],
      actions: payload.actions,
      data: NotificationData {
        url: payload.url.unwrap_or_else(|| "/".to_string()),
        timestamp: now,
      },
    }
  }
}

/// An open client window.
#[derive(Debug, Clone)]
pub struct ClientWindow {
  pub id: u64,
  pub url: String,
}

/// The windowing surface notifications route into.
pub trait ClientSurface {
  fn windows(&self) -> Vec<ClientWindow>;
  fn focus(&self, id: u64) -> Result<()>;
  fn open(&self, url: &str) -> Result<()>;
}

/// What a click ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  Focused(u64),
  Opened,
}

/// Surface over a fixed window list; focus/open only influence the
/// reported outcome.
pub struct StaticSurface {
  windows: Vec<ClientWindow>,
}

impl StaticSurface {
  pub fn new(urls: &[String]) -> Self {
    let windows = urls
      .iter()
      .enumerate()
      .map(|(i, url)| ClientWindow {
        id: i as u64 + 1,
        url: url.clone(),
      })
      .collect();
    Self { windows }
  }
}

impl ClientSurface for StaticSurface {
  fn windows(&self) -> Vec<ClientWindow> {
    self.windows.clone()
  }

  fn focus(&self, _id: u64) -> Result<()> {
    Ok(())
  }

  fn open(&self, _url: &str) -> Result<()> {
    Ok(())
  }
}

/// Route a notification click: focus a window already at the target URL,
/// otherwise open a new one.
pub fn route_click(surface: &dyn ClientSurface, notification: &Notification) -> Result<ClickOutcome> {
  let target = &notification.data.url;

  if let Some(window) = surface.windows().iter().find(|w| w.url.ends_with(target)) {
    surface.focus(window.id)?;
    return Ok(ClickOutcome::Focused(window.id));
  }

  surface.open(target)?;
  Ok(ClickOutcome::Opened)
}
