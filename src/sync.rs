//! Bridges the platform connectivity signal to the outbox.
//!
//! The API strategy registers a pending-changes sync when it queues a
//! mutation; the coordinator drains the outbox on the next connectivity
//! event and keeps the drain awaited end-to-end, so the sync opportunity
//! is not considered finished before the replay work is.

use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};
use url::Url;

use crate::net::{Fetch, RequestSnapshot};
use crate::outbox::{DrainOutcome, Outbox};

/// Shared pending-changes sync registration.
///
/// Cheap to clone; the API strategy holds one half, the coordinator the
/// other.
#[derive(Clone, Default)]
pub struct SyncRegistration {
  pending: Arc<AtomicBool>,
}

impl SyncRegistration {
  pub fn new() -> Self {
    Self::default()
  }

  /// Request a drain at the next connectivity event.
  pub fn register_pending_changes(&self) {
    self.pending.store(true, Ordering::SeqCst);
  }

  pub fn is_registered(&self) -> bool {
    self.pending.load(Ordering::SeqCst)
  }

  fn clear(&self) {
    self.pending.store(false, Ordering::SeqCst);
  }
}

/// Drains the outbox in response to connectivity signals.
pub struct SyncCoordinator<N: Fetch> {
  outbox: Arc<Outbox>,
  registration: SyncRegistration,
  backend: N,
}

impl<N: Fetch> SyncCoordinator<N> {
  pub fn new(outbox: Arc<Outbox>, registration: SyncRegistration, backend: N) -> Self {
    Self {
      outbox,
      registration,
      backend,
    }
  }

  /// Handle one connectivity-restored signal: drain the outbox to
  /// completion. The registration is cleared only once nothing is left,
  /// so a partial drain keeps the next event armed.
  pub async fn on_connectivity_restored(&self) -> Result<Vec<DrainOutcome>> {
    if !self.registration.is_registered() && self.outbox.pending_count()? == 0 {
      return Ok(Vec::new());
    }

    let outcomes = self.outbox.drain(&self.backend).await?;

    if self.outbox.pending_count()? == 0 {
      self.registration.clear();
      info!("outbox drained, pending-changes sync cleared");
    } else {
      debug!(
        remaining = self.outbox.pending_count()?,
        "outbox partially drained, sync stays registered"
      );
    }

    Ok(outcomes)
  }

  /// Run against a connectivity feed until the sender goes away.
  ///
  /// Drains on the offline-to-online transition, and on any online signal
  /// while a pending-changes sync is registered (a registration made while
  /// already online must not wait for a full connectivity cycle).
  pub async fn run(&self, mut rx: watch::Receiver<bool>) -> Result<()> {
    let mut was_online = *rx.borrow();
    if was_online {
      self.on_connectivity_restored().await?;
    }

    while rx.changed().await.is_ok() {
      let online = *rx.borrow();
      let restored = online && !was_online;
      was_online = online;

      if restored || (online && self.registration.is_registered()) {
        self.on_connectivity_restored().await?;
      }
    }

    Ok(())
  }
}

/// Periodically probe the origin and publish connectivity on `tx`.
///
/// Ends when every receiver is gone.
pub async fn probe_loop<N: Fetch>(
  backend: N,
  origin: Url,
  interval: Duration,
  tx: watch::Sender<bool>,
) {
  let mut ticker = tokio::time::interval(interval);
  ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

  loop {
    ticker.tick().await;
    let probe = RequestSnapshot::new("HEAD", origin.clone());
    let online = backend.send(&probe).await.is_ok();
    debug!(online, "connectivity probe");
    if tx.send(online).is_err() {
      break;
    }
  }
}
