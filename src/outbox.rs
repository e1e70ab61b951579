//! Durable queue of mutating requests awaiting network availability.
//!
//! Entries are appended in arrival order and replayed FIFO. Replay is
//! at-least-once; every attempt for an entry carries the same `x-replay-key`
//! header (derived once at enqueue) so the backend can deduplicate a
//! mutation whose success response was lost before the delete step ran.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::db;
use crate::net::{Fetch, RequestSnapshot};

/// Header carrying the idempotency key on replayed mutations.
pub const REPLAY_KEY_HEADER: &str = "x-replay-key";

/// Attempts for a busy storage transaction before giving up.
const ENQUEUE_ATTEMPTS: u32 = 5;
const ENQUEUE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// One queued mutation.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
  pub id: i64,
  pub url: String,
  pub method: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<String>,
  pub enqueued_at: DateTime<Utc>,
  pub replay_key: String,
  /// Set during a drain attempt; survives an interrupted drain so the next
  /// pass replays the entry under the same key
  pub in_flight: bool,
}

/// Result of one replay attempt during a drain.
#[derive(Debug, Clone)]
pub struct DrainOutcome {
  pub id: i64,
  pub url: String,
  pub replayed: bool,
  pub detail: String,
}

/// SQLite-backed outbox.
pub struct Outbox {
  conn: Mutex<Connection>,
}

impl Outbox {
  /// Open the outbox in the database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    Self::from_connection(db::open(path)?)
  }

  /// In-memory outbox (tests).
  pub fn open_in_memory() -> Result<Self> {
    Self::from_connection(db::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let outbox = Self {
      conn: Mutex::new(conn),
    };
    outbox.run_migrations()?;

    Ok(outbox)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(OUTBOX_SCHEMA)
      .map_err(|e| eyre!("Failed to run outbox migrations: {}", e))?;

    Ok(())
  }

  /// Append a failed mutating request.
  ///
  /// The insert is retried on transient busy errors — silently dropping a
  /// mutation is a defect, not an acceptable outcome.
  pub fn enqueue(&self, request: &RequestSnapshot) -> Result<OutboxEntry> {
    let enqueued_at = Utc::now();
    let replay_key = replay_key(request, enqueued_at);
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let mut attempt = 0;
    let id = loop {
      attempt += 1;
      let conn = self
        .conn
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;

      let result = conn.execute(
        "INSERT INTO outbox (url, method, headers, body, enqueued_at, replay_key, in_flight)
         VALUES (?, ?, ?, ?, ?, ?, 0)",
        params![
          request.url.as_str(),
          request.method,
          headers,
          request.body,
          enqueued_at.to_rfc3339(),
          replay_key,
        ],
      );

      match result {
        Ok(_) => break conn.last_insert_rowid(),
        Err(e) if is_busy(&e) && attempt < ENQUEUE_ATTEMPTS => {
          drop(conn);
          warn!(attempt, "outbox storage busy, retrying enqueue");
          std::thread::sleep(ENQUEUE_RETRY_DELAY);
        }
        Err(e) => return Err(eyre!("Failed to enqueue {}: {}", request.url, e)),
      }
    };

    info!(id, url = %request.url, method = %request.method, "queued offline mutation");

    Ok(OutboxEntry {
      id,
      url: request.url.to_string(),
      method: request.method.clone(),
      headers: request.headers.clone(),
      body: request.body.clone(),
      enqueued_at,
      replay_key,
      in_flight: false,
    })
  }

  /// All queued entries, oldest first.
  pub fn entries(&self) -> Result<Vec<OutboxEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, enqueued_at, replay_key, in_flight
         FROM outbox ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare outbox query: {}", e))?;

    let rows: Vec<(i64, String, String, String, Option<String>, String, String, bool)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
          row.get(7)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query outbox: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut entries = Vec::with_capacity(rows.len());
    for (id, url, method, headers_json, body, enqueued_at_str, replay_key, in_flight) in rows {
      let headers: Vec<(String, String)> = serde_json::from_str(&headers_json)
        .map_err(|e| eyre!("Failed to deserialize headers for entry {}: {}", id, e))?;
      let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_at_str)
        .map_err(|e| eyre!("Failed to parse timestamp for entry {}: {}", id, e))?
        .with_timezone(&Utc);

      entries.push(OutboxEntry {
        id,
        url,
        method,
        headers,
        body,
        enqueued_at,
        replay_key,
        in_flight,
      });
    }

    Ok(entries)
  }

  /// Number of entries still waiting for a successful replay.
  pub fn pending_count(&self) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: u64 = conn
      .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count outbox entries: {}", e))?;

    Ok(count)
  }

  /// Replay every entry in FIFO order, deleting those the network accepted.
  ///
  /// Two-phase per entry: mark in-flight, reissue, delete on 2xx, unmark on
  /// failure. Entries are independent — one failure never blocks the next.
  pub async fn drain<N: Fetch>(&self, backend: &N) -> Result<Vec<DrainOutcome>> {
    let entries = self.entries()?;
    let mut outcomes = Vec::with_capacity(entries.len());

    for entry in entries {
      self.set_in_flight(entry.id, true)?;

      let outcome = match self.replay(backend, &entry).await {
        Ok(status) if (200..300).contains(&status) => {
          self.delete(entry.id)?;
          info!(id = entry.id, url = %entry.url, "replayed queued mutation");
          DrainOutcome {
            id: entry.id,
            url: entry.url,
            replayed: true,
            detail: format!("status {}", status),
          }
        }
        Ok(status) => {
          self.set_in_flight(entry.id, false)?;
          warn!(id = entry.id, url = %entry.url, status, "replay rejected, keeping entry");
          DrainOutcome {
            id: entry.id,
            url: entry.url,
            replayed: false,
            detail: format!("status {}", status),
          }
        }
        Err(e) => {
          self.set_in_flight(entry.id, false)?;
          warn!(id = entry.id, url = %entry.url, error = %e, "replay failed, keeping entry");
          DrainOutcome {
            id: entry.id,
            url: entry.url,
            replayed: false,
            detail: e.to_string(),
          }
        }
      };

      outcomes.push(outcome);
    }

    Ok(outcomes)
  }

  async fn replay<N: Fetch>(&self, backend: &N, entry: &OutboxEntry) -> Result<u16> {
    let url = Url::parse(&entry.url)
      .map_err(|e| eyre!("Stored URL '{}' no longer parses: {}", entry.url, e))?;

    let mut request = RequestSnapshot::new(&entry.method, url);
    request.headers = entry.headers.clone();
    request.body = entry.body.clone();
    let request = request.with_header(REPLAY_KEY_HEADER, &entry.replay_key);

    let response = backend.send(&request).await?;
    Ok(response.status)
  }

  fn set_in_flight(&self, id: i64, in_flight: bool) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "UPDATE outbox SET in_flight = ? WHERE id = ?",
        params![in_flight, id],
      )
      .map_err(|e| eyre!("Failed to update entry {}: {}", id, e))?;

    Ok(())
  }

  fn delete(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM outbox WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete entry {}: {}", id, e))?;

    Ok(())
  }
}

/// Schema for the outbox table.
const OUTBOX_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body TEXT,
    enqueued_at TEXT NOT NULL,
    replay_key TEXT NOT NULL,
    in_flight INTEGER NOT NULL DEFAULT 0
);
"#;

/// Stable idempotency key for an entry, fixed at enqueue time.
fn replay_key(request: &RequestSnapshot, enqueued_at: DateTime<Utc>) -> String {
  let mut hasher = Sha256::new();
  hasher.update(request.method.as_bytes());
  hasher.update(b" ");
  hasher.update(request.url.as_str().as_bytes());
  hasher.update(b"\n");
  hasher.update(request.body.as_deref().unwrap_or("").as_bytes());
  hasher.update(b"\n");
  hasher.update(enqueued_at.to_rfc3339().as_bytes());
  hex::encode(hasher.finalize())
}

fn is_busy(e: &rusqlite::Error) -> bool {
  matches!(
    e.sqlite_error_code(),
    Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
  )
}
