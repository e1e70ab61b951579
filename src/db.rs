//! Shared SQLite database plumbing for the cache store and the outbox.

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a connection waits on a locked database before reporting busy.
/// Enqueue paths additionally retry on top of this (see outbox).
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Get the default database path.
pub fn default_path() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("offsite").join("offsite.db"))
}

/// Open (creating if needed) the database at `path`.
pub fn open(path: &Path) -> Result<Connection> {
  // Ensure parent directory exists
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
  }

  let conn = Connection::open(path)
    .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;
  configure(&conn)?;

  Ok(conn)
}

/// Open an in-memory database (tests and throwaway runs).
pub fn open_in_memory() -> Result<Connection> {
  let conn =
    Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
  configure(&conn)?;

  Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
  conn
    .busy_timeout(BUSY_TIMEOUT)
    .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;
  conn
    .execute_batch("PRAGMA foreign_keys = ON;")
    .map_err(|e| eyre!("Failed to enable foreign keys: {}", e))?;

  Ok(())
}
