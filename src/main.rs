mod cache;
mod config;
mod db;
mod net;
mod notify;
mod outbox;
mod router;
mod strategy;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use cache::{CacheConfig, CacheManager, SqliteStore};
use config::Config;
use net::{HttpBackend, RequestSnapshot};
use outbox::Outbox;
use strategy::Coordinator;
use sync::{probe_loop, SyncCoordinator, SyncRegistration};

#[derive(Parser, Debug)]
#[command(name = "offsite")]
#[command(about = "Offline-first request coordinator for field access to a project backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offsite/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Resolve a request through the cache strategies and print the result
  Fetch {
    /// Path on the configured origin (e.g. /api/projects)
    path: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body text
    #[arg(short = 'd', long)]
    body: Option<String>,
  },

  /// Fetch the app-shell manifest into the shell partition (all-or-nothing)
  Precache,

  /// Purge cache partitions left over from previous deployments
  Activate,

  /// Replay queued mutations now
  Drain,

  /// Probe connectivity and drain the outbox whenever it comes back
  Watch,

  /// Show cache partitions and queued mutations
  Status,

  /// Parse a push payload and print the notification it would display
  Push {
    /// JSON payload as delivered by the push service
    #[arg(long)]
    payload: Option<String>,

    /// URL of an already-open client window (repeatable); used to report
    /// whether a click would focus an existing window or open a new one
    #[arg(long = "window")]
    windows: Vec<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing()?;

  let config = Config::load(args.config.as_deref())?;
  let origin = config.origin_url()?;

  let store = open_store(&config)?;
  let manager = CacheManager::new(
    store,
    CacheConfig {
      version_tag: config.version_tag(),
    },
  );
  let outbox = Arc::new(open_outbox(&config)?);
  let backend = HttpBackend::new()?;

  match args.command {
    Command::Fetch {
      path,
      method,
      headers,
      body,
    } => {
      let registration = SyncRegistration::new();
      let coordinator = Coordinator::new(
        manager,
        Arc::clone(&outbox),
        registration,
        backend,
        origin.clone(),
        config.routes.clone(),
      );

      let url = origin
        .join(&path)
        .map_err(|e| eyre!("Invalid path '{}': {}", path, e))?;
      let mut request = RequestSnapshot::new(&method, url);
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      if let Some(body) = body {
        request = request.with_body(&body);
      }

      let served = coordinator.handle(&request).await?;
      println!("{} ({})", served.response.status, served.source.as_str());
      println!("{}", served.response.body_text());
    }

    Command::Precache => {
      let count = manager
        .precache(&backend, &origin, &config.shell.manifest)
        .await?;
      println!("Precached {} shell files into {}", count, manager.partition_name(cache::Purpose::Shell));
    }

    Command::Activate => {
      let purged = manager.purge_stale()?;
      if purged.is_empty() {
        println!("No stale partitions");
      } else {
        for name in purged {
          println!("Purged {}", name);
        }
      }
    }

    Command::Drain => {
      let outcomes = outbox.drain(&backend).await?;
      if outcomes.is_empty() {
        println!("Outbox is empty");
      }
      for outcome in outcomes {
        let verdict = if outcome.replayed { "replayed" } else { "kept" };
        println!("#{} {} {} ({})", outcome.id, verdict, outcome.url, outcome.detail);
      }
    }

    Command::Watch => {
      let registration = SyncRegistration::new();
      let coordinator = SyncCoordinator::new(Arc::clone(&outbox), registration, backend.clone());
      let interval = Duration::from_secs(config.sync.probe_interval_secs);
      let (tx, rx) = watch::channel(false);

      println!(
        "Watching connectivity to {} every {}s ({} queued)",
        origin,
        interval.as_secs(),
        outbox.pending_count()?
      );
      let (_, run) = tokio::join!(
        probe_loop(backend, origin.clone(), interval, tx),
        coordinator.run(rx),
      );
      run?;
    }

    Command::Status => {
      let counts = manager.partition_counts()?;
      if counts.is_empty() {
        println!("No cache partitions");
      }
      for (name, count) in counts {
        println!("{}  {} entries", name, count);
      }

      let entries = outbox.entries()?;
      println!("Outbox: {} pending", entries.len());
      for entry in entries {
        println!(
          "  #{} {} {} (queued {})",
          entry.id,
          entry.method,
          entry.url,
          entry.enqueued_at.format("%Y-%m-%d %H:%M:%S")
        );
      }
    }

    Command::Push { payload, windows } => match notify::parse_push_payload(payload.as_deref())? {
      None => println!("No payload, nothing to display"),
      Some(payload) => {
        let notification = notify::Notification::from_payload(payload, chrono::Utc::now());
        println!("{}", notification.title);
        println!("{}", notification.body);
        println!("-> {}", notification.data.url);

        let surface = notify::StaticSurface::new(&windows);
        match notify::route_click(&surface, &notification)? {
          notify::ClickOutcome::Focused(id) => println!("click: focuses window #{}", id),
          notify::ClickOutcome::Opened => {
            println!("click: opens a new window at {}", notification.data.url)
          }
        }
      }
    },
  }

  Ok(())
}

fn database_path(config: &Config) -> Result<PathBuf> {
  match &config.cache.dir {
    Some(dir) => Ok(dir.join("offsite.db")),
    None => db::default_path(),
  }
}

fn open_store(config: &Config) -> Result<SqliteStore> {
  SqliteStore::open_at(&database_path(config)?)
}

fn open_outbox(config: &Config) -> Result<Outbox> {
  Outbox::open_at(&database_path(config)?)
}

/// Diagnostics go to a rolling file in the data dir; stdout belongs to
/// command output.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("offsite")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "offsite.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("OFFSITE_LOG").unwrap_or_else(|_| EnvFilter::new("offsite=info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
