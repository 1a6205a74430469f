use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use offcache::cache::{CacheLayer, CacheStorage, SqliteStorage};
use offcache::config::Config;
use offcache::db::{self, Database};
use offcache::engine::InterceptionEngine;
use offcache::event::{ConnectivityMonitor, SyncEvent, SyncWorker};
use offcache::http::{Method, Request};
use offcache::lifecycle::LifecycleManager;
use offcache::net::HttpNetwork;

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Request-interception cache and offline sync queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Create the static store for this version and pre-cache the manifest
  Install,
  /// Delete cache stores from other versions
  Activate,
  /// Send one request through the interception layer
  Fetch {
    /// Absolute URL or path relative to the configured origin
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: Method,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
    /// Extra header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
  },
  /// Replay queued writes once
  Drain,
  /// List cache stores
  Stores,
  /// List queued writes
  Queue,
  /// Move parked writes back into the queue
  Requeue,
  /// Watch connectivity and replay queued writes when it returns
  Watch,
}

type Engine = InterceptionEngine<SqliteStorage, HttpNetwork>;
type Lifecycle = LifecycleManager<SqliteStorage, HttpNetwork>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;
  let db = Database::open(config.database.as_deref())?;
  let network = Arc::new(HttpNetwork::new(&config.origin, config.network_timeout())?);
  let storage = SqliteStorage::new(db.clone()).with_quota(config.quota_bytes);

  let lifecycle: Lifecycle = LifecycleManager::from_config(
    &config,
    CacheLayer::from_config(storage.clone(), &config),
    Arc::clone(&network),
  )?;
  let engine: Engine = InterceptionEngine::from_config(&config, storage, db, Arc::clone(&network))?;

  match args.command {
    Command::Install => {
      let report = lifecycle.on_install().await?;
      println!(
        "{}: {} cached, {} failed",
        report.store,
        report.cached.len(),
        report.failed.len()
      );
      for (url, reason) in report.failed {
        println!("  {} ({})", url, reason);
      }
    }
    Command::Activate => {
      let report = lifecycle.on_activate()?;
      for name in &report.deleted {
        println!("deleted {}", name);
      }
      println!("{} store(s) current", report.kept.len());
    }
    Command::Fetch {
      url,
      method,
      navigate,
      data,
      headers,
    } => {
      // Never serve entries from a previous version
      lifecycle.on_activate()?;

      let mut request = Request::new(method, config.resolve(&url)?);
      request.navigation = navigate;
      for header in headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header {:?}, expected `Name: value`", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      if let Some(body) = data {
        request = request.with_body(body);
      }

      let handled = engine.handle(request).await?;
      eprintln!(
        "{} {:?} via {:?}",
        handled.response.status, handled.classification, handled.source
      );
      std::io::stdout().write_all(&handled.response.body)?;
    }
    Command::Drain => {
      let report = engine.queue().drain().await?;
      println!(
        "{} delivered, {} pending, {} parked",
        report.succeeded.len(),
        report.still_pending.len(),
        report.parked.len()
      );
    }
    Command::Stores => {
      let storage = engine.cache().storage();
      for name in storage.list_stores()? {
        println!("{}\t{} entries", name, storage.entry_count(&name)?);
      }
    }
    Command::Queue => {
      let queue = engine.queue();
      let items = queue.pending()?.into_iter().chain(queue.parked()?);
      for item in items {
        println!(
          "{}\t{} {}\tattempts={}{}\t{}",
          item.id,
          item.request.method,
          item.request.url,
          item.attempts,
          if item.parked { " (parked)" } else { "" },
          item.last_error.as_deref().unwrap_or("-")
        );
      }
    }
    Command::Requeue => {
      let count = engine.queue().requeue_parked()?;
      println!("{} item(s) requeued", count);
    }
    Command::Watch => {
      lifecycle.on_activate()?;
      watch(&config, engine, network).await?;
    }
  }

  Ok(())
}

async fn watch(config: &Config, engine: Engine, network: Arc<HttpNetwork>) -> Result<()> {
  let (tx, rx) = mpsc::unbounded_channel();
  let probe = config.resolve(&config.connectivity.probe_path)?;
  let monitor = ConnectivityMonitor::new(
    network,
    probe,
    Duration::from_secs(config.connectivity.interval_secs),
  )
  .with_timeout(config.network_timeout())
  .spawn(tx.clone());

  let worker = tokio::spawn(SyncWorker::new(engine.queue().clone()).run(rx));
  println!("watching connectivity, Ctrl-C to stop");

  // One last replay attempt before exiting
  tokio::signal::ctrl_c().await?;
  let _ = tx.send(SyncEvent::RetryRequested);
  monitor.abort();
  drop(tx);
  worker.await?;
  Ok(())
}

fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = db::data_dir()?.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "offcache.log"));
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offcache=info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(verbose.then(|| fmt::layer().with_writer(std::io::stderr)))
    .init();

  Ok(guard)
}
