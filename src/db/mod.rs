pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::StoreError;

/// Shared database connection backing both the cache stores and the sync queue.
///
/// Cloning is cheap; all clones use the same connection.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at the given path, or the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("offcache.db"))
  }

  /// Lock the connection for a single synchronous operation.
  pub(crate) fn lock(&self) -> std::result::Result<MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }
}

const APP_DIR: &str = "offcache";

/// Per-user data directory for the database and logs.
pub fn data_dir() -> Result<PathBuf> {
  app_dir(dirs::data_dir(), ".local/share")
    .ok_or_else(|| eyre!("Could not determine data directory"))
}

/// Per-user configuration directory, if the platform has one.
pub fn config_dir() -> Option<PathBuf> {
  app_dir(dirs::config_dir(), ".config")
}

/// `base/offcache`, falling back to `~/<home_relative>/offcache`.
fn app_dir(base: Option<PathBuf>, home_relative: &str) -> Option<PathBuf> {
  base
    .or_else(|| dirs::home_dir().map(|home| home.join(home_relative)))
    .map(|dir| dir.join(APP_DIR))
}
