//! Error taxonomy for the interception layer.
//!
//! Cache misses and stale entries are normal branches, not errors, so they
//! have no variant here. Everything below is absorbed by the engine except a
//! static asset fetch that fails with nothing cached to fall back on.

use thiserror::Error;

/// Failure of a network attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// Connectivity or DNS failure.
  #[error("network unavailable: {0}")]
  NetworkUnavailable(String),

  /// The attempt did not complete within the configured bound.
  #[error("network request timed out after {0:?}")]
  Timeout(std::time::Duration),

  /// The upstream answered with a non-success status.
  #[error("upstream responded with status {status}")]
  Upstream { status: u16 },

  /// Any other transport-level failure (bad request, body read, ...).
  #[error("transport error: {0}")]
  Transport(String),
}

/// Failure of a cache store or sync queue operation.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("storage quota exceeded: need {needed} bytes, {available} available")]
  QuotaExceeded { needed: u64, available: u64 },

  #[error("storage backend error: {0}")]
  Backend(#[from] rusqlite::Error),

  #[error("failed to (de)serialize stored value: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage lock poisoned")]
  LockPoisoned,

  #[error("stored value is corrupt: {0}")]
  Corrupt(String),
}

impl StoreError {
  /// Map SQLite's own out-of-space condition onto the quota variant.
  pub(crate) fn from_sqlite(err: rusqlite::Error) -> Self {
    match err.sqlite_error_code() {
      Some(rusqlite::ErrorCode::DiskFull) => StoreError::QuotaExceeded {
        needed: 0,
        available: 0,
      },
      _ => StoreError::Backend(err),
    }
  }
}
