//! Cached response snapshots.

use chrono::{DateTime, Duration, Utc};

use crate::http::{Fingerprint, Response, ResponseKind};

/// A response snapshot owned by a single cache store.
///
/// Entries are only ever replaced as a whole, never partially updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub fingerprint: Fingerprint,
  pub store_name: String,
  /// URL the snapshot was taken for, kept for inspection
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Snapshot a response for storage.
  ///
  /// `stored_at` is truncated to millisecond precision, which is what the
  /// store persists, so a read-back entry compares equal to this one.
  pub fn snapshot(
    store_name: &str,
    fingerprint: Fingerprint,
    url: &str,
    response: &Response,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      fingerprint,
      store_name: store_name.to_string(),
      url: url.to_string(),
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      stored_at: truncate_millis(now),
    }
  }

  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    now - self.stored_at
  }

  /// Rebuild the response this entry was taken from.
  pub fn to_response(&self) -> Response {
    Response {
      status: self.status,
      headers: self.headers.clone(),
      body: self.body.clone(),
      kind: ResponseKind::Basic,
    }
  }
}

pub(crate) fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
  DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}
