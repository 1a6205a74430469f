//! Time-based freshness rules.

use chrono::{DateTime, Duration, Utc};

use super::entry::CacheEntry;
use crate::classify::Classification;

/// Decides whether a cached entry may be served.
///
/// Static assets and navigations never expire by age; only a version
/// rollover removes them. API reads expire after a fixed TTL. Expired entries
/// are not deleted here, they are simply not served.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
  api_ttl: Duration,
}

impl FreshnessPolicy {
  pub fn new(api_ttl: Duration) -> Self {
    Self { api_ttl }
  }

  /// Maximum age for a classification, `None` when age never matters.
  pub fn ttl(&self, classification: Classification) -> Option<Duration> {
    match classification {
      Classification::ApiRead => Some(self.api_ttl),
      _ => None,
    }
  }

  pub fn is_fresh(
    &self,
    entry: &CacheEntry,
    classification: Classification,
    now: DateTime<Utc>,
  ) -> bool {
    if !classification.is_cacheable() {
      return false;
    }
    match self.ttl(classification) {
      Some(ttl) => entry.age(now) < ttl,
      None => true,
    }
  }
}

impl Default for FreshnessPolicy {
  fn default() -> Self {
    Self::new(Duration::hours(1))
  }
}
