//! Cache layer that resolves current stores and applies the freshness policy.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::policy::FreshnessPolicy;
use super::storage::CacheStorage;
use crate::classify::Classification;
use crate::config::Config;
use crate::http::{Fingerprint, Request, Response, ResponseKind};

/// Cache access as the interception engine sees it.
///
/// Holds the names of the current static and runtime stores. Lookups search
/// the static store first, then the runtime store. Writes go to the runtime
/// store and are best-effort: failures are logged and never surface.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  static_store: String,
  runtime_store: String,
  policy: FreshnessPolicy,
  vary_headers: Vec<String>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer over the given storage backend.
  pub fn new(storage: S, static_store: impl Into<String>, runtime_store: impl Into<String>) -> Self {
    Self {
      storage: Arc::new(storage),
      static_store: static_store.into(),
      runtime_store: runtime_store.into(),
      policy: FreshnessPolicy::default(),
      vary_headers: Vec::new(),
    }
  }

  pub fn from_config(storage: S, config: &Config) -> Self {
    Self::new(storage, config.static_store_name(), config.runtime_store_name())
      .with_policy(FreshnessPolicy::new(config.api_ttl()))
      .with_vary_headers(config.vary_headers.clone())
  }

  pub fn with_policy(mut self, policy: FreshnessPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_vary_headers(mut self, vary_headers: Vec<String>) -> Self {
    self.vary_headers = vary_headers;
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn static_store(&self) -> &str {
    &self.static_store
  }

  pub fn runtime_store(&self) -> &str {
    &self.runtime_store
  }

  pub fn fingerprint(&self, request: &Request) -> Fingerprint {
    Fingerprint::of(request, &self.vary_headers)
  }

  /// Only successful same-origin responses may be stored.
  pub fn is_eligible(response: &Response) -> bool {
    response.is_success() && response.kind == ResponseKind::Basic
  }

  /// Find an entry in the current stores, static store first.
  ///
  /// Read errors are logged and treated as a miss.
  pub fn find(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
    [&self.static_store, &self.runtime_store]
      .into_iter()
      .find_map(|store| match self.storage.get(store, fingerprint) {
        Ok(entry) => entry,
        Err(e) => {
          warn!(store = %store, error = %e, "cache read failed, treating as miss");
          None
        }
      })
  }

  /// Find an entry that the freshness policy allows serving.
  pub fn find_fresh(
    &self,
    fingerprint: &Fingerprint,
    classification: Classification,
    now: DateTime<Utc>,
  ) -> Option<CacheEntry> {
    let entry = self.find(fingerprint)?;
    if self.policy.is_fresh(&entry, classification, now) {
      Some(entry)
    } else {
      debug!(
        url = %entry.url,
        age_secs = entry.age(now).num_seconds(),
        "cached entry is stale"
      );
      None
    }
  }

  /// Store a response in the runtime store if it is eligible.
  ///
  /// Returns the stored entry, or `None` when the response was ineligible or
  /// the write failed.
  pub fn write_through(
    &self,
    fingerprint: Fingerprint,
    url: &str,
    response: &Response,
    now: DateTime<Utc>,
  ) -> Option<CacheEntry> {
    self.write_to(&self.runtime_store, fingerprint, url, response, now)
  }

  /// Store a response in the given store if it is eligible.
  pub fn write_to(
    &self,
    store: &str,
    fingerprint: Fingerprint,
    url: &str,
    response: &Response,
    now: DateTime<Utc>,
  ) -> Option<CacheEntry> {
    if !Self::is_eligible(response) {
      debug!(url, status = response.status, kind = ?response.kind, "response not eligible for caching");
      return None;
    }

    let entry = CacheEntry::snapshot(store, fingerprint, url, response, now);
    match self.storage.put(store, &entry) {
      Ok(()) => {
        debug!(store, url, "cached response");
        Some(entry)
      }
      Err(e) => {
        warn!(store, url, error = %e, "cache write failed");
        None
      }
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      static_store: self.static_store.clone(),
      runtime_store: self.runtime_store.clone(),
      policy: self.policy,
      vary_headers: self.vary_headers.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use chrono::Duration;
  use url::Url;

  fn layer() -> CacheLayer<SqliteStorage> {
    let storage = SqliteStorage::new(Database::open_in_memory().unwrap());
    CacheLayer::new(storage, "static-assets-v1", "runtime-cache-v1")
  }

  fn request(path: &str) -> Request {
    Request::get(Url::parse("https://app.test").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_write_through_goes_to_runtime_store() {
    let layer = layer();
    let req = request("/create");
    let fp = layer.fingerprint(&req);
    let response = Response::new(200, ResponseKind::Basic, "create page");

    let stored = layer
      .write_through(fp.clone(), req.url.as_str(), &response, Utc::now())
      .unwrap();

    assert_eq!(stored.store_name, "runtime-cache-v1");
    let got = layer.storage().get("runtime-cache-v1", &fp).unwrap().unwrap();
    assert_eq!(got.body, b"create page");
  }

  #[test]
  fn test_ineligible_responses_are_not_stored() {
    let layer = layer();
    let req = request("/missing");
    let fp = layer.fingerprint(&req);

    let not_found = Response::new(404, ResponseKind::Basic, "nope");
    let cross_origin = Response::new(200, ResponseKind::Cors, "font");
    let opaque = Response::new(200, ResponseKind::Opaque, "");

    for response in [not_found, cross_origin, opaque] {
      assert!(layer
        .write_through(fp.clone(), req.url.as_str(), &response, Utc::now())
        .is_none());
    }
    assert!(layer.find(&fp).is_none());
  }

  #[test]
  fn test_static_store_is_searched_first() {
    let layer = layer();
    let req = request("/");
    let fp = layer.fingerprint(&req);
    let now = Utc::now();

    layer.write_to(
      "static-assets-v1",
      fp.clone(),
      req.url.as_str(),
      &Response::new(200, ResponseKind::Basic, "precached"),
      now,
    );
    layer.write_through(
      fp.clone(),
      req.url.as_str(),
      &Response::new(200, ResponseKind::Basic, "runtime"),
      now,
    );

    assert_eq!(layer.find(&fp).unwrap().body, b"precached");
  }

  #[test]
  fn test_find_fresh_hides_stale_api_entries() {
    let layer = layer();
    let req = request("/api/templates");
    let fp = layer.fingerprint(&req);
    let now = Utc::now();

    layer.write_through(
      fp.clone(),
      req.url.as_str(),
      &Response::new(200, ResponseKind::Basic, "[]"),
      now - Duration::hours(2),
    );

    assert!(layer.find_fresh(&fp, Classification::ApiRead, now).is_none());
    // Stale entries stay in the store
    assert!(layer.find(&fp).is_some());
  }

  #[test]
  fn test_quota_failure_is_absorbed() {
    let storage = SqliteStorage::new(Database::open_in_memory().unwrap()).with_quota(Some(4));
    let layer = CacheLayer::new(storage, "static-assets-v1", "runtime-cache-v1");
    let req = request("/big.js");
    let fp = layer.fingerprint(&req);

    let stored = layer.write_through(
      fp.clone(),
      req.url.as_str(),
      &Response::new(200, ResponseKind::Basic, "way too large"),
      Utc::now(),
    );

    assert!(stored.is_none());
    assert!(layer.find(&fp).is_none());
  }
}
