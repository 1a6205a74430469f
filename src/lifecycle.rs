//! Store versioning across deployments.

use chrono::Utc;
use color_eyre::Result;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage};
use crate::config::Config;
use crate::error::StoreError;
use crate::http::Request;
use crate::net::{with_timeout, Network};

/// What `on_install` managed to pre-cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub store: String,
  pub cached: Vec<String>,
  /// URL and reason for each manifest entry that could not be cached
  pub failed: Vec<(String, String)>,
}

/// What `on_activate` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  pub kept: Vec<String>,
  pub deleted: Vec<String>,
}

/// Install and activation hooks for one deployment version.
pub struct LifecycleManager<S: CacheStorage, N: Network> {
  cache: CacheLayer<S>,
  network: Arc<N>,
  manifest: Vec<Url>,
  timeout: Duration,
}

impl<S: CacheStorage, N: Network> LifecycleManager<S, N> {
  pub fn new(cache: CacheLayer<S>, network: Arc<N>, manifest: Vec<Url>) -> Self {
    Self {
      cache,
      network,
      manifest,
      timeout: Duration::from_secs(10),
    }
  }

  pub fn from_config(config: &Config, cache: CacheLayer<S>, network: Arc<N>) -> Result<Self> {
    let manifest = config
      .precache
      .iter()
      .map(|path| config.resolve(path))
      .collect::<Result<Vec<_>>>()?;
    Ok(Self::new(cache, network, manifest).with_timeout(config.network_timeout()))
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Open the static store for this version and pre-cache the manifest.
  ///
  /// Individual fetch failures are logged and reported, not fatal; a missing
  /// static entry is fetched on demand later.
  pub async fn on_install(&self) -> std::result::Result<InstallReport, StoreError> {
    let store = self.cache.static_store().to_string();
    self.cache.storage().open_store(&store)?;
    info!(store = %store, entries = self.manifest.len(), "installing static store");

    let fetches = self.manifest.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let outcome = with_timeout(self.timeout, self.network.fetch(&request)).await;
      (url, request, outcome)
    });

    let mut report = InstallReport {
      store: store.clone(),
      ..Default::default()
    };
    for (url, request, outcome) in join_all(fetches).await {
      let reason = match outcome {
        Ok(response) => {
          let fingerprint = self.cache.fingerprint(&request);
          match self
            .cache
            .write_to(&store, fingerprint, url.as_str(), &response, Utc::now())
          {
            Some(_) => {
              report.cached.push(url.to_string());
              continue;
            }
            None => format!("not cacheable (status {})", response.status),
          }
        }
        Err(e) => e.to_string(),
      };
      warn!(url = %url, reason = %reason, "failed to pre-cache");
      report.failed.push((url.to_string(), reason));
    }

    Ok(report)
  }

  /// Delete every store that does not belong to the current version.
  ///
  /// Idempotent: when only current stores exist this deletes nothing.
  pub fn on_activate(&self) -> std::result::Result<ActivateReport, StoreError> {
    let keep: BTreeSet<&str> = [self.cache.static_store(), self.cache.runtime_store()]
      .into_iter()
      .collect();

    let mut report = ActivateReport::default();
    for name in self.cache.storage().list_stores()? {
      if keep.contains(name.as_str()) {
        report.kept.push(name);
        continue;
      }
      self.cache.storage().delete_store(&name)?;
      info!(store = %name, "deleted outdated cache store");
      report.deleted.push(name);
    }

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use crate::http::{Fingerprint, Method};
  use crate::testing::FakeNetwork;

  const ORIGIN: &str = "https://app.test";

  fn config(version: &str) -> Config {
    let mut config = Config::for_origin(Url::parse(ORIGIN).unwrap());
    config.version = version.to_string();
    config
  }

  fn manager(
    db: &Database,
    network: &Arc<FakeNetwork>,
    version: &str,
  ) -> LifecycleManager<SqliteStorage, FakeNetwork> {
    let config = config(version);
    let cache = CacheLayer::from_config(SqliteStorage::new(db.clone()), &config);
    LifecycleManager::from_config(&config, cache, Arc::clone(network)).unwrap()
  }

  fn fingerprint(path: &str) -> Fingerprint {
    let url = Url::parse(ORIGIN).unwrap().join(path).unwrap();
    Fingerprint::of(&Request::get(url), &[])
  }

  #[tokio::test]
  async fn test_install_precaches_manifest() {
    let db = Database::open_in_memory().unwrap();
    let network = Arc::new(FakeNetwork::offline());
    network.set_default_status(200);
    let lifecycle = manager(&db, &network, "v1");

    let report = lifecycle.on_install().await.unwrap();

    assert_eq!(report.store, "static-assets-v1");
    assert_eq!(report.cached.len(), 5);
    assert!(report.failed.is_empty());
    let storage = SqliteStorage::new(db);
    assert!(storage
      .get("static-assets-v1", &fingerprint("/templates"))
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_install_failures_are_not_fatal() {
    let db = Database::open_in_memory().unwrap();
    let network = Arc::new(FakeNetwork::offline());
    network.respond(Method::Get, "https://app.test/", 200, "<shell>");
    network.respond(Method::Get, "https://app.test/game", 500, "");
    let lifecycle = manager(&db, &network, "v1");

    let report = lifecycle.on_install().await.unwrap();

    assert_eq!(report.cached, vec!["https://app.test/".to_string()]);
    assert_eq!(report.failed.len(), 4);
    assert!(report
      .failed
      .iter()
      .any(|(url, reason)| url == "https://app.test/game" && reason.contains("500")));

    // The static store exists even though most entries are missing
    let storage = SqliteStorage::new(db);
    assert_eq!(storage.list_stores().unwrap(), vec!["static-assets-v1".to_string()]);
  }

  #[tokio::test]
  async fn test_install_skips_unreachable_entry() {
    let db = Database::open_in_memory().unwrap();
    let network = Arc::new(FakeNetwork::offline());
    network.set_default_status(200);
    network.fail(Method::Get, "https://app.test/templates");
    let lifecycle = manager(&db, &network, "v1");

    let report = lifecycle.on_install().await.unwrap();

    assert_eq!(report.cached.len(), 4);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "https://app.test/templates");
    let storage = SqliteStorage::new(db);
    assert!(storage
      .get("static-assets-v1", &fingerprint("/templates"))
      .unwrap()
      .is_none());
    assert!(storage
      .get("static-assets-v1", &fingerprint("/create"))
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_activate_after_version_change_removes_old_stores() {
    let db = Database::open_in_memory().unwrap();
    let network = Arc::new(FakeNetwork::offline());
    network.set_default_status(200);

    let v1 = manager(&db, &network, "v1");
    v1.on_install().await.unwrap();
    v1.on_activate().unwrap();
    SqliteStorage::new(db.clone())
      .open_store("runtime-cache-v1")
      .unwrap();

    let v2 = manager(&db, &network, "v2");
    v2.on_install().await.unwrap();
    let report = v2.on_activate().unwrap();

    assert_eq!(
      report.deleted,
      vec!["runtime-cache-v1".to_string(), "static-assets-v1".to_string()]
    );
    let storage = SqliteStorage::new(db);
    assert_eq!(storage.list_stores().unwrap(), vec!["static-assets-v2".to_string()]);
    assert!(storage
      .get("static-assets-v1", &fingerprint("/"))
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_activate_is_idempotent() {
    let db = Database::open_in_memory().unwrap();
    let network = Arc::new(FakeNetwork::offline());
    network.set_default_status(200);
    let lifecycle = manager(&db, &network, "v3");
    lifecycle.on_install().await.unwrap();

    let first = lifecycle.on_activate().unwrap();
    let second = lifecycle.on_activate().unwrap();

    assert!(first.deleted.is_empty());
    assert_eq!(first, second);
    assert_eq!(second.kept, vec!["static-assets-v3".to_string()]);
  }

  #[tokio::test]
  async fn test_activate_removes_unrelated_stores() {
    let db = Database::open_in_memory().unwrap();
    let network = Arc::new(FakeNetwork::offline());
    let storage = SqliteStorage::new(db.clone());
    storage.open_store("legacy-images").unwrap();
    storage.open_store("runtime-cache-v1").unwrap();

    let report = manager(&db, &network, "v1").on_activate().unwrap();

    assert_eq!(report.deleted, vec!["legacy-images".to_string()]);
    assert_eq!(report.kept, vec!["runtime-cache-v1".to_string()]);
  }
}
