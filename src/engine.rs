//! Per-request serving strategy.
//!
//! | Classification | Strategy |
//! |---|---|
//! | `External` | network only |
//! | `StaticAsset`, `Navigation` | cache first, write-through on miss |
//! | `ApiRead` | network first, fresh cache on failure, else offline payload |
//! | `ApiWrite` | network once, queue for replay on failure |

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheLayer, CacheStorage};
use crate::classify::{Classification, RequestClassifier};
use crate::config::Config;
use crate::db::Database;
use crate::error::FetchError;
use crate::http::{Request, Response};
use crate::net::{with_timeout, Network};
use crate::offline;
use crate::sync::{operation_key, SyncQueue, SyncQueueItem};

/// Where a handled response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Straight from the network
  Network,
  /// Served cache-first without touching the network
  Cache,
  /// Network failed, a fresh cached copy was served instead
  OfflineCache,
  /// Navigation failed, the cached app shell was served
  ShellFallback,
  /// Built locally because nothing better was available
  Synthesized,
  /// A write was accepted into the sync queue
  Queued,
}

/// Result of handling a request, with metadata about the source.
#[derive(Debug, Clone)]
pub struct Handled {
  pub response: Response,
  pub source: ResponseSource,
  pub classification: Classification,
  /// When the served entry was stored, for cache-backed responses
  pub cached_at: Option<DateTime<Utc>>,
}

impl Handled {
  fn network(classification: Classification, response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      classification,
      cached_at: None,
    }
  }

  fn cached(classification: Classification, entry: &CacheEntry, source: ResponseSource) -> Self {
    Self {
      response: entry.to_response(),
      source,
      classification,
      cached_at: Some(entry.stored_at),
    }
  }

  fn local(classification: Classification, response: Response, source: ResponseSource) -> Self {
    Self {
      response,
      source,
      classification,
      cached_at: None,
    }
  }
}

/// Decides per request whether to answer from cache, network, or a
/// synthesized fallback.
///
/// The only error `handle` returns is a network failure for a request with
/// nothing local to fall back on (external requests and uncached static
/// assets). Every other failure is absorbed.
pub struct InterceptionEngine<S: CacheStorage, N: Network> {
  classifier: RequestClassifier,
  cache: CacheLayer<S>,
  network: Arc<N>,
  queue: SyncQueue<N>,
  timeout: Duration,
  shell_url: Url,
}

impl<S: CacheStorage, N: Network> InterceptionEngine<S, N> {
  pub fn new(
    classifier: RequestClassifier,
    cache: CacheLayer<S>,
    network: Arc<N>,
    queue: SyncQueue<N>,
    shell_url: Url,
  ) -> Self {
    Self {
      classifier,
      cache,
      network,
      queue,
      timeout: Duration::from_secs(10),
      shell_url,
    }
  }

  /// Wire an engine from configuration over an existing database.
  pub fn from_config(config: &Config, storage: S, db: Database, network: Arc<N>) -> Result<Self> {
    let classifier = RequestClassifier::from_config(config);
    let cache = CacheLayer::from_config(storage, config);
    let queue = SyncQueue::new(db, Arc::clone(&network))
      .with_timeout(config.network_timeout())
      .with_max_attempts(config.sync.max_attempts);
    let shell_url = config.resolve(&config.shell_path)?;

    Ok(Self::new(classifier, cache, network, queue, shell_url).with_timeout(config.network_timeout()))
  }

  /// Bound network attempts for API reads and writes.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  pub fn queue(&self) -> &SyncQueue<N> {
    &self.queue
  }

  pub fn classifier(&self) -> &RequestClassifier {
    &self.classifier
  }

  /// Handle one outgoing request.
  pub async fn handle(&self, request: Request) -> std::result::Result<Handled, FetchError> {
    let classification = self.classifier.classify(&request);
    debug!(method = %request.method, url = %request.url, %classification, "intercepted request");

    match classification {
      Classification::External => {
        let response = self.network.fetch(&request).await?;
        Ok(Handled::network(classification, response))
      }
      Classification::StaticAsset | Classification::Navigation => {
        self.cache_first(request, classification).await
      }
      Classification::ApiRead => Ok(self.network_first(request).await),
      Classification::ApiWrite => Ok(self.deliver_or_queue(request).await),
    }
  }

  async fn cache_first(
    &self,
    request: Request,
    classification: Classification,
  ) -> std::result::Result<Handled, FetchError> {
    let fingerprint = self.cache.fingerprint(&request);

    if let Some(entry) = self.cache.find_fresh(&fingerprint, classification, Utc::now()) {
      debug!(url = %request.url, "cache hit");
      return Ok(Handled::cached(classification, &entry, ResponseSource::Cache));
    }

    match self.network.fetch(&request).await {
      Ok(response) => {
        // No suspension point between receiving the response and storing it
        self
          .cache
          .write_through(fingerprint, request.url.as_str(), &response, Utc::now());
        Ok(Handled::network(classification, response))
      }
      Err(e) if classification == Classification::Navigation => {
        warn!(url = %request.url, error = %e, "navigation failed, falling back");
        Ok(self.navigation_fallback())
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "static asset unavailable");
        Err(e)
      }
    }
  }

  fn navigation_fallback(&self) -> Handled {
    let shell = self.cache.fingerprint(&Request::get(self.shell_url.clone()));
    match self.cache.find(&shell) {
      Some(entry) => Handled::cached(
        Classification::Navigation,
        &entry,
        ResponseSource::ShellFallback,
      ),
      None => Handled::local(
        Classification::Navigation,
        offline::offline_page(),
        ResponseSource::Synthesized,
      ),
    }
  }

  async fn network_first(&self, request: Request) -> Handled {
    let classification = Classification::ApiRead;
    let fingerprint = self.cache.fingerprint(&request);

    let failure = match with_timeout(self.timeout, self.network.fetch(&request)).await {
      Ok(response) if response.is_success() => {
        self
          .cache
          .write_through(fingerprint, request.url.as_str(), &response, Utc::now());
        return Handled::network(classification, response);
      }
      Ok(response) => {
        warn!(url = %request.url, status = response.status, "upstream error on read");
        FetchError::Upstream {
          status: response.status,
        }
      }
      Err(e) => e,
    };

    match self.cache.find_fresh(&fingerprint, classification, Utc::now()) {
      Some(entry) => {
        info!(url = %request.url, error = %failure, "network failed, serving cached read");
        Handled::cached(classification, &entry, ResponseSource::OfflineCache)
      }
      None => {
        info!(url = %request.url, error = %failure, "network failed, no fresh cache");
        Handled::local(
          classification,
          offline::offline_error(failure.to_string()),
          ResponseSource::Synthesized,
        )
      }
    }
  }

  async fn deliver_or_queue(&self, request: Request) -> Handled {
    let classification = Classification::ApiWrite;
    let fingerprint = self.cache.fingerprint(&request);
    let op_key = operation_key(&request, &fingerprint);

    let failure = match with_timeout(self.timeout, self.network.fetch(&request)).await {
      Ok(response) if !response.is_server_error() => {
        // Only a write with an operation identity can supersede queued copies
        match &op_key {
          Some(key) if response.is_success() => {
            if let Err(e) = self.queue.discard(key) {
              warn!(error = %e, "failed to discard superseded queued writes");
            }
          }
          _ => {}
        }
        return Handled::network(classification, response);
      }
      Ok(response) => FetchError::Upstream {
        status: response.status,
      },
      Err(e) => e,
    };

    warn!(url = %request.url, error = %failure, "write not delivered, queueing");
    let item = SyncQueueItem::capture(request, op_key, Utc::now());
    match self.queue.enqueue(&item) {
      Ok(()) => Handled::local(
        classification,
        offline::queued_write(&item.id),
        ResponseSource::Queued,
      ),
      Err(e) => {
        warn!(error = %e, "failed to queue write");
        Handled::local(
          classification,
          offline::offline_error(failure.to_string()),
          ResponseSource::Synthesized,
        )
      }
    }
  }
}
