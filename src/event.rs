use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::http::Request;
use crate::net::{with_timeout, Network};
use crate::sync::{DrainReport, SyncQueue};

/// Events that drive queue replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
  /// Connectivity restored (or first observed)
  Online,
  /// Connectivity lost
  Offline,
  /// Explicit "retry pending saves" from the application
  RetryRequested,
}

/// Probes the network periodically and reports connectivity transitions
pub struct ConnectivityMonitor<N: Network> {
  network: Arc<N>,
  probe: Url,
  interval: Duration,
  timeout: Duration,
}

impl<N: Network + 'static> ConnectivityMonitor<N> {
  pub fn new(network: Arc<N>, probe: Url, interval: Duration) -> Self {
    Self {
      network,
      probe,
      interval,
      timeout: interval,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Any answer from the network counts as online, whatever its status.
  async fn probe(&self) -> bool {
    let request = Request::get(self.probe.clone());
    with_timeout(self.timeout, self.network.fetch(&request))
      .await
      .is_ok()
  }

  /// Spawn the probe loop. The first probe always reports its state.
  pub fn spawn(self, tx: mpsc::UnboundedSender<SyncEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut last: Option<bool> = None;
      loop {
        let online = self.probe().await;
        if last != Some(online) {
          let event = if online {
            SyncEvent::Online
          } else {
            SyncEvent::Offline
          };
          info!(?event, "connectivity changed");
          if tx.send(event).is_err() {
            break;
          }
          last = Some(online);
        }
        tokio::time::sleep(self.interval).await;
      }
    })
  }
}

/// Drains the sync queue whenever connectivity returns or a retry is requested
pub struct SyncWorker<N: Network> {
  queue: SyncQueue<N>,
}

impl<N: Network> SyncWorker<N> {
  pub fn new(queue: SyncQueue<N>) -> Self {
    Self { queue }
  }

  /// Handle a single event. Returns the drain report if a drain ran.
  pub async fn on_event(&self, event: SyncEvent) -> Option<DrainReport> {
    match event {
      SyncEvent::Online | SyncEvent::RetryRequested => match self.queue.drain().await {
        Ok(report) => Some(report),
        Err(e) => {
          warn!(error = %e, "drain failed");
          None
        }
      },
      SyncEvent::Offline => None,
    }
  }

  /// Process events until every sender is dropped
  pub async fn run(self, mut rx: mpsc::UnboundedReceiver<SyncEvent>) {
    while let Some(event) = rx.recv().await {
      if let Some(report) = self.on_event(event).await {
        if !report.is_empty() {
          info!(
            succeeded = report.succeeded.len(),
            pending = report.still_pending.len(),
            "sync pass complete"
          );
        }
      }
    }
  }
}
