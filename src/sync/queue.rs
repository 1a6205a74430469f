//! Durable FIFO of writes that could not reach the network.

use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::item::SyncQueueItem;
use crate::cache::parse_millis;
use crate::db::Database;
use crate::error::{FetchError, StoreError};
use crate::net::{with_timeout, Network};

type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Replayed successfully and removed
  pub succeeded: Vec<String>,
  /// Failed this pass, still queued in their original position
  pub still_pending: Vec<String>,
  /// Failed and hit the attempt limit during this pass
  pub parked: Vec<String>,
}

impl DrainReport {
  pub fn is_empty(&self) -> bool {
    self.succeeded.is_empty() && self.still_pending.is_empty() && self.parked.is_empty()
  }
}

/// Ordered queue of pending writes, persisted in the shared database.
///
/// Items are replayed in insertion order. A failed item keeps its position
/// and does not block the items behind it.
pub struct SyncQueue<N: Network> {
  db: Database,
  network: Arc<N>,
  timeout: Duration,
  max_attempts: Option<u32>,
  drain_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<N: Network> SyncQueue<N> {
  pub fn new(db: Database, network: Arc<N>) -> Self {
    Self {
      db,
      network,
      timeout: Duration::from_secs(10),
      max_attempts: None,
      drain_lock: Arc::new(tokio::sync::Mutex::new(())),
    }
  }

  /// Bound each replay attempt.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Park items after this many failed replays.
  pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
    self.max_attempts = max_attempts;
    self
  }

  /// Append an item at the tail of the queue.
  pub fn enqueue(&self, item: &SyncQueueItem) -> Result<()> {
    let request = serde_json::to_string(&item.request)?;
    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT INTO sync_queue (id, op_key, request, payload, enqueued_at, attempts, last_error, parked)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          item.id,
          item.op_key,
          request,
          item.payload,
          item.enqueued_at.timestamp_millis(),
          item.attempts,
          item.last_error,
          item.parked
        ],
      )
      .map_err(StoreError::from_sqlite)?;

    info!(id = %item.id, url = %item.request.url, "queued write for later delivery");
    Ok(())
  }

  /// Items waiting for replay, in queue order.
  pub fn pending(&self) -> Result<Vec<SyncQueueItem>> {
    self.select("WHERE parked = 0")
  }

  /// Items that hit the attempt limit, in queue order.
  pub fn parked(&self) -> Result<Vec<SyncQueueItem>> {
    self.select("WHERE parked = 1")
  }

  /// Number of items waiting for replay.
  pub fn len(&self) -> Result<usize> {
    let conn = self.db.lock()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM sync_queue WHERE parked = 0",
      [],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  pub fn get(&self, id: &str) -> Result<Option<SyncQueueItem>> {
    let conn = self.db.lock()?;
    let row = conn
      .query_row(
        &format!("{} WHERE id = ?", SELECT_ITEMS),
        params![id],
        RawItem::from_row,
      )
      .optional()?;
    row.map(RawItem::into_item).transpose()
  }

  /// Drop every queued item for a logical operation that has since been
  /// delivered directly. Returns the number removed.
  pub fn discard(&self, op_key: &str) -> Result<usize> {
    let conn = self.db.lock()?;
    let removed = conn.execute("DELETE FROM sync_queue WHERE op_key = ?", params![op_key])?;
    if removed > 0 {
      debug!(op_key, removed, "discarded queued writes superseded by delivery");
    }
    Ok(removed)
  }

  /// Return parked items to the queue with their attempt counters reset.
  /// They keep their original positions.
  pub fn requeue_parked(&self) -> Result<usize> {
    let conn = self.db.lock()?;
    let count = conn.execute(
      "UPDATE sync_queue SET parked = 0, attempts = 0 WHERE parked = 1",
      [],
    )?;
    Ok(count)
  }

  /// Replay every pending item once, in order.
  ///
  /// Items enqueued while a drain is running are left for the next pass.
  /// Concurrent calls are serialized.
  pub async fn drain(&self) -> Result<DrainReport> {
    let _guard = self.drain_lock.lock().await;

    let snapshot = self.pending()?;
    let mut report = DrainReport::default();
    if snapshot.is_empty() {
      return Ok(report);
    }
    info!(count = snapshot.len(), "replaying queued writes");

    for item in snapshot {
      let request = item.replay_request();
      let outcome = with_timeout(self.timeout, self.network.fetch(&request)).await;

      let failure = match outcome {
        Ok(response) if response.is_success() => None,
        Ok(response) => Some(
          FetchError::Upstream {
            status: response.status,
          }
          .to_string(),
        ),
        Err(e) => Some(e.to_string()),
      };

      match failure {
        None => {
          if let Err(e) = self.remove(&item.id) {
            warn!(id = %item.id, error = %e, "replayed write could not be removed from queue");
          }
          debug!(id = %item.id, "replayed queued write");
          report.succeeded.push(item.id);
        }
        Some(reason) => match self.record_failure(&item.id, &reason) {
          Ok(true) => {
            warn!(id = %item.id, error = %reason, "queued write parked after repeated failures");
            report.parked.push(item.id);
          }
          Ok(false) => {
            debug!(id = %item.id, error = %reason, "replay failed, keeping position");
            report.still_pending.push(item.id);
          }
          Err(e) => {
            warn!(id = %item.id, error = %e, "failed to record replay failure");
            report.still_pending.push(item.id);
          }
        },
      }
    }

    info!(
      succeeded = report.succeeded.len(),
      pending = report.still_pending.len(),
      parked = report.parked.len(),
      "drain finished"
    );
    Ok(report)
  }

  fn remove(&self, id: &str) -> Result<bool> {
    let conn = self.db.lock()?;
    let removed = conn.execute("DELETE FROM sync_queue WHERE id = ?", params![id])?;
    Ok(removed > 0)
  }

  /// Increment the attempt counter in place. Returns whether the item got parked.
  fn record_failure(&self, id: &str, reason: &str) -> Result<bool> {
    let conn = self.db.lock()?;
    let attempts: Option<u32> = conn
      .query_row(
        "UPDATE sync_queue SET attempts = attempts + 1, last_error = ? WHERE id = ? RETURNING attempts",
        params![reason, id],
        |row| row.get(0),
      )
      .optional()?;

    let Some(attempts) = attempts else {
      // Discarded while the replay was in flight
      return Ok(false);
    };

    match self.max_attempts {
      Some(max) if attempts >= max => {
        conn.execute("UPDATE sync_queue SET parked = 1 WHERE id = ?", params![id])?;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  fn select(&self, filter: &str) -> Result<Vec<SyncQueueItem>> {
    let conn = self.db.lock()?;
    let mut stmt = conn.prepare(&format!("{} {} ORDER BY seq", SELECT_ITEMS, filter))?;
    let rows = stmt
      .query_map([], RawItem::from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(RawItem::into_item).collect()
  }
}

impl<N: Network> Clone for SyncQueue<N> {
  fn clone(&self) -> Self {
    Self {
      db: self.db.clone(),
      network: Arc::clone(&self.network),
      timeout: self.timeout,
      max_attempts: self.max_attempts,
      drain_lock: Arc::clone(&self.drain_lock),
    }
  }
}

const SELECT_ITEMS: &str = "SELECT id, op_key, request, payload, enqueued_at, attempts, last_error, parked FROM sync_queue";

/// Row as stored, before JSON and timestamp decoding.
struct RawItem {
  id: String,
  op_key: String,
  request: String,
  payload: Option<Vec<u8>>,
  enqueued_at: i64,
  attempts: u32,
  last_error: Option<String>,
  parked: bool,
}

impl RawItem {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      op_key: row.get(1)?,
      request: row.get(2)?,
      payload: row.get(3)?,
      enqueued_at: row.get(4)?,
      attempts: row.get(5)?,
      last_error: row.get(6)?,
      parked: row.get(7)?,
    })
  }

  fn into_item(self) -> Result<SyncQueueItem> {
    Ok(SyncQueueItem {
      id: self.id,
      op_key: self.op_key,
      request: serde_json::from_str(&self.request)?,
      payload: self.payload,
      enqueued_at: parse_millis(self.enqueued_at)?,
      attempts: self.attempts,
      last_error: self.last_error,
      parked: self.parked,
    })
  }
}
