//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::entry::CacheEntry;
use crate::db::Database;
use crate::error::StoreError;
use crate::http::Fingerprint;

type Result<T> = std::result::Result<T, StoreError>;

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores, each mapping fingerprints to
/// entries. Implementations must make single-entry writes atomic; no
/// multi-entry transactions are required by callers.
pub trait CacheStorage: Send + Sync {
  /// Create the store if it does not exist yet.
  fn open_store(&self, store: &str) -> Result<()>;

  /// Get the entry for a fingerprint.
  fn get(&self, store: &str, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>>;

  /// Store an entry, replacing any existing one for the same fingerprint.
  /// The store is created on first write.
  fn put(&self, store: &str, entry: &CacheEntry) -> Result<()>;

  /// Remove a single entry. Returns whether one existed.
  fn evict(&self, store: &str, fingerprint: &Fingerprint) -> Result<bool>;

  /// Delete a store and every entry in it. Returns whether it existed.
  fn delete_store(&self, store: &str) -> Result<bool>;

  /// Names of all existing stores, sorted.
  fn list_stores(&self) -> Result<Vec<String>>;

  /// Number of entries in a store.
  fn entry_count(&self, store: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
  /// Upper bound on total cached body bytes across all stores
  quota_bytes: Option<u64>,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self {
      db,
      quota_bytes: None,
    }
  }

  /// Limit the total size of cached bodies.
  pub fn with_quota(mut self, quota_bytes: Option<u64>) -> Self {
    self.quota_bytes = quota_bytes;
    self
  }
}

impl CacheStorage for SqliteStorage {
  fn open_store(&self, store: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name, created_at) VALUES (?, ?)",
        params![store, Utc::now().timestamp_millis()],
      )
      .map_err(StoreError::from_sqlite)?;
    Ok(())
  }

  fn get(&self, store: &str, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>> {
    let conn = self.db.lock()?;

    let row: Option<(String, u16, String, Vec<u8>, i64)> = conn
      .query_row(
        "SELECT url, status, headers, body, stored_at FROM cache_entries
         WHERE store_name = ? AND fingerprint = ?",
        params![store, fingerprint.as_str()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()?;

    let Some((url, status, headers, body, stored_at)) = row else {
      return Ok(None);
    };

    Ok(Some(CacheEntry {
      fingerprint: fingerprint.clone(),
      store_name: store.to_string(),
      url,
      status,
      headers: serde_json::from_str(&headers)?,
      body,
      stored_at: parse_millis(stored_at)?,
    }))
  }

  fn put(&self, store: &str, entry: &CacheEntry) -> Result<()> {
    let headers = serde_json::to_string(&entry.headers)?;
    let mut conn = self.db.lock()?;
    let tx = conn.transaction().map_err(StoreError::from_sqlite)?;

    if let Some(quota) = self.quota_bytes {
      let total: i64 = tx.query_row(
        "SELECT COALESCE(SUM(length(body)), 0) FROM cache_entries",
        [],
        |row| row.get(0),
      )?;
      let replaced: i64 = tx
        .query_row(
          "SELECT length(body) FROM cache_entries WHERE store_name = ? AND fingerprint = ?",
          params![store, entry.fingerprint.as_str()],
          |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

      let in_use = (total - replaced).max(0) as u64;
      let available = quota.saturating_sub(in_use);
      let needed = entry.body.len() as u64;
      if needed > available {
        // Dropping the transaction rolls it back
        return Err(StoreError::QuotaExceeded { needed, available });
      }
    }

    tx.execute(
      "INSERT OR IGNORE INTO cache_stores (name, created_at) VALUES (?, ?)",
      params![store, Utc::now().timestamp_millis()],
    )
    .map_err(StoreError::from_sqlite)?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_entries (store_name, fingerprint, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        store,
        entry.fingerprint.as_str(),
        entry.url,
        entry.status,
        headers,
        entry.body,
        entry.stored_at.timestamp_millis()
      ],
    )
    .map_err(StoreError::from_sqlite)?;

    tx.commit().map_err(StoreError::from_sqlite)?;
    Ok(())
  }

  fn evict(&self, store: &str, fingerprint: &Fingerprint) -> Result<bool> {
    let conn = self.db.lock()?;
    let removed = conn.execute(
      "DELETE FROM cache_entries WHERE store_name = ? AND fingerprint = ?",
      params![store, fingerprint.as_str()],
    )?;
    Ok(removed > 0)
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    let mut conn = self.db.lock()?;
    let tx = conn.transaction()?;

    // Explicit delete so this does not depend on the foreign_keys pragma
    tx.execute(
      "DELETE FROM cache_entries WHERE store_name = ?",
      params![store],
    )?;
    let removed = tx.execute("DELETE FROM cache_stores WHERE name = ?", params![store])?;

    tx.commit()?;
    Ok(removed > 0)
  }

  fn list_stores(&self) -> Result<Vec<String>> {
    let conn = self.db.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM cache_stores ORDER BY name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
  }

  fn entry_count(&self, store: &str) -> Result<usize> {
    let conn = self.db.lock()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM cache_entries WHERE store_name = ?",
      params![store],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }
}

/// Parse a millisecond timestamp column.
pub(crate) fn parse_millis(ms: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms)
    .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ms)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::{Method, Request, Response, ResponseKind};
  use url::Url;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Database::open_in_memory().unwrap())
  }

  fn entry(store: &str, url: &str, body: &str) -> CacheEntry {
    let request = Request::new(Method::Get, Url::parse(url).unwrap());
    let response = Response::new(200, ResponseKind::Basic, body)
      .with_header("content-type", "text/html");
    CacheEntry::snapshot(store, Fingerprint::of(&request, &[]), url, &response, Utc::now())
  }

  #[test]
  fn test_put_then_get_returns_same_entry() {
    let storage = storage();
    let e = entry("runtime-cache-v1", "https://app.test/create", "<html>create</html>");

    storage.put("runtime-cache-v1", &e).unwrap();

    let got = storage
      .get("runtime-cache-v1", &e.fingerprint)
      .unwrap()
      .unwrap();
    assert_eq!(got, e);
    assert_eq!(got.headers, vec![("content-type".into(), "text/html".into())]);
  }

  #[test]
  fn test_put_replaces_whole_entry() {
    let storage = storage();
    let first = entry("s", "https://app.test/a", "one");
    let mut second = entry("s", "https://app.test/a", "two");
    second.status = 201;
    second.headers.clear();

    storage.put("s", &first).unwrap();
    storage.put("s", &second).unwrap();

    let got = storage.get("s", &first.fingerprint).unwrap().unwrap();
    assert_eq!(got.body, b"two");
    assert_eq!(got.status, 201);
    assert!(got.headers.is_empty());
    assert_eq!(storage.entry_count("s").unwrap(), 1);
  }

  #[test]
  fn test_stores_are_independent() {
    let storage = storage();
    let e = entry("static-assets-v1", "https://app.test/", "shell");
    storage.put("static-assets-v1", &e).unwrap();

    assert!(storage.get("runtime-cache-v1", &e.fingerprint).unwrap().is_none());
  }

  #[test]
  fn test_delete_store_drops_entries() {
    let storage = storage();
    let e = entry("old-v1", "https://app.test/", "shell");
    storage.put("old-v1", &e).unwrap();
    storage.open_store("new-v2").unwrap();

    assert!(storage.delete_store("old-v1").unwrap());
    assert!(!storage.delete_store("old-v1").unwrap());

    assert_eq!(storage.list_stores().unwrap(), vec!["new-v2".to_string()]);
    assert!(storage.get("old-v1", &e.fingerprint).unwrap().is_none());
    assert_eq!(storage.entry_count("old-v1").unwrap(), 0);
  }

  #[test]
  fn test_evict_single_entry() {
    let storage = storage();
    let a = entry("s", "https://app.test/a", "a");
    let b = entry("s", "https://app.test/b", "b");
    storage.put("s", &a).unwrap();
    storage.put("s", &b).unwrap();

    assert!(storage.evict("s", &a.fingerprint).unwrap());
    assert!(storage.get("s", &a.fingerprint).unwrap().is_none());
    assert!(storage.get("s", &b.fingerprint).unwrap().is_some());
  }

  #[test]
  fn test_quota_rejects_oversized_write() {
    let storage = storage().with_quota(Some(10));
    let small = entry("s", "https://app.test/a", "12345");
    let large = entry("s", "https://app.test/b", "1234567890");

    storage.put("s", &small).unwrap();
    let err = storage.put("s", &large).unwrap_err();
    assert!(matches!(
      err,
      StoreError::QuotaExceeded {
        needed: 10,
        available: 5
      }
    ));

    // Nothing partial is visible after the failed write
    assert!(storage.get("s", &large.fingerprint).unwrap().is_none());
    assert_eq!(storage.entry_count("s").unwrap(), 1);
  }

  #[test]
  fn test_quota_counts_replaced_entry_as_free() {
    let storage = storage().with_quota(Some(10));
    let first = entry("s", "https://app.test/a", "123456");
    let second = entry("s", "https://app.test/a", "1234567890");

    storage.put("s", &first).unwrap();
    storage.put("s", &second).unwrap();
    assert_eq!(
      storage.get("s", &first.fingerprint).unwrap().unwrap().body,
      b"1234567890"
    );
  }

  #[test]
  fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offcache.db");
    let e = entry("static-assets-v1", "https://app.test/", "shell");

    {
      let storage = SqliteStorage::new(Database::open(Some(&path)).unwrap());
      storage.put("static-assets-v1", &e).unwrap();
    }

    let storage = SqliteStorage::new(Database::open(Some(&path)).unwrap());
    assert_eq!(
      storage.get("static-assets-v1", &e.fingerprint).unwrap(),
      Some(e)
    );
  }
}
