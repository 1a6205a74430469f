/// Schema for cache stores and the sync queue.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named, versioned cache stores (e.g. "static-assets-v1")
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);

-- Response snapshots keyed by request fingerprint
CREATE TABLE IF NOT EXISTS cache_entries (
    store_name TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at INTEGER NOT NULL,
    PRIMARY KEY (store_name, fingerprint),
    FOREIGN KEY (store_name) REFERENCES cache_stores(name) ON DELETE CASCADE
);

-- Pending mutating requests; seq is the FIFO position
CREATE TABLE IF NOT EXISTS sync_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    op_key TEXT NOT NULL,
    request TEXT NOT NULL,
    payload BLOB,
    enqueued_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    parked INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_op_key ON sync_queue(op_key);
"#;
