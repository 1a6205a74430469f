//! Offline write queue and replay.

mod item;
mod queue;

pub use item::{operation_key, SyncQueueItem, IDEMPOTENCY_HEADER};
pub use queue::{DrainReport, SyncQueue};
