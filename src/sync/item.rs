use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::http::{Fingerprint, Method, Request};

/// Header a client can set to name a logical write operation explicitly.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// A mutating request waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueItem {
  pub id: String,
  /// Identity of the logical operation; the item id when the write has none
  pub op_key: String,
  /// The captured request, without its body
  pub request: Request,
  pub payload: Option<Vec<u8>>,
  pub enqueued_at: DateTime<Utc>,
  pub attempts: u32,
  pub last_error: Option<String>,
  /// Parked items are kept but skipped by drain
  pub parked: bool,
}

impl SyncQueueItem {
  /// Capture a request for later delivery.
  ///
  /// Without an operation key the item is its own operation and is never
  /// discarded by a later delivery.
  pub fn capture(mut request: Request, op_key: Option<String>, now: DateTime<Utc>) -> Self {
    let payload = request.body.take();
    let id = uuid::Uuid::new_v4().to_string();
    Self {
      op_key: op_key.unwrap_or_else(|| id.clone()),
      id,
      request,
      payload,
      enqueued_at: crate::cache::truncate_millis(now),
      attempts: 0,
      last_error: None,
      parked: false,
    }
  }

  /// The request to send when replaying this item.
  pub fn replay_request(&self) -> Request {
    let mut request = self.request.clone();
    request.body = self.payload.clone();
    request
  }
}

/// Identity of the logical operation a write belongs to, if it has one.
///
/// Uses the `Idempotency-Key` header when the client provides one. PUT and
/// DELETE are idempotent, so the fingerprint plus body names the operation.
/// Two identical POST or PATCH requests are separate operations and get no key.
pub fn operation_key(request: &Request, fingerprint: &Fingerprint) -> Option<String> {
  if let Some(key) = request.header(IDEMPOTENCY_HEADER) {
    return Some(key.to_string());
  }
  if !matches!(request.method, Method::Put | Method::Delete) {
    return None;
  }

  let mut hasher = Sha256::new();
  hasher.update(fingerprint.as_str().as_bytes());
  hasher.update([0u8]);
  if let Some(body) = &request.body {
    hasher.update(body);
  }
  Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn write(method: Method, body: &str) -> Request {
    Request::new(method, Url::parse("https://app.test/api/games/1").unwrap()).with_body(body)
  }

  fn post(body: &str) -> Request {
    write(Method::Post, body)
  }

  #[test]
  fn test_capture_splits_payload_from_request() {
    let item = SyncQueueItem::capture(post("{\"title\":\"x\"}"), Some("op".into()), Utc::now());
    assert_eq!(item.request.body, None);
    assert_eq!(item.payload.as_deref(), Some(&b"{\"title\":\"x\"}"[..]));
    assert_eq!(item.attempts, 0);
    assert_eq!(item.replay_request().body, item.payload);
  }

  #[test]
  fn test_operation_key_prefers_idempotency_header() {
    let req = post("{}").with_header("Idempotency-Key", "save-42");
    let fp = Fingerprint::of(&req, &[]);
    assert_eq!(operation_key(&req, &fp).as_deref(), Some("save-42"));
  }

  #[test]
  fn test_idempotent_key_depends_on_body() {
    let a = write(Method::Put, "{\"n\":1}");
    let b = write(Method::Put, "{\"n\":2}");
    let fp = Fingerprint::of(&a, &[]);
    assert!(operation_key(&a, &fp).is_some());
    assert_ne!(operation_key(&a, &fp), operation_key(&b, &fp));
    assert_eq!(operation_key(&a, &fp), operation_key(&a.clone(), &fp));

    let delete = Request::new(Method::Delete, a.url.clone());
    assert!(operation_key(&delete, &Fingerprint::of(&delete, &[])).is_some());
  }

  #[test]
  fn test_post_and_patch_have_no_implicit_key() {
    for method in [Method::Post, Method::Patch] {
      let req = write(method, "{\"game\":1}");
      assert_eq!(operation_key(&req, &Fingerprint::of(&req, &[])), None);
    }
  }

  #[test]
  fn test_keyless_items_are_their_own_operation() {
    let a = SyncQueueItem::capture(post("{}"), None, Utc::now());
    let b = SyncQueueItem::capture(post("{}"), None, Utc::now());
    assert_eq!(a.op_key, a.id);
    assert_ne!(a.op_key, b.op_key);
  }
}
