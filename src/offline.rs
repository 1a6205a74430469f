//! Locally synthesized responses for when the network cannot answer.

use serde::{Deserialize, Serialize};

use crate::http::Response;

pub const SERVICE_UNAVAILABLE: u16 = 503;
pub const ACCEPTED: u16 = 202;

const SUGGESTIONS: [&str; 3] = [
  "Check your internet connection",
  "Try again in a few moments",
  "Previously loaded content is still available offline",
];

const QUEUED_SUGGESTIONS: [&str; 2] = [
  "Your changes are saved on this device",
  "They will be sent automatically when you are back online",
];

/// Body of the offline-error response returned when neither the network nor
/// the cache can answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflinePayload {
  pub success: bool,
  pub error: String,
  pub offline: bool,
  pub suggestions: Vec<String>,
  /// Present only when a write was queued for later delivery
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub queued: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
}

impl OfflinePayload {
  pub fn unavailable(error: impl Into<String>) -> Self {
    Self {
      success: false,
      error: error.into(),
      offline: true,
      suggestions: SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
      queued: None,
      id: None,
    }
  }

  pub fn queued(id: impl Into<String>) -> Self {
    Self {
      success: false,
      error: "You are offline. This change will be sent when the connection returns.".to_string(),
      offline: true,
      suggestions: QUEUED_SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
      queued: Some(true),
      id: Some(id.into()),
    }
  }

  fn into_response(self, status: u16) -> Response {
    // Serializing a struct of strings and bools cannot fail
    let value = serde_json::to_value(&self).unwrap_or_default();
    Response::json(status, &value).with_header("x-offcache-offline", "1")
  }
}

/// 503 offline-error response for reads and undeliverable writes.
pub fn offline_error(error: impl Into<String>) -> Response {
  OfflinePayload::unavailable(error).into_response(SERVICE_UNAVAILABLE)
}

/// 202 acknowledgement for a write accepted into the sync queue.
pub fn queued_write(id: &str) -> Response {
  OfflinePayload::queued(id).into_response(ACCEPTED)
}

/// 503 page for navigations with nothing cached to show.
pub fn offline_page() -> Response {
  let html = "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>You are offline</h1><p>This page has not been saved for offline use yet. \
Reconnect and try again.</p></body></html>\n";
  Response::new(SERVICE_UNAVAILABLE, crate::http::ResponseKind::Synthesized, html)
    .with_header("content-type", "text/html; charset=utf-8")
    .with_header("x-offcache-offline", "1")
}
