//! Scripted network double for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::error::FetchError;
use crate::http::{Method, Request, Response, ResponseKind};
use crate::net::Network;

/// What the fake network does for a request.
#[derive(Debug, Clone)]
pub enum Outcome {
  Respond(Response),
  Fail(FetchError),
}

/// In-memory network with per-route outcomes and a fallback default.
///
/// Starts offline: every unrouted request fails with `NetworkUnavailable`.
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Outcome>>,
  default: Mutex<Outcome>,
  delay: Mutex<Option<Duration>>,
  requests: Mutex<Vec<Request>>,
}

impl FakeNetwork {
  pub fn offline() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      default: Mutex::new(offline_outcome()),
      delay: Mutex::new(None),
      requests: Mutex::new(Vec::new()),
    }
  }

  fn key(method: Method, url: &str) -> String {
    let url = Url::parse(url).expect("test URL must be absolute");
    format!("{} {}", method, url)
  }

  pub fn route(&self, method: Method, url: &str, outcome: Outcome) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(Self::key(method, url), outcome);
  }

  /// Answer a route with a same-origin response.
  pub fn respond(&self, method: Method, url: &str, status: u16, body: &str) {
    self.route(
      method,
      url,
      Outcome::Respond(Response::new(status, ResponseKind::Basic, body)),
    );
  }

  pub fn fail(&self, method: Method, url: &str) {
    self.route(method, url, offline_outcome());
  }

  /// Answer every unrouted request with this status.
  pub fn set_default_status(&self, status: u16) {
    *self.default.lock().unwrap() =
      Outcome::Respond(Response::new(status, ResponseKind::Basic, "{}"));
  }

  /// Drop all routes and fail everything.
  pub fn go_offline(&self) {
    self.routes.lock().unwrap().clear();
    *self.default.lock().unwrap() = offline_outcome();
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn calls(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

fn offline_outcome() -> Outcome {
  Outcome::Fail(FetchError::NetworkUnavailable(
    "connection refused".to_string(),
  ))
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    self.requests.lock().unwrap().push(request.clone());

    let outcome = {
      let routes = self.routes.lock().unwrap();
      routes
        .get(&format!("{} {}", request.method, request.url))
        .cloned()
        .unwrap_or_else(|| self.default.lock().unwrap().clone())
    };

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    match outcome {
      Outcome::Respond(response) => Ok(response),
      Outcome::Fail(err) => Err(err),
    }
  }
}
