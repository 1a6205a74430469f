//! The upstream network boundary.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;
use url::{Origin, Url};

use crate::error::FetchError;
use crate::http::{Method, Request, Response, ResponseKind};

/// Something that can deliver a request to the network.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> std::result::Result<Response, FetchError>;
}

/// Run a network attempt under a bounded timeout.
pub async fn with_timeout<F>(limit: Duration, attempt: F) -> std::result::Result<Response, FetchError>
where
  F: Future<Output = std::result::Result<Response, FetchError>>,
{
  match tokio::time::timeout(limit, attempt).await {
    Ok(result) => result,
    Err(_) => Err(FetchError::Timeout(limit)),
  }
}

/// `reqwest`-backed network client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Origin,
  timeout: Duration,
}

impl HttpNetwork {
  pub fn new(origin: &Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("offcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: origin.origin(),
      timeout,
    })
  }

  fn classify_error(&self, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
      FetchError::Timeout(self.timeout)
    } else if err.is_connect() {
      FetchError::NetworkUnavailable(err.to_string())
    } else {
      FetchError::Transport(err.to_string())
    }
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
    Method::Options => reqwest::Method::OPTIONS,
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> std::result::Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(to_reqwest_method(request.method), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(|e| self.classify_error(e))?;

    let kind = if response.url().origin() == self.origin {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    };
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await.map_err(|e| self.classify_error(e))?.to_vec();

    Ok(Response {
      status,
      headers,
      body,
      kind,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_with_timeout_passes_through_fast_results() {
    let result = with_timeout(Duration::from_millis(100), async {
      Ok::<_, FetchError>(Response::new(200, ResponseKind::Basic, "ok"))
    })
    .await;
    assert_eq!(result.unwrap().status, 200);
  }

  #[tokio::test]
  async fn test_with_timeout_bounds_slow_attempts() {
    let result = with_timeout(Duration::from_millis(10), async {
      tokio::time::sleep(Duration::from_secs(5)).await;
      Ok::<_, FetchError>(Response::new(200, ResponseKind::Basic, "late"))
    })
    .await;
    assert_eq!(result, Err(FetchError::Timeout(Duration::from_millis(10))));
  }

  #[tokio::test]
  async fn test_unreachable_host_is_a_fetch_error() {
    let origin = Url::parse("http://127.0.0.1:9").unwrap();
    let network = HttpNetwork::new(&origin, Duration::from_secs(2)).unwrap();
    let request = Request::get(origin.join("/api/games").unwrap());

    let err = network.fetch(&request).await.unwrap_err();
    assert!(matches!(
      err,
      FetchError::NetworkUnavailable(_) | FetchError::Timeout(_) | FetchError::Transport(_)
    ));
  }
}
