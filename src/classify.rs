//! Request classification.
//!
//! Every intercepted request is mapped to exactly one [`Classification`],
//! which selects the serving strategy in the engine. Rules apply in order:
//!
//! 1. Non-GET: `ApiWrite` inside the API namespace, `External` otherwise.
//! 2. GET inside the API namespace: `ApiRead`.
//! 3. GET to a foreign origin that is not allow-listed: `External`.
//! 4. GET flagged as a navigation: `Navigation`.
//! 5. Any other GET: `StaticAsset`.

use std::fmt;
use url::{Origin, Url};

use crate::config::Config;
use crate::http::{Method, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
  StaticAsset,
  ApiRead,
  ApiWrite,
  Navigation,
  /// Outside the interception policy; passed straight to the network
  External,
}

impl Classification {
  /// Whether responses for this class may ever be written to a cache store.
  pub fn is_cacheable(&self) -> bool {
    matches!(
      self,
      Classification::StaticAsset | Classification::ApiRead | Classification::Navigation
    )
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Classification::StaticAsset => "static_asset",
      Classification::ApiRead => "api_read",
      Classification::ApiWrite => "api_write",
      Classification::Navigation => "navigation",
      Classification::External => "external",
    }
  }
}

impl fmt::Display for Classification {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone)]
pub struct RequestClassifier {
  origin: Origin,
  api_prefix: String,
  allowed_origins: Vec<Origin>,
}

impl RequestClassifier {
  pub fn new(origin: &Url, api_prefix: impl Into<String>, allowed_origins: &[Url]) -> Self {
    Self {
      origin: origin.origin(),
      api_prefix: api_prefix.into(),
      allowed_origins: allowed_origins.iter().map(Url::origin).collect(),
    }
  }

  /// Build from configuration. Allow-list entries that fail to parse are
  /// skipped with a warning.
  pub fn from_config(config: &Config) -> Self {
    let allowed: Vec<Url> = config
      .allowed_origins
      .iter()
      .filter_map(|raw| match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(e) => {
          tracing::warn!(origin = %raw, error = %e, "ignoring invalid allow-listed origin");
          None
        }
      })
      .collect();
    Self::new(&config.origin, config.api_prefix.clone(), &allowed)
  }

  pub fn classify(&self, request: &Request) -> Classification {
    let in_api = request.url.path().starts_with(&self.api_prefix);

    if request.method != Method::Get {
      return if in_api {
        Classification::ApiWrite
      } else {
        Classification::External
      };
    }

    if in_api {
      return Classification::ApiRead;
    }

    if !self.is_same_origin(&request.url) && !self.is_allow_listed(&request.url) {
      return Classification::External;
    }

    if request.navigation {
      Classification::Navigation
    } else {
      Classification::StaticAsset
    }
  }

  pub fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin
  }

  fn is_allow_listed(&self, url: &Url) -> bool {
    let origin = url.origin();
    self.allowed_origins.iter().any(|allowed| *allowed == origin)
  }
}
