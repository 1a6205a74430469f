//! Stable cache keys for requests.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use super::types::Request;

/// Cache identity of a request: method plus normalized URL, optionally
/// folded with a fixed list of varying headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
  pub fn of(request: &Request, vary_headers: &[String]) -> Self {
    let mut input = format!("{} {}", request.method, normalize_url(&request.url));
    for name in vary_headers {
      let name = name.to_ascii_lowercase();
      let value = request.header(&name).unwrap_or_default();
      input.push('\n');
      input.push_str(&name);
      input.push(':');
      input.push_str(value);
    }

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Normalize a URL for consistent hashing.
/// Drops the fragment and sorts query pairs; scheme, host and default port
/// are already canonical once parsed.
pub fn normalize_url(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);

  let mut pairs: Vec<(String, String)> = url
    .query_pairs()
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();
  if pairs.is_empty() {
    url.set_query(None);
  } else {
    pairs.sort();
    url.query_pairs_mut().clear().extend_pairs(pairs);
  }

  url.to_string()
}
