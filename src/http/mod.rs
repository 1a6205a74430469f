mod fingerprint;
mod types;

pub use fingerprint::{normalize_url, Fingerprint};
pub use types::{Method, Request, Response, ResponseKind};
