//! Error type for `tally-github`.

use tally_core::fetch::FetchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("GET {path} returned {status}")]
  Status { path: String, status: u16 },

  /// The request kept failing with a retryable status until the retry budget
  /// ran out.
  #[error("GET {path} still returned {status} after {attempts} attempts")]
  RetriesExhausted { path: String, status: u16, attempts: u32 },

  /// A successful response whose body is not the expected JSON shape.
  #[error("GET {path} returned an undecodable body: {reason}")]
  Decode { path: String, reason: String },

  #[error("invalid request url: {0}")]
  Url(String),

  #[error("undecodable file content: {0}")]
  Content(String),

  #[error("invalid version pattern: {0}")]
  Pattern(#[from] regex::Error),
}

impl FetchError for Error {
  fn is_transient(&self) -> bool {
    match self {
      Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
      Self::Status { status, .. } => *status == 429 || *status >= 500,
      Self::RetriesExhausted { .. } => true,
      Self::Decode { .. } | Self::Url(_) | Self::Content(_) | Self::Pattern(_) => false,
    }
  }

  fn is_malformed(&self) -> bool { matches!(self, Self::Decode { .. }) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  fn status(code: u16) -> Error {
    Error::Status { path: "/x".into(), status: code }
  }

  #[test]
  fn server_errors_and_throttling_are_transient() {
    assert!(status(502).is_transient());
    assert!(status(429).is_transient());
    assert!(
      Error::RetriesExhausted { path: "/x".into(), status: 403, attempts: 4 }.is_transient()
    );
  }

  #[test]
  fn client_errors_are_permanent() {
    assert!(!status(404).is_transient());
    assert!(!status(403).is_transient());
    assert!(!Error::Content("bad base64".into()).is_transient());
  }
}
