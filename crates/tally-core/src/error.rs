//! Error types for `tally-core`.
//!
//! Every variant that concerns a single tracked entity carries the entity's
//! name so a failure can be reported at the entity boundary without losing
//! context.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// The remote fetch failed. `transient` is the fetcher's own judgement of
  /// whether a later attempt could succeed (network, rate limit).
  #[error("fetch failed for {entity}: {source}")]
  Fetch {
    entity:    String,
    transient: bool,
    #[source]
    source:    BoxError,
  },

  /// The remote payload is missing fields or is internally inconsistent. The
  /// whole snapshot is rejected and nothing is written.
  #[error("malformed snapshot for {entity}: {reason}")]
  MalformedSnapshot { entity: String, reason: String },

  /// A store write or read failed. Writes are transactional, so the affected
  /// keys are left in their pre-write state.
  #[error("store error for {entity}: {source}")]
  Store {
    entity: String,
    #[source]
    source: BoxError,
  },

  #[error("invalid repository name {0:?}, expected \"owner/name\"")]
  InvalidRepo(String),
}

impl Error {
  /// Wraps a fetcher error. An undecodable body becomes
  /// [`Error::MalformedSnapshot`], everything else [`Error::Fetch`].
  pub fn fetch<E>(entity: impl ToString, err: E) -> Self
  where
    E: crate::fetch::FetchError,
  {
    if err.is_malformed() {
      return Self::malformed(entity, err.to_string());
    }
    Self::Fetch {
      entity:    entity.to_string(),
      transient: err.is_transient(),
      source:    Box::new(err),
    }
  }

  pub fn store<E>(entity: impl ToString, err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store { entity: entity.to_string(), source: Box::new(err) }
  }

  pub fn malformed(entity: impl ToString, reason: impl Into<String>) -> Self {
    Self::MalformedSnapshot {
      entity: entity.to_string(),
      reason: reason.into(),
    }
  }

  /// Whether retrying the same entity later could plausibly succeed.
  pub fn is_transient(&self) -> bool {
    matches!(self, Self::Fetch { transient: true, .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
