//! Read-only JSON API over the Tally history.
//!
//! Exposes an axum [`Router`] backed by any [`tally_core::store::HistoryStore`].
//! Transport and logging layers are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = tally_api::api_router(Arc::new(store)).layer(TraceLayer::new_for_http());
//! ```

pub mod error;
pub mod repos;
pub mod usage;

use std::sync::Arc;

use axum::{Router, routing::get};
use chrono::NaiveDate;
use serde::Deserialize;
use tally_core::{store::HistoryStore, traffic::DateRange};

pub use error::ApiError;

/// Build the API router for `store`.
pub fn api_router<S>(store: Arc<S>) -> Router<()>
where
  S: HistoryStore + 'static,
{
  Router::new()
    // Traffic
    .route("/repos", get(repos::list::<S>))
    .route("/repos/{owner}/{name}/views", get(repos::views::<S>))
    .route("/repos/{owner}/{name}/total", get(repos::total::<S>))
    .route("/repos/{owner}/{name}/paths", get(repos::paths::<S>))
    .route("/repos/{owner}/{name}/referrers", get(repos::referrers::<S>))
    // Usage
    .route("/features", get(usage::features::<S>))
    .route("/usage", get(usage::list::<S>))
    .route("/usage/history", get(usage::history::<S>))
    .route("/usage/versions", get(usage::versions::<S>))
    .route("/usage/languages", get(usage::languages::<S>))
    .route("/usage/top", get(usage::top::<S>))
    .route("/usage/recent", get(usage::recent::<S>))
    .with_state(store)
}

/// Optional inclusive `from`/`to` bounds shared by the history endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
  pub from: Option<NaiveDate>,
  pub to:   Option<NaiveDate>,
}

impl RangeParams {
  fn range(&self) -> Result<DateRange, ApiError> {
    match (self.from, self.to) {
      (Some(from), Some(to)) if from > to => {
        Err(ApiError::BadRequest(format!("from {from} is after to {to}")))
      }
      _ => Ok(DateRange { from: self.from, to: self.to }),
    }
  }
}
