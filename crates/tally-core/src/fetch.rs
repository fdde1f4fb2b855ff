//! The `Fetcher` trait: where remote snapshots come from.
//!
//! Implemented by `tally-github`. The core never talks HTTP itself; it only
//! drives a fetcher and validates what comes back.

use std::future::Future;

use crate::{
  snapshot::{PointPayload, RankedPayload, TotalPayload, ViewsPayload},
  traffic::{RankedKind, Repo},
  usage::UsageHit,
};

/// Error bound for fetchers. The classification lets callers tell a rate
/// limit or network blip apart from a permanent failure.
pub trait FetchError: std::error::Error + Send + Sync + 'static {
  fn is_transient(&self) -> bool;

  /// The remote answered, but with a body that does not decode as the
  /// expected payload.
  fn is_malformed(&self) -> bool { false }
}

/// Abstraction over the remote source of traffic windows and usage search.
pub trait Fetcher: Send + Sync {
  type Error: FetchError;

  /// The views window for `repo`: window totals plus the daily series.
  fn fetch_views<'a>(
    &'a self,
    repo: &'a Repo,
  ) -> impl Future<Output = Result<ViewsPayload, Self::Error>> + Send + 'a;

  /// The current ranked list of `kind` for `repo`. Ranked lists carry no
  /// date of their own; they describe the window as of the fetch.
  fn fetch_ranked<'a>(
    &'a self,
    repo: &'a Repo,
    kind: RankedKind,
  ) -> impl Future<Output = Result<Vec<RankedPayload>, Self::Error>> + Send + 'a;

  /// One page (1-based) of entities referencing `feature`. An empty page
  /// means the results are exhausted.
  fn search_usage<'a>(
    &'a self,
    feature: &'a str,
    page: u32,
  ) -> impl Future<Output = Result<Vec<UsageHit>, Self::Error>> + Send + 'a;

  /// Only the daily series of the views window. `None` if the payload had no
  /// series at all.
  fn fetch_daily_series<'a>(
    &'a self,
    repo: &'a Repo,
  ) -> impl Future<Output = Result<Option<Vec<PointPayload>>, Self::Error>> + Send + 'a
  {
    async move { Ok(self.fetch_views(repo).await?.views) }
  }

  /// Only the window totals of the views window.
  fn fetch_current_total<'a>(
    &'a self,
    repo: &'a Repo,
  ) -> impl Future<Output = Result<TotalPayload, Self::Error>> + Send + 'a {
    async move {
      let views = self.fetch_views(repo).await?;
      Ok(TotalPayload { count: views.count, uniques: views.uniques })
    }
  }
}
