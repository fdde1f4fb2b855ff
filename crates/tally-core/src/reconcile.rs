//! The reconciliation engine: merges short, authoritative remote windows into
//! long-lived local history.
//!
//! Three policies, one per data kind:
//!
//! - daily series are upserted by `(repo, date)`, so overlapping windows on
//!   successive days re-write the overlap and leave older dates alone;
//! - ranked lists replace the full set for `(repo, kind, date)` atomically;
//! - current totals are overwritten wholesale.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::{
  Error, Result,
  fetch::Fetcher,
  snapshot::TrafficSnapshot,
  store::HistoryStore,
  traffic::{CurrentTotal, DailyPoint, RankedEntry, RankedKind, Repo},
};

/// What one reconciled snapshot changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
  pub repo:           Repo,
  pub observed_on:    NaiveDate,
  /// Number of daily points upserted.
  pub days_merged:    usize,
  pub paths:          usize,
  pub referrers:      usize,
  pub total:          CurrentTotal,
  /// The current total this run replaced, if there was one.
  pub previous_total: Option<CurrentTotal>,
}

/// Sole writer of daily metrics, current totals and ranked items.
pub struct Reconciler<'s, S> {
  store: &'s S,
}

impl<'s, S: HistoryStore> Reconciler<'s, S> {
  pub fn new(store: &'s S) -> Self { Self { store } }

  /// Upsert every point of `series` by `(repo, date)`. Dates already stored
  /// but absent from `series` keep their value. Returns the number of points
  /// written.
  pub async fn merge_daily_series(
    &self,
    repo: &Repo,
    series: &[DailyPoint],
    observed_at: DateTime<Utc>,
  ) -> Result<usize> {
    if series.is_empty() {
      tracing::debug!(%repo, "empty daily series, nothing to merge");
      return Ok(0);
    }

    self
      .store
      .upsert_daily_metrics(repo, series, observed_at)
      .await
      .map_err(|e| Error::store(repo, e))?;

    tracing::debug!(%repo, days = series.len(), "merged daily series");
    Ok(series.len())
  }

  /// Replace the full ranked list of `kind` for `(repo, date)` with `items`.
  /// An empty `items` clears the date.
  pub async fn replace_ranked_items(
    &self,
    repo: &Repo,
    kind: RankedKind,
    date: NaiveDate,
    items: &[RankedEntry],
    observed_at: DateTime<Utc>,
  ) -> Result<usize> {
    self
      .store
      .replace_ranked_items(repo, kind, date, items, observed_at)
      .await
      .map_err(|e| Error::store(repo, e))?;

    tracing::debug!(%repo, %kind, %date, items = items.len(), "replaced ranked items");
    Ok(items.len())
  }

  /// Unconditionally overwrite the current total for `total.repo`.
  pub async fn replace_current_total(
    &self,
    total: CurrentTotal,
  ) -> Result<Option<CurrentTotal>> {
    let repo = total.repo.clone();
    self
      .store
      .replace_current_total(total)
      .await
      .map_err(|e| Error::store(&repo, e))
  }

  /// Apply a validated snapshot. Ranked lists are filed under the snapshot's
  /// observation date.
  pub async fn reconcile(&self, snapshot: &TrafficSnapshot) -> Result<ReconcileSummary> {
    let repo = &snapshot.repo;
    let observed_on = snapshot.observed_on();

    let days_merged = self
      .merge_daily_series(repo, &snapshot.series, snapshot.observed_at)
      .await?;

    let total = CurrentTotal {
      repo:        repo.clone(),
      count:       snapshot.total_count,
      uniques:     snapshot.total_uniques,
      observed_at: snapshot.observed_at,
    };
    let previous_total = self.replace_current_total(total.clone()).await?;

    let mut counts = [0usize; 2];
    for (slot, kind) in counts.iter_mut().zip(RankedKind::ALL) {
      *slot = self
        .replace_ranked_items(
          repo,
          kind,
          observed_on,
          snapshot.ranked(kind),
          snapshot.observed_at,
        )
        .await?;
    }
    let [paths, referrers] = counts;

    Ok(ReconcileSummary {
      repo: repo.clone(),
      observed_on,
      days_merged,
      paths,
      referrers,
      total,
      previous_total,
    })
  }

  /// Fetch, validate and reconcile one repository. Nothing is written unless
  /// every fetch succeeded and the snapshot validated.
  pub async fn collect<F: Fetcher>(
    &self,
    fetcher: &F,
    repo: &Repo,
    observed_at: DateTime<Utc>,
  ) -> Result<ReconcileSummary> {
    let views = fetcher
      .fetch_views(repo)
      .await
      .map_err(|e| Error::fetch(repo, e))?;
    let paths = fetcher
      .fetch_ranked(repo, RankedKind::Path)
      .await
      .map_err(|e| Error::fetch(repo, e))?;
    let referrers = fetcher
      .fetch_ranked(repo, RankedKind::Referrer)
      .await
      .map_err(|e| Error::fetch(repo, e))?;

    let snapshot =
      TrafficSnapshot::from_payloads(repo.clone(), observed_at, views, paths, referrers)?;
    self.reconcile(&snapshot).await
  }
}
