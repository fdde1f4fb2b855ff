//! The `HistoryStore` trait.
//!
//! Implemented by storage backends (e.g. `tally-store-sqlite`). The
//! reconciliation engine and lifecycle classifier depend on this abstraction,
//! never on a concrete backend.
//!
//! Nothing is ever deleted from a store except ranked items for the exact
//! `(repo, kind, date)` being replaced.

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};

use crate::{
  analytics::{self, RecentActivity, RepoUsage, UsageBreakdown, UsageDimension},
  traffic::{
    CurrentTotal, DailyMetric, DailyPoint, DateRange, RankedEntry, RankedItem,
    RankedKind, RankedTotal, Repo,
  },
  usage::{FeatureSummary, UsageHistoryPoint, UsageRecord},
};

/// Abstraction over a durable history backend.
///
/// Every write that touches more than one row must be atomic: on error the
/// affected keys are left exactly as they were before the call.
pub trait HistoryStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Traffic writes ────────────────────────────────────────────────────

  /// Upsert one `DailyMetric` per point, keyed by `(repo, date)`: insert if
  /// absent, otherwise overwrite count, uniques and `observed_at`.
  fn upsert_daily_metrics<'a>(
    &'a self,
    repo: &'a Repo,
    points: &'a [DailyPoint],
    observed_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Delete every ranked item for `(repo, kind, date)` and insert `items`,
  /// in one transaction. An empty `items` leaves that date empty.
  fn replace_ranked_items<'a>(
    &'a self,
    repo: &'a Repo,
    kind: RankedKind,
    date: NaiveDate,
    items: &'a [RankedEntry],
    observed_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Overwrite the single current-total row for `total.repo`, returning the
  /// row it replaced.
  fn replace_current_total(
    &self,
    total: CurrentTotal,
  ) -> impl Future<Output = Result<Option<CurrentTotal>, Self::Error>> + Send + '_;

  // ── Traffic reads ─────────────────────────────────────────────────────

  fn current_total<'a>(
    &'a self,
    repo: &'a Repo,
  ) -> impl Future<Output = Result<Option<CurrentTotal>, Self::Error>> + Send + 'a;

  /// Every repo with at least one stored daily metric or current total.
  fn list_repos(&self) -> impl Future<Output = Result<Vec<Repo>, Self::Error>> + Send + '_;

  /// Daily metrics for `repo` within `range`, oldest first.
  fn daily_metrics<'a>(
    &'a self,
    repo: &'a Repo,
    range: DateRange,
  ) -> impl Future<Output = Result<Vec<DailyMetric>, Self::Error>> + Send + 'a;

  /// Ranked items for `repo` within `range`, by date then descending count.
  fn ranked_items<'a>(
    &'a self,
    repo: &'a Repo,
    kind: RankedKind,
    range: DateRange,
  ) -> impl Future<Output = Result<Vec<RankedItem>, Self::Error>> + Send + 'a;

  /// Ranked items summed per key within `range`, highest count first.
  fn top_ranked<'a>(
    &'a self,
    repo: &'a Repo,
    kind: RankedKind,
    range: DateRange,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<RankedTotal>, Self::Error>> + Send + 'a;

  // ── Usage ─────────────────────────────────────────────────────────────

  /// Every stored record for `feature`, active or not.
  fn usage_records<'a>(
    &'a self,
    feature: &'a str,
  ) -> impl Future<Output = Result<Vec<UsageRecord>, Self::Error>> + Send + 'a;

  /// Upsert records by `(feature, repo, workflow_path)` in one transaction.
  fn save_usage_records(
    &self,
    records: Vec<UsageRecord>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Upsert a summary by `(feature, date)`.
  fn upsert_usage_history(
    &self,
    point: UsageHistoryPoint,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Stored summaries for `feature` within `range`, oldest first.
  fn usage_history<'a>(
    &'a self,
    feature: &'a str,
    range: DateRange,
  ) -> impl Future<Output = Result<Vec<UsageHistoryPoint>, Self::Error>> + Send + 'a;

  /// Per-feature record counts, most active first.
  fn list_features(
    &self,
  ) -> impl Future<Output = Result<Vec<FeatureSummary>, Self::Error>> + Send + '_;

  // ── Usage analytics ───────────────────────────────────────────────────
  //
  // Provided in terms of `usage_records`; backends may override with a
  // native query that returns the same rows.

  /// Active adoption of `feature` grouped by `by`. See
  /// [`analytics::breakdown`].
  fn usage_breakdown<'a>(
    &'a self,
    feature: &'a str,
    by: UsageDimension,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<UsageBreakdown>, Self::Error>> + Send + 'a {
    async move { Ok(analytics::breakdown(&self.usage_records(feature).await?, by, limit)) }
  }

  /// Repositories using `feature`, most starred first. See
  /// [`analytics::top_usage`].
  fn top_usage<'a>(
    &'a self,
    feature: &'a str,
    limit: usize,
    include_inactive: bool,
  ) -> impl Future<Output = Result<Vec<RepoUsage>, Self::Error>> + Send + 'a {
    async move {
      Ok(analytics::top_usage(&self.usage_records(feature).await?, limit, include_inactive))
    }
  }

  /// Records of `feature` added or removed on or after `since`.
  fn recent_activity<'a>(
    &'a self,
    feature: &'a str,
    since: NaiveDate,
  ) -> impl Future<Output = Result<RecentActivity, Self::Error>> + Send + 'a {
    async move { Ok(analytics::recent_activity(&self.usage_records(feature).await?, since)) }
  }
}
