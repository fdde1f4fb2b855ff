//! [`SqliteStore`], the SQLite implementation of [`HistoryStore`].

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::OptionalExtension as _;

use tally_core::{
  analytics::{RecentActivity, RepoUsage, UsageBreakdown, UsageDimension},
  store::HistoryStore,
  traffic::{
    CurrentTotal, DailyMetric, DailyPoint, DateRange, RankedEntry, RankedItem,
    RankedKind, RankedTotal, Repo,
  },
  usage::{FeatureSummary, UsageHistoryPoint, UsageRecord},
};

use crate::{
  Result,
  encode::{
    RawCurrentTotal, RawDailyMetric, RawHistoryPoint, RawRankedItem,
    RawRankedTotal, RawUsageRecord, decode_date, decode_repo, encode_date, encode_dt,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tally history store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Flush and close the underlying connection.
  pub async fn close(self) -> Result<()> {
    self.conn.close().await?;
    Ok(())
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

/// Bind values for an optional inclusive date range.
fn range_params(range: DateRange) -> (Option<String>, Option<String>) {
  (range.from.map(encode_date), range.to.map(encode_date))
}

fn ranked_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRankedItem> {
  Ok(RawRankedItem {
    repo:        row.get(0)?,
    kind:        row.get(1)?,
    date:        row.get(2)?,
    item_key:    row.get(3)?,
    title:       row.get(4)?,
    count:       row.get(5)?,
    uniques:     row.get(6)?,
    observed_at: row.get(7)?,
  })
}

fn total_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCurrentTotal> {
  Ok(RawCurrentTotal {
    repo:        row.get(0)?,
    count:       row.get(1)?,
    uniques:     row.get(2)?,
    observed_at: row.get(3)?,
  })
}

fn usage_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUsageRecord> {
  Ok(RawUsageRecord {
    feature:        row.get(0)?,
    repo:           row.get(1)?,
    workflow_path:  row.get(2)?,
    version:        row.get(3)?,
    stars:          row.get(4)?,
    language:       row.get(5)?,
    first_seen:     row.get(6)?,
    last_seen:      row.get(7)?,
    is_active:      row.get(8)?,
    deactivated_on: row.get(9)?,
    updated_at:     row.get(10)?,
  })
}

const USAGE_COLUMNS: &str = "feature, repo, workflow_path, version, stars, language,
  first_seen, last_seen, is_active, deactivated_on, updated_at";

const SELECT_TOTAL: &str =
  "SELECT repo, count, uniques, observed_at FROM current_totals WHERE repo = ?1";

// ─── HistoryStore impl ───────────────────────────────────────────────────────

impl HistoryStore for SqliteStore {
  type Error = crate::Error;

  // ── Traffic writes ────────────────────────────────────────────────────────

  async fn upsert_daily_metrics(
    &self,
    repo:        &Repo,
    points:      &[DailyPoint],
    observed_at: DateTime<Utc>,
  ) -> Result<()> {
    let repo_str = repo.to_string();
    let points   = points.to_vec();
    let at_str   = encode_dt(observed_at);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO daily_views (repo, date, count, uniques, observed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (repo, date) DO UPDATE SET
               count       = excluded.count,
               uniques     = excluded.uniques,
               observed_at = excluded.observed_at",
          )?;
          for p in &points {
            stmt.execute(rusqlite::params![
              repo_str,
              encode_date(p.date),
              p.count,
              p.uniques,
              at_str,
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn replace_ranked_items(
    &self,
    repo:        &Repo,
    kind:        RankedKind,
    date:        NaiveDate,
    items:       &[RankedEntry],
    observed_at: DateTime<Utc>,
  ) -> Result<()> {
    let repo_str = repo.to_string();
    let kind_str = kind.as_str();
    let date_str = encode_date(date);
    let items    = items.to_vec();
    let at_str   = encode_dt(observed_at);

    self
      .conn
      .call(move |conn| {
        // Dropping `tx` without commit rolls back, so the delete is never
        // visible without the matching inserts.
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM ranked_items WHERE repo = ?1 AND kind = ?2 AND date = ?3",
          rusqlite::params![repo_str, kind_str, date_str],
        )?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO ranked_items
               (repo, kind, date, item_key, title, count, uniques, observed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          )?;
          for item in &items {
            stmt.execute(rusqlite::params![
              repo_str,
              kind_str,
              date_str,
              item.key,
              item.title,
              item.count,
              item.uniques,
              at_str,
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn replace_current_total(&self, total: CurrentTotal) -> Result<Option<CurrentTotal>> {
    let repo_str = total.repo.to_string();
    let at_str   = encode_dt(total.observed_at);
    let (count, uniques) = (total.count, total.uniques);

    let previous: Option<RawCurrentTotal> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let previous = tx
          .query_row(SELECT_TOTAL, rusqlite::params![repo_str], total_row)
          .optional()?;
        tx.execute(
          "INSERT INTO current_totals (repo, count, uniques, observed_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (repo) DO UPDATE SET
             count       = excluded.count,
             uniques     = excluded.uniques,
             observed_at = excluded.observed_at",
          rusqlite::params![repo_str, count, uniques, at_str],
        )?;
        tx.commit()?;
        Ok(previous)
      })
      .await?;

    previous.map(RawCurrentTotal::into_total).transpose()
  }

  // ── Traffic reads ─────────────────────────────────────────────────────────

  async fn current_total(&self, repo: &Repo) -> Result<Option<CurrentTotal>> {
    let repo_str = repo.to_string();

    let raw: Option<RawCurrentTotal> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(SELECT_TOTAL, rusqlite::params![repo_str], total_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawCurrentTotal::into_total).transpose()
  }

  async fn list_repos(&self) -> Result<Vec<Repo>> {
    let names: Vec<String> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT repo FROM daily_views
           UNION
           SELECT repo FROM current_totals
           ORDER BY repo",
        )?;
        let rows = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    names.iter().map(|s| decode_repo(s)).collect()
  }

  async fn daily_metrics(&self, repo: &Repo, range: DateRange) -> Result<Vec<DailyMetric>> {
    let repo_str   = repo.to_string();
    let (from, to) = range_params(range);

    let raws: Vec<RawDailyMetric> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT repo, date, count, uniques, observed_at
           FROM daily_views
           WHERE repo = ?1
             AND (?2 IS NULL OR date >= ?2)
             AND (?3 IS NULL OR date <= ?3)
           ORDER BY date",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![repo_str, from, to], |row| {
            Ok(RawDailyMetric {
              repo:        row.get(0)?,
              date:        row.get(1)?,
              count:       row.get(2)?,
              uniques:     row.get(3)?,
              observed_at: row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDailyMetric::into_metric).collect()
  }

  async fn ranked_items(
    &self,
    repo:  &Repo,
    kind:  RankedKind,
    range: DateRange,
  ) -> Result<Vec<RankedItem>> {
    let repo_str   = repo.to_string();
    let kind_str   = kind.as_str();
    let (from, to) = range_params(range);

    let raws: Vec<RawRankedItem> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT repo, kind, date, item_key, title, count, uniques, observed_at
           FROM ranked_items
           WHERE repo = ?1 AND kind = ?2
             AND (?3 IS NULL OR date >= ?3)
             AND (?4 IS NULL OR date <= ?4)
           ORDER BY date, count DESC, item_key",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![repo_str, kind_str, from, to], ranked_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRankedItem::into_item).collect()
  }

  async fn top_ranked(
    &self,
    repo:  &Repo,
    kind:  RankedKind,
    range: DateRange,
    limit: usize,
  ) -> Result<Vec<RankedTotal>> {
    let repo_str   = repo.to_string();
    let kind_str   = kind.as_str();
    let (from, to) = range_params(range);
    let limit_val  = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawRankedTotal> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT item_key, MAX(title), SUM(count) AS total, SUM(uniques)
           FROM ranked_items
           WHERE repo = ?1 AND kind = ?2
             AND (?3 IS NULL OR date >= ?3)
             AND (?4 IS NULL OR date <= ?4)
           GROUP BY item_key
           ORDER BY total DESC, item_key
           LIMIT ?5",
        )?;
        let rows = stmt
          .query_map(
            rusqlite::params![repo_str, kind_str, from, to, limit_val],
            |row| {
              Ok(RawRankedTotal {
                item_key: row.get(0)?,
                title:    row.get(1)?,
                count:    row.get(2)?,
                uniques:  row.get(3)?,
              })
            },
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(raws.into_iter().map(RawRankedTotal::into_total).collect())
  }

  // ── Usage ─────────────────────────────────────────────────────────────────

  async fn usage_records(&self, feature: &str) -> Result<Vec<UsageRecord>> {
    let feature = feature.to_owned();

    let raws: Vec<RawUsageRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {USAGE_COLUMNS}
           FROM usage_records
           WHERE feature = ?1
           ORDER BY repo, workflow_path"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![feature], usage_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUsageRecord::into_record).collect()
  }

  async fn save_usage_records(&self, records: Vec<UsageRecord>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          // first_seen is never overwritten and last_seen never moves back,
          // whatever the caller passes.
          let mut stmt = tx.prepare(
            "INSERT INTO usage_records (
               feature, repo, workflow_path, version, stars, language,
               first_seen, last_seen, is_active, deactivated_on, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (feature, repo, workflow_path) DO UPDATE SET
               version        = excluded.version,
               stars          = excluded.stars,
               language       = excluded.language,
               last_seen      = MAX(usage_records.last_seen, excluded.last_seen),
               is_active      = excluded.is_active,
               deactivated_on = excluded.deactivated_on,
               updated_at     = excluded.updated_at",
          )?;
          for r in &records {
            stmt.execute(rusqlite::params![
              r.feature,
              r.repo.as_str(),
              r.workflow_path,
              r.version,
              r.stars,
              r.language,
              encode_date(r.first_seen),
              encode_date(r.last_seen),
              r.is_active,
              r.deactivated_on.map(encode_date),
              encode_dt(r.updated_at),
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn upsert_usage_history(&self, point: UsageHistoryPoint) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO usage_history
             (feature, date, total_count, added_count, removed_count)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (feature, date) DO UPDATE SET
             total_count   = excluded.total_count,
             added_count   = excluded.added_count,
             removed_count = excluded.removed_count",
          rusqlite::params![
            point.feature,
            encode_date(point.date),
            point.total_count,
            point.added_count,
            point.removed_count,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn usage_history(
    &self,
    feature: &str,
    range:   DateRange,
  ) -> Result<Vec<UsageHistoryPoint>> {
    let feature    = feature.to_owned();
    let (from, to) = range_params(range);

    let raws: Vec<RawHistoryPoint> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT feature, date, total_count, added_count, removed_count
           FROM usage_history
           WHERE feature = ?1
             AND (?2 IS NULL OR date >= ?2)
             AND (?3 IS NULL OR date <= ?3)
           ORDER BY date",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![feature, from, to], |row| {
            Ok(RawHistoryPoint {
              feature:       row.get(0)?,
              date:          row.get(1)?,
              total_count:   row.get(2)?,
              added_count:   row.get(3)?,
              removed_count: row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHistoryPoint::into_point).collect()
  }

  async fn list_features(&self) -> Result<Vec<FeatureSummary>> {
    type FeatureRow = (String, u64, u64, u64, Option<String>);

    let rows: Vec<FeatureRow> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT feature,
                  COUNT(*),
                  SUM(CASE WHEN is_active THEN 1 ELSE 0 END) AS active,
                  SUM(CASE WHEN is_active THEN 0 ELSE 1 END),
                  MAX(last_seen)
           FROM usage_records
           GROUP BY feature
           ORDER BY active DESC, feature",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok::<FeatureRow, rusqlite::Error>((
              row.get(0)?,
              row.get(1)?,
              row.get(2)?,
              row.get(3)?,
              row.get(4)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(feature, total, active, inactive, last_seen)| {
        Ok(FeatureSummary {
          feature,
          total,
          active,
          inactive,
          last_seen: last_seen.as_deref().map(decode_date).transpose()?,
        })
      })
      .collect()
  }

  // ── Usage analytics ─────────────────────────────────────────────────────

  async fn usage_breakdown(
    &self,
    feature: &str,
    by: UsageDimension,
    limit: usize,
  ) -> Result<Vec<UsageBreakdown>> {
    type BreakdownRow = (Option<String>, u64, u64, u64);
    let feature = feature.to_owned();
    // Column names cannot be bound; `by` only ever names one of two columns.
    let column = by.as_str();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let rows: Vec<BreakdownRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT value, COUNT(*) AS repos, SUM(workflows) AS workflows,
                  COALESCE(SUM(stars), 0)
           FROM (SELECT {column} AS value, repo, COUNT(*) AS workflows,
                        MAX(COALESCE(stars, 0)) AS stars
                 FROM usage_records
                 WHERE feature = ?1 AND is_active
                 GROUP BY {column}, repo)
           GROUP BY value
           ORDER BY repos DESC, workflows DESC, value IS NULL, value
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![feature, limit], |row| {
            Ok::<BreakdownRow, rusqlite::Error>((
              row.get(0)?,
              row.get(1)?,
              row.get(2)?,
              row.get(3)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|(value, repos, workflows, stars)| UsageBreakdown { value, repos, workflows, stars })
        .collect(),
    )
  }

  async fn top_usage(
    &self,
    feature: &str,
    limit: usize,
    include_inactive: bool,
  ) -> Result<Vec<RepoUsage>> {
    type TopRow = (String, u64, Option<u64>, Option<String>, bool, String, String);
    let feature = feature.to_owned();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let rows: Vec<TopRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT repo, COUNT(*), MAX(stars) AS stars, MAX(language), MAX(is_active),
                  MIN(first_seen), MAX(last_seen)
           FROM usage_records
           WHERE feature = ?1 AND (?2 OR is_active)
           GROUP BY repo
           ORDER BY stars IS NULL, stars DESC, repo
           LIMIT ?3",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![feature, include_inactive, limit], |row| {
            Ok::<TopRow, rusqlite::Error>((
              row.get(0)?,
              row.get(1)?,
              row.get(2)?,
              row.get(3)?,
              row.get(4)?,
              row.get(5)?,
              row.get(6)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(repo, workflows, stars, language, is_active, first_seen, last_seen)| {
        Ok(RepoUsage {
          repo: decode_repo(&repo)?,
          workflows,
          stars,
          language,
          is_active,
          first_seen: decode_date(&first_seen)?,
          last_seen: decode_date(&last_seen)?,
        })
      })
      .collect()
  }

  async fn recent_activity(&self, feature: &str, since: NaiveDate) -> Result<RecentActivity> {
    let feature = feature.to_owned();
    let cutoff = encode_date(since);

    let (added, removed): (Vec<RawUsageRecord>, Vec<RawUsageRecord>) = self
      .conn
      .call(move |conn| {
        let mut added = conn.prepare(&format!(
          "SELECT {USAGE_COLUMNS}
           FROM usage_records
           WHERE feature = ?1 AND first_seen >= ?2
           ORDER BY first_seen DESC, stars IS NULL, stars DESC, repo, workflow_path"
        ))?;
        let added = added
          .query_map(rusqlite::params![feature, cutoff], usage_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut removed = conn.prepare(&format!(
          "SELECT {USAGE_COLUMNS}
           FROM usage_records
           WHERE feature = ?1 AND NOT is_active AND deactivated_on >= ?2
           ORDER BY deactivated_on DESC, stars IS NULL, stars DESC, repo, workflow_path"
        ))?;
        let removed = removed
          .query_map(rusqlite::params![feature, cutoff], usage_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((added, removed))
      })
      .await?;

    Ok(RecentActivity {
      since,
      added: added.into_iter().map(RawUsageRecord::into_record).collect::<Result<_>>()?,
      removed: removed.into_iter().map(RawUsageRecord::into_record).collect::<Result<_>>()?,
    })
  }
}
