//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings and calendar dates as
//! `YYYY-MM-DD`, so lexical order in SQL matches chronological order.

use chrono::{DateTime, NaiveDate, Utc};
use tally_core::{
  traffic::{CurrentTotal, DailyMetric, RankedItem, RankedKind, RankedTotal, Repo},
  usage::{UsageHistoryPoint, UsageRecord},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── NaiveDate ───────────────────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Repo / RankedKind ───────────────────────────────────────────────────────

pub fn decode_repo(s: &str) -> Result<Repo> { Ok(s.parse()?) }

pub fn decode_kind(s: &str) -> Result<RankedKind> { s.parse().map_err(Error::Decode) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `daily_views` row.
pub struct RawDailyMetric {
  pub repo:        String,
  pub date:        String,
  pub count:       u64,
  pub uniques:     u64,
  pub observed_at: String,
}

impl RawDailyMetric {
  pub fn into_metric(self) -> Result<DailyMetric> {
    Ok(DailyMetric {
      repo:        decode_repo(&self.repo)?,
      date:        decode_date(&self.date)?,
      count:       self.count,
      uniques:     self.uniques,
      observed_at: decode_dt(&self.observed_at)?,
    })
  }
}

/// Raw values read directly from a `current_totals` row.
pub struct RawCurrentTotal {
  pub repo:        String,
  pub count:       u64,
  pub uniques:     u64,
  pub observed_at: String,
}

impl RawCurrentTotal {
  pub fn into_total(self) -> Result<CurrentTotal> {
    Ok(CurrentTotal {
      repo:        decode_repo(&self.repo)?,
      count:       self.count,
      uniques:     self.uniques,
      observed_at: decode_dt(&self.observed_at)?,
    })
  }
}

/// Raw values read directly from a `ranked_items` row.
pub struct RawRankedItem {
  pub repo:        String,
  pub kind:        String,
  pub date:        String,
  pub item_key:    String,
  pub title:       Option<String>,
  pub count:       u64,
  pub uniques:     u64,
  pub observed_at: String,
}

impl RawRankedItem {
  pub fn into_item(self) -> Result<RankedItem> {
    Ok(RankedItem {
      repo:        decode_repo(&self.repo)?,
      kind:        decode_kind(&self.kind)?,
      date:        decode_date(&self.date)?,
      key:         self.item_key,
      title:       self.title,
      count:       self.count,
      uniques:     self.uniques,
      observed_at: decode_dt(&self.observed_at)?,
    })
  }
}

/// Per-key sums; already fully typed, kept for symmetry with the other rows.
pub struct RawRankedTotal {
  pub item_key: String,
  pub title:    Option<String>,
  pub count:    u64,
  pub uniques:  u64,
}

impl RawRankedTotal {
  pub fn into_total(self) -> RankedTotal {
    RankedTotal {
      key:     self.item_key,
      title:   self.title,
      count:   self.count,
      uniques: self.uniques,
    }
  }
}

/// Raw values read directly from a `usage_records` row.
pub struct RawUsageRecord {
  pub feature:        String,
  pub repo:           String,
  pub workflow_path:  String,
  pub version:        Option<String>,
  pub stars:          Option<u64>,
  pub language:       Option<String>,
  pub first_seen:     String,
  pub last_seen:      String,
  pub is_active:      bool,
  pub deactivated_on: Option<String>,
  pub updated_at:     String,
}

impl RawUsageRecord {
  pub fn into_record(self) -> Result<UsageRecord> {
    Ok(UsageRecord {
      feature:        self.feature,
      repo:           decode_repo(&self.repo)?,
      workflow_path:  self.workflow_path,
      version:        self.version,
      stars:          self.stars,
      language:       self.language,
      first_seen:     decode_date(&self.first_seen)?,
      last_seen:      decode_date(&self.last_seen)?,
      is_active:      self.is_active,
      deactivated_on: self.deactivated_on.as_deref().map(decode_date).transpose()?,
      updated_at:     decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw values read directly from a `usage_history` row.
pub struct RawHistoryPoint {
  pub feature:       String,
  pub date:          String,
  pub total_count:   u64,
  pub added_count:   u64,
  pub removed_count: u64,
}

impl RawHistoryPoint {
  pub fn into_point(self) -> Result<UsageHistoryPoint> {
    Ok(UsageHistoryPoint {
      feature:       self.feature,
      date:          decode_date(&self.date)?,
      total_count:   self.total_count,
      added_count:   self.added_count,
      removed_count: self.removed_count,
    })
  }
}
