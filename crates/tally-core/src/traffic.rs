//! Repository traffic types: daily views, current totals and ranked lists.
//!
//! GitHub only exposes the last fourteen days of traffic. Everything in this
//! module describes rows that Tally keeps long after that window has moved on.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

// ─── Repo ────────────────────────────────────────────────────────────────────

/// A repository full name, `owner/name`.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Repo(String);

impl Repo {
  pub fn as_str(&self) -> &str { &self.0 }

  pub fn owner(&self) -> &str {
    self.0.split_once('/').map(|(o, _)| o).unwrap_or_default()
  }

  pub fn name(&self) -> &str {
    self.0.split_once('/').map(|(_, n)| n).unwrap_or_default()
  }
}

impl FromStr for Repo {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    let valid = match s.split_once('/') {
      Some((owner, name)) => {
        !owner.is_empty()
          && !name.is_empty()
          && !name.contains('/')
          && !s.chars().any(char::is_whitespace)
      }
      None => false,
    };
    if valid {
      Ok(Self(s.to_owned()))
    } else {
      Err(Error::InvalidRepo(s.to_owned()))
    }
  }
}

impl TryFrom<String> for Repo {
  type Error = Error;

  fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

impl From<Repo> for String {
  fn from(r: Repo) -> Self { r.0 }
}

impl fmt::Display for Repo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

// ─── Daily series ────────────────────────────────────────────────────────────

/// One point of a fetched daily series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyPoint {
  pub date:    NaiveDate,
  pub count:   u64,
  pub uniques: u64,
}

/// A stored daily view count. At most one row exists per `(repo, date)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyMetric {
  pub repo:        Repo,
  pub date:        NaiveDate,
  pub count:       u64,
  pub uniques:     u64,
  /// When this date was last (re-)observed remotely.
  pub observed_at: DateTime<Utc>,
}

/// The rolling window totals GitHub reports alongside the daily series.
/// Replaced wholesale on every fetch; no history is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentTotal {
  pub repo:        Repo,
  pub count:       u64,
  pub uniques:     u64,
  pub observed_at: DateTime<Utc>,
}

// ─── Ranked lists ────────────────────────────────────────────────────────────

/// Which ranked list an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankedKind {
  Path,
  Referrer,
}

impl RankedKind {
  pub const ALL: [RankedKind; 2] = [RankedKind::Path, RankedKind::Referrer];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Path => "path",
      Self::Referrer => "referrer",
    }
  }
}

impl fmt::Display for RankedKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for RankedKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "path" => Ok(Self::Path),
      "referrer" => Ok(Self::Referrer),
      other => Err(format!("unknown ranked kind: {other:?}")),
    }
  }
}

/// One validated entry of a fetched ranked list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
  /// The path or referrer domain.
  pub key:     String,
  /// Page title; only popular paths carry one.
  pub title:   Option<String>,
  pub count:   u64,
  pub uniques: u64,
}

/// A stored ranked item. The set of items for one `(repo, kind, date)` is
/// always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedItem {
  pub repo:        Repo,
  pub kind:        RankedKind,
  pub date:        NaiveDate,
  pub key:         String,
  pub title:       Option<String>,
  pub count:       u64,
  pub uniques:     u64,
  pub observed_at: DateTime<Utc>,
}

/// Ranked items summed per key over a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedTotal {
  pub key:     String,
  pub title:   Option<String>,
  pub count:   u64,
  pub uniques: u64,
}

// ─── Ranges ──────────────────────────────────────────────────────────────────

/// An inclusive, optionally open-ended date range for read queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
  pub from: Option<NaiveDate>,
  pub to:   Option<NaiveDate>,
}

impl DateRange {
  pub fn all() -> Self { Self::default() }

  /// The `days` most recent days ending at (and including) `today`.
  pub fn last_days(today: NaiveDate, days: u32) -> Self {
    let span = u64::from(days.saturating_sub(1));
    Self {
      from: today.checked_sub_days(Days::new(span)),
      to:   Some(today),
    }
  }

  pub fn contains(&self, date: NaiveDate) -> bool {
    self.from.is_none_or(|f| date >= f) && self.to.is_none_or(|t| date <= t)
  }
}
