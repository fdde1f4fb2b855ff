//! Read-side aggregates over stored usage records.
//!
//! These are the reference computations behind the provided
//! [`HistoryStore`](crate::store::HistoryStore) analytics methods. Backends
//! with a query language override those methods and must agree with the
//! functions here.

use std::{
  cmp::{Ordering, Reverse},
  collections::{BTreeMap, HashMap},
  fmt,
  str::FromStr,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{traffic::Repo, usage::UsageRecord};

/// Attribute of a usage record to group adoption by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageDimension {
  /// The pinned ref, e.g. `v4`.
  Version,
  /// The primary language of the repository.
  Language,
}

impl UsageDimension {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Version => "version",
      Self::Language => "language",
    }
  }

  fn value(self, record: &UsageRecord) -> Option<&str> {
    match self {
      Self::Version => record.version.as_deref(),
      Self::Language => record.language.as_deref(),
    }
  }
}

impl fmt::Display for UsageDimension {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for UsageDimension {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "version" => Ok(Self::Version),
      "language" => Ok(Self::Language),
      other => Err(format!("unknown usage dimension: {other:?}")),
    }
  }
}

/// Active adoption sharing one value of a [`UsageDimension`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageBreakdown {
  /// `None` groups records where the value is unknown.
  pub value:     Option<String>,
  pub repos:     u64,
  pub workflows: u64,
  /// Stars summed once per repository.
  pub stars:     u64,
}

/// Adoption of a feature by one repository, across its workflows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoUsage {
  pub repo:       Repo,
  pub workflows:  u64,
  pub stars:      Option<u64>,
  pub language:   Option<String>,
  /// True if any workflow of the repository is active.
  pub is_active:  bool,
  pub first_seen: NaiveDate,
  pub last_seen:  NaiveDate,
}

/// Entities that started or stopped using a feature on or after `since`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentActivity {
  pub since:   NaiveDate,
  /// First seen on or after `since`, newest first.
  pub added:   Vec<UsageRecord>,
  /// Currently inactive and deactivated on or after `since`, newest first.
  pub removed: Vec<UsageRecord>,
}

/// Group active records by `by`, most repositories first. Ties go to the
/// group with more workflows, then to known values in ascending order.
pub fn breakdown(records: &[UsageRecord], by: UsageDimension, limit: usize) -> Vec<UsageBreakdown> {
  // value -> repo -> (workflows, stars)
  let mut groups: BTreeMap<Option<&str>, HashMap<&Repo, (u64, u64)>> = BTreeMap::new();
  for r in records.iter().filter(|r| r.is_active) {
    let entry = groups
      .entry(by.value(r))
      .or_default()
      .entry(&r.repo)
      .or_default();
    entry.0 += 1;
    entry.1 = entry.1.max(r.stars.unwrap_or(0));
  }

  let mut out: Vec<UsageBreakdown> = groups
    .into_iter()
    .map(|(value, repos)| UsageBreakdown {
      value:     value.map(str::to_owned),
      repos:     repos.len() as u64,
      workflows: repos.values().map(|(w, _)| w).sum(),
      stars:     repos.values().map(|(_, s)| s).sum(),
    })
    .collect();
  out.sort_by(|a, b| {
    (Reverse(a.repos), Reverse(a.workflows), a.value.is_none(), &a.value).cmp(&(
      Reverse(b.repos),
      Reverse(b.workflows),
      b.value.is_none(),
      &b.value,
    ))
  });
  out.truncate(limit);
  out
}

/// Repositories using the feature, most starred first; unknown star counts
/// sort last. Inactive-only repositories are skipped unless
/// `include_inactive`.
pub fn top_usage(records: &[UsageRecord], limit: usize, include_inactive: bool) -> Vec<RepoUsage> {
  let mut by_repo: BTreeMap<&Repo, RepoUsage> = BTreeMap::new();
  for r in records.iter().filter(|r| include_inactive || r.is_active) {
    let u = by_repo.entry(&r.repo).or_insert_with(|| RepoUsage {
      repo:       r.repo.clone(),
      workflows:  0,
      stars:      None,
      language:   None,
      is_active:  false,
      first_seen: r.first_seen,
      last_seen:  r.last_seen,
    });
    u.workflows += 1;
    u.stars = u.stars.max(r.stars);
    u.language = u.language.clone().max(r.language.clone());
    u.is_active |= r.is_active;
    u.first_seen = u.first_seen.min(r.first_seen);
    u.last_seen = u.last_seen.max(r.last_seen);
  }

  let mut out: Vec<RepoUsage> = by_repo.into_values().collect();
  out.sort_by(|a, b| (Reverse(a.stars), &a.repo).cmp(&(Reverse(b.stars), &b.repo)));
  out.truncate(limit);
  out
}

fn newest_first(
  day: fn(&UsageRecord) -> Option<NaiveDate>,
) -> impl Fn(&UsageRecord, &UsageRecord) -> Ordering {
  move |a, b| {
    (Reverse(day(a)), Reverse(a.stars), &a.repo, &a.workflow_path).cmp(&(
      Reverse(day(b)),
      Reverse(b.stars),
      &b.repo,
      &b.workflow_path,
    ))
  }
}

/// Split out the records that changed state on or after `since`.
pub fn recent_activity(records: &[UsageRecord], since: NaiveDate) -> RecentActivity {
  let mut added: Vec<UsageRecord> =
    records.iter().filter(|r| r.first_seen >= since).cloned().collect();
  added.sort_by(newest_first(|r| Some(r.first_seen)));

  let mut removed: Vec<UsageRecord> = records
    .iter()
    .filter(|r| !r.is_active && r.deactivated_on.is_some_and(|d| d >= since))
    .cloned()
    .collect();
  removed.sort_by(newest_first(|r| r.deactivated_on));

  RecentActivity { since, added, removed }
}
