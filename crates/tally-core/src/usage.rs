//! Feature adoption types.
//!
//! A feature is a GitHub Action reference such as `actions/checkout`. Usage
//! is discovered by code search rather than queried per entity, so an entity
//! that stops showing up in the search has to be reclassified rather than
//! deleted.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::traffic::Repo;

/// Identity of one usage: a workflow file in a repository.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UsageKey {
  pub repo:          Repo,
  pub workflow_path: String,
}

impl fmt::Display for UsageKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.repo, self.workflow_path)
  }
}

/// One search result: a workflow that references the feature right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageHit {
  pub repo:          Repo,
  pub workflow_path: String,
  /// The ref after `@`, when the workflow could be read.
  pub version:       Option<String>,
  pub stars:         Option<u64>,
  pub language:      Option<String>,
}

impl UsageHit {
  pub fn key(&self) -> UsageKey {
    UsageKey {
      repo:          self.repo.clone(),
      workflow_path: self.workflow_path.clone(),
    }
  }
}

/// The durable record of one entity's relationship to a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
  pub feature:        String,
  pub repo:           Repo,
  pub workflow_path:  String,
  pub version:        Option<String>,
  pub stars:          Option<u64>,
  pub language:       Option<String>,
  /// Set on creation, never changed.
  pub first_seen:     NaiveDate,
  /// The last day the entity was actually observed. Only moves forward.
  pub last_seen:      NaiveDate,
  /// True iff the entity appeared in the most recent search pass.
  pub is_active:      bool,
  /// Day of the most recent active → inactive transition; cleared when the
  /// entity reappears.
  pub deactivated_on: Option<NaiveDate>,
  pub updated_at:     DateTime<Utc>,
}

impl UsageRecord {
  pub fn key(&self) -> UsageKey {
    UsageKey {
      repo:          self.repo.clone(),
      workflow_path: self.workflow_path.clone(),
    }
  }
}

/// Daily adoption summary for a feature; one row per `(feature, date)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageHistoryPoint {
  pub feature:       String,
  pub date:          NaiveDate,
  pub total_count:   u64,
  pub added_count:   u64,
  pub removed_count: u64,
}

/// Per-feature counts over all stored records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSummary {
  pub feature:   String,
  pub total:     u64,
  pub active:    u64,
  pub inactive:  u64,
  pub last_seen: Option<NaiveDate>,
}

/// Filter for listing usage records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
  Active,
  Inactive,
  #[default]
  All,
}

impl UsageStatus {
  pub fn matches(self, record: &UsageRecord) -> bool {
    match self {
      Self::Active => record.is_active,
      Self::Inactive => !record.is_active,
      Self::All => true,
    }
  }
}

impl FromStr for UsageStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "active" => Ok(Self::Active),
      "inactive" => Ok(Self::Inactive),
      "all" => Ok(Self::All),
      other => Err(format!("unknown usage status: {other:?}")),
    }
  }
}
