//! In-memory fakes of [`HistoryStore`] and [`Fetcher`] for unit tests.

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  sync::Mutex,
};

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::{
  fetch::{FetchError, Fetcher},
  snapshot::{RankedPayload, ViewsPayload},
  store::HistoryStore,
  traffic::{
    CurrentTotal, DailyMetric, DailyPoint, DateRange, RankedEntry, RankedItem,
    RankedKind, RankedTotal, Repo,
  },
  usage::{FeatureSummary, UsageHistoryPoint, UsageRecord},
};

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("injected write failure for {0}")]
pub struct MemoryError(String);

#[derive(Default)]
struct State {
  daily:   BTreeMap<(Repo, NaiveDate), DailyMetric>,
  totals:  BTreeMap<Repo, CurrentTotal>,
  ranked:  Vec<RankedItem>,
  usage:   BTreeMap<(String, Repo, String), UsageRecord>,
  history: BTreeMap<(String, NaiveDate), UsageHistoryPoint>,
}

#[derive(Default)]
pub struct MemoryStore {
  state:       Mutex<State>,
  fail_writes: Option<Repo>,
}

impl MemoryStore {
  /// A store whose traffic writes for `repo` always fail.
  pub fn failing_writes_for(repo: Repo) -> Self {
    Self { fail_writes: Some(repo), ..Self::default() }
  }

  fn check(&self, repo: &Repo) -> Result<(), MemoryError> {
    match &self.fail_writes {
      Some(r) if r == repo => Err(MemoryError(repo.to_string())),
      _ => Ok(()),
    }
  }

  fn state(&self) -> std::sync::MutexGuard<'_, State> { self.state.lock().unwrap() }
}

impl HistoryStore for MemoryStore {
  type Error = MemoryError;

  async fn upsert_daily_metrics(
    &self,
    repo: &Repo,
    points: &[DailyPoint],
    observed_at: DateTime<Utc>,
  ) -> Result<(), MemoryError> {
    self.check(repo)?;
    let mut state = self.state();
    for p in points {
      state.daily.insert((repo.clone(), p.date), DailyMetric {
        repo: repo.clone(),
        date: p.date,
        count: p.count,
        uniques: p.uniques,
        observed_at,
      });
    }
    Ok(())
  }

  async fn replace_ranked_items(
    &self,
    repo: &Repo,
    kind: RankedKind,
    date: NaiveDate,
    items: &[RankedEntry],
    observed_at: DateTime<Utc>,
  ) -> Result<(), MemoryError> {
    self.check(repo)?;
    let mut state = self.state();
    state
      .ranked
      .retain(|i| !(i.repo == *repo && i.kind == kind && i.date == date));
    state.ranked.extend(items.iter().map(|e| RankedItem {
      repo: repo.clone(),
      kind,
      date,
      key: e.key.clone(),
      title: e.title.clone(),
      count: e.count,
      uniques: e.uniques,
      observed_at,
    }));
    Ok(())
  }

  async fn replace_current_total(
    &self,
    total: CurrentTotal,
  ) -> Result<Option<CurrentTotal>, MemoryError> {
    self.check(&total.repo)?;
    Ok(self.state().totals.insert(total.repo.clone(), total))
  }

  async fn current_total(&self, repo: &Repo) -> Result<Option<CurrentTotal>, MemoryError> {
    Ok(self.state().totals.get(repo).cloned())
  }

  async fn list_repos(&self) -> Result<Vec<Repo>, MemoryError> {
    let state = self.state();
    let mut repos: Vec<Repo> = state
      .daily
      .keys()
      .map(|(r, _)| r.clone())
      .chain(state.totals.keys().cloned())
      .collect();
    repos.sort();
    repos.dedup();
    Ok(repos)
  }

  async fn daily_metrics(
    &self,
    repo: &Repo,
    range: DateRange,
  ) -> Result<Vec<DailyMetric>, MemoryError> {
    Ok(
      self
        .state()
        .daily
        .values()
        .filter(|m| m.repo == *repo && range.contains(m.date))
        .cloned()
        .collect(),
    )
  }

  async fn ranked_items(
    &self,
    repo: &Repo,
    kind: RankedKind,
    range: DateRange,
  ) -> Result<Vec<RankedItem>, MemoryError> {
    let mut items: Vec<RankedItem> = self
      .state()
      .ranked
      .iter()
      .filter(|i| i.repo == *repo && i.kind == kind && range.contains(i.date))
      .cloned()
      .collect();
    items.sort_by(|a, b| a.date.cmp(&b.date).then(b.count.cmp(&a.count)));
    Ok(items)
  }

  async fn top_ranked(
    &self,
    repo: &Repo,
    kind: RankedKind,
    range: DateRange,
    limit: usize,
  ) -> Result<Vec<RankedTotal>, MemoryError> {
    let mut sums: BTreeMap<String, RankedTotal> = BTreeMap::new();
    for item in self.ranked_items(repo, kind, range).await? {
      let t = sums.entry(item.key.clone()).or_insert_with(|| RankedTotal {
        key:     item.key.clone(),
        title:   item.title.clone(),
        count:   0,
        uniques: 0,
      });
      t.count += item.count;
      t.uniques += item.uniques;
    }
    let mut totals: Vec<RankedTotal> = sums.into_values().collect();
    totals.sort_by(|a, b| b.count.cmp(&a.count));
    totals.truncate(limit);
    Ok(totals)
  }

  async fn usage_records(&self, feature: &str) -> Result<Vec<UsageRecord>, MemoryError> {
    Ok(
      self
        .state()
        .usage
        .values()
        .filter(|r| r.feature == feature)
        .cloned()
        .collect(),
    )
  }

  async fn save_usage_records(&self, records: Vec<UsageRecord>) -> Result<(), MemoryError> {
    let mut state = self.state();
    for r in records {
      state
        .usage
        .insert((r.feature.clone(), r.repo.clone(), r.workflow_path.clone()), r);
    }
    Ok(())
  }

  async fn upsert_usage_history(&self, point: UsageHistoryPoint) -> Result<(), MemoryError> {
    self
      .state()
      .history
      .insert((point.feature.clone(), point.date), point);
    Ok(())
  }

  async fn usage_history(
    &self,
    feature: &str,
    range: DateRange,
  ) -> Result<Vec<UsageHistoryPoint>, MemoryError> {
    Ok(
      self
        .state()
        .history
        .values()
        .filter(|p| p.feature == feature && range.contains(p.date))
        .cloned()
        .collect(),
    )
  }

  async fn list_features(&self) -> Result<Vec<FeatureSummary>, MemoryError> {
    let mut by_feature: BTreeMap<String, FeatureSummary> = BTreeMap::new();
    for r in self.state().usage.values() {
      let s = by_feature
        .entry(r.feature.clone())
        .or_insert_with(|| FeatureSummary {
          feature:   r.feature.clone(),
          total:     0,
          active:    0,
          inactive:  0,
          last_seen: None,
        });
      s.total += 1;
      if r.is_active {
        s.active += 1;
      } else {
        s.inactive += 1;
      }
      s.last_seen = s.last_seen.max(Some(r.last_seen));
    }
    Ok(by_feature.into_values().collect())
  }
}

// ─── Fetcher ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StaticError {
  #[error("no canned response for {0}")]
  Missing(String),
  #[error("undecodable body for {0}")]
  Garbled(String),
}

impl FetchError for StaticError {
  fn is_transient(&self) -> bool { false }

  fn is_malformed(&self) -> bool { matches!(self, Self::Garbled(_)) }
}

/// Serves canned payloads. Views must be present unless the repository is
/// listed in `garbled`; ranked lists default to empty; search pages past the
/// end are empty.
#[derive(Default)]
pub struct StaticFetcher {
  pub views:     HashMap<Repo, ViewsPayload>,
  pub paths:     HashMap<Repo, Vec<RankedPayload>>,
  pub referrers: HashMap<Repo, Vec<RankedPayload>>,
  pub search:    HashMap<String, Vec<Vec<crate::usage::UsageHit>>>,
  pub garbled:   HashSet<Repo>,
}

impl Fetcher for StaticFetcher {
  type Error = StaticError;

  async fn fetch_views(&self, repo: &Repo) -> Result<ViewsPayload, StaticError> {
    if self.garbled.contains(repo) {
      return Err(StaticError::Garbled(repo.to_string()));
    }
    self
      .views
      .get(repo)
      .cloned()
      .ok_or_else(|| StaticError::Missing(repo.to_string()))
  }

  async fn fetch_ranked(
    &self,
    repo: &Repo,
    kind: RankedKind,
  ) -> Result<Vec<RankedPayload>, StaticError> {
    let lists = match kind {
      RankedKind::Path => &self.paths,
      RankedKind::Referrer => &self.referrers,
    };
    Ok(lists.get(repo).cloned().unwrap_or_default())
  }

  async fn search_usage(
    &self,
    feature: &str,
    page: u32,
  ) -> Result<Vec<crate::usage::UsageHit>, StaticError> {
    Ok(
      self
        .search
        .get(feature)
        .and_then(|pages| pages.get(page as usize - 1))
        .cloned()
        .unwrap_or_default(),
    )
  }
}
