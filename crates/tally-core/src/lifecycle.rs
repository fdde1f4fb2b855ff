//! The lifecycle classifier for search-derived usage.
//!
//! Each entity moves through `unknown → active ⇄ inactive`. Unknown is only
//! the absence of a record; once created, a record is never deleted.
//!
//! | Before   | In search pass | After    | `last_seen` | `deactivated_on` |
//! |----------|----------------|----------|-------------|------------------|
//! | unknown  | yes            | active   | today       | none             |
//! | active   | yes            | active   | today       | none             |
//! | inactive | yes            | active   | today       | cleared          |
//! | active   | no             | inactive | unchanged   | today            |
//! | inactive | no             | inactive | unchanged   | unchanged        |

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::{
  Error, Result,
  fetch::Fetcher,
  store::HistoryStore,
  usage::{UsageHistoryPoint, UsageHit, UsageKey, UsageRecord},
};

// ─── Classification ──────────────────────────────────────────────────────────

/// How one entity's state moved during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  /// unknown → active
  Appeared,
  /// active → active
  Continued,
  /// inactive → active
  Reappeared,
  /// active → inactive
  Disappeared,
}

/// The outcome of classifying one search pass against stored state.
#[derive(Debug, Clone, Default)]
pub struct Classification {
  /// Records that differ from what is stored and must be saved.
  pub changed:     Vec<UsageRecord>,
  pub added:       usize,
  pub continued:   usize,
  pub reactivated: usize,
  pub deactivated: usize,
}

impl Classification {
  fn count(&mut self, t: Transition) {
    match t {
      Transition::Appeared => self.added += 1,
      Transition::Continued => self.continued += 1,
      Transition::Reappeared => self.reactivated += 1,
      Transition::Disappeared => self.deactivated += 1,
    }
  }
}

/// Classify the entities seen in a search pass (`observed`) against every
/// stored record for `feature` (`known`).
///
/// Absence only means disappearance when the pass read every result page. An
/// incomplete pass (`complete == false`) updates what it saw and leaves every
/// unseen record as it was.
///
/// Re-running with the same inputs on the same day yields no further changes.
pub fn classify(
  feature: &str,
  known: Vec<UsageRecord>,
  observed: Vec<UsageHit>,
  complete: bool,
  today: NaiveDate,
  now: DateTime<Utc>,
) -> Classification {
  let mut known: HashMap<UsageKey, UsageRecord> =
    known.into_iter().map(|r| (r.key(), r)).collect();
  let mut out = Classification::default();

  for (key, hit) in dedup_hits(observed) {
    match known.remove(&key) {
      None => {
        out.count(Transition::Appeared);
        out.changed.push(UsageRecord {
          feature:        feature.to_owned(),
          repo:           hit.repo,
          workflow_path:  hit.workflow_path,
          version:        hit.version,
          stars:          hit.stars,
          language:       hit.language,
          first_seen:     today,
          last_seen:      today,
          is_active:      true,
          deactivated_on: None,
          updated_at:     now,
        });
      }
      Some(before) => {
        let transition = if before.is_active {
          Transition::Continued
        } else {
          Transition::Reappeared
        };
        out.count(transition);

        let mut after = before.clone();
        after.last_seen = after.last_seen.max(today);
        after.is_active = true;
        after.deactivated_on = None;
        // Advisory metadata: refresh when known, never forget a value.
        after.version = hit.version.or(after.version);
        after.stars = hit.stars.or(after.stars);
        after.language = hit.language.or(after.language);

        if after != before {
          after.updated_at = now;
          out.changed.push(after);
        }
      }
    }
  }

  if !complete {
    return out;
  }

  // Whatever is left was not observed this pass.
  let mut missing: Vec<UsageRecord> =
    known.into_values().filter(|r| r.is_active).collect();
  missing.sort_by(|a, b| a.key().cmp(&b.key()));
  for mut record in missing {
    out.count(Transition::Disappeared);
    record.is_active = false;
    record.deactivated_on = Some(today);
    record.updated_at = now;
    out.changed.push(record);
  }

  out
}

/// Collapse hits for the same `(repo, workflow_path)`, keeping the first
/// non-empty value of each advisory field.
fn dedup_hits(hits: Vec<UsageHit>) -> BTreeMap<UsageKey, UsageHit> {
  let mut unique: BTreeMap<UsageKey, UsageHit> = BTreeMap::new();
  for hit in hits {
    match unique.get_mut(&hit.key()) {
      Some(existing) => {
        existing.version = existing.version.take().or(hit.version);
        existing.stars = existing.stars.or(hit.stars);
        existing.language = existing.language.take().or(hit.language);
      }
      None => {
        unique.insert(hit.key(), hit);
      }
    }
  }
  unique
}

/// Derive the daily summary for `feature` on `date` from record state.
///
/// Pure: the same records always give the same point.
pub fn summarize_day(
  feature: &str,
  records: &[UsageRecord],
  date: NaiveDate,
) -> UsageHistoryPoint {
  let total_count = records.iter().filter(|r| r.is_active).count();
  let added_count = records.iter().filter(|r| r.first_seen == date).count();
  let removed_count = records
    .iter()
    .filter(|r| !r.is_active && r.deactivated_on == Some(date))
    .count();

  UsageHistoryPoint {
    feature:       feature.to_owned(),
    date,
    total_count:   total_count as u64,
    added_count:   added_count as u64,
    removed_count: removed_count as u64,
  }
}

// ─── Tracker ─────────────────────────────────────────────────────────────────

/// The hits of one search pass, and whether every result page was read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPass {
  pub hits:     Vec<UsageHit>,
  pub complete: bool,
}

/// What one tracking pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackSummary {
  pub feature:     String,
  pub observed:    usize,
  /// False when the page cap cut the search short; no record was deactivated.
  pub complete:    bool,
  pub added:       usize,
  pub continued:   usize,
  pub reactivated: usize,
  pub deactivated: usize,
  pub history:     UsageHistoryPoint,
}

/// Sole writer of usage records and usage history.
pub struct Tracker<'a, S, F> {
  store:     &'a S,
  fetcher:   &'a F,
  max_pages: u32,
}

impl<'a, S: HistoryStore, F: Fetcher> Tracker<'a, S, F> {
  pub fn new(store: &'a S, fetcher: &'a F, max_pages: u32) -> Self {
    Self { store, fetcher, max_pages }
  }

  /// Page through the search results for `feature` until an empty page (or
  /// the page cap) is reached.
  pub async fn search_all(&self, feature: &str) -> Result<SearchPass> {
    let mut hits = Vec::new();

    for page in 1..=self.max_pages {
      let batch = self
        .fetcher
        .search_usage(feature, page)
        .await
        .map_err(|e| Error::fetch(feature, e))?;
      if batch.is_empty() {
        return Ok(SearchPass { hits, complete: true });
      }
      tracing::debug!(feature, page, hits = batch.len(), "search page");
      hits.extend(batch);
    }

    tracing::warn!(
      feature,
      max_pages = self.max_pages,
      "search page cap reached, skipping deactivation for this pass"
    );
    Ok(SearchPass { hits, complete: false })
  }

  /// Run one full pass for `feature`: search, classify, save, summarise.
  pub async fn track(
    &self,
    feature: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
  ) -> Result<TrackSummary> {
    let SearchPass { hits: observed, complete } = self.search_all(feature).await?;
    let observed_len = observed.len();

    let known = self
      .store
      .usage_records(feature)
      .await
      .map_err(|e| Error::store(feature, e))?;

    let classification = classify(feature, known, observed, complete, today, now);
    tracing::info!(
      feature,
      added = classification.added,
      continued = classification.continued,
      reactivated = classification.reactivated,
      deactivated = classification.deactivated,
      "classified search pass"
    );

    if !classification.changed.is_empty() {
      self
        .store
        .save_usage_records(classification.changed)
        .await
        .map_err(|e| Error::store(feature, e))?;
    }

    let history = self.summarize_day(feature, today).await?;

    Ok(TrackSummary {
      feature: feature.to_owned(),
      observed: observed_len,
      complete,
      added: classification.added,
      continued: classification.continued,
      reactivated: classification.reactivated,
      deactivated: classification.deactivated,
      history,
    })
  }

  /// Recompute and upsert the summary for `(feature, date)` from the stored
  /// records.
  pub async fn summarize_day(
    &self,
    feature: &str,
    date: NaiveDate,
  ) -> Result<UsageHistoryPoint> {
    let records = self
      .store
      .usage_records(feature)
      .await
      .map_err(|e| Error::store(feature, e))?;
    let point = summarize_day(feature, &records, date);

    self
      .store
      .upsert_usage_history(point.clone())
      .await
      .map_err(|e| Error::store(feature, e))?;
    Ok(point)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;

  use super::*;
  use crate::{
    testing::{MemoryStore, StaticFetcher},
    traffic::DateRange,
  };

  const FEATURE: &str = "flox/install-flox-action";

  fn day(n: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2024, 3, n).unwrap() }

  fn at(n: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, n, 6, 0, 0).unwrap() }

  fn hit(repo: &str, version: Option<&str>) -> UsageHit {
    UsageHit {
      repo:          repo.parse().unwrap(),
      workflow_path: ".github/workflows/ci.yml".into(),
      version:       version.map(str::to_owned),
      stars:         Some(10),
      language:      Some("Rust".into()),
    }
  }

  async fn pass(store: &MemoryStore, hits: Vec<UsageHit>, n: u32) -> TrackSummary {
    let mut fetcher = StaticFetcher::default();
    fetcher.search.insert(FEATURE.into(), vec![hits]);
    Tracker::new(store, &fetcher, 10)
      .track(FEATURE, day(n), at(n))
      .await
      .unwrap()
  }

  async fn only_record(store: &MemoryStore) -> UsageRecord {
    let records = store.usage_records(FEATURE).await.unwrap();
    assert_eq!(records.len(), 1, "records are never duplicated or deleted");
    records.into_iter().next().unwrap()
  }

  #[tokio::test]
  async fn transition_table_over_four_days() {
    let store = MemoryStore::default();
    let e = || vec![hit("octo/cat", Some("v1"))];

    pass(&store, e(), 1).await;
    let r = only_record(&store).await;
    assert!(r.is_active);
    assert_eq!((r.first_seen, r.last_seen), (day(1), day(1)));

    pass(&store, e(), 2).await;
    let r = only_record(&store).await;
    assert!(r.is_active);
    assert_eq!((r.first_seen, r.last_seen), (day(1), day(2)));

    let s3 = pass(&store, vec![], 3).await;
    let r = only_record(&store).await;
    assert!(!r.is_active);
    assert_eq!(r.last_seen, day(2), "last_seen is not advanced on disappearance");
    assert_eq!(r.deactivated_on, Some(day(3)));
    assert_eq!(s3.deactivated, 1);

    let s4 = pass(&store, e(), 4).await;
    let r = only_record(&store).await;
    assert!(r.is_active);
    assert_eq!((r.first_seen, r.last_seen), (day(1), day(4)));
    assert_eq!(r.deactivated_on, None);
    assert_eq!(s4.reactivated, 1);
  }

  #[tokio::test]
  async fn rerunning_the_same_day_is_idempotent() {
    let store = MemoryStore::default();
    let hits = || vec![hit("octo/cat", Some("v1")), hit("octo/dog", None)];

    let first = pass(&store, hits(), 5).await;
    let before = store.usage_records(FEATURE).await.unwrap();
    let second = pass(&store, hits(), 5).await;
    let after = store.usage_records(FEATURE).await.unwrap();

    assert_eq!(before, after);
    assert_eq!(first.added, 2);
    assert_eq!(second.added, 0);
    assert_eq!(second.continued, 2);
    assert_eq!(first.history, second.history);
  }

  #[tokio::test]
  async fn rerunning_a_disappearance_day_does_not_move_it() {
    let store = MemoryStore::default();
    pass(&store, vec![hit("octo/cat", None)], 1).await;
    pass(&store, vec![], 2).await;
    let again = pass(&store, vec![], 2).await;

    assert_eq!(again.deactivated, 0);
    assert_eq!(again.history.removed_count, 1);
    assert_eq!(only_record(&store).await.deactivated_on, Some(day(2)));
  }

  #[test]
  fn duplicate_hits_collapse_into_one_record() {
    let c = classify(
      FEATURE,
      vec![],
      vec![hit("octo/cat", None), hit("octo/cat", Some("v4"))],
      true,
      day(1),
      at(1),
    );
    assert_eq!(c.added, 1);
    assert_eq!(c.changed.len(), 1);
    assert_eq!(c.changed[0].version.as_deref(), Some("v4"));
  }

  #[test]
  fn version_is_advisory() {
    let first = classify(FEATURE, vec![], vec![hit("octo/cat", Some("v3"))], true, day(1), at(1));
    let known = first.changed;

    let bumped = classify(
      FEATURE,
      known.clone(),
      vec![hit("octo/cat", Some("v4"))],
      true,
      day(2),
      at(2),
    );
    assert_eq!(bumped.continued, 1);
    assert_eq!(bumped.added, 0);
    assert_eq!(bumped.changed[0].version.as_deref(), Some("v4"));
    assert_eq!(bumped.changed[0].first_seen, day(1));

    let unknown = classify(FEATURE, known, vec![hit("octo/cat", None)], true, day(2), at(2));
    assert_eq!(unknown.changed[0].version.as_deref(), Some("v3"));
  }

  #[test]
  fn inactive_records_stay_untouched_when_still_missing() {
    let mut record = classify(FEATURE, vec![], vec![hit("octo/cat", None)], true, day(1), at(1))
      .changed
      .remove(0);
    record.is_active = false;
    record.deactivated_on = Some(day(2));

    let c = classify(FEATURE, vec![record], vec![], true, day(3), at(3));
    assert!(c.changed.is_empty());
    assert_eq!(c.deactivated, 0);
  }

  #[test]
  fn summary_counts_actives_additions_and_removals() {
    let mk = |repo: &str, first: u32, active: bool, deactivated: Option<u32>| UsageRecord {
      feature:        FEATURE.into(),
      repo:           repo.parse().unwrap(),
      workflow_path:  "w.yml".into(),
      version:        None,
      stars:          None,
      language:       None,
      first_seen:     day(first),
      last_seen:      day(first),
      is_active:      active,
      deactivated_on: deactivated.map(day),
      updated_at:     at(first),
    };
    let records = [
      mk("a/a", 1, true, None),
      mk("b/b", 3, true, None),
      mk("c/c", 1, false, Some(3)),
      mk("d/d", 1, false, Some(2)),
    ];

    let p = summarize_day(FEATURE, &records, day(3));
    assert_eq!(p.total_count, 2);
    assert_eq!(p.added_count, 1);
    assert_eq!(p.removed_count, 1);
    assert_eq!(p, summarize_day(FEATURE, &records, day(3)));
  }

  #[tokio::test]
  async fn summarize_day_twice_upserts_one_row() {
    let store = MemoryStore::default();
    pass(&store, vec![hit("octo/cat", None)], 1).await;

    let fetcher = StaticFetcher::default();
    let tracker = Tracker::new(&store, &fetcher, 10);
    let a = tracker.summarize_day(FEATURE, day(1)).await.unwrap();
    let b = tracker.summarize_day(FEATURE, day(1)).await.unwrap();

    assert_eq!(a, b);
    let rows = store.usage_history(FEATURE, DateRange::all()).await.unwrap();
    assert_eq!(rows, vec![a]);
  }

  #[tokio::test]
  async fn search_pages_until_empty() {
    let store = MemoryStore::default();
    let mut fetcher = StaticFetcher::default();
    fetcher.search.insert(FEATURE.into(), vec![
      vec![hit("a/a", None)],
      vec![hit("b/b", None)],
      vec![],
      vec![hit("never/read", None)],
    ]);

    let pass = Tracker::new(&store, &fetcher, 10).search_all(FEATURE).await.unwrap();
    assert_eq!(pass.hits.len(), 2);
    assert!(pass.complete);
  }

  #[tokio::test]
  async fn search_stops_at_page_cap() {
    let store = MemoryStore::default();
    let mut fetcher = StaticFetcher::default();
    fetcher.search.insert(FEATURE.into(), vec![
      vec![hit("a/a", None)],
      vec![hit("b/b", None)],
      vec![hit("c/c", None)],
    ]);

    let pass = Tracker::new(&store, &fetcher, 2).search_all(FEATURE).await.unwrap();
    assert_eq!(pass.hits.len(), 2);
    assert!(!pass.complete);
  }

  #[tokio::test]
  async fn capped_search_does_not_deactivate_unread_records() {
    let store = MemoryStore::default();
    let mut fetcher = StaticFetcher::default();
    fetcher.search.insert(FEATURE.into(), vec![
      vec![hit("a/a", None)],
      vec![hit("b/b", None)],
      vec![hit("c/c", None)],
    ]);

    let full = Tracker::new(&store, &fetcher, 10)
      .track(FEATURE, day(1), at(1))
      .await
      .unwrap();
    assert!(full.complete);
    assert_eq!(full.added, 3);

    let capped = Tracker::new(&store, &fetcher, 2)
      .track(FEATURE, day(2), at(2))
      .await
      .unwrap();
    assert!(!capped.complete);
    assert_eq!(capped.continued, 2);
    assert_eq!(capped.deactivated, 0);
    assert_eq!(capped.history.removed_count, 0);
    assert_eq!(capped.history.total_count, 3);

    let records = store.usage_records(FEATURE).await.unwrap();
    let c = records.iter().find(|r| r.repo.as_str() == "c/c").unwrap();
    assert!(c.is_active);
    assert_eq!(c.last_seen, day(1), "unread record keeps its last sighting");
    assert_eq!(c.deactivated_on, None);
  }

  #[test]
  fn incomplete_pass_skips_the_disappearance_sweep() {
    let known = classify(FEATURE, vec![], vec![hit("octo/cat", None)], true, day(1), at(1)).changed;

    let partial = classify(FEATURE, known.clone(), vec![], false, day(2), at(2));
    assert!(partial.changed.is_empty());
    assert_eq!(partial.deactivated, 0);

    let full = classify(FEATURE, known, vec![], true, day(2), at(2));
    assert_eq!(full.deactivated, 1);
  }
}
