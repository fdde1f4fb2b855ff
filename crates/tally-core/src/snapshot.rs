//! Raw remote payloads and their validation into a [`TrafficSnapshot`].
//!
//! Payload fields are all optional so that a response with missing fields
//! still deserialises; validation then rejects the snapshot as a whole. A
//! snapshot is either fully valid or nothing from it is written.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  traffic::{DailyPoint, RankedEntry, RankedKind, Repo},
};

// ─── Payloads ────────────────────────────────────────────────────────────────

/// Body of the views endpoint: window totals plus a per-day series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewsPayload {
  pub count:   Option<u64>,
  pub uniques: Option<u64>,
  pub views:   Option<Vec<PointPayload>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointPayload {
  /// An RFC 3339 timestamp at midnight UTC, or a bare `YYYY-MM-DD` date.
  pub timestamp: Option<String>,
  pub count:     Option<u64>,
  pub uniques:   Option<u64>,
}

/// The window totals on their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalPayload {
  pub count:   Option<u64>,
  pub uniques: Option<u64>,
}

/// One element of a popular-paths or referrers response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedPayload {
  #[serde(alias = "path", alias = "referrer")]
  pub key:     Option<String>,
  pub title:   Option<String>,
  pub count:   Option<u64>,
  pub uniques: Option<u64>,
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// Everything fetched for one repository at one point in time, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSnapshot {
  pub repo:          Repo,
  pub observed_at:   DateTime<Utc>,
  pub total_count:   u64,
  pub total_uniques: u64,
  pub series:        Vec<DailyPoint>,
  pub paths:         Vec<RankedEntry>,
  pub referrers:     Vec<RankedEntry>,
}

impl TrafficSnapshot {
  /// Validate raw payloads. Any missing or inconsistent field rejects the
  /// whole snapshot with [`Error::MalformedSnapshot`].
  pub fn from_payloads(
    repo: Repo,
    observed_at: DateTime<Utc>,
    views: ViewsPayload,
    paths: Vec<RankedPayload>,
    referrers: Vec<RankedPayload>,
  ) -> Result<Self> {
    let total_count = views
      .count
      .ok_or_else(|| Error::malformed(&repo, "views: missing count"))?;
    let total_uniques = views
      .uniques
      .ok_or_else(|| Error::malformed(&repo, "views: missing uniques"))?;
    let points = views
      .views
      .ok_or_else(|| Error::malformed(&repo, "views: missing daily series"))?;

    let series = validate_series(&repo, points)?;
    let paths = validate_ranked(&repo, RankedKind::Path, paths)?;
    let referrers = validate_ranked(&repo, RankedKind::Referrer, referrers)?;

    Ok(Self {
      repo,
      observed_at,
      total_count,
      total_uniques,
      series,
      paths,
      referrers,
    })
  }

  /// The date ranked lists are filed under.
  pub fn observed_on(&self) -> NaiveDate { self.observed_at.date_naive() }

  pub fn ranked(&self, kind: RankedKind) -> &[RankedEntry] {
    match kind {
      RankedKind::Path => &self.paths,
      RankedKind::Referrer => &self.referrers,
    }
  }
}

/// Parse the date part of a series timestamp.
pub fn parse_point_date(s: &str) -> Option<NaiveDate> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc).date_naive())
    .ok()
    .or_else(|| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

fn validate_series(repo: &Repo, points: Vec<PointPayload>) -> Result<Vec<DailyPoint>> {
  let mut seen = HashSet::with_capacity(points.len());
  let mut series = Vec::with_capacity(points.len());

  for (i, p) in points.into_iter().enumerate() {
    let raw = p
      .timestamp
      .ok_or_else(|| Error::malformed(repo, format!("views[{i}]: missing timestamp")))?;
    let date = parse_point_date(&raw).ok_or_else(|| {
      Error::malformed(repo, format!("views[{i}]: bad timestamp {raw:?}"))
    })?;
    let count = p
      .count
      .ok_or_else(|| Error::malformed(repo, format!("views[{i}]: missing count")))?;
    let uniques = p
      .uniques
      .ok_or_else(|| Error::malformed(repo, format!("views[{i}]: missing uniques")))?;

    if !seen.insert(date) {
      return Err(Error::malformed(repo, format!("views: duplicate date {date}")));
    }
    series.push(DailyPoint { date, count, uniques });
  }

  Ok(series)
}

fn validate_ranked(
  repo: &Repo,
  kind: RankedKind,
  items: Vec<RankedPayload>,
) -> Result<Vec<RankedEntry>> {
  let mut seen = HashSet::with_capacity(items.len());
  let mut entries = Vec::with_capacity(items.len());

  for (i, item) in items.into_iter().enumerate() {
    let key = item
      .key
      .filter(|k| !k.is_empty())
      .ok_or_else(|| Error::malformed(repo, format!("{kind}[{i}]: missing key")))?;
    let count = item
      .count
      .ok_or_else(|| Error::malformed(repo, format!("{kind}[{i}]: missing count")))?;
    let uniques = item
      .uniques
      .ok_or_else(|| Error::malformed(repo, format!("{kind}[{i}]: missing uniques")))?;

    if !seen.insert(key.clone()) {
      return Err(Error::malformed(repo, format!("{kind}: duplicate key {key:?}")));
    }
    entries.push(RankedEntry { key, title: item.title, count, uniques });
  }

  Ok(entries)
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;

  use super::*;

  fn repo() -> Repo { "octo/cat".parse().unwrap() }

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 14, 6, 0, 0).unwrap() }

  fn point(ts: &str, count: u64, uniques: u64) -> PointPayload {
    PointPayload {
      timestamp: Some(ts.into()),
      count:     Some(count),
      uniques:   Some(uniques),
    }
  }

  fn views(points: Vec<PointPayload>) -> ViewsPayload {
    ViewsPayload { count: Some(10), uniques: Some(4), views: Some(points) }
  }

  #[test]
  fn deserialises_github_shapes() {
    let v: ViewsPayload = serde_json::from_str(
      r#"{"count":14,"uniques":3,"views":[
            {"timestamp":"2024-03-13T00:00:00Z","count":4,"uniques":1}]}"#,
    )
    .unwrap();
    assert_eq!(v.views.as_ref().map(Vec::len), Some(1));

    let p: RankedPayload = serde_json::from_str(
      r#"{"path":"/octo/cat","title":"cat","count":2,"uniques":1}"#,
    )
    .unwrap();
    assert_eq!(p.key.as_deref(), Some("/octo/cat"));

    let r: RankedPayload =
      serde_json::from_str(r#"{"referrer":"google.com","count":5,"uniques":2}"#)
        .unwrap();
    assert_eq!(r.key.as_deref(), Some("google.com"));
    assert_eq!(r.title, None);
  }

  #[test]
  fn valid_payloads_become_a_snapshot() {
    let snap = TrafficSnapshot::from_payloads(
      repo(),
      now(),
      views(vec![
        point("2024-03-13T00:00:00Z", 4, 1),
        point("2024-03-12", 6, 3),
      ]),
      vec![RankedPayload {
        key:     Some("/octo/cat".into()),
        title:   Some("cat".into()),
        count:   Some(2),
        uniques: Some(1),
      }],
      vec![],
    )
    .unwrap();

    assert_eq!(snap.total_count, 10);
    assert_eq!(snap.series.len(), 2);
    assert_eq!(snap.series[1].date, NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
    assert_eq!(snap.ranked(RankedKind::Path).len(), 1);
    assert!(snap.ranked(RankedKind::Referrer).is_empty());
    assert_eq!(snap.observed_on(), NaiveDate::from_ymd_opt(2024, 3, 14).unwrap());
  }

  #[test]
  fn missing_total_is_malformed() {
    let mut v = views(vec![]);
    v.uniques = None;
    let err = TrafficSnapshot::from_payloads(repo(), now(), v, vec![], vec![])
      .unwrap_err();
    assert!(matches!(err, Error::MalformedSnapshot { .. }), "{err}");
  }

  #[test]
  fn missing_series_is_malformed() {
    let v = ViewsPayload { count: Some(1), uniques: Some(1), views: None };
    assert!(TrafficSnapshot::from_payloads(repo(), now(), v, vec![], vec![]).is_err());
  }

  #[test]
  fn bad_point_rejects_whole_snapshot() {
    let mut bad = point("2024-03-12T00:00:00Z", 1, 1);
    bad.count = None;
    let err = TrafficSnapshot::from_payloads(
      repo(),
      now(),
      views(vec![point("2024-03-11T00:00:00Z", 1, 1), bad]),
      vec![],
      vec![],
    )
    .unwrap_err();
    assert!(err.to_string().contains("views[1]"), "{err}");
  }

  #[test]
  fn unparsable_timestamp_is_malformed() {
    let err = TrafficSnapshot::from_payloads(
      repo(),
      now(),
      views(vec![point("yesterday", 1, 1)]),
      vec![],
      vec![],
    )
    .unwrap_err();
    assert!(matches!(err, Error::MalformedSnapshot { .. }));
  }

  #[test]
  fn duplicate_dates_are_malformed() {
    let err = TrafficSnapshot::from_payloads(
      repo(),
      now(),
      views(vec![
        point("2024-03-12T00:00:00Z", 1, 1),
        point("2024-03-12", 2, 2),
      ]),
      vec![],
      vec![],
    )
    .unwrap_err();
    assert!(err.to_string().contains("duplicate date"), "{err}");
  }

  #[test]
  fn duplicate_or_empty_ranked_keys_are_malformed() {
    let item = |k: &str| RankedPayload {
      key:     Some(k.into()),
      title:   None,
      count:   Some(1),
      uniques: Some(1),
    };

    let dup = TrafficSnapshot::from_payloads(
      repo(),
      now(),
      views(vec![]),
      vec![],
      vec![item("google.com"), item("google.com")],
    );
    assert!(dup.is_err());

    let empty =
      TrafficSnapshot::from_payloads(repo(), now(), views(vec![]), vec![item("")], vec![]);
    assert!(empty.is_err());
  }

  #[test]
  fn out_of_order_series_is_kept_in_input_order() {
    let snap = TrafficSnapshot::from_payloads(
      repo(),
      now(),
      views(vec![point("2024-03-13", 1, 1), point("2024-03-01", 2, 2)]),
      vec![],
      vec![],
    )
    .unwrap();
    assert_eq!(snap.series[0].count, 1);
    assert_eq!(snap.series[1].count, 2);
  }
}
