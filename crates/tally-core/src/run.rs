//! Per-entity isolation for a collection run.
//!
//! Each entity is an independent unit of work. A failure is logged and
//! recorded as that entity's outcome; the next entity is processed regardless.

use std::{fmt::Display, future::Future};

use tracing::Instrument as _;

use crate::Result;

/// The result of processing one entity.
#[derive(Debug)]
pub struct EntityOutcome<T> {
  pub entity: String,
  pub result: Result<T>,
}

impl<T> EntityOutcome<T> {
  pub fn is_ok(&self) -> bool { self.result.is_ok() }
}

/// Run `op` for every entity in order, collecting one outcome per entity.
pub async fn run_entities<I, T, Fut, Op>(entities: I, mut op: Op) -> Vec<EntityOutcome<T>>
where
  I: IntoIterator,
  I::Item: Display,
  Op: FnMut(I::Item) -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let mut outcomes = Vec::new();

  for item in entities {
    let entity = item.to_string();
    let span = tracing::info_span!("entity", entity = %entity);
    let result = op(item).instrument(span).await;

    match &result {
      Ok(_) => tracing::info!(entity = %entity, "entity done"),
      Err(e) => tracing::warn!(
        entity = %entity,
        error = %e,
        transient = e.is_transient(),
        "entity failed"
      ),
    }
    outcomes.push(EntityOutcome { entity, result });
  }

  outcomes
}

#[cfg(test)]
mod tests {
  use chrono::{NaiveDate, TimeZone as _, Utc};

  use super::*;
  use crate::{
    Error,
    reconcile::Reconciler,
    snapshot::{PointPayload, ViewsPayload},
    store::HistoryStore as _,
    testing::{MemoryStore, StaticFetcher},
    traffic::{DateRange, Repo},
  };

  fn views(count: Option<u64>) -> ViewsPayload {
    ViewsPayload {
      count,
      uniques: Some(1),
      views: Some(vec![PointPayload {
        timestamp: Some("2024-03-13T00:00:00Z".into()),
        count:     Some(3),
        uniques:   Some(1),
      }]),
    }
  }

  #[tokio::test]
  async fn malformed_entity_does_not_block_its_sibling() {
    let x: Repo = "octo/x".parse().unwrap();
    let y: Repo = "octo/y".parse().unwrap();

    let store = MemoryStore::default();
    let mut fetcher = StaticFetcher::default();
    fetcher.views.insert(x.clone(), views(None));
    fetcher.views.insert(y.clone(), views(Some(3)));

    let reconciler = Reconciler::new(&store);
    let now = Utc.with_ymd_and_hms(2024, 3, 14, 6, 0, 0).unwrap();
    let outcomes = run_entities([x.clone(), y.clone()], |repo| {
      let (reconciler, fetcher) = (&reconciler, &fetcher);
      async move { reconciler.collect(fetcher, &repo, now).await }
    })
    .await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].entity, "octo/x");
    assert!(matches!(
      outcomes[0].result,
      Err(Error::MalformedSnapshot { .. })
    ));
    assert!(outcomes[1].is_ok());

    assert!(store.daily_metrics(&x, DateRange::all()).await.unwrap().is_empty());
    let y_rows = store.daily_metrics(&y, DateRange::all()).await.unwrap();
    assert_eq!(y_rows.len(), 1);
    assert_eq!(y_rows[0].date, NaiveDate::from_ymd_opt(2024, 3, 13).unwrap());
  }

  #[tokio::test]
  async fn store_failure_is_isolated_too() {
    let x: Repo = "octo/x".parse().unwrap();
    let y: Repo = "octo/y".parse().unwrap();

    let store = MemoryStore::failing_writes_for(x.clone());
    let mut fetcher = StaticFetcher::default();
    fetcher.views.insert(x.clone(), views(Some(3)));
    fetcher.views.insert(y.clone(), views(Some(3)));

    let reconciler = Reconciler::new(&store);
    let now = Utc.with_ymd_and_hms(2024, 3, 14, 6, 0, 0).unwrap();
    let outcomes = run_entities(vec![x, y.clone()], |repo| {
      let (reconciler, fetcher) = (&reconciler, &fetcher);
      async move { reconciler.collect(fetcher, &repo, now).await }
    })
    .await;

    assert!(matches!(outcomes[0].result, Err(Error::Store { .. })));
    assert!(outcomes[1].is_ok());
    assert!(store.current_total(&y).await.unwrap().is_some());
  }
}
