//! Handlers for `/repos` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/repos` | Every repository with stored traffic |
//! | `GET`  | `/repos/{owner}/{name}/views` | Optional `?from=&to=` |
//! | `GET`  | `/repos/{owner}/{name}/total` | 404 if never collected |
//! | `GET`  | `/repos/{owner}/{name}/paths` | Summed per path, `?from=&to=&limit=` |
//! | `GET`  | `/repos/{owner}/{name}/referrers` | Summed per referrer, same params |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State, rejection::QueryRejection},
};
use chrono::NaiveDate;
use serde::Deserialize;
use tally_core::{
  store::HistoryStore,
  traffic::{CurrentTotal, DailyMetric, RankedKind, RankedTotal, Repo},
};

use crate::{RangeParams, error::ApiError};

const DEFAULT_LIMIT: usize = 10;

fn repo_from(owner: &str, name: &str) -> Result<Repo, ApiError> {
  Ok(format!("{owner}/{name}").parse()?)
}

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /repos`
pub async fn list<S: HistoryStore>(
  State(store): State<Arc<S>>,
) -> Result<Json<Vec<Repo>>, ApiError> {
  let repos = store.list_repos().await.map_err(ApiError::store)?;
  Ok(Json(repos))
}

// ─── Views ────────────────────────────────────────────────────────────────────

/// `GET /repos/{owner}/{name}/views[?from=<date>&to=<date>]`
pub async fn views<S: HistoryStore>(
  State(store): State<Arc<S>>,
  Path((owner, name)): Path<(String, String)>,
  params: Result<Query<RangeParams>, QueryRejection>,
) -> Result<Json<Vec<DailyMetric>>, ApiError> {
  let repo = repo_from(&owner, &name)?;
  let Query(params) = params?;
  let rows = store
    .daily_metrics(&repo, params.range()?)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(rows))
}

/// `GET /repos/{owner}/{name}/total`
pub async fn total<S: HistoryStore>(
  State(store): State<Arc<S>>,
  Path((owner, name)): Path<(String, String)>,
) -> Result<Json<CurrentTotal>, ApiError> {
  let repo = repo_from(&owner, &name)?;
  store
    .current_total(&repo)
    .await
    .map_err(ApiError::store)?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("no totals recorded for {repo}")))
}

// ─── Ranked lists ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TopParams {
  pub from:  Option<NaiveDate>,
  pub to:    Option<NaiveDate>,
  pub limit: Option<usize>,
}

async fn top<S: HistoryStore>(
  store: &S,
  owner: &str,
  name: &str,
  kind: RankedKind,
  params: TopParams,
) -> Result<Json<Vec<RankedTotal>>, ApiError> {
  let repo = repo_from(owner, name)?;
  let range = RangeParams { from: params.from, to: params.to }.range()?;
  let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
  let totals = store
    .top_ranked(&repo, kind, range, limit)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(totals))
}

/// `GET /repos/{owner}/{name}/paths[?from=&to=&limit=]`
pub async fn paths<S: HistoryStore>(
  State(store): State<Arc<S>>,
  Path((owner, name)): Path<(String, String)>,
  params: Result<Query<TopParams>, QueryRejection>,
) -> Result<Json<Vec<RankedTotal>>, ApiError> {
  let Query(params) = params?;
  top(store.as_ref(), &owner, &name, RankedKind::Path, params).await
}

/// `GET /repos/{owner}/{name}/referrers[?from=&to=&limit=]`
pub async fn referrers<S: HistoryStore>(
  State(store): State<Arc<S>>,
  Path((owner, name)): Path<(String, String)>,
  params: Result<Query<TopParams>, QueryRejection>,
) -> Result<Json<Vec<RankedTotal>>, ApiError> {
  let Query(params) = params?;
  top(store.as_ref(), &owner, &name, RankedKind::Referrer, params).await
}
