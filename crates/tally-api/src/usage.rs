//! Handlers for feature-usage endpoints.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State, rejection::QueryRejection},
};
use chrono::{Days, NaiveDate, Utc};
use serde::Deserialize;
use tally_core::{
  analytics::{RecentActivity, RepoUsage, UsageBreakdown, UsageDimension},
  store::HistoryStore,
  usage::{FeatureSummary, UsageHistoryPoint, UsageRecord, UsageStatus},
};

use crate::{RangeParams, error::ApiError};

const DEFAULT_BREAKDOWN_LIMIT: usize = 15;
const DEFAULT_TOP_LIMIT: usize = 20;
const DEFAULT_RECENT_DAYS: u64 = 7;

/// `GET /features`
pub async fn features<S: HistoryStore>(
  State(store): State<Arc<S>>,
) -> Result<Json<Vec<FeatureSummary>>, ApiError> {
  let features = store.list_features().await.map_err(ApiError::store)?;
  Ok(Json(features))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub feature: String,
  #[serde(default)]
  pub status:  UsageStatus,
}

/// `GET /usage?feature=<name>[&status=active|inactive|all]`
pub async fn list<S: HistoryStore>(
  State(store): State<Arc<S>>,
  params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<UsageRecord>>, ApiError> {
  let Query(params) = params?;
  let records = store
    .usage_records(&params.feature)
    .await
    .map_err(ApiError::store)?
    .into_iter()
    .filter(|r| params.status.matches(r))
    .collect();
  Ok(Json(records))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
  pub feature: String,
  pub from:    Option<NaiveDate>,
  pub to:      Option<NaiveDate>,
}

/// `GET /usage/history?feature=<name>[&from=&to=]`
pub async fn history<S: HistoryStore>(
  State(store): State<Arc<S>>,
  params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<UsageHistoryPoint>>, ApiError> {
  let Query(params) = params?;
  let range = RangeParams { from: params.from, to: params.to }.range()?;
  let points = store
    .usage_history(&params.feature, range)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(points))
}

#[derive(Debug, Deserialize)]
pub struct BreakdownParams {
  pub feature: String,
  pub limit:   Option<usize>,
}

async fn breakdown<S: HistoryStore>(
  store: &S,
  params: BreakdownParams,
  by: UsageDimension,
) -> Result<Json<Vec<UsageBreakdown>>, ApiError> {
  let limit = params.limit.unwrap_or(DEFAULT_BREAKDOWN_LIMIT);
  let rows = store
    .usage_breakdown(&params.feature, by, limit)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(rows))
}

/// `GET /usage/versions?feature=<name>[&limit=]`
pub async fn versions<S: HistoryStore>(
  State(store): State<Arc<S>>,
  params: Result<Query<BreakdownParams>, QueryRejection>,
) -> Result<Json<Vec<UsageBreakdown>>, ApiError> {
  let Query(params) = params?;
  breakdown(store.as_ref(), params, UsageDimension::Version).await
}

/// `GET /usage/languages?feature=<name>[&limit=]`
pub async fn languages<S: HistoryStore>(
  State(store): State<Arc<S>>,
  params: Result<Query<BreakdownParams>, QueryRejection>,
) -> Result<Json<Vec<UsageBreakdown>>, ApiError> {
  let Query(params) = params?;
  breakdown(store.as_ref(), params, UsageDimension::Language).await
}

#[derive(Debug, Deserialize)]
pub struct TopParams {
  pub feature:          String,
  pub limit:            Option<usize>,
  #[serde(default)]
  pub include_inactive: bool,
}

/// `GET /usage/top?feature=<name>[&limit=&include_inactive=true]`
pub async fn top<S: HistoryStore>(
  State(store): State<Arc<S>>,
  params: Result<Query<TopParams>, QueryRejection>,
) -> Result<Json<Vec<RepoUsage>>, ApiError> {
  let Query(params) = params?;
  let rows = store
    .top_usage(
      &params.feature,
      params.limit.unwrap_or(DEFAULT_TOP_LIMIT),
      params.include_inactive,
    )
    .await
    .map_err(ApiError::store)?;
  Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
  pub feature: String,
  pub since:   Option<NaiveDate>,
  pub days:    Option<u64>,
}

/// `GET /usage/recent?feature=<name>[&since=YYYY-MM-DD | &days=N]`
///
/// Without `since`, the window is the last `days` days (default 7).
pub async fn recent<S: HistoryStore>(
  State(store): State<Arc<S>>,
  params: Result<Query<RecentParams>, QueryRejection>,
) -> Result<Json<RecentActivity>, ApiError> {
  let Query(params) = params?;
  let since = match (params.since, params.days) {
    (Some(_), Some(_)) => {
      return Err(ApiError::BadRequest("give either since or days, not both".into()));
    }
    (Some(since), None) => since,
    (None, days) => {
      let days = days.unwrap_or(DEFAULT_RECENT_DAYS);
      Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(days))
        .ok_or_else(|| ApiError::BadRequest(format!("days {days} is out of range")))?
    }
  };
  let activity = store
    .recent_activity(&params.feature, since)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(activity))
}
