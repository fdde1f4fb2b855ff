//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{Context as _, bail};
use chrono::{Days, Utc};
use tally_core::{
  analytics::{UsageBreakdown, UsageDimension},
  lifecycle::Tracker,
  reconcile::Reconciler,
  run::{EntityOutcome, run_entities},
  store::HistoryStore as _,
  traffic::{DateRange, RankedKind, Repo},
  usage::UsageStatus,
};
use tally_github::GithubClient;
use tally_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::Config;

const TOP_LIMIT: usize = 10;
const BREAKDOWN_LIMIT: usize = 15;

// ─── Fetch commands ──────────────────────────────────────────────────────────

/// Collect one snapshot for every repository and reconcile it into the store.
pub async fn collect(config: &Config, store: &SqliteStore, args: Vec<String>) -> anyhow::Result<()> {
  let client = GithubClient::new(config.github()?).context("failed to build GitHub client")?;

  let names = if args.is_empty() { config.repos.clone() } else { args };
  let repos = if names.is_empty() {
    tracing::info!("no repositories configured, using every repository with push access");
    client
      .list_push_repos()
      .await
      .context("failed to list repositories")?
  } else {
    parse_repos(&names)?
  };

  let reconciler = Reconciler::new(store);
  let now = Utc::now();
  let outcomes = run_entities(repos, |repo| {
    let (reconciler, client) = (&reconciler, &client);
    async move { reconciler.collect(client, &repo, now).await }
  })
  .await;

  for outcome in &outcomes {
    match &outcome.result {
      Ok(s) => {
        let change = match &s.previous_total {
          Some(prev) => format!(" (was {})", prev.count),
          None => String::new(),
        };
        println!(
          "{}: {} days, {} paths, {} referrers, {} views / {} unique{}",
          s.repo, s.days_merged, s.paths, s.referrers, s.total.count, s.total.uniques, change
        );
      }
      Err(e) => println!("{}: FAILED {e}", outcome.entity),
    }
  }
  check_outcomes(&outcomes)
}

/// Run one search pass per feature and classify the results.
pub async fn track(config: &Config, store: &SqliteStore, args: Vec<String>) -> anyhow::Result<()> {
  let features = if args.is_empty() { config.features.clone() } else { args };
  if features.is_empty() {
    bail!("no features given and none configured");
  }

  let client = GithubClient::new(config.github()?).context("failed to build GitHub client")?;
  let tracker = Tracker::new(store, &client, config.max_search_pages);
  let now = Utc::now();
  let today = now.date_naive();

  let outcomes = run_entities(features, |feature| {
    let tracker = &tracker;
    async move { tracker.track(&feature, today, now).await }
  })
  .await;

  for outcome in &outcomes {
    match &outcome.result {
      Ok(s) => println!(
        "{}: {} found, {} new, {} continued, {} reactivated, {} gone; {} active{}",
        s.feature,
        s.observed,
        s.added,
        s.continued,
        s.reactivated,
        s.deactivated,
        s.history.total_count,
        if s.complete { "" } else { " (search capped, nothing deactivated)" }
      ),
      Err(e) => println!("{}: FAILED {e}", outcome.entity),
    }
  }
  check_outcomes(&outcomes)
}

fn check_outcomes<T>(outcomes: &[EntityOutcome<T>]) -> anyhow::Result<()> {
  let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
  if failed > 0 {
    bail!("{failed} of {} entities failed", outcomes.len());
  }
  Ok(())
}

fn parse_repos(names: &[String]) -> anyhow::Result<Vec<Repo>> {
  names
    .iter()
    .map(|n| n.parse::<Repo>().map_err(anyhow::Error::from))
    .collect()
}

// ─── Read commands ───────────────────────────────────────────────────────────

/// List repositories with stored traffic, or those the token can push to.
pub async fn repos(config: &Config, store: &SqliteStore, remote: bool) -> anyhow::Result<()> {
  let repos = if remote {
    let client = GithubClient::new(config.github()?).context("failed to build GitHub client")?;
    client.list_push_repos().await.context("failed to list repositories")?
  } else {
    store.list_repos().await.context("failed to read repositories")?
  };
  for repo in repos {
    println!("{repo}");
  }
  Ok(())
}

/// Print the stored history of one repository for the last `days` days.
pub async fn views(store: &SqliteStore, repo: &str, days: u32) -> anyhow::Result<()> {
  let repo: Repo = repo.parse()?;
  let range = DateRange::last_days(Utc::now().date_naive(), days);

  let rows = store
    .daily_metrics(&repo, range)
    .await
    .context("failed to read daily views")?;
  if rows.is_empty() {
    println!("no views recorded for {repo} in the last {days} days");
  }
  for row in &rows {
    println!("{}  {:>6} views  {:>5} unique", row.date, row.count, row.uniques);
  }
  let (count, uniques) = rows
    .iter()
    .fold((0u64, 0u64), |(c, u), r| (c + r.count, u + r.uniques));
  println!("{} days: {count} views, {uniques} unique", rows.len());

  if let Some(total) = store.current_total(&repo).await.context("failed to read total")? {
    println!(
      "current 14-day window: {} views, {} unique (as of {})",
      total.count,
      total.uniques,
      total.observed_at.format("%Y-%m-%d %H:%M")
    );
  }

  for kind in RankedKind::ALL {
    let top = store
      .top_ranked(&repo, kind, range, TOP_LIMIT)
      .await
      .with_context(|| format!("failed to read top {kind}s"))?;
    if top.is_empty() {
      continue;
    }
    println!("\ntop {kind}s:");
    for item in top {
      println!("{:>6}  {:>5}  {}", item.count, item.uniques, item.key);
    }
  }
  Ok(())
}

/// Per-feature totals, or the records and history of one feature.
pub async fn usage(
  store: &SqliteStore,
  feature: Option<String>,
  status: UsageStatus,
  days: u32,
) -> anyhow::Result<()> {
  let Some(feature) = feature else {
    for f in store.list_features().await.context("failed to read features")? {
      let last = f.last_seen.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
      println!(
        "{}: {} total, {} active, {} inactive, last seen {last}",
        f.feature, f.total, f.active, f.inactive
      );
    }
    return Ok(());
  };

  let records = store
    .usage_records(&feature)
    .await
    .context("failed to read usage records")?;
  for r in records.iter().filter(|r| status.matches(r)) {
    let state = if r.is_active { "active" } else { "inactive" };
    println!(
      "{:<8} {}  {}  {}  first {} last {}",
      state,
      r.key(),
      r.version.as_deref().unwrap_or("-"),
      r.stars.map(|s| format!("{s}★")).unwrap_or_else(|| "-".into()),
      r.first_seen,
      r.last_seen
    );
  }

  let range = DateRange::last_days(Utc::now().date_naive(), days);
  let history = store
    .usage_history(&feature, range)
    .await
    .context("failed to read usage history")?;
  if !history.is_empty() {
    println!("\nhistory:");
  }
  for p in history {
    println!(
      "{}  {:>5} active  +{:<4} -{}",
      p.date, p.total_count, p.added_count, p.removed_count
    );
  }
  Ok(())
}

/// Version and language breakdowns, top repositories and recent changes for
/// one feature.
pub async fn report(
  store: &SqliteStore,
  feature: &str,
  top: usize,
  include_inactive: bool,
  recent_days: u64,
) -> anyhow::Result<()> {
  for by in [UsageDimension::Version, UsageDimension::Language] {
    let rows = store
      .usage_breakdown(feature, by, BREAKDOWN_LIMIT)
      .await
      .with_context(|| format!("failed to read {by} breakdown"))?;
    println!("by {by}:");
    print_breakdown(&rows);
    println!();
  }

  let repos = store
    .top_usage(feature, top, include_inactive)
    .await
    .context("failed to read top repositories")?;
  println!("top repositories:");
  for u in repos {
    println!(
      "{:>7}  {:<40} {:>2} workflows  {:<12} {}",
      u.stars.map(|s| format!("{s}★")).unwrap_or_else(|| "-".into()),
      u.repo,
      u.workflows,
      u.language.as_deref().unwrap_or("-"),
      if u.is_active { "active" } else { "inactive" }
    );
  }

  let since = Utc::now()
    .date_naive()
    .checked_sub_days(Days::new(recent_days))
    .context("recent window out of range")?;
  let recent = store
    .recent_activity(feature, since)
    .await
    .context("failed to read recent activity")?;
  println!("\nsince {since}: {} added, {} removed", recent.added.len(), recent.removed.len());
  for r in &recent.added {
    println!("  + {}  {}  {}", r.first_seen, r.key(), r.version.as_deref().unwrap_or("-"));
  }
  for r in &recent.removed {
    let on = r.deactivated_on.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
    println!("  - {on}  {}", r.key());
  }
  Ok(())
}

fn print_breakdown(rows: &[UsageBreakdown]) {
  if rows.is_empty() {
    println!("  (no active usage)");
  }
  for row in rows {
    println!(
      "  {:<16} {:>5} repos  {:>5} workflows  {:>8}★",
      row.value.as_deref().unwrap_or("unknown"),
      row.repos,
      row.workflows,
      row.stars
    );
  }
}

// ─── Server ──────────────────────────────────────────────────────────────────

/// Serve the read-only JSON API until Ctrl-C.
pub async fn serve(config: &Config, store: &SqliteStore) -> anyhow::Result<()> {
  let app = tally_api::api_router(Arc::new(store.clone())).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", config.host, config.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
      }
    })
    .await
    .context("server error")?;
  Ok(())
}
