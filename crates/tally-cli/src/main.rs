//! `tally`: collect GitHub traffic and action usage into a local history.
//!
//! # Usage
//!
//! ```text
//! tally collect octo/cat octo/dog
//! tally track actions/checkout
//! tally views octo/cat --days 30
//! tally report actions/checkout --top 20
//! tally serve --config ~/.config/tally/tally.toml
//! ```

mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tally_core::usage::UsageStatus;
use tally_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "tally", author, version, about = "GitHub traffic and action usage history")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "tally.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Fetch and merge traffic for the given repositories (default: configured
  /// repos, else every repo with push access).
  Collect { repos: Vec<String> },

  /// Search for workflows using the given actions and update their lifecycle.
  Track { features: Vec<String> },

  /// List repositories with stored traffic.
  Repos {
    /// List repositories the token can push to instead.
    #[arg(long)]
    remote: bool,
  },

  /// Show stored views, totals and top lists for one repository.
  Views {
    repo: String,
    #[arg(long, default_value_t = 30)]
    days: u32,
  },

  /// Show per-feature totals, or the records of one feature.
  Usage {
    feature: Option<String>,
    /// active, inactive or all.
    #[arg(long, default_value = "all")]
    status: UsageStatus,
    #[arg(long, default_value_t = 30)]
    days: u32,
  },

  /// Adoption report for one feature: versions, languages, top
  /// repositories and recent changes.
  Report {
    feature:          String,
    /// How many repositories to list, most starred first.
    #[arg(long, default_value_t = 10)]
    top:              usize,
    /// Include repositories that no longer use the feature in the top list.
    #[arg(long)]
    include_inactive: bool,
    /// Window for newly added and removed usages.
    #[arg(long, default_value_t = 7)]
    recent_days:      u64,
  },

  /// Serve the read-only JSON API.
  Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let config = Config::load(&cli.config)?;

  let store = SqliteStore::open(&config.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", config.store_path))?;

  let result = match cli.command {
    Command::Collect { repos } => commands::collect(&config, &store, repos).await,
    Command::Track { features } => commands::track(&config, &store, features).await,
    Command::Repos { remote } => commands::repos(&config, &store, remote).await,
    Command::Views { repo, days } => commands::views(&store, &repo, days).await,
    Command::Usage { feature, status, days } => {
      commands::usage(&store, feature, status, days).await
    }
    Command::Report { feature, top, include_inactive, recent_days } => {
      commands::report(&store, &feature, top, include_inactive, recent_days).await
    }
    Command::Serve => commands::serve(&config, &store).await,
  };

  store.close().await.context("failed to close store")?;
  result
}
