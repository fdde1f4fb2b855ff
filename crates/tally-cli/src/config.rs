//! Runtime configuration: `tally.toml` merged with `TALLY_*` environment
//! variables.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tally_github::GithubConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Falls back to `GITHUB_TOKEN` when unset.
  #[serde(default)]
  pub github_token:     Option<String>,
  #[serde(default = "default_api_url")]
  pub api_url:          String,
  #[serde(default = "default_store_path")]
  pub store_path:       PathBuf,
  #[serde(default)]
  pub repos:            Vec<String>,
  #[serde(default)]
  pub features:         Vec<String>,
  #[serde(default = "default_max_search_pages")]
  pub max_search_pages: u32,
  #[serde(default = "default_max_retries")]
  pub max_retries:      u32,
  #[serde(default = "default_request_delay_ms")]
  pub request_delay_ms: u64,
  #[serde(default = "default_host")]
  pub host:             String,
  #[serde(default = "default_port")]
  pub port:             u16,
}

fn default_api_url() -> String { "https://api.github.com".into() }
fn default_store_path() -> PathBuf { PathBuf::from("tally.db") }
fn default_max_search_pages() -> u32 { 10 }
fn default_max_retries() -> u32 { 3 }
fn default_request_delay_ms() -> u64 { 500 }
fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 8080 }

impl Config {
  /// Read `path` (optional) and overlay the environment. List values in the
  /// environment are comma separated: `TALLY_REPOS=octo/cat,octo/dog`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("TALLY")
          .try_parsing(true)
          .list_separator(",")
          .with_list_parse_key("repos")
          .with_list_parse_key("features"),
      )
      .build()
      .context("failed to read config file")?;

    let mut config: Self = settings
      .try_deserialize()
      .context("failed to deserialise Config")?;
    config.store_path = expand_tilde(&config.store_path);
    if config.github_token.is_none() {
      config.github_token = std::env::var("GITHUB_TOKEN").ok();
    }
    Ok(config)
  }

  /// Client settings for the fetch commands. Fails without a token.
  pub fn github(&self) -> anyhow::Result<GithubConfig> {
    let token = self
      .github_token
      .clone()
      .filter(|t| !t.trim().is_empty())
      .ok_or_else(|| anyhow!("no GitHub token: set github_token or GITHUB_TOKEN"))?;
    Ok(GithubConfig {
      api_url: self.api_url.clone(),
      token,
      max_retries: self.max_retries,
      request_delay: Duration::from_millis(self.request_delay_ms),
    })
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
