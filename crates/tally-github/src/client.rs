//! Async GitHub REST client.

use std::{
  collections::{HashMap, HashSet},
  time::Duration,
};

use chrono::Utc;
use regex::Regex;
use reqwest::{Client, Url, header::ACCEPT};
use serde::de::DeserializeOwned;
use tally_core::{
  fetch::Fetcher,
  snapshot::{RankedPayload, ViewsPayload},
  traffic::{RankedKind, Repo},
  usage::UsageHit,
};

use crate::{
  Error, Result,
  payload::{ContentResponse, RepoDetails, SearchItem, SearchResponse},
  retry::{backoff, retry_wait},
  version::{decode_content, extract_version, version_pattern},
};

const PAGE_SIZE: usize = 100;

/// Code search phrasings for one feature. Search matching is fuzzy, so a
/// pinned reference, a bare one and a quoted one each find files the others
/// miss.
fn search_queries(feature: &str) -> [String; 3] {
  [
    format!("uses: \"{feature}@\" path:.github/workflows"),
    format!("uses: {feature} path:.github/workflows"),
    format!("uses: \"{feature}\" path:.github/workflows"),
  ]
}

/// Concatenates result pages, keeping the first occurrence of each
/// `(repository, path)`.
fn merge_items(pages: Vec<Vec<SearchItem>>) -> Vec<SearchItem> {
  let mut seen = HashSet::new();
  pages
    .into_iter()
    .flatten()
    .filter(|item| seen.insert((item.repository.full_name.clone(), item.path.clone())))
    .collect()
}

fn decode<T: DeserializeOwned>(path: &str, body: &[u8]) -> Result<T> {
  serde_json::from_slice(body).map_err(|e| Error::Decode {
    path:   path.to_owned(),
    reason: e.to_string(),
  })
}

/// Connection settings for the GitHub API.
#[derive(Debug, Clone)]
pub struct GithubConfig {
  pub api_url:       String,
  pub token:         String,
  /// Retries per request after the first attempt.
  pub max_retries:   u32,
  /// Pause between consecutive search pages.
  pub request_delay: Duration,
}

/// GitHub REST client.
///
/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct GithubClient {
  client: Client,
  config: GithubConfig,
}

impl GithubClient {
  pub fn new(config: GithubConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .user_agent(concat!("tally/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client, config })
  }

  /// The API base joined with `segments`, each percent-encoded as a single
  /// path segment.
  fn endpoint<'s>(&self, segments: impl IntoIterator<Item = &'s str>) -> Result<Url> {
    let base = &self.config.api_url;
    let mut url = Url::parse(base).map_err(|e| Error::Url(format!("{base}: {e}")))?;
    url
      .path_segments_mut()
      .map_err(|()| Error::Url(format!("{base}: not a base url")))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  /// `GET url`, retrying rate limits, server errors and connection
  /// failures up to `max_retries` times.
  async fn get<T: DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T> {
    let owned = url.path().to_owned();
    let path = owned.as_str();
    let mut attempt = 0;
    loop {
      let sent = self
        .client
        .get(url.clone())
        .bearer_auth(&self.config.token)
        .header(ACCEPT, "application/vnd.github+json")
        .header("X-GitHub-Api-Version", "2022-11-28")
        .query(query)
        .send()
        .await;

      let resp = match sent {
        Ok(resp) => resp,
        Err(e) if (e.is_timeout() || e.is_connect()) && attempt < self.config.max_retries => {
          let wait = backoff(attempt);
          tracing::warn!(path, attempt, ?wait, error = %e, "request failed, retrying");
          tokio::time::sleep(wait).await;
          attempt += 1;
          continue;
        }
        Err(e) => return Err(e.into()),
      };

      let status = resp.status();
      if status.is_success() {
        let body = resp.bytes().await?;
        return decode(path, &body);
      }

      let Some(wait) = retry_wait(status, resp.headers(), attempt, Utc::now()) else {
        return Err(Error::Status { path: path.to_owned(), status: status.as_u16() });
      };
      if attempt >= self.config.max_retries {
        return Err(Error::RetriesExhausted {
          path:     path.to_owned(),
          status:   status.as_u16(),
          attempts: attempt + 1,
        });
      }

      tracing::warn!(path, status = status.as_u16(), attempt, ?wait, "throttled, retrying");
      tokio::time::sleep(wait).await;
      attempt += 1;
    }
  }

  // ── Repositories ──────────────────────────────────────────────────────────

  /// `GET /repos/{repo}`
  pub async fn repo_details(&self, repo: &Repo) -> Result<RepoDetails> {
    let url = self.endpoint(["repos", repo.owner(), repo.name()])?;
    self.get(url, &[]).await
  }

  /// Every repository the token can push to, across owned, collaborator and
  /// organisation-member affiliations.
  pub async fn list_push_repos(&self) -> Result<Vec<Repo>> {
    let mut repos = Vec::new();
    for page in 1.. {
      let batch: Vec<RepoDetails> = self
        .get(self.endpoint(["user", "repos"])?, &[
          ("affiliation", "owner,collaborator,organization_member".into()),
          ("per_page", PAGE_SIZE.to_string()),
          ("page", page.to_string()),
        ])
        .await?;
      let last = batch.len() < PAGE_SIZE;

      for details in batch.into_iter().filter(|d| d.permissions.push) {
        match details.full_name.parse::<Repo>() {
          Ok(repo) => repos.push(repo),
          Err(e) => tracing::warn!(name = %details.full_name, error = %e, "skipping repository"),
        }
      }
      if last {
        break;
      }
    }
    repos.sort();
    Ok(repos)
  }

  // ── Usage enrichment ──────────────────────────────────────────────────────

  /// The version of the feature pinned in one workflow file.
  async fn workflow_version(&self, repo: &Repo, path: &str, pattern: &Regex) -> Result<Option<String>> {
    let url = self.endpoint(
      ["repos", repo.owner(), repo.name(), "contents"]
        .into_iter()
        .chain(path.split('/')),
    )?;
    let body: ContentResponse = self.get(url, &[]).await?;
    match body.content {
      Some(encoded) => Ok(extract_version(pattern, &decode_content(&encoded)?)),
      None => Ok(None),
    }
  }
}

impl Fetcher for GithubClient {
  type Error = Error;

  async fn fetch_views(&self, repo: &Repo) -> Result<ViewsPayload> {
    let url = self.endpoint(["repos", repo.owner(), repo.name(), "traffic", "views"])?;
    self.get(url, &[]).await
  }

  async fn fetch_ranked(&self, repo: &Repo, kind: RankedKind) -> Result<Vec<RankedPayload>> {
    let endpoint = match kind {
      RankedKind::Path => "paths",
      RankedKind::Referrer => "referrers",
    };
    let url = self.endpoint([
      "repos",
      repo.owner(),
      repo.name(),
      "traffic",
      "popular",
      endpoint,
    ])?;
    self.get(url, &[]).await
  }

  async fn search_usage(&self, feature: &str, page: u32) -> Result<Vec<UsageHit>> {
    let mut pages = Vec::new();
    for (i, q) in search_queries(feature).into_iter().enumerate() {
      if page > 1 || i > 0 {
        tokio::time::sleep(self.config.request_delay).await;
      }
      let found: SearchResponse = self
        .get(self.endpoint(["search", "code"])?, &[
          ("q", q),
          ("per_page", PAGE_SIZE.to_string()),
          ("page", page.to_string()),
        ])
        .await?;
      tracing::debug!(feature, page, variant = i, items = found.items.len(), "search page");
      pages.push(found.items);
    }
    let items = merge_items(pages);

    let pattern = version_pattern(feature)?;
    let mut details: HashMap<Repo, Option<RepoDetails>> = HashMap::new();
    let mut hits = Vec::with_capacity(items.len());

    for item in items {
      let repo: Repo = match item.repository.full_name.parse() {
        Ok(repo) => repo,
        Err(e) => {
          tracing::warn!(name = %item.repository.full_name, error = %e, "skipping search hit");
          continue;
        }
      };

      let version = match self.workflow_version(&repo, &item.path, &pattern).await {
        Ok(v) => v,
        Err(e) => {
          tracing::warn!(%repo, path = %item.path, error = %e, "version lookup failed");
          None
        }
      };

      if !details.contains_key(&repo) {
        let looked_up = match self.repo_details(&repo).await {
          Ok(d) => Some(d),
          Err(e) => {
            tracing::warn!(%repo, error = %e, "repository lookup failed");
            None
          }
        };
        details.insert(repo.clone(), looked_up);
      }
      let info = details.get(&repo).and_then(Option::as_ref);

      hits.push(UsageHit {
        stars: info.and_then(|d| d.stargazers_count),
        language: info.and_then(|d| d.language.clone()),
        repo,
        workflow_path: item.path,
        version,
      });
    }

    Ok(hits)
  }
}

#[cfg(test)]
mod tests {
  use tally_core::fetch::FetchError as _;

  use super::*;
  use crate::payload::RepoRef;

  fn client(api_url: &str) -> GithubClient {
    GithubClient::new(GithubConfig {
      api_url:       api_url.into(),
      token:         "t".into(),
      max_retries:   0,
      request_delay: Duration::ZERO,
    })
    .unwrap()
  }

  fn item(repo: &str, path: &str) -> SearchItem {
    SearchItem {
      path:       path.into(),
      repository: RepoRef { full_name: repo.into() },
    }
  }

  #[test]
  fn workflow_paths_are_encoded_per_segment() {
    let url = client("https://api.github.com")
      .endpoint(["repos", "octo", "cat", "contents"].into_iter().chain(
        ".github/workflows/build #2?.yml".split('/'),
      ))
      .unwrap();
    assert_eq!(
      url.as_str(),
      "https://api.github.com/repos/octo/cat/contents/.github/workflows/build%20%232%3F.yml"
    );
  }

  #[test]
  fn endpoint_keeps_an_enterprise_prefix() {
    let url = client("https://ghe.example.com/api/v3/")
      .endpoint(["search", "code"])
      .unwrap();
    assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/search/code");
  }

  #[test]
  fn relative_api_url_is_rejected() {
    let err = client("api.github.com").endpoint(["user"]).unwrap_err();
    assert!(matches!(err, Error::Url(_)), "{err}");
  }

  #[test]
  fn every_query_is_scoped_to_workflows() {
    let queries = search_queries("actions/checkout");
    assert_eq!(queries[0], r#"uses: "actions/checkout@" path:.github/workflows"#);
    assert_eq!(queries[1], "uses: actions/checkout path:.github/workflows");
    assert_eq!(queries[2], r#"uses: "actions/checkout" path:.github/workflows"#);
  }

  #[test]
  fn merged_pages_drop_repeated_files() {
    let merged = merge_items(vec![
      vec![item("a/a", "ci.yml"), item("b/b", "ci.yml")],
      vec![],
      vec![item("b/b", "ci.yml"), item("b/b", "release.yml")],
    ]);
    let keys: Vec<_> = merged
      .iter()
      .map(|i| format!("{}:{}", i.repository.full_name, i.path))
      .collect();
    assert_eq!(keys, ["a/a:ci.yml", "b/b:ci.yml", "b/b:release.yml"]);
  }

  #[test]
  fn unexpected_body_is_a_malformed_decode_error() {
    let err = decode::<ViewsPayload>("/repos/octo/cat/traffic/views", br#"{"count":"many"}"#)
      .unwrap_err();
    assert!(matches!(err, Error::Decode { .. }), "{err}");
    assert!(err.is_malformed());
    assert!(!err.is_transient());
  }
}
