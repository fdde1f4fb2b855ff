//! Response bodies of the GitHub endpoints not covered by the core payloads.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
  #[serde(default)]
  pub items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
pub struct SearchItem {
  pub path:       String,
  pub repository: RepoRef,
}

#[derive(Debug, Deserialize)]
pub struct RepoRef {
  pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ContentResponse {
  pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoDetails {
  pub full_name:        String,
  pub stargazers_count: Option<u64>,
  pub language:         Option<String>,
  #[serde(default)]
  pub permissions:      Permissions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Permissions {
  #[serde(default)]
  pub push: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn search_response_ignores_unknown_fields() {
    let body = r#"{
      "total_count": 1,
      "incomplete_results": false,
      "items": [{
        "name": "ci.yml",
        "path": ".github/workflows/ci.yml",
        "sha": "abc",
        "repository": { "id": 1, "full_name": "octo/cat", "private": false }
      }]
    }"#;
    let parsed: SearchResponse = serde_json::from_str(body).unwrap();
    assert_eq!(parsed.items.len(), 1);
    assert_eq!(parsed.items[0].repository.full_name, "octo/cat");
    assert_eq!(parsed.items[0].path, ".github/workflows/ci.yml");
  }

  #[test]
  fn repo_details_default_to_no_push() {
    let parsed: RepoDetails =
      serde_json::from_str(r#"{ "full_name": "octo/cat", "stargazers_count": 12 }"#).unwrap();
    assert_eq!(parsed.stargazers_count, Some(12));
    assert_eq!(parsed.language, None);
    assert!(!parsed.permissions.push);
  }
}
