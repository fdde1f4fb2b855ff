//! Pinned-version extraction from workflow files.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use regex::Regex;

use crate::{Error, Result};

/// Matches `uses: <feature>@<version>`, with or without quotes. The feature
/// name is matched literally.
pub fn version_pattern(feature: &str) -> Result<Regex> {
  let pattern = format!(r#"uses:\s*["']?{}@([^"'\s]+)"#, regex::escape(feature));
  Ok(Regex::new(&pattern)?)
}

/// The first version pinned in `content`, if any.
pub fn extract_version(pattern: &Regex, content: &str) -> Option<String> {
  pattern
    .captures(content)
    .and_then(|c| c.get(1))
    .map(|m| m.as_str().to_owned())
}

/// Decode a contents-API body. GitHub wraps the base64 text at 60 columns.
pub fn decode_content(encoded: &str) -> Result<String> {
  let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
  let bytes = STANDARD
    .decode(compact)
    .map_err(|e| Error::Content(e.to_string()))?;
  String::from_utf8(bytes).map_err(|e| Error::Content(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  const WORKFLOW: &str = "\
name: ci
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - uses: \"actions/setup-node@v3.8.1\"
      - uses: 'octo/tool@main'
";

  #[test]
  fn extracts_unquoted_version() {
    let p = version_pattern("actions/checkout").unwrap();
    assert_eq!(extract_version(&p, WORKFLOW).as_deref(), Some("v4"));
  }

  #[test]
  fn extracts_quoted_versions() {
    let p = version_pattern("actions/setup-node").unwrap();
    assert_eq!(extract_version(&p, WORKFLOW).as_deref(), Some("v3.8.1"));

    let p = version_pattern("octo/tool").unwrap();
    assert_eq!(extract_version(&p, WORKFLOW).as_deref(), Some("main"));
  }

  #[test]
  fn feature_name_is_matched_literally() {
    // An unescaped "." would let "actionsXcheckout" match too.
    let p = version_pattern("a.b/c").unwrap();
    assert_eq!(extract_version(&p, "uses: aXb/c@v1"), None);
    assert_eq!(extract_version(&p, "uses: a.b/c@v1").as_deref(), Some("v1"));
  }

  #[test]
  fn missing_reference_yields_none() {
    let p = version_pattern("actions/cache").unwrap();
    assert_eq!(extract_version(&p, WORKFLOW), None);
  }

  #[test]
  fn decodes_wrapped_base64() {
    // "uses: actions/checkout@v4\n" split across two lines.
    let encoded = "dXNlczogYWN0aW9ucy9j\naGVja291dEB2NAo=\n";
    assert_eq!(decode_content(encoded).unwrap(), "uses: actions/checkout@v4\n");
  }

  #[test]
  fn rejects_invalid_base64() {
    assert!(matches!(decode_content("not base64!"), Err(Error::Content(_))));
  }
}
