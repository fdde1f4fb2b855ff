//! GitHub REST implementation of [`tally_core::fetch::Fetcher`].
//!
//! Traffic windows come from the repository traffic endpoints; usage hits come
//! from code search over `.github/workflows`, enriched with the pinned version
//! and repository details on a best-effort basis.

mod client;
mod payload;
mod retry;
mod version;

pub mod error;

pub use client::{GithubClient, GithubConfig};
pub use error::{Error, Result};
pub use version::{decode_content, extract_version, version_pattern};
