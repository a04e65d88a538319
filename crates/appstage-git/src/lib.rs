//! appstage git - source checkout for git-backed apps and definition repos
//!
//! A [`RepoCache`] lives for one request (or one sync tick). It memoizes
//! remote branch lookups and checkouts so apps sharing a repository are
//! only fetched once, and removes every checkout when dropped.

pub mod auth;
pub mod cache;
pub mod url;

pub use auth::{GitAuthConfig, GitCredentials};
pub use cache::{Checkout, RepoCache};
pub use url::parse_github_url;
