//! Remote origins
//!
//! A proxy repository is bound to one [`RemoteSource`]. The source knows the
//! candidate URLs for a path (primary origin first, then mirrors), fetches
//! byte-complete content from one URL, answers conditional existence checks
//! and reachability checks. Failures are typed: `NotFound`, `AccessDenied`,
//! `TransportFailure` and `StorageFailure`.

mod http;
pub mod scripted;

pub use http::HttpRemote;
pub use scripted::{Outcome, ScriptedRemote};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::{Content, RepositoryPath};
use url::Url;

use crate::config::RemoteAuth;
use crate::error::{RepoError, Result};

/// A byte-complete item fetched from a remote URL
#[derive(Debug, Clone)]
pub struct RemoteItem {
    /// URL the content came from
    pub url: String,
    pub content: Content,
    /// Remote Last-Modified, if reported
    pub last_modified: Option<DateTime<Utc>>,
    /// Remote content type, if reported
    pub content_type: Option<String>,
    /// SHA-256 advertised by the origin for this content
    pub sha256: Option<String>,
}

impl RemoteItem {
    pub fn new(url: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            url: url.into(),
            content: content.into(),
            last_modified: None,
            content_type: None,
            sha256: None,
        }
    }
}

/// Remote origin collaborator
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Candidate URLs for a path, in the order they are tried
    fn candidate_urls(&self, path: &RepositoryPath) -> Vec<String>;

    /// Reject URLs that can never be fetched
    fn validate_url(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url).map_err(|e| RepoError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(RepoError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }

    /// Whether the origin holds the path with content newer than `since`
    ///
    /// `None` asks for plain existence. A missing path answers `false`.
    async fn exists(&self, path: &RepositoryPath, since: Option<DateTime<Utc>>) -> Result<bool>;

    /// Fetch the full content of `path` from one candidate URL
    async fn fetch(&self, url: &str, path: &RepositoryPath) -> Result<RemoteItem>;

    /// Probe whether the origin answers at all
    async fn is_reachable(&self) -> Result<bool>;

    /// Replace the credentials sent to the origin
    fn update_auth(&self, _auth: Option<RemoteAuth>) {}

    /// Primary origin URL, for display
    fn remote_url(&self) -> &str;
}

/// Join a base URL and a repository path
pub(crate) fn join_url(base: &str, path: &RepositoryPath) -> String {
    let base = base.trim_end_matches('/');
    if path.is_root() {
        format!("{}/", base)
    } else {
        format!("{}{}", base, path)
    }
}
