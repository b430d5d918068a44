//! Request strategies
//!
//! A strategy hooks into retrieval at three points: before any handling,
//! before going remote, and before serving a found item. Any hook may veto
//! the request by returning an error.

use depot_core::{Item, RetrievalRequest};
use regex::Regex;

use crate::error::{RepoError, Result};

pub trait RequestStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Before the repository handles the request
    fn on_handle(&self, _repository: &str, _request: &mut RetrievalRequest) -> Result<()> {
        Ok(())
    }

    /// Before a proxy repository contacts its origin
    fn on_remote_access(&self, _repository: &str, _request: &RetrievalRequest) -> Result<()> {
        Ok(())
    }

    /// Before a found item is returned
    fn on_serving(&self, _repository: &str, _request: &RetrievalRequest, _item: &Item) -> Result<()> {
        Ok(())
    }
}

/// Vetoes remote access for paths outside the configured patterns
#[derive(Debug, Clone)]
pub struct PathFilterStrategy {
    patterns: Vec<Regex>,
}

impl PathFilterStrategy {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| RepoError::InvalidConfig {
                    message: format!("Invalid remote path pattern '{}': {}", p.as_ref(), e),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn allows(&self, path: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.is_match(path))
    }
}

impl RequestStrategy for PathFilterStrategy {
    fn name(&self) -> &str {
        "path-filter"
    }

    fn on_remote_access(&self, repository: &str, request: &RetrievalRequest) -> Result<()> {
        if self.allows(request.path.as_str()) {
            Ok(())
        } else {
            tracing::debug!(repository, path = %request.path, "remote access vetoed by path filter");
            Err(RepoError::not_found(
                repository,
                &request.path,
                "path not served by this proxy's remote",
            ))
        }
    }
}
