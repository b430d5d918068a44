//! Error types for repository operations

use depot_core::CoreError;
use thiserror::Error;

/// One source's contribution to a composite failure
#[derive(Debug)]
pub struct SourceFailure {
    /// Member repository id or remote URL
    pub id: String,
    pub error: Box<RepoError>,
}

impl SourceFailure {
    pub fn new(id: impl Into<String>, error: RepoError) -> Self {
        Self {
            id: id.into(),
            error: Box::new(error),
        }
    }
}

fn render_failures(failures: &[SourceFailure]) -> String {
    if failures.is_empty() {
        return "no sources consulted".to_string();
    }
    failures
        .iter()
        .map(|f| format!("[{}: {}]", f.id, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Repository operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Resolution Errors ============
    #[error("Item not found: {repository}:{path} ({reason})")]
    NotFound {
        repository: String,
        path: String,
        reason: String,
    },

    #[error("Access denied to {repository}:{path}: {reason}")]
    AccessDenied {
        repository: String,
        path: String,
        reason: String,
    },

    #[error("Illegal operation on {repository}:{path}: {message}")]
    IllegalOperation {
        repository: String,
        path: String,
        message: String,
    },

    #[error("Item not found in any source: {repository}:{path} {}", render_failures(.failures))]
    CompositeNotFound {
        repository: String,
        path: String,
        failures: Vec<SourceFailure>,
    },

    // ============ Remote Errors ============
    #[error("Transport failure reaching {url} for repository {repository}: {message}")]
    TransportFailure {
        repository: String,
        url: String,
        message: String,
    },

    #[error("Storage failure in repository {repository}: {message}")]
    StorageFailure { repository: String, message: String },

    #[error("Invalid content for {repository}:{path} fetched from {url}: {reason}")]
    ContentInvalid {
        repository: String,
        path: String,
        url: String,
        reason: String,
    },

    // ============ Group Errors ============
    #[error("Cyclic grouping: adding {member} to group {group} would make it contain itself (via {chain})")]
    CyclicGrouping {
        group: String,
        member: String,
        chain: String,
    },

    #[error("Repository {member} cannot be a member of group {group}: {reason}")]
    IncompatibleMember {
        group: String,
        member: String,
        reason: String,
    },

    // ============ Repository Errors ============
    #[error("Repository {repository} is out of service")]
    RepositoryUnavailable { repository: String },

    #[error("No such repository: {repository}")]
    NoSuchRepository { repository: String },

    #[error("Invalid URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid repository configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Request for {repository}:{path} timed out after {millis}ms")]
    Timeout {
        repository: String,
        path: String,
        millis: u128,
    },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    pub fn not_found(
        repository: impl Into<String>,
        path: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        RepoError::NotFound {
            repository: repository.into(),
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn illegal(
        repository: impl Into<String>,
        path: impl ToString,
        message: impl Into<String>,
    ) -> Self {
        RepoError::IllegalOperation {
            repository: repository.into(),
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub fn storage(repository: impl Into<String>, message: impl Into<String>) -> Self {
        RepoError::StorageFailure {
            repository: repository.into(),
            message: message.into(),
        }
    }

    /// Path absent, from a single source or from all of them
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RepoError::NotFound { .. } | RepoError::CompositeNotFound { .. }
        )
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, RepoError::AccessDenied { .. })
    }

    /// Failures that say something about the origin's health
    ///
    /// Access denied and not found are answers, not outages.
    pub fn is_remote_outage(&self) -> bool {
        matches!(
            self,
            RepoError::TransportFailure { .. } | RepoError::StorageFailure { .. }
        )
    }

    /// Failures a group absorbs into its per-member failure map
    pub fn is_member_recoverable(&self) -> bool {
        matches!(
            self,
            RepoError::NotFound { .. }
                | RepoError::CompositeNotFound { .. }
                | RepoError::AccessDenied { .. }
                | RepoError::IllegalOperation { .. }
                | RepoError::RepositoryUnavailable { .. }
                | RepoError::StorageFailure { .. }
                | RepoError::TransportFailure { .. }
                | RepoError::ContentInvalid { .. }
                | RepoError::Timeout { .. }
                | RepoError::Io(_)
        )
    }

    /// Per-source failures of a composite error
    pub fn failures(&self) -> &[SourceFailure] {
        match self {
            RepoError::CompositeNotFound { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        if e.is_connect() {
            RepoError::TransportFailure {
                repository: String::new(),
                url,
                message: format!("Connection failed: {}", e),
            }
        } else if e.is_timeout() {
            RepoError::StorageFailure {
                repository: String::new(),
                message: format!("Timed out reading {}: {}", url, e),
            }
        } else {
            RepoError::StorageFailure {
                repository: String::new(),
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(e: rusqlite::Error) -> Self {
        RepoError::StorageFailure {
            repository: String::new(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_message_lists_sources() {
        let err = RepoError::CompositeNotFound {
            repository: "public".to_string(),
            path: "/a/b.jar".to_string(),
            failures: vec![
                SourceFailure::new("releases", RepoError::not_found("releases", "/a/b.jar", "absent")),
                SourceFailure::new("central", RepoError::storage("central", "disk full")),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("public:/a/b.jar"));
        assert!(message.contains("[releases: Item not found"));
        assert!(message.contains("[central: Storage failure"));
        assert!(err.is_not_found());
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn test_outage_classification() {
        let transport = RepoError::TransportFailure {
            repository: "central".to_string(),
            url: "http://localhost".to_string(),
            message: "refused".to_string(),
        };
        assert!(transport.is_remote_outage());
        assert!(!RepoError::not_found("r", "/p", "x").is_remote_outage());

        let denied = RepoError::AccessDenied {
            repository: "central".to_string(),
            path: "/p".to_string(),
            reason: "403".to_string(),
        };
        assert!(!denied.is_remote_outage());
        assert!(denied.is_access_denied());
    }
}
