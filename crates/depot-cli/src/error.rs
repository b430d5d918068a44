//! CLI error types with exit code handling

use depot_repo::RepoError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Nothing answered for the requested path
    #[error("{message}")]
    #[diagnostic(code(depot::cli::not_found))]
    NotFound {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Repository definitions or membership rejected
    #[error("Configuration error: {message}")]
    #[diagnostic(code(depot::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Origin unreachable, denied or too slow
    #[error("Remote error: {message}")]
    #[diagnostic(code(depot::cli::remote))]
    Remote { message: String },

    /// Invalid arguments
    #[error("{message}")]
    #[diagnostic(code(depot::cli::usage))]
    Usage { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(depot::cli::io))]
    Io { message: String },

    /// Any other repository failure
    #[error("{message}")]
    #[diagnostic(code(depot::cli::repository))]
    Repository { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::NotFound { .. } => exit_codes::NOT_FOUND,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Remote { .. } => exit_codes::REMOTE_ERROR,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Repository { .. } => exit_codes::ERROR,
        }
    }

    /// Create a usage error (user provided invalid input)
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }
}

fn failure_help(err: &RepoError) -> Option<String> {
    let failures = err.failures();
    if failures.is_empty() {
        return None;
    }
    let lines: Vec<String> = failures
        .iter()
        .map(|f| format!("{}: {}", f.id, f.error))
        .collect();
    Some(format!("Sources consulted:\n{}", lines.join("\n")))
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        let message = err.to_string();
        match &err {
            e if e.is_not_found() => CliError::NotFound {
                help: failure_help(e),
                message,
            },
            RepoError::InvalidConfig { .. } | RepoError::NoSuchRepository { .. } => CliError::Config {
                message,
                help: Some("Check the repository configuration with 'depot repos'".to_string()),
            },
            RepoError::CyclicGrouping { .. } | RepoError::IncompatibleMember { .. } => {
                CliError::Config { message, help: None }
            }
            RepoError::TransportFailure { .. }
            | RepoError::AccessDenied { .. }
            | RepoError::Timeout { .. }
            | RepoError::ContentInvalid { .. } => CliError::Remote { message },
            RepoError::Io(_) => CliError::Io { message },
            _ => CliError::Repository { message },
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::RepositoryPath;
    use depot_repo::SourceFailure;

    #[test]
    fn test_exit_codes_follow_error_kind() {
        let not_found = RepoError::not_found("central", &RepositoryPath::root(), "gone");
        assert_eq!(CliError::from(not_found).exit_code(), exit_codes::NOT_FOUND);

        let missing = RepoError::NoSuchRepository {
            repository: "x".into(),
        };
        assert_eq!(CliError::from(missing).exit_code(), exit_codes::CONFIG_ERROR);

        let timeout = RepoError::Timeout {
            repository: "central".into(),
            path: "/a".into(),
            millis: 10,
        };
        assert_eq!(CliError::from(timeout).exit_code(), exit_codes::REMOTE_ERROR);
    }

    #[test]
    fn test_composite_lists_sources_in_help() {
        let err = RepoError::CompositeNotFound {
            repository: "public".into(),
            path: "/a.jar".into(),
            failures: vec![
                SourceFailure::new("m1", RepoError::not_found("m1", &RepositoryPath::root(), "absent")),
                SourceFailure::new("m3", RepoError::not_found("m3", &RepositoryPath::root(), "absent")),
            ],
        };
        let CliError::NotFound { help: Some(help), .. } = CliError::from(err) else {
            panic!("expected a not-found error with help");
        };
        assert!(help.contains("m1:"));
        assert!(help.contains("m3:"));
    }
}
