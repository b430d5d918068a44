//! Command implementations

pub mod get;
pub mod list;
pub mod maintenance;
pub mod members;
pub mod proxy;
pub mod repos;

use depot_core::RepositoryPath;

use crate::error::{CliError, Result};

/// Parse a path argument, reporting bad input as a usage error
pub fn parse_path(raw: &str) -> Result<RepositoryPath> {
    RepositoryPath::new(raw).map_err(|e| CliError::usage(format!("Invalid path '{}': {}", raw, e)))
}
