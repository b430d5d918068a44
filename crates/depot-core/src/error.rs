//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid repository id '{id}': {reason}")]
    InvalidRepositoryId { id: String, reason: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
