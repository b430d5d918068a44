//! Depot Core - shared types for the artifact repository manager
//!
//! This crate provides the foundational types used throughout Depot:
//! - `RepositoryPath`: normalized, slash-separated item paths
//! - `Item`: a file or collection stored in a repository, with its attributes
//! - `RetrievalRequest`: a single read request and its request-scoped state
//! - Repository descriptors: write policy, local status, capabilities, proxy mode
//! - `RepositoryEvent`: domain events returned by mutating operations

pub mod error;
pub mod event;
pub mod item;
pub mod path;
pub mod repository;
pub mod request;

pub use error::{CoreError, Result};
pub use event::RepositoryEvent;
pub use item::{Attributes, Content, Item, ItemKind};
pub use path::RepositoryPath;
pub use repository::{
    Action, Capabilities, Capability, LocalStatus, ProxyMode, RemoteStatus, StatusCheckMode,
    WritePolicy,
};
pub use request::{OperationId, RequestContext, RequestFlags, RetrievalRequest};
