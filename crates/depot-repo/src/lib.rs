//! Depot Repo - content resolution for an artifact repository manager
//!
//! Answers "give me the item at path P" for a named repository, where the
//! repository is a hosted store, a caching proxy in front of a remote origin,
//! or a group aggregating other repositories.
//!
//! ## Components
//!
//! - [`lock`]: per-(repository, path) locks with `read < create/delete` levels
//! - [`nfc`]: TTL cache of paths known not to exist
//! - [`staleness`]: decides whether a cached item may be served without
//!   revalidation
//! - [`fetch`]: retry / fallback / blacklist protocol over candidate URLs
//! - [`health`]: proxy mode and remote status, auto-block with Fibonacci backoff
//! - [`proxy`]: local-first, remote-fallback resolution for proxy repositories
//! - [`group`]: fan-out across ordered members, membership cycle checks
//! - [`maintenance`]: expire, evict and invalidate driven by a tree walk
//! - [`registry`]: owns the repositories and dispatches requests by kind
//!
//! Collaborators sit behind traits: [`storage::Store`],
//! [`remote::RemoteSource`], [`validation::ContentValidator`],
//! [`strategy::RequestStrategy`] and the [`walker`].

pub mod config;
pub mod error;
pub mod fetch;
pub mod group;
pub mod health;
pub mod lock;
pub mod maintenance;
pub mod nfc;
pub mod proxy;
pub mod registry;
pub mod remote;
pub mod repository;
pub mod staleness;
pub mod storage;
pub mod strategy;
pub mod validation;
pub mod walker;

pub use config::{
    ChecksumPolicy, DepotConfig, GroupConfig, NotFoundCacheConfig, ProxyConfig, RemoteAuth,
    RepositoryDef, RepositoryKind,
};
pub use error::{RepoError, Result, SourceFailure};
pub use fetch::{FetchedItem, RemoteFetchEngine};
pub use health::{HealthController, HealthSettings, RetainSequence};
pub use lock::{LockLevel, PathLockGuard, PathLockManager};
pub use nfc::NotFoundCache;
pub use proxy::ProxyFacet;
pub use registry::RepositoryRegistry;
pub use remote::{HttpRemote, RemoteItem, RemoteSource, ScriptedRemote};
pub use repository::{Repository, RepositoryBuilder};
pub use staleness::{AgingPolicy, Freshness, StaleReason};
pub use storage::{MemoryStore, SqliteStore, Store};
pub use strategy::{PathFilterStrategy, RequestStrategy};
pub use validation::{ChecksumValidator, ContentValidator, FileTypeValidator};
pub use walker::{WalkStats, WalkerFilter, WalkerProcessor};
