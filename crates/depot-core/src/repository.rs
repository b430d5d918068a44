//! Repository descriptors
//!
//! Value types describing what a repository is and what it currently allows:
//! write policy, local status, capability set, and the proxy health state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Write policy of a repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WritePolicy {
    /// Only reads (and, for proxies, deletes of cached content)
    ReadOnly,
    /// Items may be created but never overwritten
    WriteOnce,
    /// Items may be created and overwritten
    #[default]
    ReadWrite,
}

/// Local (administrative) status of a repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocalStatus {
    #[default]
    InService,
    OutOfService,
}

impl LocalStatus {
    pub fn should_service_request(self) -> bool {
        matches!(self, LocalStatus::InService)
    }
}

/// Action performed against an item, used for policy checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn is_read(self) -> bool {
        matches!(self, Action::Read)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A capability a repository may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Owns content written directly into its local store
    Hosted,
    /// Caches content from a remote origin
    Proxy,
    /// Aggregates member repositories
    Group,
    /// Presents another repository's content under a different layout
    Shadow,
}

/// Set of capabilities a repository exposes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(capabilities: &[Capability]) -> Self {
        Self(capabilities.iter().copied().collect())
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

/// Proxy mode: whether a proxy repository may contact its remote origin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyMode {
    /// Remote access allowed
    #[default]
    Allow,
    /// Blocked automatically after the origin was judged unreachable
    BlockedAuto,
    /// Blocked by an administrator
    BlockedManual,
}

impl ProxyMode {
    /// Remote access is permitted
    pub fn should_proxy(self) -> bool {
        matches!(self, ProxyMode::Allow)
    }

    /// Reachability checks are meaningful in this mode
    pub fn should_check_remote_status(self) -> bool {
        matches!(self, ProxyMode::Allow | ProxyMode::BlockedAuto)
    }

    /// A successful reachability check lifts the block
    pub fn should_auto_unblock(self) -> bool {
        matches!(self, ProxyMode::BlockedAuto)
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProxyMode::Allow => "ALLOW",
            ProxyMode::BlockedAuto => "BLOCKED_AUTO",
            ProxyMode::BlockedManual => "BLOCKED_MANUAL",
        };
        f.write_str(s)
    }
}

/// Last known reachability of a remote origin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    #[default]
    Unknown,
    Available,
    Unavailable { reason: Option<String> },
}

impl RemoteStatus {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        RemoteStatus::Unavailable {
            reason: Some(reason.into()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, RemoteStatus::Unknown)
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteStatus::Unknown => f.write_str("UNKNOWN"),
            RemoteStatus::Available => f.write_str("AVAILABLE"),
            RemoteStatus::Unavailable { reason: None } => f.write_str("UNAVAILABLE"),
            RemoteStatus::Unavailable { reason: Some(r) } => write!(f, "UNAVAILABLE ({})", r),
        }
    }
}

/// When the background health check contacts the remote origin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCheckMode {
    /// Probe periodically while the repository is in service
    Always,
    /// Probe only while auto-blocked, to attempt an auto-unblock
    #[default]
    AutoBlockedOnly,
    /// Never check, blocks are lifted manually
    Never,
}
