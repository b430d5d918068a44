//! Repository configuration management
//!
//! Stores repository definitions in `~/.config/depot/repositories.yaml`

use depot_core::{LocalStatus, StatusCheckMode, WritePolicy};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RepoError, Result};

/// Repository configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepotConfig {
    /// API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Configured repositories
    #[serde(default)]
    pub repositories: Vec<RepositoryDef>,
}

fn default_api_version() -> String {
    "depot/v1".to_string()
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            repositories: Vec::new(),
        }
    }
}

impl DepotConfig {
    /// Load configuration from default location
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| RepoError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("depot").join("repositories.yaml"))
    }

    /// Get a repository by id
    pub fn get(&self, id: &str) -> Option<&RepositoryDef> {
        self.repositories.iter().find(|r| r.id == id)
    }

    /// Get a mutable repository by id
    pub fn get_mut(&mut self, id: &str) -> Option<&mut RepositoryDef> {
        self.repositories.iter_mut().find(|r| r.id == id)
    }

    /// Add a repository
    pub fn add(&mut self, repo: RepositoryDef) -> Result<()> {
        if self.get(&repo.id).is_some() {
            return Err(RepoError::InvalidConfig {
                message: format!("Repository already exists: {}", repo.id),
            });
        }
        self.repositories.push(repo);
        Ok(())
    }

    /// Remove a repository by id, dropping it from every group as well
    pub fn remove(&mut self, id: &str) -> Result<RepositoryDef> {
        let idx = self
            .repositories
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| RepoError::NoSuchRepository {
                repository: id.to_string(),
            })?;
        let removed = self.repositories.remove(idx);
        for repo in &mut self.repositories {
            if let Some(group) = &mut repo.group {
                group.members.retain(|m| m != id);
            }
        }
        Ok(removed)
    }

    /// List all repository ids
    pub fn ids(&self) -> Vec<&str> {
        self.repositories.iter().map(|r| r.id.as_str()).collect()
    }

    /// Check the whole configuration before building a registry
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for repo in &self.repositories {
            if !seen.insert(repo.id.as_str()) {
                return Err(RepoError::InvalidConfig {
                    message: format!("Duplicate repository id: {}", repo.id),
                });
            }
            repo.validate()?;
        }

        let groups: HashMap<&str, &[String]> = self
            .repositories
            .iter()
            .filter_map(|r| r.group.as_ref().map(|g| (r.id.as_str(), g.members.as_slice())))
            .collect();

        for repo in &self.repositories {
            let Some(group) = &repo.group else { continue };
            for member in &group.members {
                let Some(def) = self.get(member) else {
                    return Err(RepoError::InvalidConfig {
                        message: format!(
                            "Group {} references unknown member {}",
                            repo.id, member
                        ),
                    });
                };
                if def.format != repo.format {
                    return Err(RepoError::IncompatibleMember {
                        group: repo.id.clone(),
                        member: member.clone(),
                        reason: format!("format {} differs from {}", def.format, repo.format),
                    });
                }
            }
            if let Some(chain) = find_cycle(&repo.id, group.members.as_slice(), &groups) {
                return Err(RepoError::CyclicGrouping {
                    group: repo.id.clone(),
                    member: chain.first().cloned().unwrap_or_default(),
                    chain: chain.join(" -> "),
                });
            }
        }
        Ok(())
    }
}

/// Depth-first search for `target` through nested group members
///
/// Returns the member chain leading back to `target`.
fn find_cycle(target: &str, members: &[String], groups: &HashMap<&str, &[String]>) -> Option<Vec<String>> {
    fn visit(
        target: &str,
        members: &[String],
        groups: &HashMap<&str, &[String]>,
        visited: &mut HashSet<String>,
        chain: &mut Vec<String>,
    ) -> bool {
        for member in members {
            chain.push(member.clone());
            if member == target {
                return true;
            }
            if visited.insert(member.clone()) {
                if let Some(nested) = groups.get(member.as_str()) {
                    if visit(target, nested, groups, visited, chain) {
                        return true;
                    }
                }
            }
            chain.pop();
        }
        false
    }

    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    visit(target, members, groups, &mut visited, &mut chain).then_some(chain)
}

/// Kind of repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    #[default]
    Hosted,
    Proxy,
    Group,
}

impl std::fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RepositoryKind::Hosted => "hosted",
            RepositoryKind::Proxy => "proxy",
            RepositoryKind::Group => "group",
        })
    }
}

/// Repository definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDef {
    /// Unique repository id
    pub id: String,

    /// Hosted, proxy or group
    #[serde(default)]
    pub kind: RepositoryKind,

    #[serde(default)]
    pub write_policy: WritePolicy,

    #[serde(default)]
    pub local_status: LocalStatus,

    #[serde(default)]
    pub not_found_cache: NotFoundCacheConfig,

    /// Whether collections may be retrieved and listed
    #[serde(default = "default_true")]
    pub browseable: bool,

    /// Content class; group members must share the group's format
    #[serde(default = "default_format")]
    pub format: String,

    /// Proxy settings, required for proxies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,

    /// Group settings, required for groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupConfig>,
}

fn default_true() -> bool {
    true
}

fn default_format() -> String {
    "maven2".to_string()
}

impl RepositoryDef {
    pub fn hosted(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: RepositoryKind::Hosted,
            write_policy: WritePolicy::default(),
            local_status: LocalStatus::default(),
            not_found_cache: NotFoundCacheConfig::default(),
            browseable: true,
            format: default_format(),
            proxy: None,
            group: None,
        }
    }

    pub fn proxy(id: impl Into<String>, remote_url: impl Into<String>) -> Self {
        Self {
            kind: RepositoryKind::Proxy,
            proxy: Some(ProxyConfig::new(remote_url)),
            ..Self::hosted(id)
        }
    }

    pub fn group(id: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            kind: RepositoryKind::Group,
            write_policy: WritePolicy::ReadOnly,
            group: Some(GroupConfig { members }),
            ..Self::hosted(id)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.id.contains(['/', ':', ' ']) {
            return Err(RepoError::InvalidConfig {
                message: format!("Invalid repository id '{}'", self.id),
            });
        }
        match self.kind {
            RepositoryKind::Proxy => {
                let proxy = self.proxy.as_ref().ok_or_else(|| RepoError::InvalidConfig {
                    message: format!("Proxy repository {} has no proxy section", self.id),
                })?;
                for url in std::iter::once(&proxy.remote_url).chain(&proxy.mirrors) {
                    url::Url::parse(url).map_err(|e| RepoError::InvalidUrl {
                        url: url.clone(),
                        reason: e.to_string(),
                    })?;
                }
            }
            RepositoryKind::Group if self.group.is_none() => {
                return Err(RepoError::InvalidConfig {
                    message: format!("Group repository {} has no group section", self.id),
                });
            }
            _ => {}
        }
        Ok(())
    }
}

/// Negative cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundCacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long a "not found" answer is trusted
    #[serde(default = "default_nfc_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

fn default_nfc_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

impl Default for NotFoundCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: default_nfc_ttl(),
        }
    }
}

/// How fetched content is checked against remote checksums
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// No checksum validation
    Ignore,
    /// Mismatches are logged, content is accepted
    #[default]
    Warn,
    /// Mismatches reject the content
    Strict,
}

/// Credentials sent to the remote origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteAuth {
    Basic { username: String, password: String },
    Bearer { token: String },
}

impl RemoteAuth {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        RemoteAuth::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Authorization header value
    pub fn header_value(&self) -> String {
        match self {
            RemoteAuth::Basic { username, password } => {
                let encoded = base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    format!("{}:{}", username, password),
                );
                format!("Basic {}", encoded)
            }
            RemoteAuth::Bearer { token } => format!("Bearer {}", token),
        }
    }
}

/// Proxy repository settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Primary origin
    pub remote_url: String,

    /// Mirrors tried after the primary origin, in order
    #[serde(default)]
    pub mirrors: Vec<String>,

    /// Minutes a cached item is served without revalidation, -1 = forever
    #[serde(default = "default_item_max_age")]
    pub item_max_age: i64,

    #[serde(default = "default_true")]
    pub item_aging_active: bool,

    #[serde(default = "default_true")]
    pub auto_block_active: bool,

    #[serde(default)]
    pub status_check_mode: StatusCheckMode,

    /// Reject HTML error pages served in place of content
    #[serde(default)]
    pub file_type_validation: bool,

    #[serde(default)]
    pub checksum_policy: ChecksumPolicy,

    #[serde(default = "default_connection_timeout", with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Attempts per candidate URL for retryable failures
    #[serde(default = "default_retry_count")]
    pub retrieval_retry_count: u32,

    /// How long a known remote status is trusted outside auto-block
    #[serde(default = "default_retain_time", with = "humantime_serde")]
    pub remote_status_retain_time: Duration,

    /// Only paths matching one of these patterns go remote (empty = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_path_patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<RemoteAuth>,

    /// Manually blocked: remote access stays off until unblocked
    #[serde(default)]
    pub blocked: bool,
}

fn default_item_max_age() -> i64 {
    1440
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_retry_count() -> u32 {
    3
}

fn default_retain_time() -> Duration {
    Duration::from_secs(5 * 60)
}

impl ProxyConfig {
    pub fn new(remote_url: impl Into<String>) -> Self {
        Self {
            remote_url: remote_url.into(),
            mirrors: Vec::new(),
            item_max_age: default_item_max_age(),
            item_aging_active: true,
            auto_block_active: true,
            status_check_mode: StatusCheckMode::default(),
            file_type_validation: false,
            checksum_policy: ChecksumPolicy::default(),
            connection_timeout: default_connection_timeout(),
            retrieval_retry_count: default_retry_count(),
            remote_status_retain_time: default_retain_time(),
            remote_path_patterns: Vec::new(),
            auth: None,
            blocked: false,
        }
    }
}

/// Group repository settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    /// Ordered member ids
    #[serde(default)]
    pub members: Vec<String>,
}
