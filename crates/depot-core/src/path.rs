//! Repository paths
//!
//! Every item in a repository namespace is addressed by a normalized path:
//! always starting with `/`, no trailing slash (except the root itself),
//! no empty, `.` or `..` segments.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// Separator between path segments
pub const SEPARATOR: char = '/';

/// A normalized repository path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryPath(String);

impl RepositoryPath {
    /// The root collection of every repository
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and normalize a path
    ///
    /// Leading/trailing separators and repeated separators are collapsed,
    /// `.` segments are dropped. `..` is rejected rather than resolved.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref();
        let mut segments = Vec::new();

        for segment in raw.split(SEPARATOR) {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(CoreError::InvalidPath {
                        path: raw.to_string(),
                        reason: "parent segments ('..') are not allowed".to_string(),
                    });
                }
                s if s.chars().any(|c| c.is_control()) => {
                    return Err(CoreError::InvalidPath {
                        path: raw.to_string(),
                        reason: "control characters are not allowed".to_string(),
                    });
                }
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            Ok(Self::root())
        } else {
            Ok(Self(format!("/{}", segments.join("/"))))
        }
    }

    /// The normalized string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the root path
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Last segment, empty for the root
    pub fn name(&self) -> &str {
        self.0.rsplit(SEPARATOR).next().unwrap_or_default()
    }

    /// Parent path, `None` for the root
    pub fn parent(&self) -> Option<RepositoryPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(SEPARATOR) {
            Some(0) | None => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
        }
    }

    /// All ancestors, nearest first, ending with the root
    pub fn parents(&self) -> Vec<RepositoryPath> {
        let mut result = Vec::new();
        let mut current = self.parent();
        while let Some(p) = current {
            current = p.parent();
            result.push(p);
        }
        result
    }

    /// Append a child segment
    pub fn join(&self, segment: &str) -> Result<RepositoryPath> {
        if self.is_root() {
            Self::new(segment)
        } else {
            Self::new(format!("{}/{}", self.0, segment))
        }
    }

    /// Whether `self` lies strictly below `ancestor`
    pub fn is_descendant_of(&self, ancestor: &RepositoryPath) -> bool {
        if self == ancestor {
            return false;
        }
        if ancestor.is_root() {
            return true;
        }
        self.0.starts_with(&ancestor.0) && self.0[ancestor.0.len()..].starts_with(SEPARATOR)
    }

    /// Whether `self` is `other` or lies below it
    pub fn is_self_or_descendant_of(&self, other: &RepositoryPath) -> bool {
        self == other || self.is_descendant_of(other)
    }

    /// Number of segments (0 for the root)
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches(SEPARATOR).count()
        }
    }
}

impl Default for RepositoryPath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for RepositoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RepositoryPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RepositoryPath {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RepositoryPath {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RepositoryPath> for String {
    fn from(path: RepositoryPath) -> Self {
        path.0
    }
}
