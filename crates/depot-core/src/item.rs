//! Repository items
//!
//! An item is a node in a repository namespace: either a collection
//! (directory) or a file (leaf with content). Items carry the timestamps the
//! proxy cache needs to decide staleness and eviction, plus a free-form
//! attribute map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::path::RepositoryPath;

/// Attribute holding the cache-invalidation token an item was last validated under
pub const ATTR_INVALIDATION_TOKEN: &str = "proxy.invalidationToken";

/// Attribute holding a SHA-256 checksum advertised by the remote origin
pub const ATTR_REMOTE_SHA256: &str = "remote.sha256";

/// Attribute holding the content type reported by the remote origin
pub const ATTR_REMOTE_CONTENT_TYPE: &str = "remote.contentType";

/// Free-form item attributes
pub type Attributes = BTreeMap<String, String>;

/// Item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// A leaf carrying content
    File,
    /// A directory-like container
    Collection,
}

/// Immutable, cheaply clonable item content
#[derive(Clone, PartialEq, Eq)]
pub struct Content(Arc<[u8]>);

impl Content {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Content({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Content {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

/// A repository item
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Repository that owns this item
    pub repository_id: String,
    /// Path of the item
    pub path: RepositoryPath,
    /// File or collection
    pub kind: ItemKind,
    /// When the item was first stored
    pub created: DateTime<Utc>,
    /// Last modification time (remote Last-Modified for cached items)
    pub modified: DateTime<Utc>,
    /// Last time the remote origin was consulted for this item
    pub remote_checked: Option<DateTime<Utc>>,
    /// Last time the item was served
    pub last_requested: DateTime<Utc>,
    /// Explicitly expired (forces revalidation)
    pub expired: bool,
    /// URL the item was fetched from, for cached items
    pub remote_url: Option<String>,
    /// Free-form attributes
    pub attributes: Attributes,
    /// Content, files only
    pub content: Option<Content>,
}

impl Item {
    /// Create a file item stamped with the current time
    pub fn file(
        repository_id: impl Into<String>,
        path: RepositoryPath,
        content: impl Into<Content>,
    ) -> Self {
        let now = Utc::now();
        Self {
            repository_id: repository_id.into(),
            path,
            kind: ItemKind::File,
            created: now,
            modified: now,
            remote_checked: None,
            last_requested: now,
            expired: false,
            remote_url: None,
            attributes: Attributes::new(),
            content: Some(content.into()),
        }
    }

    /// Create a collection item stamped with the current time
    pub fn collection(repository_id: impl Into<String>, path: RepositoryPath) -> Self {
        let now = Utc::now();
        Self {
            repository_id: repository_id.into(),
            path,
            kind: ItemKind::Collection,
            created: now,
            modified: now,
            remote_checked: None,
            last_requested: now,
            expired: false,
            remote_url: None,
            attributes: Attributes::new(),
            content: None,
        }
    }

    pub fn is_collection(&self) -> bool {
        self.kind == ItemKind::Collection
    }

    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }

    /// Content length in bytes, 0 for collections
    pub fn len(&self) -> usize {
        self.content.as_ref().map(Content::len).unwrap_or(0)
    }

    /// Whether the item carries no content
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content bytes, empty for collections
    pub fn bytes(&self) -> &[u8] {
        self.content.as_ref().map(Content::as_bytes).unwrap_or(&[])
    }

    /// Cache-invalidation token the item was last validated under
    pub fn invalidation_token(&self) -> Option<&str> {
        self.attributes
            .get(ATTR_INVALIDATION_TOKEN)
            .map(String::as_str)
    }

    /// Re-tag the item with an invalidation token
    pub fn set_invalidation_token(&mut self, token: impl Into<String>) {
        self.attributes
            .insert(ATTR_INVALIDATION_TOKEN.to_string(), token.into());
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builder-style remote-checked setter
    pub fn with_remote_checked(mut self, at: DateTime<Utc>) -> Self {
        self.remote_checked = Some(at);
        self
    }

    /// Re-home the item under another repository (used when a group serves
    /// a member's item)
    pub fn rehomed(mut self, repository_id: impl Into<String>) -> Self {
        self.repository_id = repository_id.into();
        self
    }
}
