//! Local storage
//!
//! Every repository owns one [`Store`]. Two drivers ship with the crate:
//! - [`MemoryStore`]: in-memory, with operation counters for assertions
//! - [`SqliteStore`]: persistent, one SQLite database per store

mod memory;
mod sqlite;

pub use memory::{MemoryStore, OperationCounts};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use depot_core::{Item, RepositoryPath};

use crate::error::{RepoError, Result};

/// Local item storage
///
/// Operations are atomic per item. Storing a file creates any missing parent
/// collections; deleting a collection deletes everything below it. The root
/// collection always exists.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch one item, `NotFound` if absent
    async fn get(&self, repository: &str, path: &RepositoryPath) -> Result<Item>;

    /// Create or replace an item
    async fn put(&self, item: &Item) -> Result<()>;

    /// Delete an item (and its subtree), `NotFound` if absent
    async fn delete(&self, repository: &str, path: &RepositoryPath) -> Result<()>;

    /// Delete a collection only if it has no children
    ///
    /// The emptiness check and the removal are one atomic step. Returns
    /// whether the collection was removed; files and the root are never
    /// removed.
    async fn delete_empty_collection(&self, repository: &str, path: &RepositoryPath) -> Result<bool>;

    /// Direct children of a collection, `NotFound` if the collection is absent
    async fn list(&self, repository: &str, path: &RepositoryPath) -> Result<Vec<Item>>;

    /// Whether an item exists at the path
    async fn contains(&self, repository: &str, path: &RepositoryPath) -> Result<bool> {
        match self.get(repository, path).await {
            Ok(_) => Ok(true),
            Err(RepoError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Driver name, for logs
    fn name(&self) -> &'static str;
}

fn root_item(repository: &str) -> Item {
    Item::collection(repository, RepositoryPath::root())
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every driver must share

    use super::*;

    pub fn path(p: &str) -> RepositoryPath {
        RepositoryPath::new(p).unwrap()
    }

    pub async fn put_creates_parents(store: &dyn Store) {
        store
            .put(&Item::file("r", path("/org/acme/lib.jar"), "jar"))
            .await
            .unwrap();

        assert!(store.get("r", &path("/org")).await.unwrap().is_collection());
        assert!(store.get("r", &path("/org/acme")).await.unwrap().is_collection());
        let file = store.get("r", &path("/org/acme/lib.jar")).await.unwrap();
        assert_eq!(file.bytes(), b"jar");
        assert!(store.get("r", &RepositoryPath::root()).await.unwrap().is_collection());
    }

    pub async fn list_direct_children(store: &dyn Store) {
        store.put(&Item::file("r", path("/a/one"), "1")).await.unwrap();
        store.put(&Item::file("r", path("/a/two"), "2")).await.unwrap();
        store.put(&Item::file("r", path("/a/sub/three"), "3")).await.unwrap();
        store.put(&Item::file("other", path("/a/four"), "4")).await.unwrap();

        let names: Vec<String> = store
            .list("r", &path("/a"))
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.path.to_string())
            .collect();
        assert_eq!(names, vec!["/a/one", "/a/sub", "/a/two"]);

        let root: Vec<String> = store
            .list("r", &RepositoryPath::root())
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.path.to_string())
            .collect();
        assert_eq!(root, vec!["/a"]);

        assert!(matches!(
            store.list("r", &path("/missing")).await,
            Err(RepoError::NotFound { .. })
        ));
    }

    pub async fn delete_empty_collection_only(store: &dyn Store) {
        store.put(&Item::file("r", path("/a/b/c"), "c")).await.unwrap();

        assert!(!store.delete_empty_collection("r", &path("/a/b")).await.unwrap());
        assert!(!store.delete_empty_collection("r", &path("/a/b/c")).await.unwrap());
        assert!(!store.delete_empty_collection("r", &path("/missing")).await.unwrap());

        store.delete("r", &path("/a/b/c")).await.unwrap();
        assert!(store.delete_empty_collection("r", &path("/a/b")).await.unwrap());
        assert!(!store.contains("r", &path("/a/b")).await.unwrap());
        assert!(store.contains("r", &path("/a")).await.unwrap());
    }

    pub async fn delete_subtree(store: &dyn Store) {
        store.put(&Item::file("r", path("/a/b/c"), "c")).await.unwrap();
        store.put(&Item::file("r", path("/ab"), "ab")).await.unwrap();

        store.delete("r", &path("/a")).await.unwrap();
        assert!(!store.contains("r", &path("/a")).await.unwrap());
        assert!(!store.contains("r", &path("/a/b/c")).await.unwrap());
        assert!(store.contains("r", &path("/ab")).await.unwrap());

        assert!(matches!(
            store.delete("r", &path("/a")).await,
            Err(RepoError::NotFound { .. })
        ));
    }

    pub async fn attributes_round_trip(store: &dyn Store) {
        let checked = chrono::Utc::now();
        let mut item = Item::file("r", path("/x.pom"), "<project/>")
            .with_attribute("remote.sha256", "abc")
            .with_remote_checked(checked);
        item.expired = true;
        item.remote_url = Some("https://repo.example.com/x.pom".to_string());
        store.put(&item).await.unwrap();

        let loaded = store.get("r", &path("/x.pom")).await.unwrap();
        assert!(loaded.expired);
        assert_eq!(loaded.attributes.get("remote.sha256").map(String::as_str), Some("abc"));
        assert_eq!(
            loaded.remote_checked.map(|t| t.timestamp_millis()),
            Some(checked.timestamp_millis())
        );
        assert_eq!(loaded.remote_url, item.remote_url);
    }
}
