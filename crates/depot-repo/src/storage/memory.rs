//! In-memory store
//!
//! Keeps items in a sorted map, useful for tests and for ephemeral
//! repositories. Counts every operation so tests can assert how often the
//! resolution engines touched local storage.

use async_trait::async_trait;
use depot_core::{Item, RepositoryPath};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Store, root_item};
use crate::error::{RepoError, Result};

type ItemKey = (String, RepositoryPath);

/// In-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    items: Arc<RwLock<BTreeMap<ItemKey, Item>>>,
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub puts: usize,
    pub deletes: usize,
    pub lists: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated items
    pub fn with_items(items: Vec<Item>) -> Self {
        let store = Self::new();
        {
            let mut map = store.items.write();
            for item in items {
                insert_with_parents(&mut map, item);
            }
        }
        store
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().clone()
    }

    pub fn reset_counts(&self) {
        *self.operations.write() = OperationCounts::default();
    }

    /// Number of stored items across all repositories
    pub fn item_count(&self) -> usize {
        self.items.read().len()
    }

    /// All paths stored for a repository, sorted
    pub fn paths(&self, repository: &str) -> Vec<RepositoryPath> {
        self.items
            .read()
            .keys()
            .filter(|(repo, _)| repo == repository)
            .map(|(_, path)| path.clone())
            .collect()
    }
}

fn insert_with_parents(map: &mut BTreeMap<ItemKey, Item>, item: Item) {
    for parent in item.path.parents() {
        if parent.is_root() {
            continue;
        }
        map.entry((item.repository_id.clone(), parent.clone()))
            .or_insert_with(|| Item::collection(item.repository_id.clone(), parent));
    }
    map.insert((item.repository_id.clone(), item.path.clone()), item);
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, repository: &str, path: &RepositoryPath) -> Result<Item> {
        self.operations.write().gets += 1;

        let items = self.items.read();
        match items.get(&(repository.to_string(), path.clone())) {
            Some(item) => Ok(item.clone()),
            None if path.is_root() => Ok(root_item(repository)),
            None => Err(RepoError::not_found(repository, path, "not in local storage")),
        }
    }

    async fn put(&self, item: &Item) -> Result<()> {
        self.operations.write().puts += 1;
        insert_with_parents(&mut self.items.write(), item.clone());
        Ok(())
    }

    async fn delete(&self, repository: &str, path: &RepositoryPath) -> Result<()> {
        self.operations.write().deletes += 1;

        let mut items = self.items.write();
        let before = items.len();
        items.retain(|(repo, p), _| !(repo == repository && p.is_self_or_descendant_of(path)));
        if before == items.len() && !path.is_root() {
            return Err(RepoError::not_found(repository, path, "not in local storage"));
        }
        Ok(())
    }

    async fn delete_empty_collection(&self, repository: &str, path: &RepositoryPath) -> Result<bool> {
        if path.is_root() {
            return Ok(false);
        }
        let mut items = self.items.write();
        let key = (repository.to_string(), path.clone());
        if !items.get(&key).is_some_and(Item::is_collection) {
            return Ok(false);
        }
        let has_children = items
            .keys()
            .any(|(repo, p)| repo == repository && p.parent().as_ref() == Some(path));
        if has_children {
            return Ok(false);
        }
        items.remove(&key);
        self.operations.write().deletes += 1;
        Ok(true)
    }

    async fn list(&self, repository: &str, path: &RepositoryPath) -> Result<Vec<Item>> {
        self.operations.write().lists += 1;

        let items = self.items.read();
        if !path.is_root() {
            match items.get(&(repository.to_string(), path.clone())) {
                Some(item) if item.is_collection() => {}
                Some(_) => {
                    return Err(RepoError::not_found(repository, path, "not a collection"));
                }
                None => {
                    return Err(RepoError::not_found(repository, path, "not in local storage"));
                }
            }
        }

        Ok(items
            .iter()
            .filter(|((repo, p), _)| repo == repository && p.parent().as_ref() == Some(path))
            .map(|(_, item)| item.clone())
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
