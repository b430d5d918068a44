//! Negative ("not found") cache
//!
//! A per-repository TTL map of paths known to be absent. Lookups go through
//! an internal lock and never through the path locks.

use depot_core::RepositoryPath;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Entry {
    inserted: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted) >= self.ttl
    }
}

/// Negative cache for one repository
#[derive(Debug, Default)]
pub struct NotFoundCache {
    entries: RwLock<HashMap<RepositoryPath, Entry>>,
}

impl NotFoundCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &RepositoryPath) -> bool {
        self.entries.read().contains_key(path)
    }

    /// Whether a cached entry has outlived its TTL (false when absent)
    pub fn is_expired(&self, path: &RepositoryPath) -> bool {
        self.entries
            .read()
            .get(path)
            .map(|e| e.is_expired(Instant::now()))
            .unwrap_or(false)
    }

    /// Time left before the entry expires
    pub fn remaining(&self, path: &RepositoryPath) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .read()
            .get(path)
            .map(|e| e.ttl.saturating_sub(now.duration_since(e.inserted)))
    }

    pub fn put(&self, path: RepositoryPath, ttl: Duration) {
        self.entries.write().insert(
            path,
            Entry {
                inserted: Instant::now(),
                ttl,
            },
        );
    }

    pub fn remove(&self, path: &RepositoryPath) -> bool {
        self.entries.write().remove(path).is_some()
    }

    /// Remove the path and every ancestor
    ///
    /// An ancestor that now exists invalidates "not found" answers recorded
    /// for anything below it.
    pub fn remove_with_parents(&self, path: &RepositoryPath) -> usize {
        let mut entries = self.entries.write();
        let mut removed = usize::from(entries.remove(path).is_some());
        for parent in path.parents() {
            removed += usize::from(entries.remove(&parent).is_some());
        }
        removed
    }

    /// Remove the path and everything below it
    pub fn remove_with_children(&self, path: &RepositoryPath) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|p, _| !p.is_self_or_descendant_of(path));
        before - entries.len()
    }

    /// Remove only the given paths
    pub fn remove_all<'a>(&self, paths: impl IntoIterator<Item = &'a RepositoryPath>) -> usize {
        let mut entries = self.entries.write();
        paths
            .into_iter()
            .filter(|p| entries.remove(*p).is_some())
            .count()
    }

    pub fn purge(&self) {
        self.entries.write().clear();
    }

    /// Cached paths, sorted
    pub fn keys(&self) -> Vec<RepositoryPath> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
