//! Depth-first walk over a repository's local store
//!
//! The walker lists collections through the [`Store`] trait, hands every
//! accepted item to a [`WalkerProcessor`], and notifies the processor when it
//! leaves a collection (after all its children were processed). A filter
//! that rejects a collection prunes its whole subtree.

use async_trait::async_trait;
use depot_core::{Item, RepositoryPath};
use std::collections::VecDeque;

use crate::error::Result;
use crate::storage::Store;

/// Predicate deciding which items a walk visits
pub trait WalkerFilter: Send + Sync {
    fn accept(&self, item: &Item) -> bool;
}

impl<F> WalkerFilter for F
where
    F: Fn(&Item) -> bool + Send + Sync,
{
    fn accept(&self, item: &Item) -> bool {
        self(item)
    }
}

/// Receives the items of a walk
#[async_trait]
pub trait WalkerProcessor: Send {
    /// Called for every accepted item, collections included
    async fn process_item(&mut self, item: &Item) -> Result<()>;

    /// Called after the last child of a collection was processed
    async fn on_collection_exit(&mut self, _collection: &Item) -> Result<()> {
        Ok(())
    }
}

/// Counters of a finished walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub files: usize,
    pub collections: usize,
}

/// Walk `root` in `repository`, depth first
///
/// The root itself is processed too when it is a file; a root collection is
/// only reported through `on_collection_exit`.
pub async fn walk(
    store: &dyn Store,
    repository: &str,
    root: &RepositoryPath,
    filter: Option<&dyn WalkerFilter>,
    processor: &mut dyn WalkerProcessor,
) -> Result<WalkStats> {
    let mut stats = WalkStats::default();
    let root_item = store.get(repository, root).await?;

    if !root_item.is_collection() {
        if filter.is_none_or(|f| f.accept(&root_item)) {
            processor.process_item(&root_item).await?;
            stats.files += 1;
        }
        return Ok(stats);
    }

    let children = store.list(repository, root).await?;
    let mut stack: Vec<(Item, VecDeque<Item>)> = vec![(root_item, children.into())];

    while let Some((_, pending)) = stack.last_mut() {
        match pending.pop_front() {
            Some(child) => {
                if !filter.is_none_or(|f| f.accept(&child)) {
                    continue;
                }
                processor.process_item(&child).await?;
                if child.is_collection() {
                    stats.collections += 1;
                    let children = store.list(repository, &child.path).await?;
                    stack.push((child, children.into()));
                } else {
                    stats.files += 1;
                }
            }
            None => {
                if let Some((collection, _)) = stack.pop() {
                    processor.on_collection_exit(&collection).await?;
                }
            }
        }
    }

    tracing::debug!(
        repository,
        root = %root,
        files = stats.files,
        collections = stats.collections,
        "walk finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    #[async_trait]
    impl WalkerProcessor for Recorder {
        async fn process_item(&mut self, item: &Item) -> Result<()> {
            self.events.push(format!("item {}", item.path));
            Ok(())
        }

        async fn on_collection_exit(&mut self, collection: &Item) -> Result<()> {
            self.events.push(format!("exit {}", collection.path));
            Ok(())
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::with_items(vec![
            Item::file("r", RepositoryPath::new("/a/1").unwrap(), "1"),
            Item::file("r", RepositoryPath::new("/a/b/2").unwrap(), "2"),
            Item::file("r", RepositoryPath::new("/c").unwrap(), "3"),
        ])
    }

    #[tokio::test]
    async fn test_depth_first_order() {
        let store = store();
        let mut recorder = Recorder::default();
        let stats = walk(&store, "r", &RepositoryPath::root(), None, &mut recorder)
            .await
            .unwrap();

        assert_eq!(
            recorder.events,
            vec![
                "item /a", "item /a/1", "item /a/b", "item /a/b/2", "exit /a/b", "exit /a",
                "item /c", "exit /",
            ]
        );
        assert_eq!(stats, WalkStats { files: 3, collections: 2 });
    }

    #[tokio::test]
    async fn test_filter_prunes_subtrees() {
        let store = store();
        let mut recorder = Recorder::default();
        let filter = |item: &Item| item.path.as_str() != "/a/b";
        walk(
            &store,
            "r",
            &RepositoryPath::new("/a").unwrap(),
            Some(&filter),
            &mut recorder,
        )
        .await
        .unwrap();

        assert_eq!(recorder.events, vec!["item /a/1", "exit /a"]);
    }

    #[tokio::test]
    async fn test_walk_single_file() {
        let store = store();
        let mut recorder = Recorder::default();
        let stats = walk(&store, "r", &RepositoryPath::new("/c").unwrap(), None, &mut recorder)
            .await
            .unwrap();
        assert_eq!(recorder.events, vec!["item /c"]);
        assert_eq!(stats.files, 1);
    }
}
