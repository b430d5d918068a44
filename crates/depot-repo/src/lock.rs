//! Per-path locks
//!
//! Locks are keyed by (repository id, path) and come in three levels,
//! ordered `Read < Create < Delete`. Any number of readers may hold a path;
//! `Create` and `Delete` are exclusive. Locks are reentrant per
//! [`OperationId`]: an operation already holding a path never blocks on
//! itself, and an exclusive request ignores the operation's own readers.
//!
//! Guards release on drop, so a cancelled or failed request never leaves a
//! path locked. There is no in-place upgrade: callers release `Read` and
//! then acquire `Create`, and must re-check anything they observed before.

use depot_core::{OperationId, RepositoryPath};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::{RepoError, Result};

/// Lock level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockLevel {
    Read,
    Create,
    Delete,
}

impl LockLevel {
    pub fn is_exclusive(self) -> bool {
        self > LockLevel::Read
    }
}

type LockKey = (String, RepositoryPath);

#[derive(Default)]
struct LockState {
    readers: HashMap<OperationId, usize>,
    writer: Option<(OperationId, usize)>,
    notify: Arc<Notify>,
}

impl LockState {
    fn try_grant(&mut self, op: OperationId, level: LockLevel) -> bool {
        if level.is_exclusive() {
            if let Some((holder, count)) = &mut self.writer {
                if *holder != op {
                    return false;
                }
                *count += 1;
                return true;
            }
            if self.readers.keys().all(|r| *r == op) {
                self.writer = Some((op, 1));
                return true;
            }
            false
        } else {
            match self.writer {
                Some((holder, _)) if holder != op => false,
                _ => {
                    *self.readers.entry(op).or_insert(0) += 1;
                    true
                }
            }
        }
    }

    fn release(&mut self, op: OperationId, level: LockLevel) {
        if level.is_exclusive() {
            if let Some((holder, count)) = &mut self.writer {
                if *holder == op {
                    *count -= 1;
                    if *count == 0 {
                        self.writer = None;
                    }
                }
            }
        } else if let Some(count) = self.readers.get_mut(&op) {
            *count -= 1;
            if *count == 0 {
                self.readers.remove(&op);
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

#[derive(Default)]
struct LockTable {
    entries: HashMap<LockKey, LockState>,
    /// Bumped on every release; lets a waiter detect a release it raced with
    generation: u64,
}

enum Attempt {
    Granted,
    Wait(Arc<Notify>, u64),
}

/// Lock manager shared by every repository of a registry
#[derive(Clone, Default)]
pub struct PathLockManager {
    table: Arc<Mutex<LockTable>>,
}

impl PathLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a lock, waiting as long as it takes
    pub async fn acquire(
        &self,
        repository: &str,
        path: &RepositoryPath,
        level: LockLevel,
        op: OperationId,
    ) -> PathLockGuard {
        let key = (repository.to_string(), path.clone());
        loop {
            match self.try_acquire(&key, level, op) {
                Attempt::Granted => {
                    return PathLockGuard {
                        table: Arc::clone(&self.table),
                        key,
                        level,
                        op,
                    };
                }
                Attempt::Wait(notify, generation) => {
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    if self.table.lock().generation != generation {
                        continue;
                    }
                    notified.await;
                }
            }
        }
    }

    /// Acquire a lock, giving up after `timeout`
    pub async fn acquire_timeout(
        &self,
        repository: &str,
        path: &RepositoryPath,
        level: LockLevel,
        op: OperationId,
        timeout: Duration,
    ) -> Result<PathLockGuard> {
        tokio::time::timeout(timeout, self.acquire(repository, path, level, op))
            .await
            .map_err(|_| RepoError::Timeout {
                repository: repository.to_string(),
                path: path.to_string(),
                millis: timeout.as_millis(),
            })
    }

    /// Acquire without waiting
    pub fn try_lock(
        &self,
        repository: &str,
        path: &RepositoryPath,
        level: LockLevel,
        op: OperationId,
    ) -> Option<PathLockGuard> {
        let key = (repository.to_string(), path.clone());
        match self.try_acquire(&key, level, op) {
            Attempt::Granted => Some(PathLockGuard {
                table: Arc::clone(&self.table),
                key,
                level,
                op,
            }),
            Attempt::Wait(..) => None,
        }
    }

    /// Number of paths currently locked
    pub fn held(&self) -> usize {
        self.table.lock().entries.len()
    }

    fn try_acquire(&self, key: &LockKey, level: LockLevel, op: OperationId) -> Attempt {
        let mut table = self.table.lock();
        let generation = table.generation;
        let state = table.entries.entry(key.clone()).or_default();
        if state.try_grant(op, level) {
            Attempt::Granted
        } else {
            Attempt::Wait(Arc::clone(&state.notify), generation)
        }
    }
}

/// A held path lock, released on drop
pub struct PathLockGuard {
    table: Arc<Mutex<LockTable>>,
    key: LockKey,
    level: LockLevel,
    op: OperationId,
}

impl PathLockGuard {
    pub fn level(&self) -> LockLevel {
        self.level
    }

    pub fn path(&self) -> &RepositoryPath {
        &self.key.1
    }
}

impl std::fmt::Debug for PathLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathLockGuard")
            .field("repository", &self.key.0)
            .field("path", &self.key.1)
            .field("level", &self.level)
            .field("op", &self.op)
            .finish()
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        table.generation = table.generation.wrapping_add(1);
        let idle = match table.entries.get_mut(&self.key) {
            Some(state) => {
                state.release(self.op, self.level);
                state.notify.notify_waiters();
                state.is_idle()
            }
            None => false,
        };
        if idle {
            table.entries.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn path(p: &str) -> RepositoryPath {
        RepositoryPath::new(p).unwrap()
    }

    #[tokio::test]
    async fn test_shared_readers() {
        let locks = PathLockManager::new();
        let p = path("/a");
        let r1 = locks.acquire("repo", &p, LockLevel::Read, OperationId::next()).await;
        let r2 = locks.try_lock("repo", &p, LockLevel::Read, OperationId::next());
        assert!(r2.is_some());
        assert!(locks
            .try_lock("repo", &p, LockLevel::Create, OperationId::next())
            .is_none());
        drop(r1);
        drop(r2);
        assert_eq!(locks.held(), 0);
    }

    #[tokio::test]
    async fn test_reentrant_per_operation() {
        let locks = PathLockManager::new();
        let p = path("/a");
        let op = OperationId::next();

        let read = locks.acquire("repo", &p, LockLevel::Read, op).await;
        let create = locks.acquire("repo", &p, LockLevel::Create, op).await;
        let nested = locks.acquire("repo", &p, LockLevel::Delete, op).await;
        assert!(locks
            .try_lock("repo", &p, LockLevel::Read, OperationId::next())
            .is_none());

        drop(nested);
        drop(create);
        assert!(locks
            .try_lock("repo", &p, LockLevel::Read, OperationId::next())
            .is_some());
        drop(read);
        assert_eq!(locks.held(), 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let locks = PathLockManager::new();
        let _a = locks
            .acquire("repo", &path("/a"), LockLevel::Create, OperationId::next())
            .await;
        assert!(locks
            .try_lock("repo", &path("/b"), LockLevel::Create, OperationId::next())
            .is_some());
        assert!(locks
            .try_lock("other", &path("/a"), LockLevel::Create, OperationId::next())
            .is_some());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let locks = PathLockManager::new();
        let p = path("/a");
        let writer = locks.acquire("repo", &p, LockLevel::Create, OperationId::next()).await;

        let waiter = {
            let locks = locks.clone();
            let p = p.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("repo", &p, LockLevel::Read, OperationId::next()).await;
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(writer);
        waiter.await.unwrap();
        assert_eq!(locks.held(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout() {
        let locks = PathLockManager::new();
        let p = path("/a");
        let _writer = locks.acquire("repo", &p, LockLevel::Create, OperationId::next()).await;

        let result = locks
            .acquire_timeout(
                "repo",
                &p,
                LockLevel::Create,
                OperationId::next(),
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(RepoError::Timeout { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_exclusive_sections_do_not_overlap() {
        let locks = PathLockManager::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tasks.push(tokio::spawn(async move {
                let _guard = locks
                    .acquire("repo", &path("/hot"), LockLevel::Create, OperationId::next())
                    .await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.held(), 0);
    }
}
