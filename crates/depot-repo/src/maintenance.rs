//! Cache maintenance: expire, evict and invalidate
//!
//! All operations are driven by the [`walker`](crate::walker) over the local
//! store, record the repository in the request's processed set and silently
//! skip repositories that are out of service or already processed. Groups
//! cascade every operation to their members.
//!
//! Events are recorded on the request, like retrieval does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::{Item, RepositoryEvent, RepositoryPath, RetrievalRequest};
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::group::MemberLookup;
use crate::lock::LockLevel;
use crate::repository::Repository;
use crate::walker::{self, WalkerFilter, WalkerProcessor};

/// Mark the repository visited; false when it must be skipped
fn enter(repo: &Repository, request: &mut RetrievalRequest) -> bool {
    if !repo.local_status().should_service_request() {
        tracing::debug!(repository = repo.id(), "skipping maintenance of out-of-service repository");
        return false;
    }
    request.mark_processed(repo.id())
}

/// Run `op` against every unprocessed member of a group
async fn cascade<'a, T, F>(
    repo: &'a Repository,
    request: &mut RetrievalRequest,
    lookup: &'a dyn MemberLookup,
    mut op: F,
) -> Result<Vec<T>>
where
    F: FnMut(std::sync::Arc<Repository>, RetrievalRequest) -> BoxFuture<'a, (Result<T>, RetrievalRequest)>,
{
    let mut results = Vec::new();
    let Some(facet) = repo.group() else {
        return Ok(results);
    };
    for member_id in facet.members() {
        if request.is_processed(&member_id) {
            continue;
        }
        let Some(member) = lookup.lookup(&member_id) else {
            tracing::warn!(group = repo.id(), member = %member_id, "group member does not exist, skipping");
            continue;
        };
        let (result, sub) = op(member, request.member_request()).await;
        request.absorb(sub);
        results.push(result?);
    }
    Ok(results)
}

struct ExpireProcessor<'a> {
    repo: &'a Repository,
    request: &'a RetrievalRequest,
    expired: usize,
}

/// Re-read `path` under its lock; the walk's snapshot may be outdated
async fn current_file(repo: &Repository, path: &RepositoryPath) -> Result<Option<Item>> {
    match repo.store().get(repo.id(), path).await {
        Ok(item) if item.is_file() => Ok(Some(item)),
        Ok(_) => Ok(None),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl<'a> WalkerProcessor for ExpireProcessor<'a> {
    async fn process_item(&mut self, item: &Item) -> Result<()> {
        if item.is_collection() || item.expired {
            return Ok(());
        }
        let _guard = self
            .repo
            .locks()
            .acquire(self.repo.id(), &item.path, LockLevel::Create, self.request.operation)
            .await;
        let Some(mut current) = current_file(self.repo, &item.path).await? else {
            return Ok(());
        };
        if current.expired {
            return Ok(());
        }
        current.expired = true;
        self.repo.store().put(&current).await?;
        self.expired += 1;
        Ok(())
    }
}

/// Mark cached items under `request.path` as expired
///
/// On a proxy root without a filter this renews the invalidation token
/// instead of walking; the items are expired lazily on their next request.
/// Every repository kind also expires its own not-found cache.
pub fn expire_caches<'a>(
    repo: &'a Repository,
    request: &'a mut RetrievalRequest,
    filter: Option<&'a dyn WalkerFilter>,
    lookup: &'a dyn MemberLookup,
) -> BoxFuture<'a, Result<()>> {
    async move {
        if !enter(repo, request) {
            return Ok(());
        }
        let path = request.path.clone();

        if let Some(proxy) = repo.proxy() {
            if path.is_root() && filter.is_none() {
                let token = proxy.renew_invalidation_token();
                tracing::info!(repository = repo.id(), token = %token, "renewed invalidation token");
            } else {
                let mut processor = ExpireProcessor {
                    repo,
                    request,
                    expired: 0,
                };
                match walker::walk(repo.store().as_ref(), repo.id(), &path, filter, &mut processor).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                tracing::info!(repository = repo.id(), path = %path, expired = processor.expired, "expired cached items");
            }
            request.record(RepositoryEvent::CachesExpired {
                repository: repo.id().to_string(),
                path: path.clone(),
            });
        }

        expire_own_nfc(repo, request, filter);

        cascade(repo, request, lookup, move |member, mut sub| {
            async move {
                let result = expire_caches(&member, &mut sub, filter, lookup).await;
                (result, sub)
            }
            .boxed()
        })
        .await?;
        Ok(())
    }
    .boxed()
}

/// Expire the not-found cache under `request.path`, cascading through groups
pub fn expire_nfc<'a>(
    repo: &'a Repository,
    request: &'a mut RetrievalRequest,
    filter: Option<&'a dyn WalkerFilter>,
    lookup: &'a dyn MemberLookup,
) -> BoxFuture<'a, Result<()>> {
    async move {
        if !enter(repo, request) {
            return Ok(());
        }
        expire_own_nfc(repo, request, filter);
        cascade(repo, request, lookup, move |member, mut sub| {
            async move {
                let result = expire_nfc(&member, &mut sub, filter, lookup).await;
                (result, sub)
            }
            .boxed()
        })
        .await?;
        Ok(())
    }
    .boxed()
}

fn expire_own_nfc(repo: &Repository, request: &mut RetrievalRequest, filter: Option<&dyn WalkerFilter>) {
    let nfc = repo.nfc();
    let path = request.path.clone();

    let removed = match filter {
        None if path.is_root() => {
            let count = nfc.len();
            nfc.purge();
            count
        }
        Some(filter) => {
            let doomed: Vec<RepositoryPath> = nfc
                .keys()
                .into_iter()
                .filter(|key| key.is_self_or_descendant_of(&path))
                .filter(|key| filter.accept(&Item::file(repo.id(), key.clone(), Vec::new())))
                .collect();
            nfc.remove_all(&doomed)
        }
        None => nfc.remove_with_parents(&path) + nfc.remove_with_children(&path),
    };

    tracing::debug!(repository = repo.id(), path = %path, removed, "expired not-found cache");
    request.record(RepositoryEvent::NotFoundCacheExpired {
        repository: repo.id().to_string(),
        path,
    });
}

struct EvictProcessor<'a> {
    repo: &'a Repository,
    request: &'a RetrievalRequest,
    cutoff: DateTime<Utc>,
    evicted: Vec<RepositoryPath>,
}

#[async_trait]
impl<'a> WalkerProcessor for EvictProcessor<'a> {
    async fn process_item(&mut self, item: &Item) -> Result<()> {
        if item.is_collection() || item.last_requested >= self.cutoff {
            return Ok(());
        }
        let _guard = self
            .repo
            .locks()
            .acquire(self.repo.id(), &item.path, LockLevel::Delete, self.request.operation)
            .await;
        match current_file(self.repo, &item.path).await? {
            Some(current) if current.last_requested < self.cutoff => {}
            _ => return Ok(()),
        }
        self.repo.store().delete(self.repo.id(), &item.path).await?;
        self.evicted.push(item.path.clone());
        Ok(())
    }

    async fn on_collection_exit(&mut self, collection: &Item) -> Result<()> {
        if collection.path.is_root() {
            return Ok(());
        }
        let _guard = self
            .repo
            .locks()
            .acquire(self.repo.id(), &collection.path, LockLevel::Delete, self.request.operation)
            .await;
        if self
            .repo
            .store()
            .delete_empty_collection(self.repo.id(), &collection.path)
            .await?
        {
            tracing::debug!(repository = self.repo.id(), path = %collection.path, "removed empty collection");
        }
        Ok(())
    }
}

/// Delete cached files not requested since `cutoff`
///
/// Only proxies hold evictable content; a group returns the union of its
/// members' evicted paths.
pub fn evict_unused<'a>(
    repo: &'a Repository,
    request: &'a mut RetrievalRequest,
    cutoff: DateTime<Utc>,
    lookup: &'a dyn MemberLookup,
) -> BoxFuture<'a, Result<Vec<RepositoryPath>>> {
    async move {
        if !enter(repo, request) {
            return Ok(Vec::new());
        }
        let path = request.path.clone();
        let mut evicted = Vec::new();

        if repo.proxy().is_some() {
            let mut processor = EvictProcessor {
                repo,
                request,
                cutoff,
                evicted: Vec::new(),
            };
            match walker::walk(repo.store().as_ref(), repo.id(), &path, None, &mut processor).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            evicted = processor.evicted;
            tracing::info!(repository = repo.id(), path = %path, cutoff = %cutoff, evicted = evicted.len(), "evicted unused items");
            request.record(RepositoryEvent::UnusedItemsEvicted {
                repository: repo.id().to_string(),
                paths: evicted.clone(),
            });
        }

        let members = cascade(repo, request, lookup, move |member, mut sub| {
            async move {
                let result = evict_unused(&member, &mut sub, cutoff, lookup).await;
                (result, sub)
            }
            .boxed()
        })
        .await?;
        evicted.extend(members.into_iter().flatten());
        Ok(evicted)
    }
    .boxed()
}
