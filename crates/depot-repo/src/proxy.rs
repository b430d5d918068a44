//! Proxy resolution: local first, remote fallback
//!
//! ```text
//! read lock:    CheckLocal ─ fresh ─> serve
//!                   │ missing / stale
//! create lock:  CheckLocalAgain ─ fresh ─> serve
//!                   │
//!               remote permitted? ─ no ─> stale copy or fail
//!                   │ yes
//!               origin newer? ─ no ─> refresh remote-checked, serve
//!                   │ yes / no local copy
//!               fetch engine ─ ok ─> cache fill, serve
//!                   └ failed ─> stale copy or fail
//! ```
//!
//! Anything observed under the read lock is re-checked under the create
//! lock; concurrent requests for the same missing path therefore contact the
//! origin once and the others find the freshly cached item.

use chrono::{DateTime, Utc};
use depot_core::item::{ATTR_REMOTE_CONTENT_TYPE, ATTR_REMOTE_SHA256};
use depot_core::{Item, ProxyMode, RepositoryEvent, RetrievalRequest};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{ChecksumPolicy, ProxyConfig};
use crate::error::{RepoError, Result};
use crate::fetch::{CTX_ACCESS_DENIED, FetchedItem, RemoteFetchEngine};
use crate::health::{HealthController, HealthSettings};
use crate::lock::LockLevel;
use crate::nfc::NotFoundCache;
use crate::remote::RemoteSource;
use crate::repository::Repository;
use crate::staleness::{self, AgingPolicy};
use crate::validation::{ChecksumValidator, ContentValidator, FileTypeValidator};

static TOKEN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

enum LocalState {
    Fresh(Item),
    Stale(Item),
    Missing,
}

/// The proxying capability of a repository
pub struct ProxyFacet {
    remote: Arc<dyn RemoteSource>,
    health: Arc<HealthController>,
    fetcher: RemoteFetchEngine,
    validators: Vec<Box<dyn ContentValidator>>,
    aging: RwLock<AgingPolicy>,
    invalidation_token: RwLock<Option<String>>,
}

impl ProxyFacet {
    pub fn new(
        repository: &str,
        remote: Arc<dyn RemoteSource>,
        nfc: Arc<NotFoundCache>,
        config: &ProxyConfig,
    ) -> Self {
        let health = HealthController::new(
            repository,
            Arc::clone(&remote),
            nfc,
            HealthSettings::from_config(config),
        );
        if config.blocked {
            health.set_proxy_mode(ProxyMode::BlockedManual, Some("blocked in configuration".into()));
        }

        let mut validators: Vec<Box<dyn ContentValidator>> = Vec::new();
        if config.file_type_validation {
            validators.push(Box::new(FileTypeValidator));
        }
        if config.checksum_policy != ChecksumPolicy::Ignore {
            validators.push(Box::new(ChecksumValidator::new(config.checksum_policy)));
        }

        Self {
            remote,
            health: Arc::new(health),
            fetcher: RemoteFetchEngine::new(config.retrieval_retry_count),
            validators,
            aging: RwLock::new(AgingPolicy {
                aging_active: config.item_aging_active,
                max_age_minutes: config.item_max_age,
            }),
            invalidation_token: RwLock::new(None),
        }
    }

    /// Register an additional content validator
    pub fn with_validator(mut self, validator: Box<dyn ContentValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn remote(&self) -> &Arc<dyn RemoteSource> {
        &self.remote
    }

    pub fn health(&self) -> &Arc<HealthController> {
        &self.health
    }

    pub fn fetcher(&self) -> &RemoteFetchEngine {
        &self.fetcher
    }

    pub fn aging_policy(&self) -> AgingPolicy {
        *self.aging.read()
    }

    pub fn set_aging_policy(&self, policy: AgingPolicy) {
        *self.aging.write() = policy;
    }

    pub fn invalidation_token(&self) -> Option<String> {
        self.invalidation_token.read().clone()
    }

    /// Install a new invalidation token, lazily expiring every cached item
    pub fn renew_invalidation_token(&self) -> String {
        let token = format!(
            "{}-{}",
            Utc::now().timestamp_millis(),
            TOKEN_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        *self.invalidation_token.write() = Some(token.clone());
        token
    }

    pub(crate) async fn retrieve(&self, repo: &Repository, request: &mut RetrievalRequest) -> Result<Item> {
        let path = request.path.clone();
        let op = request.operation;
        let now = Utc::now();

        if !request.flags.remote_only {
            let _read = repo.locks().acquire(repo.id(), &path, LockLevel::Read, op).await;
            if let LocalState::Fresh(item) = self.check_local(repo, request, now).await? {
                return Ok(item);
            }
        }

        let _create = repo.locks().acquire(repo.id(), &path, LockLevel::Create, op).await;

        let local = if request.flags.remote_only {
            None
        } else {
            match self.check_local(repo, request, now).await? {
                LocalState::Fresh(item) => return Ok(item),
                LocalState::Stale(item) => Some(item),
                LocalState::Missing => None,
            }
        };

        if let Err(veto) = self.remote_permitted(repo, request) {
            return match local {
                Some(item) => {
                    tracing::debug!(repository = repo.id(), path = %path, reason = %veto, "remote access forbidden, serving stale copy");
                    self.touch(repo, item, now).await
                }
                None => Err(veto),
            };
        }

        if let Some(item) = local {
            match self.remote.exists(&path, Some(item.modified)).await {
                Ok(true) => {
                    tracing::debug!(repository = repo.id(), path = %path, "remote copy is newer");
                    self.fetch_or_fall_back(repo, request, Some(item), now).await
                }
                Ok(false) => self.mark_checked(repo, item, now).await,
                Err(e) => {
                    if e.is_access_denied() {
                        request.context.insert(CTX_ACCESS_DENIED, self.remote.remote_url());
                    } else if let Some(event) = self.health.on_remote_failure(&e) {
                        request.record(event);
                    }
                    tracing::debug!(repository = repo.id(), path = %path, error = %e, "freshness check failed, serving stale copy");
                    self.touch(repo, item, now).await
                }
            }
        } else {
            self.fetch_or_fall_back(repo, request, None, now).await
        }
    }

    async fn check_local(
        &self,
        repo: &Repository,
        request: &RetrievalRequest,
        now: DateTime<Utc>,
    ) -> Result<LocalState> {
        let mut item = match repo.store().get(repo.id(), &request.path).await {
            Ok(item) => item,
            Err(e) if e.is_not_found() => return Ok(LocalState::Missing),
            Err(e) => return Err(e),
        };

        if item.is_collection() {
            return Ok(LocalState::Fresh(item));
        }

        let token = self.invalidation_token();
        let freshness = staleness::evaluate(&mut item, &self.aging_policy(), token.as_deref(), now);
        if freshness.item_modified() {
            repo.store().put(&item).await?;
        }

        if request.flags.as_expired || freshness.is_stale() {
            tracing::debug!(repository = repo.id(), path = %request.path, ?freshness, as_expired = request.flags.as_expired, "local copy is stale");
            return Ok(LocalState::Stale(item));
        }

        Ok(LocalState::Fresh(self.touch(repo, item, now).await?))
    }

    fn remote_permitted(&self, repo: &Repository, request: &RetrievalRequest) -> Result<()> {
        if request.flags.local_only {
            return Err(RepoError::not_found(repo.id(), &request.path, "local-only request"));
        }
        let mode = self.health.proxy_mode();
        if !mode.should_proxy() {
            return Err(RepoError::not_found(
                repo.id(),
                &request.path,
                format!("proxy mode is {}", mode),
            ));
        }
        for strategy in repo.strategies() {
            strategy.on_remote_access(repo.id(), request)?;
        }
        Ok(())
    }

    async fn fetch_or_fall_back(
        &self,
        repo: &Repository,
        request: &mut RetrievalRequest,
        local: Option<Item>,
        now: DateTime<Utc>,
    ) -> Result<Item> {
        let fetched = self
            .fetcher
            .fetch(
                repo.id(),
                self.remote.as_ref(),
                &self.validators,
                Some(&self.health),
                request,
            )
            .await;

        match fetched {
            Ok(fetched) => self.cache_fill(repo, request, fetched, local, now).await,
            Err(e) => {
                if request.flags.remote_only {
                    self.discard_local(repo, request).await?;
                }
                match local {
                    Some(item) => {
                        tracing::debug!(repository = repo.id(), path = %request.path, error = %e, "remote fetch failed, serving stale copy");
                        self.touch(repo, item, now).await
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn cache_fill(
        &self,
        repo: &Repository,
        request: &mut RetrievalRequest,
        fetched: FetchedItem,
        previous: Option<Item>,
        now: DateTime<Utc>,
    ) -> Result<Item> {
        let FetchedItem { item: remote, url } = fetched;
        let mut item = Item::file(repo.id(), request.path.clone(), remote.content);
        item.modified = remote.last_modified.unwrap_or(now);
        item.remote_checked = Some(now);
        item.last_requested = now;
        item.remote_url = Some(url.clone());
        if let Some(previous) = previous {
            item.created = previous.created;
        }
        if let Some(token) = self.invalidation_token() {
            item.set_invalidation_token(token);
        }
        if let Some(sha256) = remote.sha256 {
            item.attributes.insert(ATTR_REMOTE_SHA256.to_string(), sha256);
        }
        if let Some(content_type) = remote.content_type {
            item.attributes
                .insert(ATTR_REMOTE_CONTENT_TYPE.to_string(), content_type);
        }

        repo.store().put(&item).await?;
        repo.nfc().remove_with_parents(&item.path);

        tracing::debug!(repository = repo.id(), path = %item.path, url = %url, bytes = item.len(), "cached remote item");
        request.record(RepositoryEvent::ItemCached {
            repository: repo.id().to_string(),
            path: item.path.clone(),
            url,
        });
        Ok(item)
    }

    /// Remote answered "not newer": trust the local copy again
    async fn mark_checked(&self, repo: &Repository, mut item: Item, now: DateTime<Utc>) -> Result<Item> {
        item.remote_checked = Some(now);
        item.expired = false;
        item.last_requested = now;
        if let Some(token) = self.invalidation_token() {
            item.set_invalidation_token(token);
        }
        repo.store().put(&item).await?;
        Ok(item)
    }

    async fn touch(&self, repo: &Repository, mut item: Item, now: DateTime<Utc>) -> Result<Item> {
        item.last_requested = now;
        repo.store().put(&item).await?;
        Ok(item)
    }

    async fn discard_local(&self, repo: &Repository, request: &RetrievalRequest) -> Result<()> {
        match repo.store().get(repo.id(), &request.path).await {
            Ok(item) if item.is_file() => {
                tracing::debug!(repository = repo.id(), path = %request.path, "removing local copy after failed remote-only request");
                repo.store().delete(repo.id(), &request.path).await
            }
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for ProxyFacet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyFacet")
            .field("remote", &self.remote.remote_url())
            .field("mode", &self.health.proxy_mode())
            .field("validators", &self.validators.len())
            .finish()
    }
}
