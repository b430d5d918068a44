//! Repositories
//!
//! A [`Repository`] is a value carrying a capability set instead of a type
//! hierarchy: every repository owns a local store and a negative cache; a
//! proxy additionally carries a [`ProxyFacet`], a group a [`GroupFacet`].
//! The shared parts of the read path (service check, processed-set guard,
//! strategies, negative cache, browseability, events) live here; the
//! kind-specific resolution is delegated to the facets.

use chrono::Utc;
use depot_core::{
    Action, Capabilities, Capability, Item, LocalStatus, OperationId, ProxyMode,
    RepositoryEvent, RepositoryPath, RetrievalRequest, WritePolicy,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::{NotFoundCacheConfig, ProxyConfig, RemoteAuth, RepositoryDef, RepositoryKind};
use crate::error::{RepoError, Result};
use crate::group::{self, GroupFacet, MemberLookup};
use crate::lock::{LockLevel, PathLockManager};
use crate::nfc::NotFoundCache;
use crate::proxy::ProxyFacet;
use crate::remote::{HttpRemote, RemoteSource};
use crate::storage::{MemoryStore, Store};
use crate::strategy::{PathFilterStrategy, RequestStrategy};
use crate::validation::ContentValidator;

pub struct Repository {
    id: String,
    format: String,
    capabilities: Capabilities,
    write_policy: RwLock<WritePolicy>,
    local_status: RwLock<LocalStatus>,
    browseable: bool,
    nfc_config: NotFoundCacheConfig,
    store: Arc<dyn Store>,
    nfc: Arc<NotFoundCache>,
    locks: PathLockManager,
    strategies: Vec<Arc<dyn RequestStrategy>>,
    proxy: Option<ProxyFacet>,
    group: Option<GroupFacet>,
}

impl Repository {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Content format, members of a group must share it
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.has(capability)
    }

    pub fn kind(&self) -> RepositoryKind {
        if self.proxy.is_some() {
            RepositoryKind::Proxy
        } else if self.group.is_some() {
            RepositoryKind::Group
        } else {
            RepositoryKind::Hosted
        }
    }

    pub fn write_policy(&self) -> WritePolicy {
        *self.write_policy.read()
    }

    pub fn set_write_policy(&self, policy: WritePolicy) {
        *self.write_policy.write() = policy;
    }

    pub fn local_status(&self) -> LocalStatus {
        *self.local_status.read()
    }

    /// Put the repository in or out of service
    pub fn set_local_status(&self, status: LocalStatus) {
        *self.local_status.write() = status;
        if let Some(proxy) = &self.proxy {
            proxy.health().set_in_service(status.should_service_request());
        }
        tracing::info!(repository = %self.id, ?status, "local status changed");
    }

    pub fn browseable(&self) -> bool {
        self.browseable
    }

    pub fn not_found_cache_config(&self) -> &NotFoundCacheConfig {
        &self.nfc_config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn nfc(&self) -> &Arc<NotFoundCache> {
        &self.nfc
    }

    pub fn locks(&self) -> &PathLockManager {
        &self.locks
    }

    pub fn strategies(&self) -> &[Arc<dyn RequestStrategy>] {
        &self.strategies
    }

    pub fn proxy(&self) -> Option<&ProxyFacet> {
        self.proxy.as_ref()
    }

    pub fn group(&self) -> Option<&GroupFacet> {
        self.group.as_ref()
    }

    pub fn proxy_mode(&self) -> Option<ProxyMode> {
        self.proxy.as_ref().map(|p| p.health().proxy_mode())
    }

    pub(crate) fn ensure_in_service(&self) -> Result<()> {
        if self.local_status().should_service_request() {
            Ok(())
        } else {
            Err(RepoError::RepositoryUnavailable {
                repository: self.id.clone(),
            })
        }
    }

    /// Whether `action` is allowed on this repository
    pub fn check_action(&self, action: Action, path: &RepositoryPath) -> Result<()> {
        let allowed = if self.proxy.is_some() {
            matches!(action, Action::Read | Action::Delete)
        } else if self.group.is_some() {
            action.is_read()
        } else {
            match (self.write_policy(), action) {
                (_, Action::Read) => true,
                (WritePolicy::ReadOnly, _) => false,
                (WritePolicy::WriteOnce, Action::Update) => false,
                _ => true,
            }
        };

        if allowed {
            Ok(())
        } else {
            Err(RepoError::illegal(
                &self.id,
                path,
                format!(
                    "{} not allowed on {:?} repository with write policy {:?}",
                    action,
                    self.kind(),
                    self.write_policy()
                ),
            ))
        }
    }

    /// Retrieve the item at `request.path`
    pub fn retrieve<'a>(
        &'a self,
        request: &'a mut RetrievalRequest,
        lookup: &'a dyn MemberLookup,
    ) -> BoxFuture<'a, Result<Item>> {
        async move {
            self.ensure_in_service()?;
            request.mark_processed(&self.id);
            for strategy in &self.strategies {
                strategy.on_handle(&self.id, request)?;
            }

            if self.group.is_none() {
                self.maintain_nfc(request)?;
            }

            let result = if let Some(proxy) = &self.proxy {
                proxy.retrieve(self, request).await
            } else if let Some(facet) = &self.group {
                group::retrieve(self, facet, request, lookup).await
            } else {
                self.retrieve_local(request).await
            };

            let item = match result {
                Ok(item) => item,
                Err(e) => {
                    if e.is_not_found() && self.should_cache_not_found(request) {
                        self.cache_not_found(request).await;
                    }
                    return Err(e);
                }
            };

            if item.is_collection() && !self.browseable {
                return Err(RepoError::not_found(
                    &self.id,
                    &request.path,
                    "repository is not browseable",
                ));
            }
            for strategy in &self.strategies {
                strategy.on_serving(&self.id, request, &item)?;
            }

            request.record(RepositoryEvent::ItemRetrieved {
                repository: self.id.clone(),
                path: item.path.clone(),
            });
            Ok(item)
        }
        .boxed()
    }

    /// List the direct children of `request.path`
    pub fn list_items<'a>(
        &'a self,
        request: &'a mut RetrievalRequest,
        lookup: &'a dyn MemberLookup,
    ) -> BoxFuture<'a, Result<Vec<Item>>> {
        async move {
            self.ensure_in_service()?;
            request.mark_processed(&self.id);
            if !self.browseable {
                return Err(RepoError::not_found(
                    &self.id,
                    &request.path,
                    "repository is not browseable",
                ));
            }

            match &self.group {
                Some(facet) => group::list(self, facet, request, lookup).await,
                None => self.list_local(request).await,
            }
        }
        .boxed()
    }

    pub(crate) async fn retrieve_local(&self, request: &RetrievalRequest) -> Result<Item> {
        if request.flags.remote_only {
            return Err(RepoError::not_found(
                &self.id,
                &request.path,
                "remote-only request on a repository without remote",
            ));
        }
        let _guard = self
            .locks
            .acquire(&self.id, &request.path, LockLevel::Read, request.operation)
            .await;
        self.store.get(&self.id, &request.path).await
    }

    pub(crate) async fn list_local(&self, request: &RetrievalRequest) -> Result<Vec<Item>> {
        let _guard = self
            .locks
            .acquire(&self.id, &request.path, LockLevel::Read, request.operation)
            .await;
        self.store.list(&self.id, &request.path).await
    }

    fn maintain_nfc(&self, request: &RetrievalRequest) -> Result<()> {
        let path = &request.path;
        if !self.nfc_config.enabled || !self.nfc.contains(path) {
            return Ok(());
        }
        if request.flags.as_expired || self.nfc.is_expired(path) {
            self.nfc.remove(path);
            return Ok(());
        }
        Err(RepoError::not_found(
            &self.id,
            path,
            "path is in the not-found cache",
        ))
    }

    /// Record a miss under the path's read lock, unless the path was stored
    /// since the failed read released it
    async fn cache_not_found(&self, request: &RetrievalRequest) {
        let _guard = self
            .locks
            .acquire(&self.id, &request.path, LockLevel::Read, request.operation)
            .await;
        match self.store.contains(&self.id, &request.path).await {
            Ok(false) => {
                tracing::debug!(repository = %self.id, path = %request.path, "caching not found");
                self.nfc.put(request.path.clone(), self.nfc_config.ttl);
            }
            Ok(true) => {}
            Err(e) => {
                tracing::debug!(repository = %self.id, path = %request.path, error = %e, "not caching not found");
            }
        }
    }

    fn should_cache_not_found(&self, request: &RetrievalRequest) -> bool {
        self.nfc_config.enabled
            && self.group.is_none()
            && !request.flags.local_only
            && !request.flags.remote_only
            && self.proxy_mode().is_none_or(ProxyMode::should_proxy)
    }

    /// Store an item, creating parent collections as needed
    pub async fn store_item(&self, item: Item) -> Result<RepositoryEvent> {
        self.store_item_as(item, OperationId::next()).await
    }

    async fn store_item_as(&self, mut item: Item, op: OperationId) -> Result<RepositoryEvent> {
        self.ensure_in_service()?;
        let path = item.path.clone();
        if path.is_root() {
            return Err(RepoError::illegal(&self.id, &path, "cannot store the root"));
        }
        item.repository_id = self.id.clone();

        let _guard = self
            .locks
            .acquire(&self.id, &path, LockLevel::Create, op)
            .await;

        let existing = match self.store.get(&self.id, &path).await {
            Ok(existing) => Some(existing),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        match &existing {
            Some(existing) if existing.is_collection() && item.is_collection() => {
                self.check_action(Action::Create, &path)?;
                return Ok(RepositoryEvent::ItemStored {
                    repository: self.id.clone(),
                    path,
                    created: false,
                });
            }
            Some(existing) if existing.is_collection() != item.is_collection() => {
                return Err(RepoError::illegal(
                    &self.id,
                    &path,
                    "cannot replace a collection with a file or a file with a collection",
                ));
            }
            Some(_) => self.check_action(Action::Update, &path)?,
            None => self.check_action(Action::Create, &path)?,
        }

        if let Some(existing) = &existing {
            item.created = existing.created;
            item.modified = Utc::now();
        }
        self.store.put(&item).await?;
        let cleared = self.nfc.remove_with_parents(&path);
        tracing::debug!(repository = %self.id, path = %path, cleared, "item stored");

        Ok(RepositoryEvent::ItemStored {
            repository: self.id.clone(),
            path,
            created: existing.is_none(),
        })
    }

    pub async fn create_collection(&self, path: RepositoryPath) -> Result<RepositoryEvent> {
        self.store_item(Item::collection(self.id.clone(), path)).await
    }

    /// Delete an item, or a collection with its whole subtree
    pub async fn delete_item(&self, path: &RepositoryPath) -> Result<RepositoryEvent> {
        self.delete_item_as(path, OperationId::next()).await
    }

    async fn delete_item_as(&self, path: &RepositoryPath, op: OperationId) -> Result<RepositoryEvent> {
        self.ensure_in_service()?;
        self.check_action(Action::Delete, path)?;
        if path.is_root() {
            return Err(RepoError::illegal(&self.id, path, "cannot delete the root"));
        }

        let _guard = self
            .locks
            .acquire(&self.id, path, LockLevel::Delete, op)
            .await;

        let item = self.store.get(&self.id, path).await?;
        self.store.delete(&self.id, path).await?;
        if item.is_collection() {
            self.nfc.remove_with_children(path);
        }
        tracing::debug!(repository = %self.id, path = %path, "item deleted");

        Ok(RepositoryEvent::ItemDeleted {
            repository: self.id.clone(),
            path: path.clone(),
        })
    }

    /// Copy the file at `from` to `to`
    ///
    /// Holds `from` for reading and `to` for creation for the whole copy; the
    /// target is written through the normal store path, so write policy and
    /// not-found cache clearing apply to it.
    pub async fn copy_item(&self, from: &RepositoryPath, to: &RepositoryPath) -> Result<RepositoryEvent> {
        self.copy_item_as(from, to, OperationId::next()).await
    }

    async fn copy_item_as(
        &self,
        from: &RepositoryPath,
        to: &RepositoryPath,
        op: OperationId,
    ) -> Result<RepositoryEvent> {
        self.ensure_in_service()?;
        if from == to {
            return Err(RepoError::illegal(&self.id, to, "source and target are the same path"));
        }
        self.maintain_nfc(&RetrievalRequest::new(from.clone()))?;

        // Fixed order, so two opposite copies cannot wait on each other
        let mut plan = [(from, LockLevel::Read), (to, LockLevel::Create)];
        plan.sort_by(|a, b| a.0.cmp(b.0));
        let mut guards = Vec::with_capacity(plan.len());
        for (path, level) in plan {
            guards.push(self.locks.acquire(&self.id, path, level, op).await);
        }

        let source = self.store.get(&self.id, from).await?;
        if source.is_collection() {
            return Err(RepoError::illegal(&self.id, from, "only files can be copied"));
        }

        let target = Item::file(self.id.clone(), to.clone(), source.bytes().to_vec());
        let event = self.store_item_as(target, op).await?;
        tracing::debug!(repository = %self.id, from = %from, to = %to, "item copied");
        Ok(event)
    }

    /// Move the file at `from` to `to`: a copy followed by a delete of `from`
    pub async fn move_item(&self, from: &RepositoryPath, to: &RepositoryPath) -> Result<Vec<RepositoryEvent>> {
        self.ensure_in_service()?;
        self.check_action(Action::Delete, from)?;
        let op = OperationId::next();
        let stored = self.copy_item_as(from, to, op).await?;
        let deleted = self.delete_item_as(from, op).await?;
        Ok(vec![stored, deleted])
    }

    /// Replace a proxy's remote credentials
    pub fn update_remote_auth(&self, auth: Option<RemoteAuth>) -> Result<Option<RepositoryEvent>> {
        let proxy = self.proxy.as_ref().ok_or_else(|| {
            RepoError::illegal(&self.id, RepositoryPath::root(), "not a proxy repository")
        })?;
        proxy.remote().update_auth(auth);
        Ok(proxy.health().on_auth_changed())
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("format", &self.format)
            .field("store", &self.store.name())
            .field("proxy", &self.proxy)
            .field("group", &self.group)
            .finish()
    }
}

/// Builder for [`Repository`]
pub struct RepositoryBuilder {
    id: String,
    format: String,
    write_policy: WritePolicy,
    local_status: LocalStatus,
    browseable: bool,
    nfc_config: NotFoundCacheConfig,
    store: Option<Arc<dyn Store>>,
    locks: Option<PathLockManager>,
    strategies: Vec<Arc<dyn RequestStrategy>>,
    proxy: Option<(Arc<dyn RemoteSource>, ProxyConfig)>,
    validators: Vec<Box<dyn ContentValidator>>,
    members: Option<Vec<String>>,
}

impl RepositoryBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            format: "maven2".to_string(),
            write_policy: WritePolicy::default(),
            local_status: LocalStatus::default(),
            browseable: true,
            nfc_config: NotFoundCacheConfig::default(),
            store: None,
            locks: None,
            strategies: Vec::new(),
            proxy: None,
            validators: Vec::new(),
            members: None,
        }
    }

    /// Builder for a configured repository, proxies get an [`HttpRemote`]
    pub fn from_def(def: &RepositoryDef) -> Result<Self> {
        def.validate()?;
        let mut builder = Self::new(def.id.clone())
            .format(def.format.clone())
            .write_policy(def.write_policy)
            .local_status(def.local_status)
            .browseable(def.browseable)
            .not_found_cache(def.not_found_cache.clone());

        match def.kind {
            RepositoryKind::Hosted => {}
            RepositoryKind::Proxy => {
                let config = def.proxy.clone().ok_or_else(|| RepoError::InvalidConfig {
                    message: format!("Proxy repository '{}' has no proxy section", def.id),
                })?;
                let remote = Arc::new(HttpRemote::from_config(&def.id, &config)?);
                builder = builder.proxy(remote, config);
            }
            RepositoryKind::Group => {
                let members = def.group.as_ref().map(|g| g.members.clone()).unwrap_or_default();
                builder = builder.group(members);
            }
        }
        Ok(builder)
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    pub fn local_status(mut self, status: LocalStatus) -> Self {
        self.local_status = status;
        self
    }

    pub fn browseable(mut self, browseable: bool) -> Self {
        self.browseable = browseable;
        self
    }

    pub fn not_found_cache(mut self, config: NotFoundCacheConfig) -> Self {
        self.nfc_config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share a lock manager, usually the registry's
    pub fn locks(mut self, locks: PathLockManager) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn RequestStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn proxy(mut self, remote: Arc<dyn RemoteSource>, config: ProxyConfig) -> Self {
        self.proxy = Some((remote, config));
        self
    }

    /// Extra validator for a proxy, on top of the configured ones
    pub fn validator(mut self, validator: Box<dyn ContentValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn group(mut self, members: Vec<String>) -> Self {
        self.members = Some(members);
        self
    }

    pub fn build(self) -> Result<Repository> {
        if self.id.is_empty() {
            return Err(RepoError::InvalidConfig {
                message: "Repository id cannot be empty".to_string(),
            });
        }
        if self.proxy.is_some() && self.members.is_some() {
            return Err(RepoError::InvalidConfig {
                message: format!("Repository '{}' cannot be both proxy and group", self.id),
            });
        }

        let nfc = Arc::new(NotFoundCache::new());
        let mut strategies = self.strategies;
        let mut capabilities = Capabilities::new();

        let proxy = match self.proxy {
            Some((remote, config)) => {
                capabilities = capabilities.with(Capability::Proxy);
                if !config.remote_path_patterns.is_empty() {
                    strategies.push(Arc::new(PathFilterStrategy::new(&config.remote_path_patterns)?));
                }
                let facet = self
                    .validators
                    .into_iter()
                    .fold(ProxyFacet::new(&self.id, remote, Arc::clone(&nfc), &config), |facet, v| {
                        facet.with_validator(v)
                    });
                facet
                    .health()
                    .set_in_service(self.local_status.should_service_request());
                Some(facet)
            }
            None => None,
        };

        let group = match self.members {
            Some(members) => {
                capabilities = capabilities.with(Capability::Group);
                Some(GroupFacet::new(members))
            }
            None => None,
        };

        if proxy.is_none() && group.is_none() {
            capabilities = capabilities.with(Capability::Hosted);
        }

        Ok(Repository {
            id: self.id,
            format: self.format,
            capabilities,
            write_policy: RwLock::new(self.write_policy),
            local_status: RwLock::new(self.local_status),
            browseable: self.browseable,
            nfc_config: self.nfc_config,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            nfc,
            locks: self.locks.unwrap_or_default(),
            strategies,
            proxy,
            group,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::NoMembers;
    use crate::remote::scripted::ScriptedRemote;
    use async_trait::async_trait;

    fn p(s: &str) -> RepositoryPath {
        RepositoryPath::new(s).unwrap()
    }

    fn hosted(policy: WritePolicy) -> Repository {
        RepositoryBuilder::new("releases")
            .write_policy(policy)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let repo = hosted(WritePolicy::ReadWrite);
        let event = repo
            .store_item(Item::file("ignored", p("/org/lib.jar"), "jar"))
            .await
            .unwrap();
        assert!(matches!(event, RepositoryEvent::ItemStored { created: true, .. }));

        let mut req = RetrievalRequest::new(p("/org/lib.jar"));
        let item = repo.retrieve(&mut req, &NoMembers).await.unwrap();
        assert_eq!(item.repository_id, "releases");
        assert_eq!(item.bytes(), b"jar");
        assert!(req.is_processed("releases"));
        assert!(matches!(req.events.last(), Some(RepositoryEvent::ItemRetrieved { .. })));
    }

    #[tokio::test]
    async fn test_write_policies() {
        let read_only = hosted(WritePolicy::ReadOnly);
        let err = read_only
            .store_item(Item::file("r", p("/x"), "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::IllegalOperation { .. }));

        let write_once = hosted(WritePolicy::WriteOnce);
        write_once.store_item(Item::file("r", p("/x"), "1")).await.unwrap();
        assert!(matches!(
            write_once.store_item(Item::file("r", p("/x"), "2")).await,
            Err(RepoError::IllegalOperation { .. })
        ));

        let read_write = hosted(WritePolicy::ReadWrite);
        read_write.store_item(Item::file("r", p("/x"), "1")).await.unwrap();
        let event = read_write.store_item(Item::file("r", p("/x"), "2")).await.unwrap();
        assert!(matches!(event, RepositoryEvent::ItemStored { created: false, .. }));
    }

    #[tokio::test]
    async fn test_not_found_is_cached_and_cleared_by_store() {
        let repo = hosted(WritePolicy::ReadWrite);
        let path = p("/a/b/missing.jar");

        let err = repo
            .retrieve(&mut RetrievalRequest::new(path.clone()), &NoMembers)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(repo.nfc().contains(&path));

        repo.store_item(Item::file("r", path.clone(), "now here")).await.unwrap();
        assert!(!repo.nfc().contains(&path));
        let item = repo
            .retrieve(&mut RetrievalRequest::new(path), &NoMembers)
            .await
            .unwrap();
        assert_eq!(item.bytes(), b"now here");
    }

    #[tokio::test]
    async fn test_partial_views_do_not_poison_nfc() {
        let repo = hosted(WritePolicy::ReadWrite);
        let path = p("/missing");
        let mut req = RetrievalRequest::new(path.clone()).local_only();
        assert!(repo.retrieve(&mut req, &NoMembers).await.is_err());
        assert!(!repo.nfc().contains(&path));
    }

    #[tokio::test]
    async fn test_out_of_service() {
        let repo = hosted(WritePolicy::ReadWrite);
        repo.set_local_status(LocalStatus::OutOfService);
        let err = repo
            .retrieve(&mut RetrievalRequest::new(p("/x")), &NoMembers)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::RepositoryUnavailable { .. }));
        assert!(matches!(
            repo.store_item(Item::file("r", p("/x"), "1")).await,
            Err(RepoError::RepositoryUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_non_browseable_hides_collections() {
        let repo = RepositoryBuilder::new("releases").browseable(false).build().unwrap();
        repo.store_item(Item::file("r", p("/dir/f"), "1")).await.unwrap();

        let err = repo
            .retrieve(&mut RetrievalRequest::new(p("/dir")), &NoMembers)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(
            repo.retrieve(&mut RetrievalRequest::new(p("/dir/f")), &NoMembers)
                .await
                .is_ok()
        );
        assert!(
            repo.list_items(&mut RetrievalRequest::new(p("/dir")), &NoMembers)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_delete_collection_clears_descendant_nfc_entries() {
        let repo = hosted(WritePolicy::ReadWrite);
        repo.store_item(Item::file("r", p("/dir/f"), "1")).await.unwrap();
        repo.nfc().put(p("/dir/gone"), std::time::Duration::from_secs(60));

        let event = repo.delete_item(&p("/dir")).await.unwrap();
        assert!(matches!(event, RepositoryEvent::ItemDeleted { .. }));
        assert!(repo.nfc().is_empty());
        assert!(repo.delete_item(&p("/dir")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_collection_creation_is_idempotent() {
        let repo = hosted(WritePolicy::WriteOnce);
        let first = repo.create_collection(p("/dir")).await.unwrap();
        let second = repo.create_collection(p("/dir")).await.unwrap();
        assert!(matches!(first, RepositoryEvent::ItemStored { created: true, .. }));
        assert!(matches!(second, RepositoryEvent::ItemStored { created: false, .. }));
    }

    /// Memory store that writes one item right after a failed read of its
    /// path, as a concurrent upload would before the miss is recorded
    struct StoreAfterMiss {
        inner: MemoryStore,
        pending: parking_lot::Mutex<Option<Item>>,
    }

    #[async_trait]
    impl Store for StoreAfterMiss {
        async fn get(&self, repository: &str, path: &RepositoryPath) -> Result<Item> {
            let result = self.inner.get(repository, path).await;
            if result.as_ref().is_err_and(RepoError::is_not_found) {
                let pending = {
                    let mut slot = self.pending.lock();
                    match slot.as_ref() {
                        Some(item) if &item.path == path => slot.take(),
                        _ => None,
                    }
                };
                if let Some(item) = pending {
                    self.inner.put(&item).await?;
                }
            }
            result
        }

        async fn put(&self, item: &Item) -> Result<()> {
            self.inner.put(item).await
        }

        async fn delete(&self, repository: &str, path: &RepositoryPath) -> Result<()> {
            self.inner.delete(repository, path).await
        }

        async fn delete_empty_collection(&self, repository: &str, path: &RepositoryPath) -> Result<bool> {
            self.inner.delete_empty_collection(repository, path).await
        }

        async fn list(&self, repository: &str, path: &RepositoryPath) -> Result<Vec<Item>> {
            self.inner.list(repository, path).await
        }

        fn name(&self) -> &'static str {
            "store-after-miss"
        }
    }

    #[tokio::test]
    async fn test_miss_is_not_cached_when_stored_meanwhile() {
        let path = p("/org/late.jar");
        let store = Arc::new(StoreAfterMiss {
            inner: MemoryStore::new(),
            pending: parking_lot::Mutex::new(Some(Item::file("releases", path.clone(), "late"))),
        });
        let repo = RepositoryBuilder::new("releases").store(store).build().unwrap();

        let err = repo
            .retrieve(&mut RetrievalRequest::new(path.clone()), &NoMembers)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!repo.nfc().contains(&path));

        let item = repo
            .retrieve(&mut RetrievalRequest::new(path), &NoMembers)
            .await
            .unwrap();
        assert_eq!(item.bytes(), b"late");
    }

    #[tokio::test]
    async fn test_copy_keeps_source_and_clears_target_nfc() {
        let repo = hosted(WritePolicy::ReadWrite);
        repo.store_item(Item::file("r", p("/org/a.jar"), "jar")).await.unwrap();
        repo.nfc().put(p("/backup/a.jar"), std::time::Duration::from_secs(60));
        repo.nfc().put(p("/backup"), std::time::Duration::from_secs(60));

        let event = repo.copy_item(&p("/org/a.jar"), &p("/backup/a.jar")).await.unwrap();
        assert!(matches!(event, RepositoryEvent::ItemStored { created: true, .. }));
        assert!(repo.nfc().is_empty());

        let source = repo.store().get("releases", &p("/org/a.jar")).await.unwrap();
        let target = repo.store().get("releases", &p("/backup/a.jar")).await.unwrap();
        assert_eq!(source.bytes(), b"jar");
        assert_eq!(target.bytes(), b"jar");
        assert_eq!(target.repository_id, "releases");
        assert!(repo.store().get("releases", &p("/backup")).await.unwrap().is_collection());
    }

    #[tokio::test]
    async fn test_copy_honours_target_write_policy() {
        let repo = hosted(WritePolicy::WriteOnce);
        repo.store_item(Item::file("r", p("/a"), "1")).await.unwrap();
        repo.store_item(Item::file("r", p("/b"), "2")).await.unwrap();

        let err = repo.copy_item(&p("/a"), &p("/b")).await.unwrap_err();
        assert!(matches!(err, RepoError::IllegalOperation { .. }));
        assert_eq!(repo.store().get("releases", &p("/b")).await.unwrap().bytes(), b"2");
    }

    #[tokio::test]
    async fn test_copy_rejects_collections_and_same_path() {
        let repo = hosted(WritePolicy::ReadWrite);
        repo.store_item(Item::file("r", p("/dir/f"), "1")).await.unwrap();

        assert!(matches!(
            repo.copy_item(&p("/dir"), &p("/other")).await,
            Err(RepoError::IllegalOperation { .. })
        ));
        assert!(matches!(
            repo.copy_item(&p("/dir/f"), &p("/dir/f")).await,
            Err(RepoError::IllegalOperation { .. })
        ));
        assert!(repo.copy_item(&p("/nope"), &p("/other")).await.unwrap_err().is_not_found());
        assert!(!repo.store().contains("releases", &p("/other")).await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_into_proxy_is_illegal() {
        let remote = Arc::new(ScriptedRemote::new("central", &["https://repo.example.com/"]));
        let repo = RepositoryBuilder::new("central")
            .proxy(remote, ProxyConfig::new("https://repo.example.com/"))
            .build()
            .unwrap();
        repo.store().put(&Item::file("central", p("/a.jar"), "jar")).await.unwrap();

        let err = repo.copy_item(&p("/a.jar"), &p("/b.jar")).await.unwrap_err();
        assert!(matches!(err, RepoError::IllegalOperation { .. }));
        assert!(!repo.store().contains("central", &p("/b.jar")).await.unwrap());
    }

    #[tokio::test]
    async fn test_move_removes_source() {
        let repo = hosted(WritePolicy::ReadWrite);
        repo.store_item(Item::file("r", p("/old/a.jar"), "jar")).await.unwrap();

        let events = repo.move_item(&p("/old/a.jar"), &p("/new/a.jar")).await.unwrap();
        assert!(matches!(events[0], RepositoryEvent::ItemStored { created: true, .. }));
        assert!(matches!(events[1], RepositoryEvent::ItemDeleted { .. }));

        assert!(!repo.store().contains("releases", &p("/old/a.jar")).await.unwrap());
        let moved = repo
            .retrieve(&mut RetrievalRequest::new(p("/new/a.jar")), &NoMembers)
            .await
            .unwrap();
        assert_eq!(moved.bytes(), b"jar");
    }

    #[tokio::test]
    async fn test_move_from_read_only_is_illegal() {
        let repo = hosted(WritePolicy::ReadWrite);
        repo.store_item(Item::file("r", p("/a"), "1")).await.unwrap();
        repo.set_write_policy(WritePolicy::ReadOnly);

        let err = repo.move_item(&p("/a"), &p("/b")).await.unwrap_err();
        assert!(matches!(err, RepoError::IllegalOperation { .. }));
        assert!(repo.store().contains("releases", &p("/a")).await.unwrap());
        assert!(!repo.store().contains("releases", &p("/b")).await.unwrap());
    }

    #[test]
    fn test_capabilities() {
        let hosted = hosted(WritePolicy::ReadWrite);
        assert!(hosted.has(Capability::Hosted));
        assert_eq!(hosted.kind(), RepositoryKind::Hosted);

        let group = RepositoryBuilder::new("public")
            .group(vec!["releases".to_string()])
            .build()
            .unwrap();
        assert!(group.has(Capability::Group));
        assert!(!group.has(Capability::Hosted));
        assert!(group.check_action(Action::Create, &p("/x")).is_err());
    }
}
