//! Repository registry
//!
//! Owns every configured repository, resolves group members and dispatches
//! requests by repository id. All repositories of a registry share one
//! [`PathLockManager`] and, when built from configuration, one store.
//!
//! Membership changes are serialized: the cycle check reads every group's
//! member list, so no other change may commit between the check and the
//! update.

use chrono::{DateTime, Utc};
use depot_core::{Item, ProxyMode, RemoteStatus, RepositoryEvent, RepositoryPath, RetrievalRequest};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{DepotConfig, RemoteAuth};
use crate::error::{RepoError, Result};
use crate::group::{self, MemberLookup};
use crate::lock::PathLockManager;
use crate::maintenance;
use crate::repository::{Repository, RepositoryBuilder};
use crate::storage::Store;
use crate::walker::WalkerFilter;

pub struct RepositoryRegistry {
    repositories: RwLock<BTreeMap<String, Arc<Repository>>>,
    locks: PathLockManager,
    membership: Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl Default for RepositoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemberLookup for RepositoryRegistry {
    fn lookup(&self, id: &str) -> Option<Arc<Repository>> {
        self.repositories.read().get(id).cloned()
    }
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            repositories: RwLock::new(BTreeMap::new()),
            locks: PathLockManager::new(),
            membership: Mutex::new(()),
            shutdown,
        }
    }

    /// Build every repository of `config` on top of `store`
    pub fn from_config(config: &DepotConfig, store: Arc<dyn Store>) -> Result<Self> {
        config.validate()?;
        let registry = Self::new();
        {
            let mut repositories = registry.repositories.write();
            for def in &config.repositories {
                let repo = RepositoryBuilder::from_def(def)?
                    .store(Arc::clone(&store))
                    .locks(registry.locks.clone())
                    .build()?;
                repositories.insert(def.id.clone(), Arc::new(repo));
            }
        }
        tracing::debug!(repositories = config.repositories.len(), store = store.name(), "registry built");
        Ok(registry)
    }

    /// Lock manager to hand to repositories built outside the registry
    pub fn locks(&self) -> &PathLockManager {
        &self.locks
    }

    /// Register a repository; group members must already be registered
    pub fn add(&self, repo: Repository) -> Result<Arc<Repository>> {
        let _membership = self.membership.lock();
        if self.repositories.read().contains_key(repo.id()) {
            return Err(RepoError::InvalidConfig {
                message: format!("Repository '{}' already exists", repo.id()),
            });
        }
        if let Some(facet) = repo.group() {
            for member in facet.members() {
                group::validate_member(&repo, &member, self)?;
            }
        }

        let repo = Arc::new(repo);
        let mut repositories = self.repositories.write();
        if repositories.contains_key(repo.id()) {
            return Err(RepoError::InvalidConfig {
                message: format!("Repository '{}' already exists", repo.id()),
            });
        }
        repositories.insert(repo.id().to_string(), Arc::clone(&repo));
        Ok(repo)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Repository>> {
        self.lookup(id).ok_or_else(|| RepoError::NoSuchRepository {
            repository: id.to_string(),
        })
    }

    pub fn ids(&self) -> Vec<String> {
        self.repositories.read().keys().cloned().collect()
    }

    /// Unregister a repository and drop it from every group
    pub fn remove(&self, id: &str) -> Result<Vec<RepositoryEvent>> {
        let _membership = self.membership.lock();
        let removed = self
            .repositories
            .write()
            .remove(id)
            .ok_or_else(|| RepoError::NoSuchRepository {
                repository: id.to_string(),
            })?;
        if let Some(proxy) = removed.proxy() {
            proxy.health().set_in_service(false);
        }

        let repositories: Vec<Arc<Repository>> = self.repositories.read().values().cloned().collect();
        let events = repositories
            .iter()
            .filter_map(|repo| group::remove_member(repo, id))
            .collect();
        tracing::info!(repository = id, "repository removed");
        Ok(events)
    }

    /// Resolve `request.path` in repository `id`, honoring the request deadline
    pub async fn retrieve_item(&self, id: &str, request: &mut RetrievalRequest) -> Result<Item> {
        let repo = self.get(id)?;
        let path = request.path.clone();
        match request.deadline {
            Some(deadline) => tokio::time::timeout(deadline, repo.retrieve(request, self))
                .await
                .map_err(|_| {
                    tracing::debug!(repository = id, path = %path, ?deadline, "request deadline elapsed");
                    RepoError::Timeout {
                        repository: id.to_string(),
                        path: path.to_string(),
                        millis: deadline.as_millis(),
                    }
                })?,
            None => repo.retrieve(request, self).await,
        }
    }

    pub async fn list_items(&self, id: &str, request: &mut RetrievalRequest) -> Result<Vec<Item>> {
        let repo = self.get(id)?;
        let path = request.path.clone();
        match request.deadline {
            Some(deadline) => tokio::time::timeout(deadline, repo.list_items(request, self))
                .await
                .map_err(|_| RepoError::Timeout {
                    repository: id.to_string(),
                    path: path.to_string(),
                    millis: deadline.as_millis(),
                })?,
            None => repo.list_items(request, self).await,
        }
    }

    pub async fn retrieve_all(&self, id: &str, request: &mut RetrievalRequest) -> Result<Vec<Item>> {
        let repo = self.get(id)?;
        group::retrieve_all(&repo, request, self).await
    }

    pub async fn store_item(&self, id: &str, item: Item) -> Result<RepositoryEvent> {
        self.get(id)?.store_item(item).await
    }

    pub async fn delete_item(&self, id: &str, path: &RepositoryPath) -> Result<RepositoryEvent> {
        self.get(id)?.delete_item(path).await
    }

    pub async fn copy_item(&self, id: &str, from: &RepositoryPath, to: &RepositoryPath) -> Result<RepositoryEvent> {
        self.get(id)?.copy_item(from, to).await
    }

    pub async fn move_item(
        &self,
        id: &str,
        from: &RepositoryPath,
        to: &RepositoryPath,
    ) -> Result<Vec<RepositoryEvent>> {
        self.get(id)?.move_item(from, to).await
    }

    pub async fn expire_caches(
        &self,
        id: &str,
        request: &mut RetrievalRequest,
        filter: Option<&dyn WalkerFilter>,
    ) -> Result<()> {
        let repo = self.get(id)?;
        maintenance::expire_caches(&repo, request, filter, self).await
    }

    pub async fn expire_nfc(
        &self,
        id: &str,
        request: &mut RetrievalRequest,
        filter: Option<&dyn WalkerFilter>,
    ) -> Result<()> {
        let repo = self.get(id)?;
        maintenance::expire_nfc(&repo, request, filter, self).await
    }

    pub async fn evict_unused(
        &self,
        id: &str,
        request: &mut RetrievalRequest,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RepositoryPath>> {
        let repo = self.get(id)?;
        maintenance::evict_unused(&repo, request, cutoff, self).await
    }

    /// Administrative proxy state change, `Allow` or `BlockedManual` only
    pub fn set_proxy_mode(
        &self,
        id: &str,
        mode: ProxyMode,
        cause: Option<String>,
    ) -> Result<Option<RepositoryEvent>> {
        let repo = self.get(id)?;
        let proxy = repo.proxy().ok_or_else(|| {
            RepoError::illegal(id, RepositoryPath::root(), "not a proxy repository")
        })?;
        if mode == ProxyMode::BlockedAuto {
            return Err(RepoError::illegal(
                id,
                RepositoryPath::root(),
                "BLOCKED_AUTO is set by the health controller only",
            ));
        }
        Ok(proxy.health().set_proxy_mode(mode, cause))
    }

    pub fn set_members(&self, id: &str, members: Vec<String>) -> Result<RepositoryEvent> {
        let repo = self.get(id)?;
        let _membership = self.membership.lock();
        group::set_members(&repo, members, self)
    }

    pub fn add_member(&self, id: &str, member: &str) -> Result<RepositoryEvent> {
        let repo = self.get(id)?;
        let _membership = self.membership.lock();
        group::add_member(&repo, member, self)
    }

    /// Drop `member` from group `id`; `None` when it was not a member
    pub fn remove_member(&self, id: &str, member: &str) -> Result<Option<RepositoryEvent>> {
        let repo = self.get(id)?;
        let _membership = self.membership.lock();
        Ok(group::remove_member(&repo, member))
    }

    pub fn transitive_members(&self, id: &str) -> Result<Vec<String>> {
        let repo = self.get(id)?;
        Ok(group::transitive_members(&repo, self))
    }

    /// Remote status of a proxy, probing the origin when `force` is set
    pub async fn remote_status(&self, id: &str, force: bool) -> Result<RemoteStatus> {
        let repo = self.get(id)?;
        let proxy = repo.proxy().ok_or_else(|| {
            RepoError::illegal(id, RepositoryPath::root(), "not a proxy repository")
        })?;
        Ok(proxy.health().remote_status(force).await)
    }

    pub fn update_remote_auth(&self, id: &str, auth: Option<RemoteAuth>) -> Result<Option<RepositoryEvent>> {
        self.get(id)?.update_remote_auth(auth)
    }

    /// Start one health check loop per proxy repository
    pub fn start_health_checks(&self) -> Vec<JoinHandle<()>> {
        self.repositories
            .read()
            .values()
            .filter_map(|repo| repo.proxy())
            .map(|proxy| proxy.health().spawn_status_checker(self.shutdown.subscribe()))
            .collect()
    }

    /// Stop the health check loops
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

impl std::fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryRegistry")
            .field("repositories", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyConfig, RepositoryDef};
    use crate::remote::scripted::{Outcome, ScriptedRemote};
    use crate::storage::MemoryStore;
    use std::time::Duration;

    fn p(s: &str) -> RepositoryPath {
        RepositoryPath::new(s).unwrap()
    }

    fn config() -> DepotConfig {
        let mut config = DepotConfig::default();
        config.add(RepositoryDef::hosted("releases")).unwrap();
        config
            .add(RepositoryDef::proxy("central", "https://repo.example.com/maven2/"))
            .unwrap();
        config
            .add(RepositoryDef::group("public", vec!["releases".into(), "central".into()]))
            .unwrap();
        config
    }

    #[tokio::test]
    async fn test_from_config_builds_every_kind() {
        let registry = RepositoryRegistry::from_config(&config(), Arc::new(MemoryStore::new())).unwrap();

        assert_eq!(registry.ids(), vec!["central", "public", "releases"]);
        assert!(registry.get("central").unwrap().proxy().is_some());
        assert!(registry.get("public").unwrap().group().is_some());
        assert_eq!(
            registry.transitive_members("public").unwrap(),
            vec!["releases", "central"]
        );
    }

    #[tokio::test]
    async fn test_group_served_from_hosted_member() {
        let registry = RepositoryRegistry::from_config(&config(), Arc::new(MemoryStore::new())).unwrap();
        registry
            .store_item("releases", Item::file("releases", p("/lib.jar"), "jar"))
            .await
            .unwrap();

        let mut req = RetrievalRequest::new(p("/lib.jar"));
        let item = registry.retrieve_item("public", &mut req).await.unwrap();
        assert_eq!(item.bytes(), b"jar");
        assert!(!req.is_processed("central"));
    }

    #[tokio::test]
    async fn test_moved_item_served_through_group() {
        let registry = RepositoryRegistry::from_config(&config(), Arc::new(MemoryStore::new())).unwrap();
        registry
            .store_item("releases", Item::file("releases", p("/staging/lib.jar"), "jar"))
            .await
            .unwrap();

        let events = registry
            .move_item("releases", &p("/staging/lib.jar"), &p("/lib.jar"))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);

        let mut req = RetrievalRequest::new(p("/lib.jar")).local_only();
        assert_eq!(registry.retrieve_item("public", &mut req).await.unwrap().bytes(), b"jar");
        let mut req = RetrievalRequest::new(p("/staging/lib.jar")).local_only();
        assert!(registry.retrieve_item("releases", &mut req).await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_concurrent_opposite_additions_never_form_a_cycle() {
        for _ in 0..200 {
            let registry = RepositoryRegistry::new();
            for id in ["g1", "g2"] {
                registry
                    .add(RepositoryBuilder::new(id).group(Vec::new()).build().unwrap())
                    .unwrap();
            }
            let barrier = std::sync::Barrier::new(2);

            let (first, second) = std::thread::scope(|scope| {
                let first = scope.spawn(|| {
                    barrier.wait();
                    registry.add_member("g1", "g2").is_ok()
                });
                let second = scope.spawn(|| {
                    barrier.wait();
                    registry.add_member("g2", "g1").is_ok()
                });
                (first.join().unwrap(), second.join().unwrap())
            });

            assert!(first ^ second, "exactly one addition must commit");
            let g1 = registry.get("g1").unwrap().group().unwrap().members();
            let g2 = registry.get("g2").unwrap().group().unwrap().members();
            assert!(g1.is_empty() || g2.is_empty());
        }
    }

    #[test]
    fn test_remove_member_reports_absent() {
        let registry = RepositoryRegistry::from_config(&config(), Arc::new(MemoryStore::new())).unwrap();
        assert!(registry.remove_member("public", "central").unwrap().is_some());
        assert!(registry.remove_member("public", "central").unwrap().is_none());
        assert_eq!(registry.get("public").unwrap().group().unwrap().members(), vec!["releases"]);
    }

    #[test]
    fn test_duplicate_and_unknown_ids() {
        let registry = RepositoryRegistry::new();
        registry.add(RepositoryBuilder::new("a").build().unwrap()).unwrap();
        assert!(matches!(
            registry.add(RepositoryBuilder::new("a").build().unwrap()),
            Err(RepoError::InvalidConfig { .. })
        ));
        assert!(matches!(
            registry.get("missing"),
            Err(RepoError::NoSuchRepository { .. })
        ));
        assert!(matches!(
            registry.add(RepositoryBuilder::new("g").group(vec!["ghost".into()]).build().unwrap()),
            Err(RepoError::NoSuchRepository { .. })
        ));
    }

    #[test]
    fn test_remove_drops_group_membership() {
        let registry = RepositoryRegistry::new();
        registry.add(RepositoryBuilder::new("a").build().unwrap()).unwrap();
        registry.add(RepositoryBuilder::new("b").build().unwrap()).unwrap();
        registry
            .add(RepositoryBuilder::new("g").group(vec!["a".into(), "b".into()]).build().unwrap())
            .unwrap();

        let events = registry.remove("a").unwrap();
        assert_eq!(
            events,
            vec![RepositoryEvent::GroupMembersChanged {
                repository: "g".into(),
                members: vec!["b".into()],
            }]
        );
        assert_eq!(registry.get("g").unwrap().group().unwrap().members(), vec!["b"]);
    }

    #[test]
    fn test_proxy_mode_administration() {
        let registry = RepositoryRegistry::new();
        registry.add(RepositoryBuilder::new("hosted").build().unwrap()).unwrap();
        let remote = Arc::new(ScriptedRemote::new("central", &["https://repo.example.com/"]));
        registry
            .add(
                RepositoryBuilder::new("central")
                    .proxy(remote, ProxyConfig::new("https://repo.example.com/"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        assert!(matches!(
            registry.set_proxy_mode("hosted", ProxyMode::BlockedManual, None),
            Err(RepoError::IllegalOperation { .. })
        ));
        assert!(matches!(
            registry.set_proxy_mode("central", ProxyMode::BlockedAuto, None),
            Err(RepoError::IllegalOperation { .. })
        ));
        let event = registry
            .set_proxy_mode("central", ProxyMode::BlockedManual, Some("maintenance".into()))
            .unwrap();
        assert!(matches!(event, Some(RepositoryEvent::ProxyModeChanged { .. })));
        assert_eq!(registry.get("central").unwrap().proxy_mode(), Some(ProxyMode::BlockedManual));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let registry = RepositoryRegistry::new();
        let remote = Arc::new(ScriptedRemote::new("central", &["https://repo.example.com/"]));
        remote.script_path(0, "/slow.jar", vec![Outcome::content("late")]);
        remote.set_fetch_delay(Duration::from_secs(30));
        registry
            .add(
                RepositoryBuilder::new("central")
                    .proxy(remote, ProxyConfig::new("https://repo.example.com/"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let mut req = RetrievalRequest::new(p("/slow.jar")).with_deadline(Duration::from_secs(5));
        let err = registry.retrieve_item("central", &mut req).await.unwrap_err();
        assert!(matches!(err, RepoError::Timeout { millis: 5000, .. }));
    }

    #[tokio::test]
    async fn test_shutdown_stops_health_checks() {
        let registry = RepositoryRegistry::new();
        let remote = Arc::new(ScriptedRemote::new("central", &["https://repo.example.com/"]));
        registry
            .add(
                RepositoryBuilder::new("central")
                    .proxy(remote, ProxyConfig::new("https://repo.example.com/"))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let handles = registry.start_health_checks();
        assert_eq!(handles.len(), 1);
        registry.shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
