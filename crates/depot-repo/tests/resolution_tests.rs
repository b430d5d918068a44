//! Integration tests for content resolution
//!
//! Each module exercises one behavioural property end to end, counting calls
//! on the scripted remote and the in-memory store.

use chrono::{Duration as ChronoDuration, Utc};
use depot_core::{Item, ProxyMode, RepositoryPath, RetrievalRequest};
use depot_repo::group::NoMembers;
use depot_repo::remote::scripted::{Outcome, ScriptedRemote};
use depot_repo::{
    MemoryStore, ProxyConfig, RepoError, Repository, RepositoryBuilder, RepositoryRegistry, Store,
};
use std::sync::Arc;
use std::time::Duration;

fn p(s: &str) -> RepositoryPath {
    RepositoryPath::new(s).unwrap()
}

fn proxy_config() -> ProxyConfig {
    let mut config = ProxyConfig::new("https://repo.example.com/maven2/");
    config.connection_timeout = Duration::from_secs(10);
    config
}

fn proxy(id: &str, remote: Arc<ScriptedRemote>, store: Arc<MemoryStore>, config: ProxyConfig) -> Repository {
    RepositoryBuilder::new(id)
        .store(store)
        .proxy(remote, config)
        .build()
        .unwrap()
}

mod single_flight {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_fetch_once() {
        let remote = Arc::new(ScriptedRemote::new("central", &["https://repo.example.com/maven2/"]));
        remote.script_path(0, "/org/lib.jar", vec![Outcome::content("jar-bytes")]);
        remote.set_fetch_delay(Duration::from_millis(50));
        let repo = Arc::new(proxy(
            "central",
            Arc::clone(&remote),
            Arc::new(MemoryStore::new()),
            proxy_config(),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move {
                    let mut req = RetrievalRequest::new(p("/org/lib.jar"));
                    repo.retrieve(&mut req, &NoMembers)
                        .await
                        .map(|item| item.bytes().to_vec())
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), b"jar-bytes");
        }
        assert_eq!(remote.total_fetches(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stale_reads_revalidate_once() {
        let remote = Arc::new(ScriptedRemote::new("central", &["https://repo.example.com/maven2/"]));
        remote.script_exists(vec![Outcome::content("")]);
        remote.script_path(0, "/org/lib.jar", vec![Outcome::content("new")]);
        remote.set_fetch_delay(Duration::from_millis(50));
        let store = Arc::new(MemoryStore::new());
        store.put(&Item::file("central", p("/org/lib.jar"), "old")).await.unwrap();
        let repo = Arc::new(proxy("central", Arc::clone(&remote), store, proxy_config()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move {
                    let mut req = RetrievalRequest::new(p("/org/lib.jar"));
                    repo.retrieve(&mut req, &NoMembers)
                        .await
                        .map(|item| item.bytes().to_vec())
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), b"new");
        }
        assert_eq!(remote.exists_calls(), 1);
        assert_eq!(remote.total_fetches(), 1);
    }
}

mod not_found_cache {
    use super::*;

    async fn assert_sound(repo: &Repository, store: &MemoryStore) {
        for key in repo.nfc().keys() {
            assert!(
                !store.contains(repo.id(), &key).await.unwrap(),
                "{} is stored and cached as not found",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_store_and_delete_keep_cache_sound() {
        let store = Arc::new(MemoryStore::new());
        let repo = RepositoryBuilder::new("releases").store(store.clone()).build().unwrap();

        for path in ["/a/b/c.jar", "/a/b", "/a/d.pom"] {
            assert!(repo.retrieve(&mut RetrievalRequest::new(p(path)), &NoMembers).await.is_err());
        }
        assert_eq!(repo.nfc().len(), 3);

        repo.store_item(Item::file("releases", p("/a/b/c.jar"), "c")).await.unwrap();
        assert_sound(&repo, &store).await;
        assert!(!repo.nfc().contains(&p("/a/b")));

        repo.delete_item(&p("/a")).await.unwrap();
        assert_sound(&repo, &store).await;

        repo.create_collection(p("/a/d.pom")).await.unwrap();
        assert_sound(&repo, &store).await;
    }

    #[tokio::test]
    async fn test_cache_fill_clears_negative_entry() {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(ScriptedRemote::new("central", &["https://repo.example.com/maven2/"]));
        remote.script_path(0, "/late.jar", vec![Outcome::NotFound, Outcome::content("now")]);
        let repo = proxy("central", Arc::clone(&remote), store.clone(), proxy_config());

        let err = repo
            .retrieve(&mut RetrievalRequest::new(p("/late.jar")), &NoMembers)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(repo.nfc().contains(&p("/late.jar")));

        let item = repo
            .retrieve(&mut RetrievalRequest::new(p("/late.jar")).as_expired(), &NoMembers)
            .await
            .unwrap();
        assert_eq!(item.bytes(), b"now");
        assert_sound(&repo, &store).await;
    }
}

mod staleness {
    use super::*;
    use depot_repo::staleness::evaluate;
    use depot_repo::{AgingPolicy, Freshness};

    #[test]
    fn test_never_expiring_policy_is_never_stale() {
        let now = Utc::now();
        let policy = AgingPolicy {
            aging_active: true,
            max_age_minutes: -1,
        };
        for minutes in [0, 60, 60 * 24 * 365 * 10] {
            let mut item = Item::file("central", p("/a.jar"), "x")
                .with_remote_checked(now - ChronoDuration::minutes(minutes));
            assert_eq!(evaluate(&mut item, &policy, None, now), Freshness::Fresh);
        }
    }

    #[test]
    fn test_expired_flag_is_always_stale() {
        let now = Utc::now();
        for max_age_minutes in [-1, 0, 1440] {
            let policy = AgingPolicy {
                aging_active: true,
                max_age_minutes,
            };
            let mut item = Item::file("central", p("/a.jar"), "x").with_remote_checked(now);
            item.expired = true;
            assert!(evaluate(&mut item, &policy, None, now).is_stale());
        }
    }

    #[test]
    fn test_collections_never_age() {
        let now = Utc::now();
        let policy = AgingPolicy {
            aging_active: true,
            max_age_minutes: 0,
        };
        let mut collection = Item::collection("central", p("/org"));
        assert_eq!(evaluate(&mut collection, &policy, None, now), Freshness::Fresh);
    }
}

mod retry_table {
    use super::*;

    fn two_mirrors() -> Arc<ScriptedRemote> {
        Arc::new(ScriptedRemote::new(
            "central",
            &["https://one.example.com/", "https://two.example.com/"],
        ))
    }

    #[tokio::test]
    async fn test_storage_failures_exhaust_retries_then_fall_back() {
        let remote = two_mirrors();
        remote.script_path(0, "/lib.jar", vec![Outcome::Storage]);
        remote.script_path(1, "/lib.jar", vec![Outcome::content("from-two")]);
        let repo = proxy("central", Arc::clone(&remote), Arc::new(MemoryStore::new()), proxy_config());

        let item = repo
            .retrieve(&mut RetrievalRequest::new(p("/lib.jar")), &NoMembers)
            .await
            .unwrap();

        assert_eq!(item.bytes(), b"from-two");
        assert_eq!(remote.fetch_count(&remote.url_for(0, "/lib.jar")), 3);
        assert_eq!(remote.fetch_count(&remote.url_for(1, "/lib.jar")), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_immediately() {
        let remote = two_mirrors();
        remote.script_path(0, "/lib.jar", vec![Outcome::Transport]);
        remote.script_path(1, "/lib.jar", vec![Outcome::content("unused")]);
        let repo = proxy("central", Arc::clone(&remote), Arc::new(MemoryStore::new()), proxy_config());

        let err = repo
            .retrieve(&mut RetrievalRequest::new(p("/lib.jar")), &NoMembers)
            .await
            .unwrap_err();

        assert!(matches!(err, RepoError::TransportFailure { .. }));
        assert_eq!(remote.total_fetches(), 1);
        assert_eq!(repo.proxy_mode(), Some(ProxyMode::BlockedAuto));
    }
}

mod auto_block {
    use super::*;

    #[tokio::test]
    async fn test_backoff_grows_and_caps() {
        let remote = Arc::new(ScriptedRemote::new("central", &["https://repo.example.com/"]));
        remote.script_path(0, "/x.jar", vec![Outcome::Transport]);
        remote.script_reachability(vec![false, false, false, false, true]);
        let mut config = proxy_config();
        config.connection_timeout = Duration::from_secs(20 * 60);
        let repo = proxy("central", Arc::clone(&remote), Arc::new(MemoryStore::new()), config);
        let health = repo.proxy().unwrap().health();

        let _ = repo
            .retrieve(&mut RetrievalRequest::new(p("/x.jar")), &NoMembers)
            .await;
        assert_eq!(health.proxy_mode(), ProxyMode::BlockedAuto);
        assert_eq!(health.retain_time(), Duration::from_secs(40 * 60));

        let mut retains = Vec::new();
        for _ in 0..4 {
            health.check_remote_status().await;
            retains.push(health.retain_time().as_secs() / 60);
        }
        assert_eq!(retains, vec![40, 40, 60, 60]);

        health.check_remote_status().await;
        assert_eq!(health.proxy_mode(), ProxyMode::Allow);
        assert_eq!(health.retain_time(), Duration::from_secs(5 * 60));
    }

    #[tokio::test]
    async fn test_blocked_proxy_does_not_poison_not_found_cache() {
        let remote = Arc::new(ScriptedRemote::new("central", &["https://repo.example.com/"]));
        let repo = proxy("central", Arc::clone(&remote), Arc::new(MemoryStore::new()), proxy_config());
        repo.proxy()
            .unwrap()
            .health()
            .set_proxy_mode(ProxyMode::BlockedManual, None);

        let err = repo
            .retrieve(&mut RetrievalRequest::new(p("/x.jar")), &NoMembers)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(repo.nfc().is_empty());
        assert_eq!(remote.total_fetches(), 0);
    }
}

mod groups {
    use super::*;

    fn registry() -> RepositoryRegistry {
        let registry = RepositoryRegistry::new();
        for id in ["m1", "m2", "m3"] {
            registry.add(RepositoryBuilder::new(id).build().unwrap()).unwrap();
        }
        registry
            .add(
                RepositoryBuilder::new("g1")
                    .group(vec!["m1".into(), "m2".into(), "m3".into()])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_partial_failure_serves_second_member() {
        let registry = registry();
        registry
            .store_item("m2", Item::file("m2", p("/lib.jar"), "from-m2"))
            .await
            .unwrap();

        let mut req = RetrievalRequest::new(p("/lib.jar"));
        let item = registry.retrieve_item("g1", &mut req).await.unwrap();
        assert_eq!(item.bytes(), b"from-m2");
        assert!(req.is_processed("m1"));
        assert!(!req.is_processed("m3"));

        let err = registry
            .retrieve_item("g1", &mut RetrievalRequest::new(p("/missing.jar")))
            .await
            .unwrap_err();
        let failed: Vec<&str> = err.failures().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(failed, vec!["m1", "m2", "m3"]);
        assert!(err.failures().iter().all(|f| f.error.is_not_found()));
    }

    #[test]
    fn test_cycles_rejected_and_membership_unchanged() {
        let registry = registry();
        registry
            .add(RepositoryBuilder::new("g2").group(vec!["g1".into()]).build().unwrap())
            .unwrap();

        assert!(matches!(
            registry.add_member("g1", "g1"),
            Err(RepoError::CyclicGrouping { .. })
        ));
        assert!(matches!(
            registry.add_member("g1", "g2"),
            Err(RepoError::CyclicGrouping { .. })
        ));
        assert!(matches!(
            registry.set_members("g1", vec!["m1".into(), "g2".into()]),
            Err(RepoError::CyclicGrouping { .. })
        ));
        assert_eq!(
            registry.get("g1").unwrap().group().unwrap().members(),
            vec!["m1", "m2", "m3"]
        );
    }
}

mod deadlines {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_request_releases_its_locks() {
        let remote = Arc::new(ScriptedRemote::new("central", &["https://repo.example.com/"]));
        remote.script_path(0, "/slow.jar", vec![Outcome::content("eventually")]);
        remote.set_fetch_delay(Duration::from_secs(60));
        let registry = RepositoryRegistry::new();
        registry
            .add(proxy("central", Arc::clone(&remote), Arc::new(MemoryStore::new()), proxy_config()))
            .unwrap();

        let mut req = RetrievalRequest::new(p("/slow.jar")).with_deadline(Duration::from_secs(1));
        let err = registry.retrieve_item("central", &mut req).await.unwrap_err();
        assert!(matches!(err, RepoError::Timeout { .. }));
        assert_eq!(registry.get("central").unwrap().locks().held(), 0);

        remote.set_fetch_delay(Duration::ZERO);
        let item = registry
            .retrieve_item("central", &mut RetrievalRequest::new(p("/slow.jar")))
            .await
            .unwrap();
        assert_eq!(item.bytes(), b"eventually");
    }
}
