//! Scripted remote source
//!
//! Answers from per-URL scripts instead of the network and counts every
//! call, so tests can assert exactly how many attempts the fetch engine made
//! against each candidate URL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::RepositoryPath;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{RemoteItem, RemoteSource, join_url};
use crate::config::RemoteAuth;
use crate::error::{RepoError, Result};

/// One scripted answer
#[derive(Debug, Clone)]
pub enum Outcome {
    Content {
        bytes: Vec<u8>,
        sha256: Option<String>,
        content_type: Option<String>,
        last_modified: Option<DateTime<Utc>>,
    },
    NotFound,
    AccessDenied,
    Transport,
    Storage,
}

impl Outcome {
    pub fn content(bytes: impl Into<Vec<u8>>) -> Self {
        Outcome::Content {
            bytes: bytes.into(),
            sha256: None,
            content_type: None,
            last_modified: None,
        }
    }

    /// Content advertising a SHA-256 checksum
    pub fn content_with_sha256(bytes: impl Into<Vec<u8>>, sha256: impl Into<String>) -> Self {
        Outcome::Content {
            bytes: bytes.into(),
            sha256: Some(sha256.into()),
            content_type: None,
            last_modified: None,
        }
    }

    /// Content with a reported content type
    pub fn content_typed(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Outcome::Content {
            bytes: bytes.into(),
            sha256: None,
            content_type: Some(content_type.into()),
            last_modified: None,
        }
    }
}

/// Remote source driven by scripts
pub struct ScriptedRemote {
    repository: String,
    bases: Vec<String>,
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    fetches: Mutex<HashMap<String, usize>>,
    exists_answers: Mutex<VecDeque<Outcome>>,
    reachability: Mutex<VecDeque<bool>>,
    fetch_delay: Mutex<Option<Duration>>,
    auth: Mutex<Option<RemoteAuth>>,
    exists_calls: AtomicUsize,
    reachability_calls: AtomicUsize,
}

impl ScriptedRemote {
    /// Create a remote for `repository` with the given base URLs (primary first)
    pub fn new(repository: impl Into<String>, bases: &[&str]) -> Self {
        Self {
            repository: repository.into(),
            bases: bases.iter().map(|b| b.to_string()).collect(),
            scripts: Mutex::new(HashMap::new()),
            fetches: Mutex::new(HashMap::new()),
            exists_answers: Mutex::new(VecDeque::new()),
            reachability: Mutex::new(VecDeque::new()),
            fetch_delay: Mutex::new(None),
            auth: Mutex::new(None),
            exists_calls: AtomicUsize::new(0),
            reachability_calls: AtomicUsize::new(0),
        }
    }

    /// Script the answers of one URL; the last answer repeats
    pub fn script(&self, url: impl Into<String>, outcomes: Vec<Outcome>) -> &Self {
        self.scripts.lock().insert(url.into(), outcomes.into());
        self
    }

    /// Script the answers for a path on the base URL at `base_index`
    pub fn script_path(&self, base_index: usize, path: &str, outcomes: Vec<Outcome>) -> &Self {
        let url = self.url_for(base_index, path);
        self.script(url, outcomes)
    }

    /// Script the answers of `exists`; the last answer repeats
    ///
    /// `Content` answers true, `NotFound` false, anything else fails.
    pub fn script_exists(&self, outcomes: Vec<Outcome>) -> &Self {
        *self.exists_answers.lock() = outcomes.into();
        self
    }

    /// Script reachability answers; the last answer repeats
    pub fn script_reachability(&self, answers: Vec<bool>) -> &Self {
        *self.reachability.lock() = answers.into();
        self
    }

    /// Delay every fetch, to widen race windows
    pub fn set_fetch_delay(&self, delay: Duration) -> &Self {
        *self.fetch_delay.lock() = Some(delay);
        self
    }

    /// Full URL of `path` on a base
    pub fn url_for(&self, base_index: usize, path: &str) -> String {
        let path = RepositoryPath::new(path).unwrap_or_default();
        self.bases
            .get(base_index)
            .map(|b| join_url(b, &path))
            .unwrap_or_default()
    }

    /// Fetch attempts made against one URL
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().get(url).copied().unwrap_or(0)
    }

    /// Fetch attempts across all URLs
    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().values().sum()
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn reachability_calls(&self) -> usize {
        self.reachability_calls.load(Ordering::SeqCst)
    }

    /// Credentials last installed through `update_auth`
    pub fn current_auth(&self) -> Option<RemoteAuth> {
        self.auth.lock().clone()
    }

    fn next(queue: &mut VecDeque<Outcome>) -> Option<Outcome> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn error_for(&self, outcome: &Outcome, url: &str, path: &RepositoryPath) -> RepoError {
        match outcome {
            Outcome::AccessDenied => RepoError::AccessDenied {
                repository: self.repository.clone(),
                path: path.to_string(),
                reason: format!("403 from {}", url),
            },
            Outcome::Transport => RepoError::TransportFailure {
                repository: self.repository.clone(),
                url: url.to_string(),
                message: "connection refused".to_string(),
            },
            Outcome::Storage => RepoError::storage(
                self.repository.clone(),
                format!("500 from {}", url),
            ),
            Outcome::NotFound | Outcome::Content { .. } => {
                RepoError::not_found(self.repository.clone(), path, format!("404 from {}", url))
            }
        }
    }
}

#[async_trait]
impl RemoteSource for ScriptedRemote {
    fn candidate_urls(&self, path: &RepositoryPath) -> Vec<String> {
        self.bases.iter().map(|b| join_url(b, path)).collect()
    }

    async fn exists(&self, path: &RepositoryPath, _since: Option<DateTime<Utc>>) -> Result<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = Self::next(&mut self.exists_answers.lock());
        match outcome {
            None | Some(Outcome::Content { .. }) => Ok(true),
            Some(Outcome::NotFound) => Ok(false),
            Some(other) => {
                let url = self.candidate_urls(path).into_iter().next().unwrap_or_default();
                Err(self.error_for(&other, &url, path))
            }
        }
    }

    async fn fetch(&self, url: &str, path: &RepositoryPath) -> Result<RemoteItem> {
        *self.fetches.lock().entry(url.to_string()).or_insert(0) += 1;

        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .scripts
            .lock()
            .get_mut(url)
            .and_then(Self::next)
            .unwrap_or(Outcome::NotFound);

        match outcome {
            Outcome::Content {
                bytes,
                sha256,
                content_type,
                last_modified,
            } => Ok(RemoteItem {
                url: url.to_string(),
                content: bytes.into(),
                last_modified,
                content_type,
                sha256,
            }),
            other => Err(self.error_for(&other, url, path)),
        }
    }

    async fn is_reachable(&self) -> Result<bool> {
        self.reachability_calls.fetch_add(1, Ordering::SeqCst);
        let mut reachability = self.reachability.lock();
        let answer = if reachability.len() > 1 {
            reachability.pop_front()
        } else {
            reachability.front().copied()
        };
        Ok(answer.unwrap_or(true))
    }

    fn update_auth(&self, auth: Option<RemoteAuth>) {
        *self.auth.lock() = auth;
    }

    fn remote_url(&self) -> &str {
        self.bases.first().map(String::as_str).unwrap_or_default()
    }
}
