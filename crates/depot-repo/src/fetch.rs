//! Remote fetch engine: retry, fallback and blacklist over candidate URLs
//!
//! | Outcome                | Retry same URL | Next URL          | Abort |
//! |------------------------|----------------|-------------------|-------|
//! | not found              | no             | yes               | no    |
//! | access denied          | no             | yes               | no    |
//! | transport failure      | no             | no                | yes   |
//! | storage failure        | up to budget   | once exhausted    | no    |
//! | failed validation      | no             | yes               | no    |
//!
//! The engine only fetches and validates; the cache fill is done by the
//! proxy under its exclusive path lock.

use depot_core::{RepositoryEvent, RepositoryPath, RetrievalRequest};

use crate::error::{RepoError, Result, SourceFailure};
use crate::health::HealthController;
use crate::remote::{RemoteItem, RemoteSource};
use crate::validation::{ContentValidator, validate_all};

/// Request context key recording URLs that answered "access denied"
pub const CTX_ACCESS_DENIED: &str = "remote.access_denied";

/// A validated remote item and the URL it came from
#[derive(Debug, Clone)]
pub struct FetchedItem {
    pub item: RemoteItem,
    pub url: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RemoteFetchEngine {
    retry_count: u32,
}

impl Default for RemoteFetchEngine {
    fn default() -> Self {
        Self { retry_count: 3 }
    }
}

impl RemoteFetchEngine {
    pub fn new(retry_count: u32) -> Self {
        Self { retry_count }
    }

    /// Attempts per candidate URL for retryable failures
    pub fn retry_count(&self) -> u32 {
        self.retry_count.max(1)
    }

    /// Fetch `request.path` from the first candidate URL that yields valid content
    pub async fn fetch(
        &self,
        repository: &str,
        remote: &dyn RemoteSource,
        validators: &[Box<dyn ContentValidator>],
        health: Option<&HealthController>,
        request: &mut RetrievalRequest,
    ) -> Result<FetchedItem> {
        let path = request.path.clone();
        let urls = remote.candidate_urls(&path);
        let attempts = self.retry_count();

        let mut failures: Vec<SourceFailure> = Vec::new();
        let mut invalid: Option<RepoError> = None;

        'urls: for url in urls {
            if let Err(e) = remote.validate_url(&url) {
                tracing::debug!(repository, url = %url, error = %e, "skipping invalid remote URL");
                failures.push(SourceFailure::new(url, e));
                continue;
            }

            for attempt in 1..=attempts {
                match remote.fetch(&url, &path).await {
                    Ok(item) => match validate_all(validators, repository, &path, &item) {
                        Ok(None) => {
                            if !validators.is_empty() {
                                request.record(RepositoryEvent::ItemValidated {
                                    repository: repository.to_string(),
                                    path: path.clone(),
                                    url: url.clone(),
                                    passed: true,
                                });
                            }
                            return Ok(FetchedItem { item, url });
                        }
                        Ok(Some(rejected_by)) => {
                            request.record(RepositoryEvent::ItemValidated {
                                repository: repository.to_string(),
                                path: path.clone(),
                                url: url.clone(),
                                passed: false,
                            });
                            let reason = format!("rejected by {} validator", rejected_by);
                            tracing::warn!(repository, path = %path, url = %url, reason = %reason, "fetched content is invalid");
                            invalid = Some(content_invalid(repository, &path, &url, &reason));
                            failures.push(SourceFailure::new(
                                url.clone(),
                                content_invalid(repository, &path, &url, &reason),
                            ));
                            continue 'urls;
                        }
                        Err(e) => {
                            failures.push(SourceFailure::new(url, e));
                            continue 'urls;
                        }
                    },
                    Err(e) if e.is_not_found() => {
                        tracing::debug!(repository, path = %path, url = %url, "not found at remote");
                        failures.push(SourceFailure::new(url, e));
                        continue 'urls;
                    }
                    Err(e) if e.is_access_denied() => {
                        tracing::debug!(repository, path = %path, url = %url, "access denied by remote");
                        request.context.insert(CTX_ACCESS_DENIED, url.clone());
                        failures.push(SourceFailure::new(url, e));
                        continue 'urls;
                    }
                    Err(e @ RepoError::TransportFailure { .. }) => {
                        tracing::error!(repository, path = %path, url = %url, error = %e, "cannot reach remote");
                        if let Some(event) = health.and_then(|h| h.on_remote_failure(&e)) {
                            request.record(event);
                        }
                        return Err(e);
                    }
                    Err(e) => {
                        tracing::error!(
                            repository,
                            path = %path,
                            url = %url,
                            attempt,
                            attempts,
                            error = %e,
                            "remote fetch failed"
                        );
                        if attempt == attempts {
                            if let Some(event) = health.and_then(|h| h.on_remote_failure(&e)) {
                                request.record(event);
                            }
                            failures.push(SourceFailure::new(url, e));
                            continue 'urls;
                        }
                    }
                }
            }
        }

        if let Some(invalid) = invalid {
            return Err(invalid);
        }
        match failures.len() {
            0 => Err(RepoError::not_found(repository, &path, "no candidate remote URLs")),
            1 => Err(*failures.remove(0).error),
            _ => Err(RepoError::CompositeNotFound {
                repository: repository.to_string(),
                path: path.to_string(),
                failures,
            }),
        }
    }
}

fn content_invalid(repository: &str, path: &RepositoryPath, url: &str, reason: &str) -> RepoError {
    RepoError::ContentInvalid {
        repository: repository.to_string(),
        path: path.to_string(),
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
