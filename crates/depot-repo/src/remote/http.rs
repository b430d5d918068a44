//! HTTP(S) remote origin
//!
//! Plain GET/HEAD against the primary origin and its mirrors. Redirects are
//! followed manually so credentials never leave the origin they were
//! configured for, and bodies are streamed and checked against
//! `Content-Length` so a truncated transfer is never cached.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::RepositoryPath;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::{Method, Response, StatusCode, header};
use std::time::Duration;
use url::Url;

use super::{RemoteItem, RemoteSource, join_url};
use crate::config::{ProxyConfig, RemoteAuth};
use crate::error::{RepoError, Result};

/// Header carrying the origin's SHA-256 of the content
const CHECKSUM_HEADER: &str = "X-Checksum-Sha256";

const MAX_REDIRECTS: u32 = 10;

/// Remote source speaking HTTP(S)
pub struct HttpRemote {
    repository: String,
    remote_url: String,
    mirrors: Vec<String>,
    client: reqwest::Client,
    auth: RwLock<Option<RemoteAuth>>,
}

impl HttpRemote {
    pub fn new(
        repository: impl Into<String>,
        remote_url: impl Into<String>,
        mirrors: Vec<String>,
        auth: Option<RemoteAuth>,
        connection_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connection_timeout)
            .user_agent(concat!("depot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RepoError::InvalidConfig {
                message: format!("Cannot build HTTP client: {}", e),
            })?;

        Ok(Self {
            repository: repository.into(),
            remote_url: remote_url.into(),
            mirrors,
            client,
            auth: RwLock::new(auth),
        })
    }

    /// Build from a proxy repository's settings
    pub fn from_config(repository: &str, config: &ProxyConfig) -> Result<Self> {
        Self::new(
            repository,
            config.remote_url.clone(),
            config.mirrors.clone(),
            config.auth.clone(),
            config.connection_timeout,
        )
    }

    fn same_origin(a: &str, b: &str) -> bool {
        match (Url::parse(a), Url::parse(b)) {
            (Ok(a), Ok(b)) => {
                a.scheme() == b.scheme()
                    && a.host() == b.host()
                    && a.port_or_known_default() == b.port_or_known_default()
            }
            _ => false,
        }
    }

    /// Send a request, following redirects without leaking credentials
    async fn send(&self, method: Method, url: &str, if_modified_since: Option<DateTime<Utc>>) -> Result<Response> {
        let mut current = url.to_string();
        let mut redirects = 0;

        loop {
            let mut request = self.client.request(method.clone(), &current);

            if Self::same_origin(&self.remote_url, &current) {
                if let Some(auth) = self.auth.read().as_ref() {
                    request = request.header(header::AUTHORIZATION, auth.header_value());
                }
            }
            if let Some(since) = if_modified_since {
                request = request.header(
                    header::IF_MODIFIED_SINCE,
                    since.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
                );
            }

            let response = request.send().await.map_err(|e| self.classify(e, &current))?;

            if !response.status().is_redirection() || response.status() == StatusCode::NOT_MODIFIED {
                return Ok(response);
            }

            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(RepoError::storage(
                    &self.repository,
                    format!("Too many redirects (max {}) from {}", MAX_REDIRECTS, url),
                ));
            }

            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    RepoError::storage(&self.repository, format!("Redirect without Location from {}", current))
                })?;
            let next = Url::parse(&current)?.join(location)?.to_string();
            if !Self::same_origin(&current, &next) {
                tracing::debug!(from = %current, to = %next, "cross-origin redirect, credentials not forwarded");
            }
            current = next;
        }
    }

    fn classify(&self, e: reqwest::Error, url: &str) -> RepoError {
        if e.is_connect() {
            RepoError::TransportFailure {
                repository: self.repository.clone(),
                url: url.to_string(),
                message: e.to_string(),
            }
        } else {
            RepoError::storage(&self.repository, format!("{}: {}", url, e))
        }
    }

    fn status_error(&self, status: StatusCode, url: &str, path: &RepositoryPath) -> RepoError {
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                RepoError::not_found(&self.repository, path, format!("{} from {}", status, url))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RepoError::AccessDenied {
                repository: self.repository.clone(),
                path: path.to_string(),
                reason: format!("{} from {}", status, url),
            },
            _ => RepoError::storage(&self.repository, format!("Unexpected {} from {}", status, url)),
        }
    }
}

fn header_str(response: &Response, name: impl header::AsHeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[async_trait]
impl RemoteSource for HttpRemote {
    fn candidate_urls(&self, path: &RepositoryPath) -> Vec<String> {
        std::iter::once(&self.remote_url)
            .chain(&self.mirrors)
            .map(|base| join_url(base, path))
            .collect()
    }

    async fn exists(&self, path: &RepositoryPath, since: Option<DateTime<Utc>>) -> Result<bool> {
        let url = join_url(&self.remote_url, path);
        let response = self.send(Method::HEAD, &url, since).await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED || status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(self.status_error(status, &url, path));
        }

        let last_modified = header_str(&response, header::LAST_MODIFIED)
            .as_deref()
            .and_then(parse_http_date);
        Ok(match (since, last_modified) {
            (Some(since), Some(modified)) => modified > since,
            _ => true,
        })
    }

    async fn fetch(&self, url: &str, path: &RepositoryPath) -> Result<RemoteItem> {
        let response = self.send(Method::GET, url, None).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status, url, path));
        }

        let expected = response.content_length();
        let last_modified = header_str(&response, header::LAST_MODIFIED)
            .as_deref()
            .and_then(parse_http_date);
        let content_type = header_str(&response, header::CONTENT_TYPE);
        let sha256 = header_str(&response, CHECKSUM_HEADER);

        let mut body = Vec::with_capacity(expected.unwrap_or(0).min(16 * 1024 * 1024) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.classify(e, url))?;
            body.extend_from_slice(&chunk);
        }

        if let Some(expected) = expected {
            if body.len() as u64 != expected {
                return Err(RepoError::storage(
                    &self.repository,
                    format!(
                        "Short read from {}: got {} of {} bytes",
                        url,
                        body.len(),
                        expected
                    ),
                ));
            }
        }

        tracing::debug!(repository = %self.repository, url, bytes = body.len(), "fetched remote content");
        Ok(RemoteItem {
            url: url.to_string(),
            content: body.into(),
            last_modified,
            content_type,
            sha256,
        })
    }

    async fn is_reachable(&self) -> Result<bool> {
        let url = join_url(&self.remote_url, &RepositoryPath::root());
        match self.send(Method::HEAD, &url, None).await {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    Err(self.status_error(status, &url, &RepositoryPath::root()))
                } else {
                    Ok(!status.is_server_error())
                }
            }
            Err(RepoError::TransportFailure { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn update_auth(&self, auth: Option<RemoteAuth>) {
        *self.auth.write() = auth;
    }

    fn remote_url(&self) -> &str {
        &self.remote_url
    }
}
