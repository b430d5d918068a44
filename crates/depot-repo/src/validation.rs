//! Content validation of fetched remote items
//!
//! Validators run after a byte-complete fetch and before the cache fill.
//! All registered validators must pass for an item to be accepted.

use depot_core::RepositoryPath;
use sha2::{Digest, Sha256};

use crate::config::ChecksumPolicy;
use crate::error::Result;
use crate::remote::RemoteItem;

/// Check run against freshly fetched content
pub trait ContentValidator: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(false)` rejects the content; `Err` aborts the attempt
    fn validate(&self, repository: &str, path: &RepositoryPath, item: &RemoteItem) -> Result<bool>;
}

/// Run every validator, stopping at the first rejection
///
/// Returns the name of the rejecting validator.
pub fn validate_all(
    validators: &[Box<dyn ContentValidator>],
    repository: &str,
    path: &RepositoryPath,
    item: &RemoteItem,
) -> Result<Option<String>> {
    for validator in validators {
        if !validator.validate(repository, path, item)? {
            return Ok(Some(validator.name().to_string()));
        }
    }
    Ok(None)
}

/// Compute SHA256 digest of data
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Check if two digests match (supports various formats)
pub fn digest_matches(expected: &str, actual: &str) -> bool {
    let normalize = |d: &str| {
        d.trim()
            .to_lowercase()
            .replace("sha256:", "")
            .replace("sha256-", "")
    };
    normalize(expected) == normalize(actual)
}

/// Compares content against the SHA-256 the origin advertised
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumValidator {
    policy: ChecksumPolicy,
}

impl ChecksumValidator {
    pub fn new(policy: ChecksumPolicy) -> Self {
        Self { policy }
    }
}

impl ContentValidator for ChecksumValidator {
    fn name(&self) -> &str {
        "checksum"
    }

    fn validate(&self, repository: &str, path: &RepositoryPath, item: &RemoteItem) -> Result<bool> {
        if self.policy == ChecksumPolicy::Ignore {
            return Ok(true);
        }
        let Some(expected) = item.sha256.as_deref() else {
            return Ok(true);
        };

        let actual = compute_digest(item.content.as_bytes());
        if digest_matches(expected, &actual) {
            return Ok(true);
        }

        match self.policy {
            ChecksumPolicy::Strict => {
                tracing::warn!(repository, path = %path, url = %item.url, expected, actual = %actual, "checksum mismatch, rejecting");
                Ok(false)
            }
            _ => {
                tracing::warn!(repository, path = %path, url = %item.url, expected, actual = %actual, "checksum mismatch");
                Ok(true)
            }
        }
    }
}

/// Rejects HTML pages served for non-HTML paths
///
/// Misconfigured origins and captive portals answer 200 with an error page.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTypeValidator;

impl FileTypeValidator {
    fn expects_html(path: &RepositoryPath) -> bool {
        let name = path.name().to_ascii_lowercase();
        name.ends_with(".html") || name.ends_with(".htm")
    }

    fn looks_like_html(bytes: &[u8]) -> bool {
        let start = bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(bytes.len());
        let head: Vec<u8> = bytes[start..]
            .iter()
            .take(15)
            .map(u8::to_ascii_lowercase)
            .collect();
        head.starts_with(b"<!doctype html") || head.starts_with(b"<html")
    }
}

impl ContentValidator for FileTypeValidator {
    fn name(&self) -> &str {
        "file-type"
    }

    fn validate(&self, repository: &str, path: &RepositoryPath, item: &RemoteItem) -> Result<bool> {
        if Self::expects_html(path) {
            return Ok(true);
        }
        let html_type = item
            .content_type
            .as_deref()
            .is_some_and(|t| t.to_ascii_lowercase().starts_with("text/html"));
        if html_type || Self::looks_like_html(item.content.as_bytes()) {
            tracing::debug!(repository, path = %path, url = %item.url, "HTML served for non-HTML path");
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> RepositoryPath {
        RepositoryPath::new(s).unwrap()
    }

    fn item(bytes: &str) -> RemoteItem {
        RemoteItem::new("https://repo.example.com/x", bytes)
    }

    #[test]
    fn test_digest_formats() {
        let digest = compute_digest(b"hello");
        assert!(digest.starts_with("sha256:"));
        let hex = digest.trim_start_matches("sha256:");
        assert!(digest_matches(hex, &digest));
        assert!(digest_matches(&format!("SHA256-{}", hex.to_uppercase()), &digest));
        assert!(!digest_matches("sha256:00", &digest));
    }

    #[test]
    fn test_checksum_policies() {
        let mut bad = item("payload");
        bad.sha256 = Some("sha256:deadbeef".to_string());
        let mut good = item("payload");
        good.sha256 = Some(compute_digest(b"payload"));
        let path = p("/lib.jar");

        let strict = ChecksumValidator::new(ChecksumPolicy::Strict);
        assert!(!strict.validate("r", &path, &bad).unwrap());
        assert!(strict.validate("r", &path, &good).unwrap());
        assert!(strict.validate("r", &path, &item("unadvertised")).unwrap());

        assert!(ChecksumValidator::new(ChecksumPolicy::Warn).validate("r", &path, &bad).unwrap());
        assert!(ChecksumValidator::new(ChecksumPolicy::Ignore).validate("r", &path, &bad).unwrap());
    }

    #[test]
    fn test_file_type_rejects_error_pages() {
        let validator = FileTypeValidator;
        let page = item("\n  <!DOCTYPE html><html><body>502</body></html>");

        assert!(!validator.validate("r", &p("/lib.jar"), &page).unwrap());
        assert!(validator.validate("r", &p("/index.html"), &page).unwrap());
        assert!(validator.validate("r", &p("/lib.jar"), &item("PK\u{3}\u{4}")).unwrap());

        let mut typed = item("binary");
        typed.content_type = Some("text/html; charset=utf-8".to_string());
        assert!(!validator.validate("r", &p("/lib.jar"), &typed).unwrap());
    }

    #[test]
    fn test_validate_all_names_the_rejecting_validator() {
        let validators: Vec<Box<dyn ContentValidator>> = vec![
            Box::new(ChecksumValidator::new(ChecksumPolicy::Strict)),
            Box::new(FileTypeValidator),
        ];
        let path = p("/lib.jar");
        assert_eq!(validate_all(&validators, "r", &path, &item("ok")).unwrap(), None);
        assert_eq!(
            validate_all(&validators, "r", &path, &item("<html>")).unwrap().as_deref(),
            Some("file-type")
        );
    }
}
