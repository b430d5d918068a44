//! Cached item freshness
//!
//! [`evaluate`] decides whether a cached item may be served without asking
//! the origin again. It is a pure function of the item, the repository's
//! aging policy, the current invalidation token and the clock, except that
//! a token mismatch marks the item expired and re-tags it with the current
//! token so the caller can persist the change.

use chrono::{DateTime, Utc};
use depot_core::Item;

/// Aging settings of a proxy repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgingPolicy {
    /// When false every cached item is revalidated
    pub aging_active: bool,
    /// Minutes an item is trusted after its last remote check, negative = forever
    pub max_age_minutes: i64,
}

impl Default for AgingPolicy {
    fn default() -> Self {
        Self {
            aging_active: true,
            max_age_minutes: 1440,
        }
    }
}

/// Why an item needs revalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// Stored token differs from the repository's current token
    TokenMismatch,
    Expired,
    AgingDisabled,
    MaxAgeReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale(StaleReason),
}

impl Freshness {
    pub fn is_stale(self) -> bool {
        matches!(self, Freshness::Stale(_))
    }

    /// Whether evaluation changed the item's stored state
    pub fn item_modified(self) -> bool {
        matches!(self, Freshness::Stale(StaleReason::TokenMismatch))
    }
}

pub fn evaluate(
    item: &mut Item,
    policy: &AgingPolicy,
    current_token: Option<&str>,
    now: DateTime<Utc>,
) -> Freshness {
    if let Some(token) = current_token {
        if item.invalidation_token() != Some(token) {
            item.expired = true;
            item.set_invalidation_token(token);
            return Freshness::Stale(StaleReason::TokenMismatch);
        }
    }

    if item.expired {
        return Freshness::Stale(StaleReason::Expired);
    }

    if !policy.aging_active {
        return Freshness::Stale(StaleReason::AgingDisabled);
    }

    if item.is_collection() || policy.max_age_minutes < 0 {
        return Freshness::Fresh;
    }

    let Some(checked) = item.remote_checked else {
        return Freshness::Stale(StaleReason::MaxAgeReached);
    };

    let age_ms = now.signed_duration_since(checked).num_milliseconds();
    if age_ms >= policy.max_age_minutes.saturating_mul(60_000) {
        Freshness::Stale(StaleReason::MaxAgeReached)
    } else {
        Freshness::Fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use depot_core::RepositoryPath;

    fn cached(minutes_ago: i64, now: DateTime<Utc>) -> Item {
        Item::file("central", RepositoryPath::new("/a.jar").unwrap(), "x")
            .with_remote_checked(now - Duration::minutes(minutes_ago))
    }

    #[test]
    fn test_max_age_is_inclusive() {
        let now = Utc::now();
        let policy = AgingPolicy {
            aging_active: true,
            max_age_minutes: 10,
        };

        let mut fresh = cached(9, now);
        assert_eq!(evaluate(&mut fresh, &policy, None, now), Freshness::Fresh);

        let mut boundary = cached(10, now);
        assert_eq!(
            evaluate(&mut boundary, &policy, None, now),
            Freshness::Stale(StaleReason::MaxAgeReached)
        );
    }

    #[test]
    fn test_negative_max_age_never_stale() {
        let now = Utc::now();
        let policy = AgingPolicy {
            aging_active: true,
            max_age_minutes: -1,
        };
        let mut ancient = cached(10_000_000, now);
        assert_eq!(evaluate(&mut ancient, &policy, None, now), Freshness::Fresh);

        let mut never_checked = Item::file("central", RepositoryPath::new("/b").unwrap(), "x");
        assert_eq!(
            evaluate(&mut never_checked, &policy, None, now),
            Freshness::Fresh
        );
    }

    #[test]
    fn test_expired_flag_always_stale() {
        let now = Utc::now();
        let policy = AgingPolicy {
            aging_active: true,
            max_age_minutes: -1,
        };
        let mut item = cached(0, now);
        item.expired = true;
        assert_eq!(
            evaluate(&mut item, &policy, None, now),
            Freshness::Stale(StaleReason::Expired)
        );
    }

    #[test]
    fn test_collections_never_stale_by_age() {
        let now = Utc::now();
        let policy = AgingPolicy {
            aging_active: true,
            max_age_minutes: 0,
        };
        let mut collection = Item::collection("central", RepositoryPath::new("/org").unwrap());
        assert_eq!(
            evaluate(&mut collection, &policy, None, now),
            Freshness::Fresh
        );
    }

    #[test]
    fn test_aging_disabled_always_stale() {
        let now = Utc::now();
        let policy = AgingPolicy {
            aging_active: false,
            max_age_minutes: -1,
        };
        let mut item = cached(0, now);
        assert_eq!(
            evaluate(&mut item, &policy, None, now),
            Freshness::Stale(StaleReason::AgingDisabled)
        );
    }

    #[test]
    fn test_token_mismatch_marks_and_retags() {
        let now = Utc::now();
        let policy = AgingPolicy {
            aging_active: true,
            max_age_minutes: -1,
        };
        let mut item = cached(0, now);
        item.set_invalidation_token("1");

        let verdict = evaluate(&mut item, &policy, Some("2"), now);
        assert_eq!(verdict, Freshness::Stale(StaleReason::TokenMismatch));
        assert!(verdict.item_modified());
        assert!(item.expired);
        assert_eq!(item.invalidation_token(), Some("2"));

        // re-tagged but still expired until refreshed
        assert_eq!(
            evaluate(&mut item, &policy, Some("2"), now),
            Freshness::Stale(StaleReason::Expired)
        );
    }

    #[test]
    fn test_untagged_item_is_stale_once_a_token_exists() {
        let now = Utc::now();
        let mut item = cached(0, now);
        assert!(evaluate(&mut item, &AgingPolicy::default(), Some("7"), now).is_stale());
    }
}
