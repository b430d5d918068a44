//! Retrieval requests
//!
//! A [`RetrievalRequest`] is created once per client call and threaded through
//! every repository the call reaches. Besides the target path and modifier
//! flags it carries request-scoped state: a free-form context map, the set of
//! repositories already processed (cascade guard for groups), the operation
//! identity used for lock reentrancy, and the events produced so far.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::event::RepositoryEvent;
use crate::path::RepositoryPath;

static NEXT_OPERATION: AtomicU64 = AtomicU64::new(1);

/// Identity of one logical operation
///
/// Path locks are reentrant per operation: nested acquisitions made on
/// behalf of the same request never block on each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    /// Allocate a fresh, process-unique operation id
    pub fn next() -> Self {
        Self(NEXT_OPERATION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Boolean request modifiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFlags {
    /// Never contact a remote origin
    pub local_only: bool,
    /// Skip the local cache and go straight to the origin
    pub remote_only: bool,
    /// Treat any local copy as expired
    pub as_expired: bool,
    /// On a group, answer from the group's own store only
    pub group_local_only: bool,
    /// On a group, skip the group's own store and ask members only
    pub group_members_only: bool,
    /// The request originates from an external client
    pub external: bool,
    /// Bulk describe request: member failures are not collected
    pub describe: bool,
}

/// Request-scoped context map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestContext(BTreeMap<String, serde_json::Value>);

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A single retrieval request
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Target path
    pub path: RepositoryPath,
    /// Modifiers
    pub flags: RequestFlags,
    /// Request-scoped context
    pub context: RequestContext,
    /// Repositories already visited by this request
    pub processed: HashSet<String>,
    /// Operation identity for lock reentrancy
    pub operation: OperationId,
    /// Overall deadline for the request
    pub deadline: Option<Duration>,
    /// Events produced while serving the request
    pub events: Vec<RepositoryEvent>,
}

impl RetrievalRequest {
    pub fn new(path: RepositoryPath) -> Self {
        Self {
            path,
            flags: RequestFlags::default(),
            context: RequestContext::new(),
            processed: HashSet::new(),
            operation: OperationId::next(),
            deadline: None,
            events: Vec::new(),
        }
    }

    pub fn with_flags(mut self, flags: RequestFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn local_only(mut self) -> Self {
        self.flags.local_only = true;
        self
    }

    pub fn remote_only(mut self) -> Self {
        self.flags.remote_only = true;
        self
    }

    pub fn as_expired(mut self) -> Self {
        self.flags.as_expired = true;
        self
    }

    pub fn external(mut self) -> Self {
        self.flags.external = true;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Derive a request for another path, sharing flags, context, processed
    /// set and operation identity
    pub fn for_path(&self, path: RepositoryPath) -> Self {
        Self {
            path,
            flags: self.flags,
            context: self.context.clone(),
            processed: self.processed.clone(),
            operation: self.operation,
            deadline: self.deadline,
            events: Vec::new(),
        }
    }

    /// Derive the request a group hands to one of its members
    ///
    /// Group-scoping flags apply to the group only and are cleared.
    pub fn member_request(&self) -> Self {
        let mut request = self.for_path(self.path.clone());
        request.flags.group_local_only = false;
        request.flags.group_members_only = false;
        request
    }

    /// Fold a derived request's state back into this one
    pub fn absorb(&mut self, other: RetrievalRequest) {
        self.processed.extend(other.processed);
        self.context = other.context;
        self.events.extend(other.events);
    }

    /// Whether `repository` was already visited
    pub fn is_processed(&self, repository: &str) -> bool {
        self.processed.contains(repository)
    }

    /// Record `repository` as visited, returns false if it already was
    pub fn mark_processed(&mut self, repository: &str) -> bool {
        self.processed.insert(repository.to_string())
    }

    pub fn record(&mut self, event: RepositoryEvent) {
        self.events.push(event);
    }

    /// Drain the events produced so far
    pub fn take_events(&mut self) -> Vec<RepositoryEvent> {
        std::mem::take(&mut self.events)
    }
}
