//! Group resolution
//!
//! A group answers from its own store first, then asks its members in
//! declared order. Members already in the request's processed set are
//! skipped, which stops cascades through nested groups from visiting a
//! repository twice. Member failures are absorbed into a per-member failure
//! list and only surface, as `CompositeNotFound`, when no source answered.
//!
//! Membership changes are validated against the whole graph: a group may
//! never reach itself through nested groups.

use depot_core::{Item, RepositoryEvent, RetrievalRequest};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{RepoError, Result, SourceFailure};
use crate::repository::Repository;

/// Resolves member ids to repositories
pub trait MemberLookup: Send + Sync {
    fn lookup(&self, id: &str) -> Option<Arc<Repository>>;
}

/// Lookup that knows no repositories, for standalone repositories
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMembers;

impl MemberLookup for NoMembers {
    fn lookup(&self, _id: &str) -> Option<Arc<Repository>> {
        None
    }
}

/// The grouping capability of a repository
#[derive(Debug, Default)]
pub struct GroupFacet {
    members: RwLock<Vec<String>>,
}

impl GroupFacet {
    pub fn new(members: Vec<String>) -> Self {
        Self {
            members: RwLock::new(members),
        }
    }

    /// Member ids in precedence order
    pub fn members(&self) -> Vec<String> {
        self.members.read().clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.read().iter().any(|m| m == id)
    }

    fn replace(&self, members: Vec<String>) {
        *self.members.write() = members;
    }

    fn remove(&self, id: &str) -> bool {
        let mut members = self.members.write();
        let before = members.len();
        members.retain(|m| m != id);
        members.len() != before
    }
}

fn resolve_member(group: &Repository, id: &str, lookup: &dyn MemberLookup) -> Option<Arc<Repository>> {
    let member = lookup.lookup(id);
    if member.is_none() {
        tracing::warn!(group = group.id(), member = id, "group member does not exist, skipping");
    }
    member
}

fn record_failure(
    group: &Repository,
    request: &RetrievalRequest,
    failures: &mut Vec<SourceFailure>,
    member: &str,
    error: RepoError,
) {
    tracing::debug!(group = group.id(), member, path = %request.path, error = %error, "member failed");
    if !request.flags.describe {
        failures.push(SourceFailure::new(member, error));
    }
}

fn composite(group: &Repository, request: &RetrievalRequest, failures: Vec<SourceFailure>) -> RepoError {
    RepoError::CompositeNotFound {
        repository: group.id().to_string(),
        path: request.path.to_string(),
        failures,
    }
}

pub(crate) async fn retrieve(
    group: &Repository,
    facet: &GroupFacet,
    request: &mut RetrievalRequest,
    lookup: &dyn MemberLookup,
) -> Result<Item> {
    if !request.flags.group_members_only {
        match group.retrieve_local(request).await {
            Ok(item) => return Ok(item),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    if request.flags.group_local_only {
        return Err(RepoError::not_found(
            group.id(),
            &request.path,
            "group-local-only request",
        ));
    }

    let mut failures = Vec::new();
    for member_id in facet.members() {
        if request.is_processed(&member_id) {
            continue;
        }
        let Some(member) = resolve_member(group, &member_id, lookup) else {
            continue;
        };

        let mut sub = request.member_request();
        let result = member.retrieve(&mut sub, lookup).await;
        request.absorb(sub);

        match result {
            Ok(item) if item.is_collection() => return Ok(item.rehomed(group.id())),
            Ok(item) => return Ok(item),
            Err(e) if e.is_member_recoverable() => {
                record_failure(group, request, &mut failures, &member_id, e)
            }
            Err(e) => return Err(e),
        }
    }

    Err(composite(group, request, failures))
}

/// Union of the group's own listing and its members', first seen wins
pub(crate) async fn list(
    group: &Repository,
    facet: &GroupFacet,
    request: &mut RetrievalRequest,
    lookup: &dyn MemberLookup,
) -> Result<Vec<Item>> {
    let mut items: Vec<Item> = Vec::new();
    let mut seen = HashSet::new();
    let mut answered = false;
    let mut failures = Vec::new();

    if !request.flags.group_members_only {
        match group.list_local(request).await {
            Ok(local) => {
                answered = true;
                for item in local {
                    if seen.insert(item.path.clone()) {
                        items.push(item);
                    }
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    if !request.flags.group_local_only {
        for member_id in facet.members() {
            if request.is_processed(&member_id) {
                continue;
            }
            let Some(member) = resolve_member(group, &member_id, lookup) else {
                continue;
            };

            let mut sub = request.member_request();
            let result = member.list_items(&mut sub, lookup).await;
            request.absorb(sub);

            match result {
                Ok(listed) => {
                    answered = true;
                    for item in listed {
                        if seen.insert(item.path.clone()) {
                            items.push(item.rehomed(group.id()));
                        }
                    }
                }
                Err(e) if e.is_member_recoverable() => {
                    record_failure(group, request, &mut failures, &member_id, e)
                }
                Err(e) => return Err(e),
            }
        }
    }

    if answered {
        Ok(items)
    } else {
        Err(composite(group, request, failures))
    }
}

/// Every member's copy of `request.path`, in member order
///
/// Used by callers merging metadata across members. A storage failure in
/// any member aborts the whole operation.
pub fn retrieve_all<'a>(
    group: &'a Repository,
    request: &'a mut RetrievalRequest,
    lookup: &'a dyn MemberLookup,
) -> BoxFuture<'a, Result<Vec<Item>>> {
    async move {
        let facet = group.group().ok_or_else(|| {
            RepoError::illegal(group.id(), &request.path, "not a group repository")
        })?;
        group.ensure_in_service()?;
        request.mark_processed(group.id());

        let mut items = Vec::new();
        let mut failures = Vec::new();

        if !request.flags.group_members_only {
            match group.retrieve_local(request).await {
                Ok(item) => items.push(item),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        if !request.flags.group_local_only {
            for member_id in facet.members() {
                if request.is_processed(&member_id) {
                    continue;
                }
                let Some(member) = resolve_member(group, &member_id, lookup) else {
                    continue;
                };

                let mut sub = request.member_request();
                let result = if member.group().is_some() {
                    retrieve_all(&member, &mut sub, lookup).await
                } else {
                    member.retrieve(&mut sub, lookup).await.map(|item| vec![item])
                };
                request.absorb(sub);

                match result {
                    Ok(found) => items.extend(found),
                    Err(e @ RepoError::StorageFailure { .. }) => return Err(e),
                    Err(e) if e.is_member_recoverable() => {
                        record_failure(group, request, &mut failures, &member_id, e)
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if items.is_empty() {
            Err(composite(group, request, failures))
        } else {
            Ok(items)
        }
    }
    .boxed()
}

/// Search `from`'s nested groups for `target`, recording the chain
fn reaches(
    target: &str,
    from: &Repository,
    lookup: &dyn MemberLookup,
    visited: &mut HashSet<String>,
    chain: &mut Vec<String>,
) -> bool {
    if !visited.insert(from.id().to_string()) {
        return false;
    }
    chain.push(from.id().to_string());
    if from.id() == target {
        return true;
    }
    if let Some(facet) = from.group() {
        for member_id in facet.members() {
            if member_id == target {
                chain.push(member_id);
                return true;
            }
            if let Some(member) = lookup.lookup(&member_id) {
                if member.group().is_some() && reaches(target, &member, lookup, visited, chain) {
                    return true;
                }
            }
        }
    }
    chain.pop();
    false
}

/// Check that `member_id` may join `group`
pub fn validate_member(group: &Repository, member_id: &str, lookup: &dyn MemberLookup) -> Result<()> {
    let member = lookup
        .lookup(member_id)
        .ok_or_else(|| RepoError::NoSuchRepository {
            repository: member_id.to_string(),
        })?;

    let mut chain = Vec::new();
    if reaches(group.id(), &member, lookup, &mut HashSet::new(), &mut chain) {
        return Err(RepoError::CyclicGrouping {
            group: group.id().to_string(),
            member: member_id.to_string(),
            chain: chain.join(" -> "),
        });
    }

    if member.format() != group.format() {
        return Err(RepoError::IncompatibleMember {
            group: group.id().to_string(),
            member: member_id.to_string(),
            reason: format!(
                "format {} does not match group format {}",
                member.format(),
                group.format()
            ),
        });
    }
    Ok(())
}

fn facet_of(group: &Repository) -> Result<&GroupFacet> {
    group.group().ok_or_else(|| RepoError::InvalidConfig {
        message: format!("Repository '{}' is not a group", group.id()),
    })
}

/// Replace the member list; on any invalid member the list is left unchanged
pub fn set_members(
    group: &Repository,
    members: Vec<String>,
    lookup: &dyn MemberLookup,
) -> Result<RepositoryEvent> {
    let facet = facet_of(group)?;
    let mut unique = HashSet::new();
    for member in &members {
        if !unique.insert(member.as_str()) {
            return Err(RepoError::InvalidConfig {
                message: format!("Member '{}' listed twice in group '{}'", member, group.id()),
            });
        }
        validate_member(group, member, lookup)?;
    }

    facet.replace(members.clone());
    tracing::info!(group = group.id(), ?members, "group members changed");
    Ok(RepositoryEvent::GroupMembersChanged {
        repository: group.id().to_string(),
        members,
    })
}

/// Append a member
pub fn add_member(group: &Repository, member_id: &str, lookup: &dyn MemberLookup) -> Result<RepositoryEvent> {
    let facet = facet_of(group)?;
    let mut members = facet.members();
    if members.iter().any(|m| m == member_id) {
        return Ok(RepositoryEvent::GroupMembersChanged {
            repository: group.id().to_string(),
            members,
        });
    }
    members.push(member_id.to_string());
    set_members(group, members, lookup)
}

/// Drop a member if present
pub fn remove_member(group: &Repository, member_id: &str) -> Option<RepositoryEvent> {
    let facet = group.group()?;
    if !facet.remove(member_id) {
        return None;
    }
    Some(RepositoryEvent::GroupMembersChanged {
        repository: group.id().to_string(),
        members: facet.members(),
    })
}

/// Flattened, de-duplicated list of the non-group repositories reachable
/// from `group`
pub fn transitive_members(group: &Repository, lookup: &dyn MemberLookup) -> Vec<String> {
    fn collect(
        repo: &Repository,
        lookup: &dyn MemberLookup,
        visited: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) {
        let Some(facet) = repo.group() else {
            return;
        };
        for member_id in facet.members() {
            if !visited.insert(member_id.clone()) {
                continue;
            }
            match lookup.lookup(&member_id) {
                Some(member) if member.group().is_some() => collect(&member, lookup, visited, out),
                Some(_) => out.push(member_id),
                None => {}
            }
        }
    }

    let mut visited = HashSet::from([group.id().to_string()]);
    let mut out = Vec::new();
    collect(group, lookup, &mut visited, &mut out);
    out
}
