//! Display formatting for CLI output

use console::style;
use depot_core::{Item, RepositoryEvent};

/// One-line summary of an item
pub fn item_line(item: &Item) -> String {
    if item.is_collection() {
        format!("{:<10} {:>12}  {}", "dir", "-", style(format!("{}/", item.path)).blue())
    } else {
        format!(
            "{:<10} {:>12}  {}",
            "file",
            item.len(),
            item.path
        )
    }
}

pub fn item_json(item: &Item) -> serde_json::Value {
    serde_json::json!({
        "repository": item.repository_id,
        "path": item.path.as_str(),
        "kind": if item.is_collection() { "collection" } else { "file" },
        "size": item.len(),
        "created": item.created.to_rfc3339(),
        "modified": item.modified.to_rfc3339(),
        "remoteChecked": item.remote_checked.map(|t| t.to_rfc3339()),
        "lastRequested": item.last_requested.to_rfc3339(),
        "expired": item.expired,
        "remoteUrl": item.remote_url,
        "attributes": item.attributes,
    })
}

/// Human description of an event, printed on stderr
pub fn event_line(event: &RepositoryEvent) -> String {
    match event {
        RepositoryEvent::ItemRetrieved { repository, path } => {
            format!("served {} from {}", path, repository)
        }
        RepositoryEvent::ItemCached { repository, path, url } => {
            format!("cached {} in {} from {}", path, repository, url)
        }
        RepositoryEvent::ItemStored { repository, path, created } => {
            let verb = if *created { "created" } else { "updated" };
            format!("{} {} in {}", verb, path, repository)
        }
        RepositoryEvent::ItemDeleted { repository, path } => {
            format!("deleted {} from {}", path, repository)
        }
        RepositoryEvent::ItemValidated {
            repository,
            url,
            passed,
            ..
        } => {
            let verdict = if *passed { "passed" } else { "failed" };
            format!("{}: content from {} {} validation", repository, url, verdict)
        }
        RepositoryEvent::ProxyModeChanged {
            repository,
            old,
            new,
            cause,
        } => match cause {
            Some(cause) => format!("{}: proxy mode {} -> {} ({})", repository, old, new, cause),
            None => format!("{}: proxy mode {} -> {}", repository, old, new),
        },
        RepositoryEvent::CachesExpired { repository, path } => {
            format!("expired caches of {} under {}", repository, path)
        }
        RepositoryEvent::NotFoundCacheExpired { repository, path } => {
            format!("expired not-found cache of {} under {}", repository, path)
        }
        RepositoryEvent::UnusedItemsEvicted { repository, paths } => {
            format!("evicted {} item(s) from {}", paths.len(), repository)
        }
        RepositoryEvent::GroupMembersChanged { repository, members } => {
            format!("{} members: {}", repository, members.join(", "))
        }
    }
}

pub fn print_events(events: &[RepositoryEvent]) {
    for event in events {
        eprintln!("{} {}", style("•").dim(), event_line(event));
    }
}

pub fn success(message: impl std::fmt::Display) {
    println!("{} {}", style("✓").green().bold(), message);
}
