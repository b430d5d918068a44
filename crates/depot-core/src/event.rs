//! Domain events
//!
//! Operations that change repository state return the events they produced
//! instead of publishing them; dispatching is left to the caller.

use serde::{Deserialize, Serialize};

use crate::path::RepositoryPath;
use crate::repository::ProxyMode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RepositoryEvent {
    /// An item was served
    ItemRetrieved {
        repository: String,
        path: RepositoryPath,
    },
    /// A remote item was stored in the local cache
    ItemCached {
        repository: String,
        path: RepositoryPath,
        url: String,
    },
    /// An item was written through the store API
    ItemStored {
        repository: String,
        path: RepositoryPath,
        created: bool,
    },
    /// An item (or collection subtree) was deleted
    ItemDeleted {
        repository: String,
        path: RepositoryPath,
    },
    /// A fetched item passed or failed content validation
    ItemValidated {
        repository: String,
        path: RepositoryPath,
        url: String,
        passed: bool,
    },
    ProxyModeChanged {
        repository: String,
        old: ProxyMode,
        new: ProxyMode,
        cause: Option<String>,
    },
    CachesExpired {
        repository: String,
        path: RepositoryPath,
    },
    NotFoundCacheExpired {
        repository: String,
        path: RepositoryPath,
    },
    UnusedItemsEvicted {
        repository: String,
        paths: Vec<RepositoryPath>,
    },
    GroupMembersChanged {
        repository: String,
        members: Vec<String>,
    },
}

impl RepositoryEvent {
    /// Repository the event originated from
    pub fn repository(&self) -> &str {
        match self {
            RepositoryEvent::ItemRetrieved { repository, .. }
            | RepositoryEvent::ItemCached { repository, .. }
            | RepositoryEvent::ItemStored { repository, .. }
            | RepositoryEvent::ItemDeleted { repository, .. }
            | RepositoryEvent::ItemValidated { repository, .. }
            | RepositoryEvent::ProxyModeChanged { repository, .. }
            | RepositoryEvent::CachesExpired { repository, .. }
            | RepositoryEvent::NotFoundCacheExpired { repository, .. }
            | RepositoryEvent::UnusedItemsEvicted { repository, .. }
            | RepositoryEvent::GroupMembersChanged { repository, .. } => repository,
        }
    }
}
