//! SQLite-backed store
//!
//! Features:
//! - WAL mode for better concurrency
//! - Auto-recovery on corruption
//! - Item attributes kept as a JSON column, content as a BLOB

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use depot_core::{Attributes, Content, Item, ItemKind, RepositoryPath};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

use super::{Store, root_item};
use crate::error::{RepoError, Result};

/// Persistent store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store at default location
    pub fn open(name: &str) -> Result<Self> {
        let path = Self::default_path(name)?;
        Self::open_at(&path)
    }

    /// Open or create the store at specific path
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let result = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        );

        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Store corrupted, recreating: {}", e);
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                Connection::open(path)?
            }
        };

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    /// Default database path for a named store
    pub fn default_path(name: &str) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir().ok_or_else(|| RepoError::InvalidConfig {
            message: "Could not determine cache directory".to_string(),
        })?;
        Ok(cache_dir.join("depot").join(format!("{}.db", name)))
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                repository TEXT NOT NULL,
                path TEXT NOT NULL,
                parent TEXT,
                kind TEXT NOT NULL,
                created INTEGER NOT NULL,
                modified INTEGER NOT NULL,
                remote_checked INTEGER,
                last_requested INTEGER NOT NULL,
                expired INTEGER NOT NULL DEFAULT 0,
                remote_url TEXT,
                attributes TEXT NOT NULL DEFAULT '{}',
                content BLOB,
                PRIMARY KEY (repository, path)
            );

            CREATE INDEX IF NOT EXISTS idx_items_parent ON items(repository, parent);
            "#,
        )?;
        Ok(())
    }

    fn upsert(conn: &Connection, item: &Item) -> Result<()> {
        let attributes = serde_json::to_string(&item.attributes)?;
        let kind = match item.kind {
            ItemKind::File => "file",
            ItemKind::Collection => "collection",
        };
        conn.execute(
            r#"
            INSERT INTO items (repository, path, parent, kind, created, modified, remote_checked,
                               last_requested, expired, remote_url, attributes, content)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(repository, path) DO UPDATE SET
                kind = excluded.kind,
                modified = excluded.modified,
                remote_checked = excluded.remote_checked,
                last_requested = excluded.last_requested,
                expired = excluded.expired,
                remote_url = excluded.remote_url,
                attributes = excluded.attributes,
                content = excluded.content
            "#,
            params![
                item.repository_id,
                item.path.as_str(),
                item.path.parent().map(String::from),
                kind,
                item.created.timestamp_millis(),
                item.modified.timestamp_millis(),
                item.remote_checked.map(|t| t.timestamp_millis()),
                item.last_requested.timestamp_millis(),
                item.expired as i32,
                item.remote_url,
                attributes,
                item.content.as_ref().map(|c| c.as_bytes()),
            ],
        )?;
        Ok(())
    }

    fn ensure_parents(conn: &Connection, item: &Item) -> Result<()> {
        for parent in item.path.parents() {
            if parent.is_root() {
                continue;
            }
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM items WHERE repository = ?1 AND path = ?2",
                    params![item.repository_id, parent.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_some() {
                break;
            }
            Self::upsert(conn, &Item::collection(item.repository_id.clone(), parent))?;
        }
        Ok(())
    }
}

const COLUMNS: &str = "repository, path, kind, created, modified, remote_checked, last_requested, \
                       expired, remote_url, attributes, content";

fn millis(value: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(value).single().unwrap_or_default()
}

fn read_item(row: &Row<'_>) -> rusqlite::Result<Item> {
    let path: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let attributes: String = row.get(9)?;
    let content: Option<Vec<u8>> = row.get(10)?;
    Ok(Item {
        repository_id: row.get(0)?,
        path: RepositoryPath::new(&path).unwrap_or_default(),
        kind: if kind == "collection" {
            ItemKind::Collection
        } else {
            ItemKind::File
        },
        created: millis(row.get(3)?),
        modified: millis(row.get(4)?),
        remote_checked: row.get::<_, Option<i64>>(5)?.map(millis),
        last_requested: millis(row.get(6)?),
        expired: row.get::<_, i32>(7)? != 0,
        remote_url: row.get(8)?,
        attributes: serde_json::from_str::<Attributes>(&attributes).unwrap_or_default(),
        content: content.map(Content::from),
    })
}

fn like_prefix(path: &RepositoryPath) -> String {
    let escaped = path
        .as_str()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("{}/%", escaped)
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, repository: &str, path: &RepositoryPath) -> Result<Item> {
        let conn = self.conn.lock();
        let item = conn
            .query_row(
                &format!(
                    "SELECT {} FROM items WHERE repository = ?1 AND path = ?2",
                    COLUMNS
                ),
                params![repository, path.as_str()],
                read_item,
            )
            .optional()?;
        match item {
            Some(item) => Ok(item),
            None if path.is_root() => Ok(root_item(repository)),
            None => Err(RepoError::not_found(repository, path, "not in local storage")),
        }
    }

    async fn put(&self, item: &Item) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::ensure_parents(&tx, item)?;
        Self::upsert(&tx, item)?;
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, repository: &str, path: &RepositoryPath) -> Result<()> {
        let conn = self.conn.lock();
        if path.is_root() {
            conn.execute("DELETE FROM items WHERE repository = ?1", params![repository])?;
            return Ok(());
        }
        let removed = conn.execute(
            r"DELETE FROM items WHERE repository = ?1 AND (path = ?2 OR path LIKE ?3 ESCAPE '\')",
            params![repository, path.as_str(), like_prefix(path)],
        )?;
        if removed == 0 {
            return Err(RepoError::not_found(repository, path, "not in local storage"));
        }
        Ok(())
    }

    async fn delete_empty_collection(&self, repository: &str, path: &RepositoryPath) -> Result<bool> {
        if path.is_root() {
            return Ok(false);
        }
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM items WHERE repository = ?1 AND path = ?2 AND kind = 'collection' \
             AND NOT EXISTS (SELECT 1 FROM items WHERE repository = ?1 AND parent = ?2)",
            params![repository, path.as_str()],
        )?;
        Ok(removed > 0)
    }

    async fn list(&self, repository: &str, path: &RepositoryPath) -> Result<Vec<Item>> {
        let conn = self.conn.lock();
        if !path.is_root() {
            let kind: Option<String> = conn
                .query_row(
                    "SELECT kind FROM items WHERE repository = ?1 AND path = ?2",
                    params![repository, path.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            match kind.as_deref() {
                Some("collection") => {}
                Some(_) => return Err(RepoError::not_found(repository, path, "not a collection")),
                None => {
                    return Err(RepoError::not_found(repository, path, "not in local storage"));
                }
            }
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items WHERE repository = ?1 AND parent = ?2 ORDER BY path",
            COLUMNS
        ))?;
        let items = stmt
            .query_map(params![repository, path.as_str()], read_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::conformance;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_creates_parents() {
        conformance::put_creates_parents(&SqliteStore::open_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_list_direct_children() {
        conformance::list_direct_children(&SqliteStore::open_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_delete_subtree() {
        conformance::delete_subtree(&SqliteStore::open_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_delete_empty_collection() {
        conformance::delete_empty_collection_only(&SqliteStore::open_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_attributes_round_trip() {
        conformance::attributes_round_trip(&SqliteStore::open_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("stores").join("central.db");
        let path = RepositoryPath::new("/org/acme/lib.jar").unwrap();

        {
            let store = SqliteStore::open_at(&db).unwrap();
            store.put(&Item::file("central", path.clone(), "jar")).await.unwrap();
        }

        let store = SqliteStore::open_at(&db).unwrap();
        let item = store.get("central", &path).await.unwrap();
        assert_eq!(item.bytes(), b"jar");
        assert!(store.contains("central", &RepositoryPath::new("/org").unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_like_wildcards_are_literal() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .put(&Item::file("r", RepositoryPath::new("/a_b/x").unwrap(), "1"))
            .await
            .unwrap();
        store
            .put(&Item::file("r", RepositoryPath::new("/acb/x").unwrap(), "2"))
            .await
            .unwrap();

        store.delete("r", &RepositoryPath::new("/a_b").unwrap()).await.unwrap();
        assert!(store.contains("r", &RepositoryPath::new("/acb/x").unwrap()).await.unwrap());
    }
}
