//! SQLite adapters
//!
//! One connection per store behind a mutex; several stores may share one
//! database file. `preload` fills the metadata read cache so that the
//! aggregate-group scan during a page move costs one query.

mod documents;
mod units;

pub use documents::SqliteDocumentStore;
pub use units::SqliteUnitStore;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::{
    GroupId, MetadataKey, MetadataStore, PageTitle, RevTag, RevTagStore, RevisionId,
};
use crate::Result;

/// Open a database file shared with other stores and processes.
pub fn open(db_path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

// ═══════════════════════════════════════════════════════════════════════════
// Metadata store
// ═══════════════════════════════════════════════════════════════════════════

/// `translate_metadata(group_id, key, value)` table.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
    // `None` caches a confirmed absence
    cache: Arc<DashMap<(GroupId, MetadataKey), Option<String>>>,
}

impl SqliteMetadataStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(open(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            cache: Arc::new(DashMap::new()),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS translate_metadata (
                group_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (group_id, key)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_metadata_key ON translate_metadata(key)",
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get(&self, group: &GroupId, key: MetadataKey) -> Result<Option<String>> {
        let cache_key = (group.clone(), key);
        if let Some(cached) = self.cache.get(&cache_key) {
            return Ok(cached.value().clone());
        }

        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM translate_metadata WHERE group_id = ?1 AND key = ?2",
                params![group.as_str(), key.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set(&self, group: &GroupId, key: MetadataKey, value: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        match value {
            Some(v) => {
                conn.execute(
                    "INSERT OR REPLACE INTO translate_metadata (group_id, key, value)
                     VALUES (?1, ?2, ?3)",
                    params![group.as_str(), key.as_str(), v],
                )?;
            }
            None => {
                conn.execute(
                    "DELETE FROM translate_metadata WHERE group_id = ?1 AND key = ?2",
                    params![group.as_str(), key.as_str()],
                )?;
            }
        }
        self.cache.remove(&(group.clone(), key));
        Ok(())
    }

    async fn groups_with_key(&self, key: MetadataKey) -> Result<Vec<(GroupId, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT group_id, value FROM translate_metadata WHERE key = ?1 ORDER BY group_id",
        )?;
        let rows = stmt.query_map(params![key.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut groups = Vec::new();
        for row in rows {
            let (group, value) = row?;
            groups.push((GroupId::new(group)?, value));
        }
        Ok(groups)
    }

    async fn preload(&self, groups: &[GroupId]) -> Result<()> {
        if groups.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock();
        let placeholders = vec!["?"; groups.len()].join(", ");
        let sql = format!(
            "SELECT group_id, key, value FROM translate_metadata WHERE group_id IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(groups.iter().map(GroupId::as_str)),
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )?;

        // Absence is cached too, so every key of every group is answered
        for group in groups {
            for key in MetadataKey::TRANSLATABLE_PAGE_KEYS
                .iter()
                .chain([MetadataKey::Priority, MetadataKey::Subgroups].iter())
            {
                self.cache.insert((group.clone(), *key), None);
            }
        }
        let mut loaded = 0usize;
        for row in rows {
            let (group, key, value) = row?;
            self.cache
                .insert((GroupId::new(group)?, MetadataKey::from_str(&key)?), Some(value));
            loaded += 1;
        }

        debug!("Preloaded {} metadata rows for {} groups", loaded, groups.len());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Revision tag store
// ═══════════════════════════════════════════════════════════════════════════

/// `revtag(page, tag, revision)` table.
#[derive(Clone)]
pub struct SqliteRevTagStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRevTagStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(open(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS revtag (
                page TEXT NOT NULL,
                tag TEXT NOT NULL,
                revision INTEGER NOT NULL,
                PRIMARY KEY (page, tag, revision)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_revtag_tag ON revtag(tag, page)",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl RevTagStore for SqliteRevTagStore {
    async fn add_tag(&self, page: &PageTitle, tag: RevTag, revision: RevisionId) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO revtag (page, tag, revision) VALUES (?1, ?2, ?3)",
            params![page.as_str(), tag.as_str(), revision.0 as i64],
        )?;
        Ok(())
    }

    async fn remove_tags(&self, page: &PageTitle, tags: &[RevTag]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for tag in tags {
            tx.execute(
                "DELETE FROM revtag WHERE page = ?1 AND tag = ?2",
                params![page.as_str(), tag.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn latest_revision(&self, page: &PageTitle, tag: RevTag) -> Result<Option<RevisionId>> {
        let conn = self.conn.lock();
        let revision: Option<i64> = conn.query_row(
            "SELECT MAX(revision) FROM revtag WHERE page = ?1 AND tag = ?2",
            params![page.as_str(), tag.as_str()],
            |row| row.get(0),
        )?;
        Ok(revision.map(|r| RevisionId(r as u64)))
    }

    async fn pages_with_tag(&self, tag: RevTag) -> Result<Vec<PageTitle>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT page FROM revtag WHERE tag = ?1 ORDER BY page")?;
        let rows = stmt.query_map(params![tag.as_str()], |row| row.get::<_, String>(0))?;

        let mut pages = Vec::new();
        for row in rows {
            pages.push(PageTitle::new(row?)?);
        }
        Ok(pages)
    }

    async fn move_tags(&self, old: &PageTitle, new: &PageTitle) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE OR IGNORE revtag SET page = ?2 WHERE page = ?1",
            params![old.as_str(), new.as_str()],
        )?;
        // Rows that collided with existing ones on the new page
        conn.execute("DELETE FROM revtag WHERE page = ?1", params![old.as_str()])?;
        Ok(())
    }
}
