//! SQLite page store
//!
//! Every edit appends a row to `page_revision`; the row id is the revision.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::open;
use crate::domain::{DocumentStore, LanguageCode, PageTitle, RevisionId};
use crate::Result;

#[derive(Clone)]
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocumentStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(open(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS page_revision (
                rev_id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                text TEXT NOT NULL,
                editor TEXT NOT NULL,
                summary TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_page_revision_title ON page_revision(title, rev_id);
            CREATE TABLE IF NOT EXISTS page_language (
                title TEXT PRIMARY KEY,
                language TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn set_page_language(&self, title: &PageTitle, language: &LanguageCode) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO page_language (title, language) VALUES (?1, ?2)",
            params![title.as_str(), language.as_str()],
        )?;
        Ok(())
    }

    /// Editor and summary of the latest revision.
    pub fn last_edit(&self, title: &PageTitle) -> Result<Option<(String, String)>> {
        let conn = self.conn.lock();
        let edit = conn
            .query_row(
                "SELECT editor, summary FROM page_revision
                 WHERE title = ?1 ORDER BY rev_id DESC LIMIT 1",
                params![title.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(edit)
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get_content(&self, title: &PageTitle) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let text = conn
            .query_row(
                "SELECT text FROM page_revision WHERE title = ?1 ORDER BY rev_id DESC LIMIT 1",
                params![title.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(text)
    }

    async fn update_content(
        &self,
        title: &PageTitle,
        text: &str,
        editor: &str,
        summary: &str,
    ) -> Result<RevisionId> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO page_revision (title, text, editor, summary, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![title.as_str(), text, editor, summary, Utc::now().to_rfc3339()],
        )?;
        Ok(RevisionId(conn.last_insert_rowid() as u64))
    }

    async fn wait_for_replication(&self, _timeout: Duration) -> Result<bool> {
        // Single database file, nothing to wait for
        Ok(true)
    }

    async fn subpages(&self, title: &PageTitle) -> Result<Vec<PageTitle>> {
        let prefix = format!("{}/", title);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT title FROM page_revision
             WHERE substr(title, 1, ?2) = ?1 ORDER BY title",
        )?;
        let rows = stmt.query_map(
            params![prefix, prefix.chars().count() as i64],
            |row| row.get::<_, String>(0),
        )?;

        let mut pages = Vec::new();
        for row in rows {
            let candidate = PageTitle::new(row?)?;
            if title.is_parent_of(&candidate) {
                pages.push(candidate);
            }
        }
        Ok(pages)
    }

    async fn page_language(&self, title: &PageTitle) -> Result<Option<LanguageCode>> {
        let conn = self.conn.lock();
        let language = conn
            .query_row(
                "SELECT language FROM page_language WHERE title = ?1",
                params![title.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        language.map(LanguageCode::new).transpose()
    }

    async fn purge(&self, title: &PageTitle) -> Result<()> {
        // Rendered output is read straight from the table; there is no cache to drop
        debug!("Purge of {} is a no-op for SQLite pages", title);
        Ok(())
    }
}
