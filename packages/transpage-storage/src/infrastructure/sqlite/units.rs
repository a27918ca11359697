//! SQLite unit store
//!
//! `unit_revision` is the append-only history, `unit_current` the latest
//! row per unit title. Marked sections are kept as one JSON array per page.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::Arc;

use super::open;
use crate::domain::{
    LanguageCode, PageTitle, RevisionId, TranslationUnit, UnitRecord, UnitRevision, UnitStore,
    UnitTitle,
};
use crate::{Result, StorageError};

#[derive(Clone)]
pub struct SqliteUnitStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUnitStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(open(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS unit_revision (
                rev_id INTEGER PRIMARY KEY AUTOINCREMENT,
                page TEXT NOT NULL,
                unit_id TEXT NOT NULL,
                language TEXT NOT NULL,
                text TEXT NOT NULL,
                fuzzy INTEGER NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_unit_revision_title
                ON unit_revision(page, unit_id, language, rev_id);
            CREATE TABLE IF NOT EXISTS unit_current (
                page TEXT NOT NULL,
                unit_id TEXT NOT NULL,
                language TEXT NOT NULL,
                text TEXT NOT NULL,
                fuzzy INTEGER NOT NULL,
                rev_id INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (page, unit_id, language)
            );
            CREATE TABLE IF NOT EXISTS unit_section (
                page TEXT PRIMARY KEY,
                units TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Append a revision and make it current.
fn write(tx: &Transaction<'_>, title: &UnitTitle, text: &str, fuzzy: bool) -> Result<RevisionId> {
    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO unit_revision (page, unit_id, language, text, fuzzy, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            title.page.as_str(),
            title.unit_id,
            title.language.as_str(),
            text,
            fuzzy,
            now
        ],
    )?;
    let rev_id = tx.last_insert_rowid();
    tx.execute(
        "INSERT OR REPLACE INTO unit_current
            (page, unit_id, language, text, fuzzy, rev_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            title.page.as_str(),
            title.unit_id,
            title.language.as_str(),
            text,
            fuzzy,
            rev_id,
            now
        ],
    )?;
    Ok(RevisionId(rev_id as u64))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::serialization(format!("Bad timestamp {:?}: {}", raw, e)))
}

/// Raw `unit_current` row: unit id, language, text, fuzzy, revision, updated at.
type CurrentRow = (String, String, String, bool, i64, String);

const CURRENT_COLUMNS: &str = "unit_id, language, text, fuzzy, rev_id, updated_at";

fn current_row(row: &Row<'_>) -> rusqlite::Result<CurrentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_record(page: &PageTitle, row: CurrentRow) -> Result<UnitRecord> {
    let (unit_id, language, text, fuzzy, rev_id, updated_at) = row;
    Ok(UnitRecord {
        title: UnitTitle::new(page.clone(), unit_id, LanguageCode::new(language)?),
        text,
        fuzzy,
        revision: RevisionId(rev_id as u64),
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait]
impl UnitStore for SqliteUnitStore {
    async fn update_unit(
        &self,
        title: &UnitTitle,
        text: &str,
        fuzzy: bool,
        source_language: &LanguageCode,
    ) -> Result<RevisionId> {
        let is_source = &title.language == source_language;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        // The definition itself is never fuzzy; the flag applies to its translations
        let revision = write(&tx, title, text, fuzzy && !is_source)?;

        if is_source && fuzzy {
            let stale = {
                let mut stmt = tx.prepare(
                    "SELECT language, text FROM unit_current
                     WHERE page = ?1 AND unit_id = ?2 AND language != ?3 AND fuzzy = 0",
                )?;
                let rows = stmt.query_map(
                    params![title.page.as_str(), title.unit_id, source_language.as_str()],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            for (language, text) in stale {
                let translation = UnitTitle::new(
                    title.page.clone(),
                    title.unit_id.clone(),
                    LanguageCode::new(language)?,
                );
                write(&tx, &translation, &text, true)?;
            }
        }

        tx.commit()?;
        Ok(revision)
    }

    async fn get_unit(&self, title: &UnitTitle) -> Result<Option<UnitRecord>> {
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!(
                    "SELECT {} FROM unit_current
                     WHERE page = ?1 AND unit_id = ?2 AND language = ?3",
                    CURRENT_COLUMNS
                ),
                params![title.page.as_str(), title.unit_id, title.language.as_str()],
                current_row,
            )
            .optional()?
        };
        row.map(|row| into_record(&title.page, row)).transpose()
    }

    async fn units_for_page(&self, page: &PageTitle) -> Result<Vec<UnitRecord>> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM unit_current WHERE page = ?1 ORDER BY unit_id, language",
                CURRENT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![page.as_str()], current_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        rows.into_iter().map(|row| into_record(page, row)).collect()
    }

    async fn unit_history(&self, title: &UnitTitle) -> Result<Vec<UnitRevision>> {
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT rev_id, text, fuzzy, timestamp FROM unit_revision
                 WHERE page = ?1 AND unit_id = ?2 AND language = ?3 ORDER BY rev_id",
            )?;
            let rows = stmt.query_map(
                params![title.page.as_str(), title.unit_id, title.language.as_str()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        rows.into_iter()
            .map(|(rev_id, text, fuzzy, timestamp)| {
                Ok(UnitRevision {
                    revision: RevisionId(rev_id as u64),
                    text,
                    fuzzy,
                    timestamp: parse_timestamp(&timestamp)?,
                })
            })
            .collect()
    }

    async fn save_sections(&self, page: &PageTitle, units: &[TranslationUnit]) -> Result<()> {
        let encoded = serde_json::to_string(units)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO unit_section (page, units) VALUES (?1, ?2)",
            params![page.as_str(), encoded],
        )?;
        Ok(())
    }

    async fn sections(&self, page: &PageTitle) -> Result<Vec<TranslationUnit>> {
        let encoded = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT units FROM unit_section WHERE page = ?1",
                params![page.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?
        };
        match encoded {
            Some(encoded) => Ok(serde_json::from_str(&encoded)?),
            None => Ok(Vec::new()),
        }
    }

    async fn remove_sections(&self, page: &PageTitle) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM unit_section WHERE page = ?1", params![page.as_str()])?;
        Ok(())
    }

    async fn move_units(&self, old: &PageTitle, new: &PageTitle) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "UPDATE OR REPLACE unit_section SET page = ?2 WHERE page = ?1",
            params![old.as_str(), new.as_str()],
        )?;
        // Moved units replace the history of same-named units on the new page
        tx.execute(
            "DELETE FROM unit_revision WHERE page = ?2 AND (unit_id, language) IN
                (SELECT unit_id, language FROM unit_current WHERE page = ?1)",
            params![old.as_str(), new.as_str()],
        )?;
        tx.execute(
            "UPDATE unit_revision SET page = ?2 WHERE page = ?1",
            params![old.as_str(), new.as_str()],
        )?;
        let moved = tx.execute(
            "UPDATE OR REPLACE unit_current SET page = ?2 WHERE page = ?1",
            params![old.as_str(), new.as_str()],
        )?;

        tx.commit()?;
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UnitChange;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn page(s: &str) -> PageTitle {
        PageTitle::new(s).unwrap()
    }

    fn lang(code: &str) -> LanguageCode {
        LanguageCode::new(code).unwrap()
    }

    #[tokio::test]
    async fn test_changed_source_makes_translations_fuzzy() {
        let store = SqliteUnitStore::in_memory().unwrap();
        let en = lang("en");
        let source = UnitTitle::new(page("Welcome"), "1", en.clone());
        let fi = UnitTitle::new(page("Welcome"), "1", lang("fi"));
        let de = UnitTitle::new(page("Welcome"), "1", lang("de"));

        store.update_unit(&source, "Hello", false, &en).await.unwrap();
        store.update_unit(&fi, "Hei", false, &en).await.unwrap();
        store.update_unit(&de, "Hallo", true, &en).await.unwrap();

        store.update_unit(&source, "Hello there", true, &en).await.unwrap();

        assert!(!store.get_unit(&source).await.unwrap().unwrap().fuzzy);
        let fi_record = store.get_unit(&fi).await.unwrap().unwrap();
        assert!(fi_record.fuzzy);
        assert_eq!(fi_record.text, "Hei");
        // Already fuzzy, not written again
        assert_eq!(store.unit_history(&de).await.unwrap().len(), 1);

        let history = store.unit_history(&fi).await.unwrap();
        assert_eq!(
            history.iter().map(|r| r.fuzzy).collect::<Vec<_>>(),
            vec![false, true]
        );
        assert_eq!(history[1].revision, fi_record.revision);
    }

    #[tokio::test]
    async fn test_sections_persist_across_connections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("units.db");
        let sections = vec![
            TranslationUnit::new("1", "Hello", UnitChange::New),
            TranslationUnit::new("2", "World", UnitChange::Changed).with_old_text("Earth"),
        ];

        {
            let store = SqliteUnitStore::new(&path).unwrap();
            store.save_sections(&page("Welcome"), &sections).await.unwrap();
        }

        let store = SqliteUnitStore::new(&path).unwrap();
        assert_eq!(store.sections(&page("Welcome")).await.unwrap(), sections);
        store.remove_sections(&page("Welcome")).await.unwrap();
        assert!(store.sections(&page("Welcome")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_move_units_carries_records_history_and_sections() {
        let store = SqliteUnitStore::in_memory().unwrap();
        let en = lang("en");
        let old = page("Old");
        let new = page("New");

        store
            .save_sections(&old, &[TranslationUnit::new("1", "Hello", UnitChange::New)])
            .await
            .unwrap();
        for (id, language, text) in [("1", "en", "Hello"), ("1", "fi", "Hei"), ("2", "en", "Bye")] {
            store
                .update_unit(&UnitTitle::new(old.clone(), id, lang(language)), text, false, &en)
                .await
                .unwrap();
        }
        store
            .update_unit(&UnitTitle::new(old.clone(), "1", lang("fi")), "Moi", false, &en)
            .await
            .unwrap();

        assert_eq!(store.move_units(&old, &new).await.unwrap(), 3);

        assert!(store.units_for_page(&old).await.unwrap().is_empty());
        assert!(store.sections(&old).await.unwrap().is_empty());
        assert_eq!(store.sections(&new).await.unwrap().len(), 1);

        let moved = store.units_for_page(&new).await.unwrap();
        assert_eq!(
            moved
                .iter()
                .map(|r| (r.title.unit_id.as_str(), r.title.language.as_str(), r.text.as_str()))
                .collect::<Vec<_>>(),
            vec![("1", "en", "Hello"), ("1", "fi", "Moi"), ("2", "en", "Bye")]
        );
        let history = store
            .unit_history(&UnitTitle::new(new.clone(), "1", lang("fi")))
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_move_without_sections_keeps_target_sections() {
        let store = SqliteUnitStore::in_memory().unwrap();
        let target = vec![TranslationUnit::new("9", "Kept", UnitChange::New)];
        store.save_sections(&page("New"), &target).await.unwrap();

        assert_eq!(store.move_units(&page("Old"), &page("New")).await.unwrap(), 0);
        assert_eq!(store.sections(&page("New")).await.unwrap(), target);
    }
}
