//! Job queue in a SQLite table
//!
//! Producers and workers in different processes share one database file.
//! Dedup keys are a unique column, so a duplicate insert is ignored. A
//! popped row is deleted in the same transaction that selects it.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use transpage_storage::infrastructure::sqlite::open;

use super::JobQueue;
use crate::error::Result;
use crate::job::Job;

#[derive(Clone)]
pub struct SqliteJobQueue {
    conn: Arc<Mutex<Connection>>,
    // Wakes workers of this process only; others notice on their next poll
    notify: Arc<Notify>,
}

impl SqliteJobQueue {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_connection(open(db_path)?)?)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(transpage_storage::StorageError::from)?;
        Ok(Self::from_connection(conn)?)
    }

    fn from_connection(conn: Connection) -> transpage_storage::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS job (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                kind TEXT NOT NULL,
                dedup_key TEXT UNIQUE,
                not_before INTEGER,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_job_kind ON job(kind, seq);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            notify: Arc::new(Notify::new()),
        })
    }

    fn insert(&self, job: &Job) -> transpage_storage::Result<bool> {
        let payload = serde_json::to_string(job)?;
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO job (id, kind, dedup_key, not_before, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                job.id.to_string(),
                job.kind.as_str(),
                job.dedup_key(),
                job.not_before.map(|t| t.timestamp_millis()),
                payload
            ],
        )?;
        Ok(inserted > 0)
    }

    fn take_ready(&self) -> transpage_storage::Result<Option<String>> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let row = tx
            .query_row(
                "SELECT seq, payload FROM job
                 WHERE not_before IS NULL OR not_before <= ?1
                 ORDER BY seq LIMIT 1",
                params![now],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((seq, payload)) = row else {
            return Ok(None);
        };
        tx.execute("DELETE FROM job WHERE seq = ?1", params![seq])?;
        tx.commit()?;
        Ok(Some(payload))
    }

    fn count(&self) -> transpage_storage::Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM job", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: Job) -> Result<bool> {
        if !self.insert(&job)? {
            debug!("Job {} ({} {}) collapsed into pending duplicate", job.id, job.kind, job.target);
            return Ok(false);
        }
        debug!("Enqueued job {} ({} {})", job.id, job.kind, job.target);
        self.notify.notify_one();
        Ok(true)
    }

    async fn pop(&self) -> Result<Option<Job>> {
        match self.take_ready()? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn pending_count(&self) -> Result<usize> {
        Ok(self.count()?)
    }

    async fn wait_for_job(&self) {
        self.notify.notified().await;
    }
}
