//! Job queue with pending-job deduplication
//!
//! For deduplicating kinds, a job whose dedup key is already pending is
//! dropped at enqueue time. The key is released when the pending job is
//! popped, so work enqueued while a job runs is queued again (at-least-once).

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::Result;
use crate::job::{Job, JobKind};

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteJobQueue;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// `true` if queued, `false` if it collapsed into a pending duplicate.
    async fn enqueue(&self, job: Job) -> Result<bool>;

    /// Number of jobs actually queued.
    async fn enqueue_batch(&self, jobs: Vec<Job>) -> Result<usize> {
        let mut queued = 0;
        for job in jobs {
            if self.enqueue(job).await? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Oldest job that is ready to run.
    async fn pop(&self) -> Result<Option<Job>>;

    async fn pending_count(&self) -> Result<usize>;

    /// Resolves when a job may have become available.
    async fn wait_for_job(&self) {}
}

/// Queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: usize,
    pub deduplicated: usize,
    pub popped: usize,
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    pending_keys: HashSet<String>,
    stats: QueueStats,
}

/// Process-local queue
#[derive(Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats.clone()
    }

    /// Snapshot of pending jobs in queue order.
    pub fn pending(&self) -> Vec<Job> {
        self.state.lock().jobs.iter().cloned().collect()
    }

    pub fn pending_of_kind(&self, kind: JobKind) -> Vec<Job> {
        self.state
            .lock()
            .jobs
            .iter()
            .filter(|j| j.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<bool> {
        {
            let mut state = self.state.lock();
            if let Some(key) = job.dedup_key() {
                if !state.pending_keys.insert(key) {
                    state.stats.deduplicated += 1;
                    debug!("Job {} ({} {}) collapsed into pending duplicate", job.id, job.kind, job.target);
                    return Ok(false);
                }
            }
            debug!("Enqueued job {} ({} {})", job.id, job.kind, job.target);
            state.jobs.push_back(job);
            state.stats.enqueued += 1;
        }
        self.notify.notify_one();
        Ok(true)
    }

    async fn pop(&self) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut state = self.state.lock();

        let Some(position) = state.jobs.iter().position(|j| j.is_ready(now)) else {
            return Ok(None);
        };
        let job = state.jobs.remove(position);
        if let Some(job) = &job {
            if let Some(key) = job.dedup_key() {
                state.pending_keys.remove(&key);
            }
            state.stats.popped += 1;
        }
        Ok(job)
    }

    async fn pending_count(&self) -> Result<usize> {
        Ok(self.state.lock().jobs.len())
    }

    async fn wait_for_job(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use transpage_storage::PageTitle;

    fn render(title: &str) -> Job {
        Job::render_translation_page(&PageTitle::new(title).unwrap())
    }

    #[tokio::test]
    async fn test_index_rebuild_collapses() {
        let queue = InMemoryJobQueue::new();

        for _ in 0..5 {
            queue.enqueue(Job::message_index_rebuild().unwrap()).await.unwrap();
        }

        assert_eq!(queue.pending_count().await.unwrap(), 1);
        assert_eq!(queue.stats().deduplicated, 4);
    }

    #[tokio::test]
    async fn test_concurrent_producers_collapse() {
        let queue = InMemoryJobQueue::new();

        let results = join_all((0..32).map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(Job::message_index_rebuild().unwrap()).await })
        }))
        .await;

        let queued = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(true))))
            .count();
        assert_eq!(queued, 1);
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_jobs_never_collapse() {
        let queue = InMemoryJobQueue::new();
        let page = PageTitle::new("Welcome").unwrap();

        queue.enqueue(Job::update_translatable_page(&page, &[])).await.unwrap();
        queue.enqueue(Job::update_translatable_page(&page, &[])).await.unwrap();

        assert_eq!(queue.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pop_releases_dedup_key() {
        let queue = InMemoryJobQueue::new();

        assert!(queue.enqueue(render("Welcome/fi")).await.unwrap());
        assert!(!queue.enqueue(render("Welcome/fi")).await.unwrap());

        let popped = queue.pop().await.unwrap().unwrap();
        assert_eq!(popped.target.as_str(), "Welcome/fi");

        // A render requested while the previous one runs is queued again
        assert!(queue.enqueue(render("Welcome/fi")).await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_counts_queued_only() {
        let queue = InMemoryJobQueue::new();
        let jobs = vec![render("Welcome/fi"), render("Welcome/de"), render("Welcome/fi")];

        assert_eq!(queue.enqueue_batch(jobs).await.unwrap(), 2);
        assert_eq!(queue.stats().enqueued, 2);
    }

    #[tokio::test]
    async fn test_pop_skips_jobs_in_backoff() {
        let queue = InMemoryJobQueue::new();
        let mut delayed = render("Welcome/fi");
        delayed.not_before = Some(Utc::now() + chrono::Duration::seconds(60));

        queue.enqueue(delayed).await.unwrap();
        queue.enqueue(render("Welcome/de")).await.unwrap();

        let popped = queue.pop().await.unwrap().unwrap();
        assert_eq!(popped.target.as_str(), "Welcome/de");
        assert!(queue.pop().await.unwrap().is_none());
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }
}
