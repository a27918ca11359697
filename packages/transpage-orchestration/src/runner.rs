//! Job runtime: handler registry and worker loop
//!
//! Execution is at-least-once. A failed job with a transient error is put
//! back on the queue with a backoff; handlers must be safe to repeat.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::job::{Job, JobKind, JobState, JobStateMachine};
use crate::queue::JobQueue;
use crate::stats::StatsAggregator;

/// Job handler trait (one per job kind)
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn run(&self, job: &Job) -> Result<()>;
}

/// Runner counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub completed: usize,
    pub failed: usize,
    pub retried: usize,
}

pub struct JobRunner {
    queue: Arc<dyn JobQueue>,
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    worker_id: String,
    max_attempts: u32,
    poll_interval: Duration,
    stats: parking_lot::Mutex<RunnerStats>,
    /// Deferred snapshots are written after every executed job.
    aggregator: Option<Arc<StatsAggregator>>,
}

impl JobRunner {
    pub fn new(queue: Arc<dyn JobQueue>, max_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            worker_id: format!("worker-{}", Uuid::new_v4()),
            max_attempts,
            poll_interval,
            stats: parking_lot::Mutex::new(RunnerStats::default()),
            aggregator: None,
        }
    }

    pub fn with_stats_flush(mut self, aggregator: Arc<StatsAggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Register a job handler
    pub fn register_handler(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn stats(&self) -> RunnerStats {
        self.stats.lock().clone()
    }

    /// Execute a job inline. `true` when it completed.
    pub async fn run(&self, job: Job) -> bool {
        match self.execute(job).await {
            Ok(job) => matches!(job.state, JobState::Completed { .. }),
            Err(e) => {
                error!("Job runner error: {}", e);
                false
            }
        }
    }

    /// Pop and execute one ready job. `None` when nothing is ready.
    pub async fn run_next(&self) -> Result<Option<Job>> {
        let Some(job) = self.queue.pop().await? else {
            return Ok(None);
        };
        let job = self.execute(job).await?;

        if let Some(aggregator) = &self.aggregator {
            // Kept for the next job on failure
            if let Err(e) = aggregator.flush_deferred().await {
                warn!("Worker {}: deferred stats not written: {}", self.worker_id, e);
            }
        }
        Ok(Some(job))
    }

    /// Execute ready jobs until the queue has none left. Returns the number executed.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut executed = 0;
        while self.run_next().await?.is_some() {
            executed += 1;
        }
        Ok(executed)
    }

    /// Worker loop; returns when `cancel` fires.
    pub async fn run_worker(&self, cancel: CancellationToken) -> Result<()> {
        info!("Worker {} started", self.worker_id);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!("Worker {}: {}", self.worker_id, e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.queue.wait_for_job() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Worker {} stopped ({:?})", self.worker_id, self.stats());
        Ok(())
    }

    /// Run one job through QUEUED → RUNNING → COMPLETED | FAILED.
    async fn execute(&self, job: Job) -> Result<Job> {
        let job_id = job.id;
        let kind = job.kind;
        let start_time = Instant::now();

        let handler = self
            .handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| OrchestratorError::HandlerNotRegistered(kind.to_string()))?;

        let mut sm = JobStateMachine::new(job);
        sm.start(self.worker_id.clone())?;

        debug!(
            "Job {}: {} {} (attempt {})",
            job_id,
            kind,
            sm.job().target,
            sm.job().attempt
        );

        let result = handler.run(sm.job()).await;

        match result {
            Ok(()) => {
                sm.complete()?;
                self.stats.lock().completed += 1;
                info!(
                    "Job {}: {} {} completed in {}ms",
                    job_id,
                    kind,
                    sm.job().target,
                    start_time.elapsed().as_millis()
                );
                Ok(sm.into_job())
            }
            Err(e) => {
                let category = e.category();
                error!(
                    "Job {}: {} {} failed ({}): {}",
                    job_id,
                    kind,
                    sm.job().target,
                    category,
                    e
                );

                sm.fail(e.to_string(), category, self.max_attempts)?;
                self.stats.lock().failed += 1;

                if sm.job().state.is_terminal() {
                    return Ok(sm.into_job());
                }

                let failed = sm.job().clone();
                sm.retry()?;
                let retry = sm.into_job();
                warn!(
                    "Job {}: retry scheduled at {:?}",
                    job_id, retry.not_before
                );
                self.queue.enqueue(retry).await?;
                self.stats.lock().retried += 1;
                Ok(failed)
            }
        }
    }
}
