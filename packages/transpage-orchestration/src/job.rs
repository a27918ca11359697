use crate::error::{ErrorCategory, OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use transpage_storage::{PageTitle, TranslationUnit};
use uuid::Uuid;

/// Target of the system-wide message index rebuild job.
pub const MESSAGE_INDEX_TITLE: &str = "Special:TranslateMessageIndex";

/// Job kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    UpdateTranslatablePage,
    RenderTranslationPage,
    MessageIndexRebuild,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::UpdateTranslatablePage => "UpdateTranslatablePage",
            JobKind::RenderTranslationPage => "RenderTranslationPage",
            JobKind::MessageIndexRebuild => "MessageIndexRebuild",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "UpdateTranslatablePage" => Ok(JobKind::UpdateTranslatablePage),
            "RenderTranslationPage" => Ok(JobKind::RenderTranslationPage),
            "MessageIndexRebuild" => Ok(JobKind::MessageIndexRebuild),
            _ => Err(OrchestratorError::parse(format!("Invalid job kind: {}", s))),
        }
    }

    /// Pending jobs of a deduplicating kind collapse by target.
    pub fn is_deduplicating(&self) -> bool {
        match self {
            JobKind::UpdateTranslatablePage => false,
            JobKind::RenderTranslationPage | JobKind::MessageIndexRebuild => true,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job state enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobState {
    Queued {
        queued_at: DateTime<Utc>,
    },
    Running {
        started_at: DateTime<Utc>,
        worker_id: String,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    },
    Failed {
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
        error: String,
        error_category: ErrorCategory,
        retry_count: u32,
        next_retry_at: Option<DateTime<Utc>>,
    },
}

impl JobState {
    pub fn state_name(&self) -> &'static str {
        match self {
            JobState::Queued { .. } => "queued",
            JobState::Running { .. } => "running",
            JobState::Completed { .. } => "completed",
            JobState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            JobState::Completed { .. } => true,
            JobState::Failed { next_retry_at, .. } => next_retry_at.is_none(),
            _ => false,
        }
    }
}

/// Job model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub target: PageTitle,
    pub params: Value,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Executions started so far
    pub attempt: u32,
    /// Not runnable before this instant (retry backoff)
    pub not_before: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, target: PageTitle, params: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            target,
            params,
            state: JobState::Queued { queued_at: now },
            created_at: now,
            updated_at: now,
            attempt: 0,
            not_before: None,
        }
    }

    /// Update unit pages (if any units are given) and schedule the renders of a page.
    pub fn update_translatable_page(page: &PageTitle, units: &[TranslationUnit]) -> Self {
        let units: Vec<Value> = units.iter().map(TranslationUnit::to_payload).collect();
        Self::new(
            JobKind::UpdateTranslatablePage,
            page.clone(),
            json!({ "units": units }),
        )
    }

    pub fn render_translation_page(title: &PageTitle) -> Self {
        Self::new(JobKind::RenderTranslationPage, title.clone(), json!({}))
    }

    pub fn message_index_rebuild() -> Result<Self> {
        Ok(Self::new(
            JobKind::MessageIndexRebuild,
            PageTitle::new(MESSAGE_INDEX_TITLE)?,
            json!({}),
        ))
    }

    /// Key under which pending duplicates collapse; `None` for kinds that never collapse.
    pub fn dedup_key(&self) -> Option<String> {
        self.kind
            .is_deduplicating()
            .then(|| format!("{}:{}", self.kind, self.target))
    }

    /// Raw unit payloads of an update job; either wire form may appear.
    pub fn unit_payloads(&self) -> Result<Vec<Value>> {
        match self.params.get("units") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(other) => Err(OrchestratorError::MalformedUnitPayload(format!(
                "Job {}: `units` must be an array, got {}",
                self.id, other
            ))),
        }
    }

    /// Runnable at `now` (no backoff pending).
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map_or(true, |t| t <= now)
    }
}

/// Job state machine for transitions
pub struct JobStateMachine {
    job: Job,
}

impl JobStateMachine {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    /// Transition: QUEUED → RUNNING
    pub fn start(&mut self, worker_id: String) -> Result<()> {
        match &self.job.state {
            JobState::Queued { .. } => {
                let now = Utc::now();
                self.job.state = JobState::Running {
                    started_at: now,
                    worker_id,
                };
                self.job.attempt += 1;
                self.job.not_before = None;
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "running".to_string(),
            }),
        }
    }

    /// Transition: RUNNING → COMPLETED
    pub fn complete(&mut self) -> Result<()> {
        match &self.job.state {
            JobState::Running { started_at, .. } => {
                let now = Utc::now();
                let duration_ms = (now - *started_at).num_milliseconds().max(0) as u64;

                self.job.state = JobState::Completed {
                    started_at: *started_at,
                    completed_at: now,
                    duration_ms,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "completed".to_string(),
            }),
        }
    }

    /// Transition: RUNNING → FAILED
    ///
    /// Schedules a retry with exponential backoff (2s, 4s, 8s, ...) for
    /// transient errors while attempts remain.
    pub fn fail(
        &mut self,
        error: String,
        error_category: ErrorCategory,
        max_attempts: u32,
    ) -> Result<()> {
        match &self.job.state {
            JobState::Running { started_at, .. } => {
                let now = Utc::now();
                let retry_count = self.job.attempt;

                let next_retry_at = if retry_count < max_attempts
                    && error_category == ErrorCategory::Transient
                {
                    let backoff_secs = 2u64.pow(retry_count.min(16));
                    Some(now + chrono::Duration::seconds(backoff_secs as i64))
                } else {
                    None
                };

                self.job.state = JobState::Failed {
                    started_at: *started_at,
                    failed_at: now,
                    error,
                    error_category,
                    retry_count,
                    next_retry_at,
                };
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "failed".to_string(),
            }),
        }
    }

    /// Transition: FAILED → QUEUED (retry)
    pub fn retry(&mut self) -> Result<()> {
        match &self.job.state {
            JobState::Failed { next_retry_at, .. } => {
                let Some(next_retry_at) = *next_retry_at else {
                    return Err(OrchestratorError::InvalidStateTransition {
                        from: "failed (no retry scheduled)".to_string(),
                        to: "queued".to_string(),
                    });
                };

                let now = Utc::now();
                self.job.state = JobState::Queued { queued_at: now };
                self.job.not_before = Some(next_retry_at);
                self.job.updated_at = now;
                Ok(())
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: self.job.state.state_name().to_string(),
                to: "queued (retry)".to_string(),
            }),
        }
    }
}
