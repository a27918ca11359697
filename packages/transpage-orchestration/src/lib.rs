/*
 * Transpage Orchestration - translatable page update pipeline
 *
 * Architecture:
 * - Orchestrator: unit updates, cache invalidation, stats, render/index jobs
 * - Job Queue with pending-job deduplication
 * - Job Runner (handler registry, retry with backoff, worker loop)
 * - Message groups, Group Index, Message Index
 * - Translatable Page Store (mark, move, delete, metadata relinking)
 */

pub mod config;
pub mod error;
pub mod group;
pub mod group_index;
pub mod handlers;
pub mod job;
pub mod message_index;
pub mod orchestrator;
pub mod page;
pub mod page_store;
pub mod queue;
pub mod runner;
pub mod services;
pub mod stats;

// Re-exports
pub use config::OrchestratorConfig;
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use group::{
    AggregateGroup, FileBackedGroup, FileFormat, GroupKind, JsonFileFormat, MessageChecker,
    MessageGroup, MessageTranslation, PrefixMangler, StringMangler, WikiPageGroup,
    WorkflowStatesGroup,
};
pub use group_index::{
    AggregateGroupSource, GroupIndex, GroupSource, PageGroupSource, StaticGroupSource,
};
pub use handlers::{
    MessageIndexRebuildHandler, RenderTranslationPageHandler, UpdateTranslatablePageHandler,
};
pub use job::{Job, JobKind, JobState, JobStateMachine};
pub use message_index::MessageIndex;
pub use orchestrator::{UnitOutcome, UpdatePageOrchestrator, UpdateReport};
pub use page::{PageResolver, TranslatableBundle, TranslatablePage};
pub use page_store::{DeleteReport, MoveReport, PageStoreDeps, RelinkReport, TranslatablePageStore};
pub use queue::{InMemoryJobQueue, JobQueue, QueueStats};
#[cfg(feature = "sqlite")]
pub use queue::SqliteJobQueue;
pub use runner::{JobHandler, JobRunner, RunnerStats};
pub use services::{queue_from_config, Ports, Services};
pub use stats::{
    InMemoryStatsStore, LanguageStats, StatsAggregator, StatsFlags, StatsSnapshot, StatsStore,
};
