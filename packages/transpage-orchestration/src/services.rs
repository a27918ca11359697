//! Wiring of the storage ports into the orchestration components

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use transpage_storage::infrastructure::{
    InMemoryDocumentStore, InMemoryMetadataStore, InMemoryRevTagStore, InMemoryUnitStore,
};
use transpage_storage::{DocumentStore, MetadataStore, RevTagStore, UnitStore};

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::group::{MessageGroup, WorkflowStatesGroup};
use crate::group_index::{
    AggregateGroupSource, GroupIndex, GroupSource, PageGroupSource, StaticGroupSource,
};
use crate::handlers::{
    MessageIndexRebuildHandler, RenderTranslationPageHandler, UpdateTranslatablePageHandler,
};
use crate::message_index::MessageIndex;
use crate::orchestrator::UpdatePageOrchestrator;
use crate::page::PageResolver;
use crate::page_store::{PageStoreDeps, TranslatablePageStore};
use crate::queue::{InMemoryJobQueue, JobQueue};
use crate::runner::JobRunner;
use crate::stats::{InMemoryStatsStore, StatsAggregator, StatsStore};

/// Storage adapters behind the ports.
#[derive(Clone)]
pub struct Ports {
    pub docs: Arc<dyn DocumentStore>,
    pub units: Arc<dyn UnitStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub rev_tags: Arc<dyn RevTagStore>,
    pub stats: Arc<dyn StatsStore>,
}

impl Ports {
    pub fn in_memory() -> Self {
        Self {
            docs: Arc::new(InMemoryDocumentStore::new()),
            units: Arc::new(InMemoryUnitStore::new()),
            metadata: Arc::new(InMemoryMetadataStore::new()),
            rev_tags: Arc::new(InMemoryRevTagStore::new()),
            stats: Arc::new(InMemoryStatsStore::new()),
        }
    }

    /// Every store in the configured SQLite file; in memory otherwise.
    /// Stats snapshots always stay in process.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let mut ports = Self::in_memory();
        if let Some(path) = &config.db_path {
            ports.attach_sqlite(path)?;
        }
        Ok(ports)
    }

    #[cfg(feature = "sqlite")]
    fn attach_sqlite(&mut self, path: &Path) -> Result<()> {
        use transpage_storage::infrastructure::{
            SqliteDocumentStore, SqliteMetadataStore, SqliteRevTagStore, SqliteUnitStore,
        };

        self.docs = Arc::new(SqliteDocumentStore::new(path)?);
        self.units = Arc::new(SqliteUnitStore::new(path)?);
        self.metadata = Arc::new(SqliteMetadataStore::new(path)?);
        self.rev_tags = Arc::new(SqliteRevTagStore::new(path)?);
        info!("Storage: {}", path.display());
        Ok(())
    }

    #[cfg(not(feature = "sqlite"))]
    fn attach_sqlite(&mut self, _path: &Path) -> Result<()> {
        Err(crate::error::OrchestratorError::config(
            "db_path requires the `sqlite` feature",
        ))
    }
}

/// The configured SQLite queue, or a process-local one.
pub fn queue_from_config(config: &OrchestratorConfig) -> Result<Arc<dyn JobQueue>> {
    match &config.db_path {
        #[cfg(feature = "sqlite")]
        Some(path) => Ok(Arc::new(crate::queue::SqliteJobQueue::new(path)?)),
        #[cfg(not(feature = "sqlite"))]
        Some(_) => Err(crate::error::OrchestratorError::config(
            "db_path requires the `sqlite` feature",
        )),
        None => Ok(Arc::new(InMemoryJobQueue::new())),
    }
}

pub struct Services {
    pub config: Arc<OrchestratorConfig>,
    pub ports: Ports,
    pub queue: Arc<dyn JobQueue>,
    pub group_index: Arc<GroupIndex>,
    pub message_index: Arc<MessageIndex>,
    pub resolver: Arc<PageResolver>,
    pub stats: Arc<StatsAggregator>,
    pub orchestrator: Arc<UpdatePageOrchestrator>,
    pub page_store: Arc<TranslatablePageStore>,
}

impl Services {
    /// `extra_groups` are registered next to the page, aggregate and
    /// workflow state groups (e.g. file-backed groups).
    pub fn new(
        config: OrchestratorConfig,
        ports: Ports,
        queue: Arc<dyn JobQueue>,
        extra_groups: Vec<Arc<dyn MessageGroup>>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let source_language = config.source_language()?;

        let mut static_groups = extra_groups;
        static_groups.push(Arc::new(WorkflowStatesGroup::new(
            config.workflow_states.clone(),
            source_language.clone(),
            ports.docs.clone(),
            config.system_editor.clone(),
        )?));

        let sources: Vec<Arc<dyn GroupSource>> = vec![
            Arc::new(PageGroupSource::new(
                ports.rev_tags.clone(),
                ports.docs.clone(),
                ports.units.clone(),
                source_language.clone(),
            )),
            Arc::new(AggregateGroupSource::new(
                ports.metadata.clone(),
                source_language.clone(),
            )),
            Arc::new(StaticGroupSource::new(static_groups)),
        ];
        let group_index = Arc::new(GroupIndex::new(sources));
        let message_index = Arc::new(MessageIndex::new());

        let resolver = Arc::new(PageResolver::new(
            ports.docs.clone(),
            ports.units.clone(),
            ports.rev_tags.clone(),
            source_language,
        ));
        let stats = Arc::new(StatsAggregator::new(group_index.clone(), ports.stats.clone()));

        let orchestrator = Arc::new(UpdatePageOrchestrator::new(
            config.clone(),
            ports.docs.clone(),
            ports.units.clone(),
            group_index.clone(),
            resolver.clone(),
            stats.clone(),
            queue.clone(),
        ));

        let page_store = Arc::new(TranslatablePageStore::new(PageStoreDeps {
            docs: ports.docs.clone(),
            units: ports.units.clone(),
            metadata: ports.metadata.clone(),
            rev_tags: ports.rev_tags.clone(),
            group_index: group_index.clone(),
            message_index: message_index.clone(),
            resolver: resolver.clone(),
            stats: stats.clone(),
            queue: queue.clone(),
        }));

        info!(
            "Services ready (source language {}, {} workflow states)",
            config.default_source_language,
            config.workflow_states.len()
        );
        Ok(Self {
            config,
            ports,
            queue,
            group_index,
            message_index,
            resolver,
            stats,
            orchestrator,
            page_store,
        })
    }

    /// A runner with a handler for every job kind.
    pub fn runner(&self) -> JobRunner {
        let mut runner = JobRunner::new(
            self.queue.clone(),
            self.config.max_job_attempts,
            Duration::from_millis(self.config.worker_poll_interval_ms),
        )
        .with_stats_flush(self.stats.clone());
        runner.register_handler(Arc::new(UpdateTranslatablePageHandler::new(
            self.resolver.clone(),
            self.orchestrator.clone(),
        )));
        runner.register_handler(Arc::new(RenderTranslationPageHandler::new(
            self.config.clone(),
            self.ports.docs.clone(),
            self.ports.units.clone(),
            self.resolver.clone(),
        )));
        runner.register_handler(Arc::new(MessageIndexRebuildHandler::new(
            self.group_index.clone(),
            self.message_index.clone(),
        )));
        runner
    }
}
