//! Job handlers for the three job kinds
//!
//! Every handler is safe to run more than once for the same job.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use transpage_storage::{DocumentStore, LanguageCode, PageTitle, UnitStore, UnitTitle};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::group_index::GroupIndex;
use crate::job::{Job, JobKind};
use crate::message_index::MessageIndex;
use crate::orchestrator::UpdatePageOrchestrator;
use crate::page::PageResolver;
use crate::runner::JobHandler;

/// Resolves the target page and runs `update_page` with the job's units.
pub struct UpdateTranslatablePageHandler {
    resolver: Arc<PageResolver>,
    orchestrator: Arc<UpdatePageOrchestrator>,
}

impl UpdateTranslatablePageHandler {
    pub fn new(resolver: Arc<PageResolver>, orchestrator: Arc<UpdatePageOrchestrator>) -> Self {
        Self {
            resolver,
            orchestrator,
        }
    }
}

#[async_trait]
impl JobHandler for UpdateTranslatablePageHandler {
    fn kind(&self) -> JobKind {
        JobKind::UpdateTranslatablePage
    }

    async fn run(&self, job: &Job) -> Result<()> {
        let page = self.resolver.resolve(&job.target).await?;
        let payloads = job.unit_payloads()?;

        let report = self
            .orchestrator
            .update_page_from_payloads(&page, &payloads)
            .await?;
        for warning in &report.warnings {
            debug!("Job {}: {}", job.id, warning);
        }
        Ok(())
    }
}

/// Writes `Page/xx` from the marked sections and the unit translations.
pub struct RenderTranslationPageHandler {
    config: Arc<OrchestratorConfig>,
    docs: Arc<dyn DocumentStore>,
    units: Arc<dyn UnitStore>,
    resolver: Arc<PageResolver>,
}

impl RenderTranslationPageHandler {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        docs: Arc<dyn DocumentStore>,
        units: Arc<dyn UnitStore>,
        resolver: Arc<PageResolver>,
    ) -> Self {
        Self {
            config,
            docs,
            units,
            resolver,
        }
    }

    /// Translated text where available (fuzzy included), source text otherwise.
    pub async fn render(&self, source: &PageTitle, language: &LanguageCode) -> Result<String> {
        let page = self.resolver.resolve(source).await?;
        let sections = self.units.sections(source).await?;

        let mut parts = Vec::with_capacity(sections.len());
        for section in &sections {
            if language == &page.source_language {
                parts.push(section.text_for_rendering());
                continue;
            }
            let title = UnitTitle::new(source.clone(), section.id.clone(), language.clone());
            match self.units.get_unit(&title).await? {
                Some(record) => parts.push(section.substitute_variables(&record.text)),
                None => parts.push(section.text_for_rendering()),
            }
        }
        Ok(parts.join("\n\n"))
    }
}

#[async_trait]
impl JobHandler for RenderTranslationPageHandler {
    fn kind(&self) -> JobKind {
        JobKind::RenderTranslationPage
    }

    async fn run(&self, job: &Job) -> Result<()> {
        let target = &job.target;
        let (base, leaf) = target
            .split_leaf()
            .ok_or_else(|| OrchestratorError::parse(format!("Not a translation page: {}", target)))?;
        let language = LanguageCode::new(leaf).map_err(OrchestratorError::parse)?;
        let source = PageTitle::new(base)?;

        let content = self.render(&source, &language).await?;
        if self.docs.get_content(target).await?.as_deref() == Some(content.as_str()) {
            debug!("Job {}: {} is up to date", job.id, target);
            return Ok(());
        }

        let revision = self
            .docs
            .update_content(
                target,
                &content,
                &self.config.system_editor,
                &self.config.render_summary,
            )
            .await?;
        info!("Job {}: rendered {} as {}", job.id, target, revision);
        Ok(())
    }
}

pub struct MessageIndexRebuildHandler {
    group_index: Arc<GroupIndex>,
    message_index: Arc<MessageIndex>,
}

impl MessageIndexRebuildHandler {
    pub fn new(group_index: Arc<GroupIndex>, message_index: Arc<MessageIndex>) -> Self {
        Self {
            group_index,
            message_index,
        }
    }
}

#[async_trait]
impl JobHandler for MessageIndexRebuildHandler {
    fn kind(&self) -> JobKind {
        JobKind::MessageIndexRebuild
    }

    async fn run(&self, _job: &Job) -> Result<()> {
        self.message_index.rebuild(&self.group_index).await?;
        Ok(())
    }
}
