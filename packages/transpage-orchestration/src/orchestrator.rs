//! Update orchestration for a changed translatable page
//!
//! `update_page` runs seven steps strictly in order:
//!
//! 1. update every unit page in the source language (synchronous, no index needed)
//! 2. invalidate the Group Index entry and the page's own caches
//! 3. wait for replication; a timeout is a warning, not a failure
//! 4. recompute stats with `NO_CACHE | IMMEDIATE_WRITES`
//! 5. purge the page's rendered output (best-effort)
//! 6. enqueue one render job per translation page plus the source-language page
//! 7. enqueue one deduplicated message index rebuild
//!
//! Storage and queue errors are not retried here; the job runner owns retries.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use transpage_storage::{DocumentStore, PageTitle, TranslationUnit, UnitStore, UnitTitle};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::group_index::GroupIndex;
use crate::job::Job;
use crate::page::{PageResolver, TranslatablePage};
use crate::queue::JobQueue;
use crate::stats::{StatsAggregator, StatsFlags, StatsSnapshot};

/// Progress of one unit within a batch. No unit moves back to `Unseen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Unseen,
    Updated,
    Failed,
}

/// What one `update_page` call did. Recoverable problems are in `warnings`.
#[derive(Debug)]
pub struct UpdateReport {
    pub page: PageTitle,
    pub units_updated: usize,
    pub unit_outcomes: Vec<(String, UnitOutcome)>,
    pub stats: Option<StatsSnapshot>,
    pub render_jobs: usize,
    pub render_jobs_queued: usize,
    pub index_rebuild_queued: bool,
    pub warnings: Vec<OrchestratorError>,
    pub duration_ms: u64,
}

pub struct UpdatePageOrchestrator {
    config: Arc<OrchestratorConfig>,
    docs: Arc<dyn DocumentStore>,
    units: Arc<dyn UnitStore>,
    group_index: Arc<GroupIndex>,
    resolver: Arc<PageResolver>,
    stats: Arc<StatsAggregator>,
    queue: Arc<dyn JobQueue>,
}

impl UpdatePageOrchestrator {
    pub fn new(
        config: Arc<OrchestratorConfig>,
        docs: Arc<dyn DocumentStore>,
        units: Arc<dyn UnitStore>,
        group_index: Arc<GroupIndex>,
        resolver: Arc<PageResolver>,
        stats: Arc<StatsAggregator>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            config,
            docs,
            units,
            group_index,
            resolver,
            stats,
            queue,
        }
    }

    /// Decode every payload first; nothing is applied if any of them is malformed.
    pub async fn update_page_from_payloads(
        &self,
        page: &TranslatablePage,
        payloads: &[Value],
    ) -> Result<UpdateReport> {
        let units = TranslationUnit::decode_all(payloads).map_err(OrchestratorError::from_decode)?;
        self.update_page(page, &units).await
    }

    /// An empty `units` list re-syncs caches, stats and renders only.
    pub async fn update_page(
        &self,
        page: &TranslatablePage,
        units: &[TranslationUnit],
    ) -> Result<UpdateReport> {
        let start = Instant::now();
        let mut warnings = Vec::new();

        info!("Updating page {} ({} units)", page.title, units.len());

        // Step 1: unit pages
        let unit_outcomes = self.update_units(page, units).await?;
        let units_updated = unit_outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == UnitOutcome::Updated)
            .count();
        info!(
            "Page {}: {} unit updates for {} units",
            page.title,
            units_updated,
            units.len()
        );

        // Step 2: caches of this group only
        let group_known = self.invalidate_caches(page, &mut warnings).await;
        let fresh = self.reload_page(page, &mut warnings).await;

        // Step 3: replication
        let timeout = self.config.replication_timeout();
        if !self.docs.wait_for_replication(timeout).await? {
            warn!("Page {}: Continuing despite replication lag", page.title);
            warnings.push(OrchestratorError::ReplicationTimeout(
                timeout.as_millis() as u64
            ));
        }

        // Step 4: fresh stats for the render jobs
        let stats = if group_known {
            let snapshot = self
                .stats
                .recompute(
                    &page.group_id,
                    StatsFlags::NO_CACHE | StatsFlags::IMMEDIATE_WRITES,
                )
                .await?;
            debug!("Page {}: stats recomputed", page.title);
            Some(snapshot)
        } else {
            None
        };

        // Step 5: rendered output of the source page
        if let Err(e) = self.docs.purge(&page.title).await {
            warn!("Page {}: purge failed: {}", page.title, e);
            warnings.push(OrchestratorError::PurgeFailure {
                page: page.title.to_string(),
                reason: e.to_string(),
            });
        }

        // Step 6: renders, source-language page included
        let render_jobs: Vec<Job> = fresh
            .render_targets()
            .iter()
            .map(Job::render_translation_page)
            .collect();
        let render_count = render_jobs.len();
        let render_jobs_queued = self.queue.enqueue_batch(render_jobs).await?;
        info!(
            "Page {}: pushed {} render jobs ({} new)",
            page.title, render_count, render_jobs_queued
        );

        // Step 7: one system-wide index rebuild
        let index_rebuild_queued = self.queue.enqueue(Job::message_index_rebuild()?).await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Page {} updated in {}ms ({} warnings)",
            page.title,
            duration_ms,
            warnings.len()
        );

        Ok(UpdateReport {
            page: page.title.clone(),
            units_updated,
            unit_outcomes,
            stats,
            render_jobs: render_count,
            render_jobs_queued,
            index_rebuild_queued,
            warnings,
            duration_ms,
        })
    }

    /// Stops at the first failure; earlier updates stay applied.
    async fn update_units(
        &self,
        page: &TranslatablePage,
        units: &[TranslationUnit],
    ) -> Result<Vec<(String, UnitOutcome)>> {
        let mut outcomes: Vec<(String, UnitOutcome)> = units
            .iter()
            .map(|u| (u.id.clone(), UnitOutcome::Unseen))
            .collect();

        for (position, unit) in units.iter().enumerate() {
            let title = UnitTitle::new(
                page.title.clone(),
                unit.id.clone(),
                page.source_language.clone(),
            );

            match self
                .units
                .update_unit(
                    &title,
                    &unit.text_with_variables(),
                    unit.marks_fuzzy(),
                    &page.source_language,
                )
                .await
            {
                Ok(revision) => {
                    debug!("Unit {} saved as {}", title, revision);
                    outcomes[position].1 = UnitOutcome::Updated;
                }
                Err(e) => {
                    outcomes[position].1 = UnitOutcome::Failed;
                    error!(
                        "Page {}: unit {} failed after {} of {} updates: {}",
                        page.title,
                        unit.id,
                        position,
                        units.len(),
                        e
                    );
                    return Err(OrchestratorError::UnitUpdateFailed {
                        unit: title.to_string(),
                        applied: position,
                        total: units.len(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(outcomes)
    }

    /// Projection read after the caches were cleared. Falls back to the
    /// caller's copy with a warning if the page no longer resolves.
    async fn reload_page(
        &self,
        page: &TranslatablePage,
        warnings: &mut Vec<OrchestratorError>,
    ) -> TranslatablePage {
        match self.resolver.resolve(&page.title).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!("Page {}: reload after invalidation failed: {}", page.title, e);
                warnings.push(OrchestratorError::CacheInvalidationFailure {
                    scope: page.title.to_string(),
                    reason: e.to_string(),
                });
                page.clone()
            }
        }
    }

    /// Returns whether the group is still known to the index.
    async fn invalidate_caches(
        &self,
        page: &TranslatablePage,
        warnings: &mut Vec<OrchestratorError>,
    ) -> bool {
        if let Some(group) = self.group_index.cached(&page.group_id) {
            group.clear_caches();
        }
        self.group_index.invalidate(&page.group_id);
        self.resolver.clear_source_page_cache(&page.title);

        let failure = match self.group_index.get(&page.group_id).await {
            Ok(Some(_)) => return true,
            Ok(None) => "group is not registered".to_string(),
            Err(e) => e.to_string(),
        };
        warn!(
            "Page {}: cache invalidation of {} failed: {}",
            page.title, page.group_id, failure
        );
        warnings.push(OrchestratorError::CacheInvalidationFailure {
            scope: page.group_id.to_string(),
            reason: failure,
        });
        false
    }
}
