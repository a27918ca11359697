//! Lifecycle of translatable pages: mark, move, delete
//!
//! The group id of a page is derived from its title, so a move relinks every
//! group-keyed metadata entry and every aggregate membership to the new id.
//! Operations on the same group ids are serialised through per-group locks,
//! taken in sorted order.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use transpage_storage::{
    DocumentStore, GroupId, LanguageCode, MetadataKey, MetadataStore, PageTitle, RevTag,
    RevTagStore, RevisionId, TranslationUnit, UnitStore,
};

use crate::error::{OrchestratorError, Result};
use crate::group::aggregate::{format_subgroups, parse_subgroups, remove_member, replace_member};
use crate::group_index::GroupIndex;
use crate::job::Job;
use crate::message_index::MessageIndex;
use crate::page::{PageResolver, TranslatableBundle};
use crate::queue::JobQueue;
use crate::stats::{StatsAggregator, StatsFlags};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelinkReport {
    pub moved_keys: Vec<MetadataKey>,
    pub aggregates_updated: Vec<GroupId>,
    pub priority_carried: bool,
}

#[derive(Debug)]
pub struct DeleteReport {
    pub group: GroupId,
    pub percentages: BTreeMap<LanguageCode, f64>,
    pub translation_pages_purged: usize,
    pub aggregates_updated: Vec<GroupId>,
    pub warnings: Vec<OrchestratorError>,
}

#[derive(Debug)]
pub struct MoveReport {
    pub old_group: GroupId,
    pub new_group: GroupId,
    pub relink: RelinkReport,
    pub units_moved: usize,
    pub indexed_keys: usize,
    pub update_job_queued: bool,
}

/// Collaborators of [`TranslatablePageStore`].
#[derive(Clone)]
pub struct PageStoreDeps {
    pub docs: Arc<dyn DocumentStore>,
    pub units: Arc<dyn UnitStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub rev_tags: Arc<dyn RevTagStore>,
    pub group_index: Arc<GroupIndex>,
    pub message_index: Arc<MessageIndex>,
    pub resolver: Arc<PageResolver>,
    pub stats: Arc<StatsAggregator>,
    pub queue: Arc<dyn JobQueue>,
}

pub struct TranslatablePageStore {
    deps: PageStoreDeps,
    locks: DashMap<GroupId, Arc<AsyncMutex<()>>>,
}

impl TranslatablePageStore {
    pub fn new(deps: PageStoreDeps) -> Self {
        Self {
            deps,
            locks: DashMap::new(),
        }
    }

    /// Record the sections of a page and mark it for translation.
    ///
    /// Enqueues the update job that writes the unit pages and renders.
    pub async fn mark_page(
        &self,
        title: &PageTitle,
        units: &[TranslationUnit],
        revision: RevisionId,
    ) -> Result<bool> {
        let group = GroupId::for_page(title);
        let _guards = self.lock_groups(&[&group]).await;
        let d = &self.deps;

        d.units.save_sections(title, units).await?;
        d.rev_tags.add_tag(title, RevTag::Mark, revision).await?;

        let max_id = units.iter().filter_map(|u| u.id.parse::<u64>().ok()).max();
        if let Some(max_id) = max_id {
            d.metadata
                .set(&group, MetadataKey::MaxId, Some(&max_id.to_string()))
                .await?;
        }

        d.resolver.clear_source_page_cache(title);
        d.group_index.invalidate(&group);
        d.group_index.get(&group).await?;

        info!("Marked {} at {} ({} units)", title, revision, units.len());
        d.queue
            .enqueue(Job::update_translatable_page(title, units))
            .await
    }

    /// Move every translatable-page metadata entry and aggregate membership
    /// from `old` to `new`.
    pub async fn relink_group(&self, old: &GroupId, new: &GroupId) -> Result<RelinkReport> {
        let _guards = self.lock_groups(&[old, new]).await;
        self.relink_locked(old, new).await
    }

    async fn relink_locked(&self, old: &GroupId, new: &GroupId) -> Result<RelinkReport> {
        let metadata = &self.deps.metadata;
        let mut report = RelinkReport::default();

        let aggregates = metadata.groups_with_key(MetadataKey::Subgroups).await?;
        let mut preload: Vec<GroupId> = vec![old.clone(), new.clone()];
        preload.extend(aggregates.iter().map(|(id, _)| id.clone()));
        metadata.preload(&preload).await?;

        for key in MetadataKey::TRANSLATABLE_PAGE_KEYS {
            if let Some(value) = metadata.get(old, key).await? {
                metadata.set(new, key, Some(&value)).await?;
                metadata.set(old, key, None).await?;
                report.moved_keys.push(key);
            }
        }

        for (aggregate, raw) in aggregates {
            let mut members = parse_subgroups(&raw);
            if replace_member(&mut members, old, new) {
                metadata
                    .set(&aggregate, MetadataKey::Subgroups, Some(&format_subgroups(&members)))
                    .await?;
                debug!("Aggregate {}: {} -> {}", aggregate, old, new);
                report.aggregates_updated.push(aggregate);
            }
        }

        if let Some(priority) = metadata.get(old, MetadataKey::Priority).await? {
            metadata.set(new, MetadataKey::Priority, Some(&priority)).await?;
            metadata.set(old, MetadataKey::Priority, None).await?;
            report.priority_carried = true;
        }

        info!(
            "Relinked {} -> {}: {} keys, {} aggregates",
            old,
            new,
            report.moved_keys.len(),
            report.aggregates_updated.len()
        );
        Ok(report)
    }

    pub async fn delete(&self, title: &PageTitle) -> Result<DeleteReport> {
        let group = GroupId::for_page(title);
        let _guards = self.lock_groups(&[&group]).await;
        let d = &self.deps;
        let mut warnings = Vec::new();

        let source_language = match d.docs.page_language(title).await? {
            Some(language) => language,
            None => d.resolver.default_source_language().clone(),
        };
        let translation_pages: Vec<PageTitle> = d
            .docs
            .subpages(title)
            .await?
            .into_iter()
            .filter(|p| {
                p.language_suffix()
                    .map_or(false, |language| language != source_language)
            })
            .collect();

        d.rev_tags
            .remove_tags(title, &[RevTag::Mark, RevTag::Ready])
            .await?;
        d.units.remove_sections(title).await?;

        let percentages = match d.stats.recompute(&group, StatsFlags::NO_CACHE).await {
            Ok(snapshot) => snapshot
                .languages
                .iter()
                .map(|(language, stats)| (language.clone(), stats.translated_percent()))
                .collect(),
            Err(e) => {
                debug!("No stats for deleted page {}: {}", title, e);
                BTreeMap::new()
            }
        };
        info!("Deleting {}: completion at removal {:?}", title, percentages);

        let mut purged = 0;
        for page in &translation_pages {
            match d.docs.purge(page).await {
                Ok(()) => purged += 1,
                Err(e) => {
                    warn!("Purge of {} failed: {}", page, e);
                    warnings.push(OrchestratorError::PurgeFailure {
                        page: page.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        for key in MetadataKey::TRANSLATABLE_PAGE_KEYS {
            d.metadata.set(&group, key, None).await?;
        }
        d.metadata.set(&group, MetadataKey::Priority, None).await?;

        let mut aggregates_updated = Vec::new();
        for (aggregate, raw) in d.metadata.groups_with_key(MetadataKey::Subgroups).await? {
            let mut members = parse_subgroups(&raw);
            if remove_member(&mut members, &group) {
                d.metadata
                    .set(&aggregate, MetadataKey::Subgroups, Some(&format_subgroups(&members)))
                    .await?;
                aggregates_updated.push(aggregate);
            }
        }

        d.stats.clear(&group).await?;
        d.resolver.clear_source_page_cache(title);
        if let Some(cached) = d.group_index.cached(&group) {
            cached.clear_caches();
        }
        d.group_index.invalidate(&group);

        info!(
            "Deleted {}: {} translation pages purged, {} aggregates updated",
            title,
            purged,
            aggregates_updated.len()
        );
        Ok(DeleteReport {
            group,
            percentages,
            translation_pages_purged: purged,
            aggregates_updated,
            warnings,
        })
    }

    /// Called after the document store moved `old` to `new`.
    pub async fn move_page(&self, old: &PageTitle, new: &PageTitle) -> Result<MoveReport> {
        let d = &self.deps;
        d.resolver.resolve(old).await?;

        let old_group = GroupId::for_page(old);
        let new_group = GroupId::for_page(new);
        let (relink, units_moved) = {
            let _guards = self.lock_groups(&[&old_group, &new_group]).await;

            let relink = self.relink_locked(&old_group, &new_group).await?;
            d.rev_tags.move_tags(old, new).await?;
            let units_moved = d.units.move_units(old, new).await?;
            (relink, units_moved)
        };

        d.resolver.clear_source_page_cache(old);
        d.resolver.clear_source_page_cache(new);
        d.stats.clear(&old_group).await?;
        d.group_index.recache().await?;
        let indexed_keys = d.message_index.rebuild(&d.group_index).await?;

        let update_job_queued = d
            .queue
            .enqueue(Job::update_translatable_page(new, &[]))
            .await?;

        info!(
            "Moved {} -> {}: {} unit pages, {} keys indexed",
            old, new, units_moved, indexed_keys
        );
        Ok(MoveReport {
            old_group,
            new_group,
            relink,
            units_moved,
            indexed_keys,
            update_job_queued,
        })
    }

    /// Tag the revision that made a translatable page ready.
    pub async fn handle_null_revision_insert(
        &self,
        bundle: &TranslatableBundle,
        revision: RevisionId,
    ) -> Result<()> {
        let TranslatableBundle::Page(title) = bundle else {
            return Err(OrchestratorError::BundleTypeMismatch {
                expected: "translatable page",
                found: bundle.kind_name(),
            });
        };

        self.deps
            .rev_tags
            .add_tag(title, RevTag::Ready, revision)
            .await?;
        self.deps.resolver.clear_source_page_cache(title);
        debug!("Null revision {} tagged on {}", revision, title);
        Ok(())
    }

    async fn lock_groups(&self, groups: &[&GroupId]) -> Vec<OwnedMutexGuard<()>> {
        let mut ids: Vec<GroupId> = groups.iter().map(|g| (*g).clone()).collect();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lock = self.locks.entry(id).or_default().value().clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}
