//! Group Index: process-wide cache of message groups
//!
//! Groups come from registered [`GroupSource`]s. Resolved instances and their
//! message keys are cached until invalidated; invalidation is per group
//! (`invalidate`) or whole-process (`clear_process_cache`, `recache`).
//! Groups whose `exists()` is false are skipped without error. Ids that no
//! source knows are remembered as missing until invalidated the same way.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use transpage_storage::{
    DocumentStore, GroupId, LanguageCode, MetadataKey, MetadataStore, RevTag, RevTagStore,
    UnitStore,
};

use crate::error::Result;
use crate::group::{AggregateGroup, GroupKind, MessageGroup, WikiPageGroup};

/// Supplies message groups to the index.
#[async_trait]
pub trait GroupSource: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> Result<Vec<Arc<dyn MessageGroup>>>;
}

/// One [`WikiPageGroup`] per page carrying the mark tag.
pub struct PageGroupSource {
    rev_tags: Arc<dyn RevTagStore>,
    docs: Arc<dyn DocumentStore>,
    units: Arc<dyn UnitStore>,
    default_language: LanguageCode,
}

impl PageGroupSource {
    pub fn new(
        rev_tags: Arc<dyn RevTagStore>,
        docs: Arc<dyn DocumentStore>,
        units: Arc<dyn UnitStore>,
        default_language: LanguageCode,
    ) -> Self {
        Self {
            rev_tags,
            docs,
            units,
            default_language,
        }
    }
}

#[async_trait]
impl GroupSource for PageGroupSource {
    fn name(&self) -> &str {
        "translatable-pages"
    }

    async fn load(&self) -> Result<Vec<Arc<dyn MessageGroup>>> {
        let pages = self.rev_tags.pages_with_tag(RevTag::Mark).await?;

        let mut groups: Vec<Arc<dyn MessageGroup>> = Vec::with_capacity(pages.len());
        for page in pages {
            let language = self
                .docs
                .page_language(&page)
                .await?
                .unwrap_or_else(|| self.default_language.clone());
            groups.push(Arc::new(WikiPageGroup::new(page, language, self.units.clone())));
        }
        Ok(groups)
    }
}

/// Groups built up front (file-backed groups, workflow states).
#[derive(Default)]
pub struct StaticGroupSource {
    groups: Vec<Arc<dyn MessageGroup>>,
}

impl StaticGroupSource {
    pub fn new(groups: Vec<Arc<dyn MessageGroup>>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl GroupSource for StaticGroupSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn load(&self) -> Result<Vec<Arc<dyn MessageGroup>>> {
        Ok(self.groups.clone())
    }
}

/// Aggregates are the groups that have a `subgroups` metadata entry.
pub struct AggregateGroupSource {
    metadata: Arc<dyn MetadataStore>,
    source_language: LanguageCode,
}

impl AggregateGroupSource {
    pub fn new(metadata: Arc<dyn MetadataStore>, source_language: LanguageCode) -> Self {
        Self {
            metadata,
            source_language,
        }
    }
}

#[async_trait]
impl GroupSource for AggregateGroupSource {
    fn name(&self) -> &str {
        "aggregates"
    }

    async fn load(&self) -> Result<Vec<Arc<dyn MessageGroup>>> {
        let entries = self.metadata.groups_with_key(MetadataKey::Subgroups).await?;
        Ok(entries
            .into_iter()
            .map(|(id, _)| {
                let label = id.to_string();
                Arc::new(AggregateGroup::new(
                    id,
                    label,
                    self.source_language.clone(),
                    self.metadata.clone(),
                )) as Arc<dyn MessageGroup>
            })
            .collect())
    }
}

pub struct GroupIndex {
    sources: Vec<Arc<dyn GroupSource>>,
    groups: DashMap<GroupId, Arc<dyn MessageGroup>>,
    keys: DashMap<GroupId, Arc<BTreeSet<String>>>,
    missing: DashSet<GroupId>,
    loaded: AtomicBool,
}

impl GroupIndex {
    pub fn new(sources: Vec<Arc<dyn GroupSource>>) -> Self {
        Self {
            sources,
            groups: DashMap::new(),
            keys: DashMap::new(),
            missing: DashSet::new(),
            loaded: AtomicBool::new(false),
        }
    }

    /// Resolve a group, loading from the sources on the first miss.
    pub async fn get(&self, id: &GroupId) -> Result<Option<Arc<dyn MessageGroup>>> {
        if let Some(group) = self.cached(id) {
            return Ok(Some(group));
        }
        if self.missing.contains(id) {
            return Ok(None);
        }

        self.load_missing().await?;
        let group = self.cached(id);
        if group.is_none() {
            debug!("Group {} is unknown to every source", id);
            self.missing.insert(id.clone());
        }
        Ok(group)
    }

    /// Cached instance only; never touches the sources.
    pub fn cached(&self, id: &GroupId) -> Option<Arc<dyn MessageGroup>> {
        self.groups.get(id).map(|g| g.value().clone())
    }

    /// Message keys of a group. Aggregates resolve to the union of their
    /// members' keys.
    pub async fn keys(&self, id: &GroupId) -> Result<Option<Arc<BTreeSet<String>>>> {
        if let Some(keys) = self.keys.get(id).map(|k| k.value().clone()) {
            return Ok(Some(keys));
        }

        let Some(group) = self.get(id).await? else {
            return Ok(None);
        };

        let mut keys = BTreeSet::new();
        for leaf in self.leaf_groups(group).await? {
            keys.extend(leaf.definitions().await?.into_keys());
        }

        let keys = Arc::new(keys);
        self.keys.insert(id.clone(), keys.clone());
        Ok(Some(keys))
    }

    /// Non-aggregate groups reachable from `group`, itself included.
    /// Unknown members and cycles are skipped.
    pub async fn leaf_groups(
        &self,
        group: Arc<dyn MessageGroup>,
    ) -> Result<Vec<Arc<dyn MessageGroup>>> {
        let mut leaves = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![group];

        while let Some(group) = stack.pop() {
            if !seen.insert(group.id().clone()) {
                continue;
            }
            if group.kind() != GroupKind::Aggregate {
                leaves.push(group);
                continue;
            }
            // Reverse so members are visited in list order
            for member in group.subgroups().await?.into_iter().rev() {
                match self.get(&member).await? {
                    Some(member) => stack.push(member),
                    None => debug!("Aggregate {} lists unknown group {}", group.id(), member),
                }
            }
        }
        Ok(leaves)
    }

    /// Drop one group from the cache. Returns whether it was cached.
    pub fn invalidate(&self, id: &GroupId) -> bool {
        self.keys.remove(id);
        self.missing.remove(id);
        let removed = self.groups.remove(id).is_some();
        debug!("Invalidated group {} (cached: {})", id, removed);
        removed
    }

    pub fn clear_process_cache(&self) {
        self.groups.clear();
        self.keys.clear();
        self.missing.clear();
        self.loaded.store(false, Ordering::SeqCst);
    }

    /// Drop everything and load all sources again.
    pub async fn recache(&self) -> Result<usize> {
        self.clear_process_cache();
        self.load_missing().await?;
        let count = self.groups.len();
        info!("Group index recached: {} groups", count);
        Ok(count)
    }

    pub async fn groups_by_kind(&self, kind: GroupKind) -> Result<Vec<Arc<dyn MessageGroup>>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|g| g.kind() == kind)
            .collect())
    }

    /// Every group, ordered by id.
    pub async fn all(&self) -> Result<Vec<Arc<dyn MessageGroup>>> {
        if !self.loaded.load(Ordering::SeqCst) {
            self.load_missing().await?;
        }
        let mut groups: Vec<Arc<dyn MessageGroup>> =
            self.groups.iter().map(|g| g.value().clone()).collect();
        groups.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(groups)
    }

    /// Insert groups not yet cached. Cached instances are kept so their own
    /// caches survive.
    async fn load_missing(&self) -> Result<()> {
        for source in &self.sources {
            for group in source.load().await? {
                if !group.exists() {
                    debug!(
                        "Skipping group {} from {}: does not exist",
                        group.id(),
                        source.name()
                    );
                    continue;
                }
                self.groups.entry(group.id().clone()).or_insert(group);
            }
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }
}
