//! Stats Aggregator: per-group, per-language completion counters
//!
//! A snapshot is stale as soon as any unit of its group changes. The cached
//! read path (`for_group`) may return a stale snapshot; the orchestrator
//! always recomputes with `NO_CACHE | IMMEDIATE_WRITES` after unit updates.
//!
//! Concurrent recomputes of the same group race; the last write wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::BitOr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use transpage_storage::{GroupId, LanguageCode};

use crate::error::{OrchestratorError, Result};
use crate::group::MessageGroup;
use crate::group_index::GroupIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsFlags(u8);

impl StatsFlags {
    /// Ignore cached snapshots and read unit state.
    pub const NO_CACHE: StatsFlags = StatsFlags(0b01);
    /// Persist the snapshot before returning instead of deferring the write.
    pub const IMMEDIATE_WRITES: StatsFlags = StatsFlags(0b10);

    pub const fn empty() -> Self {
        StatsFlags(0)
    }

    pub const fn contains(&self, other: StatsFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for StatsFlags {
    type Output = StatsFlags;

    fn bitor(self, rhs: StatsFlags) -> StatsFlags {
        StatsFlags(self.0 | rhs.0)
    }
}

/// Counters for one language. `translated` excludes fuzzy translations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LanguageStats {
    pub total: usize,
    pub translated: usize,
    pub fuzzy: usize,
}

impl LanguageStats {
    pub fn add(&mut self, other: &LanguageStats) {
        self.total += other.total;
        self.translated += other.translated;
        self.fuzzy += other.fuzzy;
    }

    pub fn translated_percent(&self) -> f64 {
        percent(self.translated, self.total)
    }

    pub fn fuzzy_percent(&self) -> f64 {
        percent(self.fuzzy, self.total)
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub group: GroupId,
    pub languages: BTreeMap<LanguageCode, LanguageStats>,
    pub computed_at: DateTime<Utc>,
}

impl StatsSnapshot {
    pub fn language(&self, language: &LanguageCode) -> Option<&LanguageStats> {
        self.languages.get(language)
    }
}

/// Durable snapshot storage.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn save(&self, snapshot: &StatsSnapshot) -> Result<()>;

    async fn load(&self, group: &GroupId) -> Result<Option<StatsSnapshot>>;

    async fn clear(&self, group: &GroupId) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryStatsStore {
    snapshots: DashMap<GroupId, StatsSnapshot>,
    writes: AtomicUsize,
}

impl InMemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatsStore for InMemoryStatsStore {
    async fn save(&self, snapshot: &StatsSnapshot) -> Result<()> {
        self.snapshots.insert(snapshot.group.clone(), snapshot.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, group: &GroupId) -> Result<Option<StatsSnapshot>> {
        Ok(self.snapshots.get(group).map(|s| s.value().clone()))
    }

    async fn clear(&self, group: &GroupId) -> Result<()> {
        self.snapshots.remove(group);
        Ok(())
    }
}

pub struct StatsAggregator {
    index: Arc<GroupIndex>,
    store: Arc<dyn StatsStore>,
    cache: DashMap<GroupId, StatsSnapshot>,
    deferred: Mutex<Vec<StatsSnapshot>>,
}

impl StatsAggregator {
    pub fn new(index: Arc<GroupIndex>, store: Arc<dyn StatsStore>) -> Self {
        Self {
            index,
            store,
            cache: DashMap::new(),
            deferred: Mutex::new(Vec::new()),
        }
    }

    pub async fn recompute(&self, group_id: &GroupId, flags: StatsFlags) -> Result<StatsSnapshot> {
        if !flags.contains(StatsFlags::NO_CACHE) {
            if let Some(snapshot) = self.cached(group_id).await? {
                return Ok(snapshot);
            }
        }

        let group = self
            .index
            .get(group_id)
            .await?
            .ok_or_else(|| OrchestratorError::GroupNotFound(group_id.to_string()))?;

        let mut languages: BTreeMap<LanguageCode, LanguageStats> = BTreeMap::new();
        for leaf in self.index.leaf_groups(group).await? {
            for (language, stats) in Self::count(leaf.as_ref()).await? {
                languages.entry(language).or_default().add(&stats);
            }
        }

        let snapshot = StatsSnapshot {
            group: group_id.clone(),
            languages,
            computed_at: Utc::now(),
        };
        self.cache.insert(group_id.clone(), snapshot.clone());

        if flags.contains(StatsFlags::IMMEDIATE_WRITES) {
            self.store.save(&snapshot).await?;
        } else {
            self.deferred.lock().push(snapshot.clone());
        }

        debug!(
            "Stats for {} recomputed: {} languages",
            group_id,
            snapshot.languages.len()
        );
        Ok(snapshot)
    }

    /// Cached read path; computes only if nothing is cached or stored.
    pub async fn for_group(&self, group_id: &GroupId) -> Result<StatsSnapshot> {
        self.recompute(group_id, StatsFlags::empty()).await
    }

    /// Translated percentage per language.
    pub async fn percentages(&self, group_id: &GroupId) -> Result<BTreeMap<LanguageCode, f64>> {
        let snapshot = self.for_group(group_id).await?;
        Ok(snapshot
            .languages
            .iter()
            .map(|(language, stats)| (language.clone(), stats.translated_percent()))
            .collect())
    }

    /// Write deferred snapshots, oldest first. Returns the number written.
    ///
    /// On a failed save the unsaved snapshots are deferred again, ahead of
    /// any deferred in the meantime.
    pub async fn flush_deferred(&self) -> Result<usize> {
        let pending = std::mem::take(&mut *self.deferred.lock());
        let mut written = 0;
        let mut remaining = pending.into_iter();

        while let Some(snapshot) = remaining.next() {
            if let Err(e) = self.store.save(&snapshot).await {
                let mut deferred = self.deferred.lock();
                let newer = std::mem::take(&mut *deferred);
                deferred.push(snapshot);
                deferred.extend(remaining);
                deferred.extend(newer);
                warn!(
                    "Stats flush stopped after {} snapshots, {} kept: {}",
                    written,
                    deferred.len(),
                    e
                );
                return Err(e);
            }
            written += 1;
        }

        if written > 0 {
            info!("Flushed {} deferred stats snapshots", written);
        }
        Ok(written)
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.lock().len()
    }

    pub async fn clear(&self, group_id: &GroupId) -> Result<()> {
        self.cache.remove(group_id);
        self.deferred.lock().retain(|s| &s.group != group_id);
        self.store.clear(group_id).await
    }

    async fn cached(&self, group_id: &GroupId) -> Result<Option<StatsSnapshot>> {
        if let Some(snapshot) = self.cache.get(group_id).map(|s| s.value().clone()) {
            return Ok(Some(snapshot));
        }
        let stored = self.store.load(group_id).await?;
        if let Some(snapshot) = &stored {
            self.cache.insert(group_id.clone(), snapshot.clone());
        }
        Ok(stored)
    }

    /// Counters of one message-holding group. The source language is always
    /// complete.
    async fn count(group: &dyn MessageGroup) -> Result<BTreeMap<LanguageCode, LanguageStats>> {
        let definitions = group.definitions().await?;
        let total = definitions.len();

        let mut languages = BTreeMap::new();
        languages.insert(
            group.source_language().clone(),
            LanguageStats {
                total,
                translated: total,
                fuzzy: 0,
            },
        );

        for language in group.translation_languages().await? {
            let translations = group.translations(&language).await?;
            let mut stats = LanguageStats {
                total,
                ..Default::default()
            };
            for key in definitions.keys() {
                match translations.get(key) {
                    Some(t) if t.fuzzy => stats.fuzzy += 1,
                    Some(_) => stats.translated += 1,
                    None => {}
                }
            }
            languages.insert(language, stats);
        }
        Ok(languages)
    }
}
