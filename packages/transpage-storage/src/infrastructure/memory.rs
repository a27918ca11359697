//! In-memory storage adapters
//!
//! Used by tests and by the worker when no database path is configured.
//! All state sits behind `parking_lot` locks; no lock is held across an
//! await point.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::domain::{
    DocumentStore, GroupId, LanguageCode, MetadataKey, MetadataStore, PageTitle, RevTag,
    RevTagStore, RevisionId, TranslationUnit, UnitRecord, UnitRevision, UnitStore, UnitTitle,
};
use crate::{Result, StorageError};

// ═══════════════════════════════════════════════════════════════════════════
// Document store
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct StoredPage {
    text: String,
    revision: RevisionId,
    editor: String,
    summary: String,
}

/// Page store with switchable failure modes for exercising degraded paths.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    pages: RwLock<BTreeMap<PageTitle, StoredPage>>,
    languages: RwLock<HashMap<PageTitle, LanguageCode>>,
    purged: Mutex<Vec<PageTitle>>,
    next_revision: AtomicU64,
    writes: AtomicUsize,
    replication_lagging: AtomicBool,
    purge_failing: AtomicBool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `wait_for_replication` report a timeout.
    pub fn set_replication_lagging(&self, lagging: bool) {
        self.replication_lagging.store(lagging, Ordering::SeqCst);
    }

    /// Make `purge` fail.
    pub fn set_purge_failing(&self, failing: bool) {
        self.purge_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_page_language(&self, title: &PageTitle, language: LanguageCode) {
        self.languages.write().insert(title.clone(), language);
    }

    /// Pages purged so far, in call order.
    pub fn purged(&self) -> Vec<PageTitle> {
        self.purged.lock().clone()
    }

    /// Number of `update_content` calls that produced a revision.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Editor and summary of the latest revision.
    pub fn last_edit(&self, title: &PageTitle) -> Option<(String, String)> {
        self.pages
            .read()
            .get(title)
            .map(|p| (p.editor.clone(), p.summary.clone()))
    }

    pub fn latest_revision(&self, title: &PageTitle) -> Option<RevisionId> {
        self.pages.read().get(title).map(|p| p.revision)
    }

    fn allocate_revision(&self) -> RevisionId {
        RevisionId(self.next_revision.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_content(&self, title: &PageTitle) -> Result<Option<String>> {
        Ok(self.pages.read().get(title).map(|p| p.text.clone()))
    }

    async fn update_content(
        &self,
        title: &PageTitle,
        text: &str,
        editor: &str,
        summary: &str,
    ) -> Result<RevisionId> {
        let revision = self.allocate_revision();
        self.pages.write().insert(
            title.clone(),
            StoredPage {
                text: text.to_string(),
                revision,
                editor: editor.to_string(),
                summary: summary.to_string(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(revision)
    }

    async fn wait_for_replication(&self, timeout: Duration) -> Result<bool> {
        if self.replication_lagging.load(Ordering::SeqCst) {
            // Simulated lag never catches up; cap the wait so tests stay fast
            tokio::time::sleep(timeout.min(Duration::from_millis(5))).await;
            return Ok(false);
        }
        Ok(true)
    }

    async fn subpages(&self, title: &PageTitle) -> Result<Vec<PageTitle>> {
        Ok(self
            .pages
            .read()
            .keys()
            .filter(|candidate| title.is_parent_of(candidate))
            .cloned()
            .collect())
    }

    async fn page_language(&self, title: &PageTitle) -> Result<Option<LanguageCode>> {
        Ok(self.languages.read().get(title).cloned())
    }

    async fn purge(&self, title: &PageTitle) -> Result<()> {
        if self.purge_failing.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(format!(
                "Purge backend unreachable for {}",
                title
            )));
        }
        self.purged.lock().push(title.clone());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit store
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct UnitState {
    current: BTreeMap<UnitTitle, UnitRecord>,
    history: HashMap<UnitTitle, Vec<UnitRevision>>,
    sections: HashMap<PageTitle, Vec<TranslationUnit>>,
    next_revision: u64,
}

impl UnitState {
    fn write(&mut self, title: &UnitTitle, text: &str, fuzzy: bool) -> RevisionId {
        self.next_revision += 1;
        let revision = RevisionId(self.next_revision);
        let now = Utc::now();

        self.current.insert(
            title.clone(),
            UnitRecord {
                title: title.clone(),
                text: text.to_string(),
                fuzzy,
                revision,
                updated_at: now,
            },
        );
        self.history
            .entry(title.clone())
            .or_default()
            .push(UnitRevision {
                revision,
                text: text.to_string(),
                fuzzy,
                timestamp: now,
            });
        revision
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUnitStore {
    state: Mutex<UnitState>,
    updates: AtomicUsize,
    failing_units: RwLock<HashSet<String>>,
}

impl InMemoryUnitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `update_unit` calls that were applied.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Make writes to any unit with this id fail.
    pub fn fail_unit(&self, unit_id: impl Into<String>) {
        self.failing_units.write().insert(unit_id.into());
    }
}

#[async_trait]
impl UnitStore for InMemoryUnitStore {
    async fn update_unit(
        &self,
        title: &UnitTitle,
        text: &str,
        fuzzy: bool,
        source_language: &LanguageCode,
    ) -> Result<RevisionId> {
        if self.failing_units.read().contains(&title.unit_id) {
            return Err(StorageError::database(format!("Write rejected for {}", title)));
        }

        let is_source = &title.language == source_language;
        let mut state = self.state.lock();
        // The definition itself is never fuzzy; the flag applies to its translations
        let revision = state.write(title, text, fuzzy && !is_source);

        if is_source && fuzzy {
            let stale: Vec<(UnitTitle, String)> = state
                .current
                .values()
                .filter(|r| {
                    r.title.page == title.page
                        && r.title.unit_id == title.unit_id
                        && &r.title.language != source_language
                        && !r.fuzzy
                })
                .map(|r| (r.title.clone(), r.text.clone()))
                .collect();
            for (translation, text) in stale {
                state.write(&translation, &text, true);
            }
        }

        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(revision)
    }

    async fn get_unit(&self, title: &UnitTitle) -> Result<Option<UnitRecord>> {
        Ok(self.state.lock().current.get(title).cloned())
    }

    async fn units_for_page(&self, page: &PageTitle) -> Result<Vec<UnitRecord>> {
        Ok(self
            .state
            .lock()
            .current
            .values()
            .filter(|r| &r.title.page == page)
            .cloned()
            .collect())
    }

    async fn unit_history(&self, title: &UnitTitle) -> Result<Vec<UnitRevision>> {
        Ok(self
            .state
            .lock()
            .history
            .get(title)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_sections(&self, page: &PageTitle, units: &[TranslationUnit]) -> Result<()> {
        self.state.lock().sections.insert(page.clone(), units.to_vec());
        Ok(())
    }

    async fn sections(&self, page: &PageTitle) -> Result<Vec<TranslationUnit>> {
        Ok(self
            .state
            .lock()
            .sections
            .get(page)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_sections(&self, page: &PageTitle) -> Result<()> {
        self.state.lock().sections.remove(page);
        Ok(())
    }

    async fn move_units(&self, old: &PageTitle, new: &PageTitle) -> Result<usize> {
        let mut state = self.state.lock();

        if let Some(sections) = state.sections.remove(old) {
            state.sections.insert(new.clone(), sections);
        }

        let moved: Vec<UnitTitle> = state
            .current
            .keys()
            .filter(|t| &t.page == old)
            .cloned()
            .collect();
        for title in &moved {
            let renamed = UnitTitle::new(new.clone(), title.unit_id.clone(), title.language.clone());
            if let Some(mut record) = state.current.remove(title) {
                record.title = renamed.clone();
                state.current.insert(renamed.clone(), record);
            }
            if let Some(history) = state.history.remove(title) {
                state.history.insert(renamed, history);
            }
        }
        Ok(moved.len())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Metadata store
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    entries: RwLock<BTreeMap<(GroupId, MetadataKey), String>>,
    preloads: AtomicUsize,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full contents, for before/after comparisons.
    pub fn snapshot(&self) -> BTreeMap<(GroupId, MetadataKey), String> {
        self.entries.read().clone()
    }

    pub fn preload_count(&self) -> usize {
        self.preloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get(&self, group: &GroupId, key: MetadataKey) -> Result<Option<String>> {
        Ok(self.entries.read().get(&(group.clone(), key)).cloned())
    }

    async fn set(&self, group: &GroupId, key: MetadataKey, value: Option<&str>) -> Result<()> {
        let mut entries = self.entries.write();
        match value {
            Some(v) => {
                entries.insert((group.clone(), key), v.to_string());
            }
            None => {
                entries.remove(&(group.clone(), key));
            }
        }
        Ok(())
    }

    async fn groups_with_key(&self, key: MetadataKey) -> Result<Vec<(GroupId, String)>> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|((_, k), _)| *k == key)
            .map(|((g, _), v)| (g.clone(), v.clone()))
            .collect())
    }

    async fn preload(&self, _groups: &[GroupId]) -> Result<()> {
        self.preloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Revision tag store
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct InMemoryRevTagStore {
    tags: RwLock<BTreeMap<(PageTitle, RevTag), Vec<RevisionId>>>,
}

impl InMemoryRevTagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevTagStore for InMemoryRevTagStore {
    async fn add_tag(&self, page: &PageTitle, tag: RevTag, revision: RevisionId) -> Result<()> {
        let mut tags = self.tags.write();
        let revisions = tags.entry((page.clone(), tag)).or_default();
        if !revisions.contains(&revision) {
            revisions.push(revision);
            revisions.sort();
        }
        Ok(())
    }

    async fn remove_tags(&self, page: &PageTitle, tags: &[RevTag]) -> Result<()> {
        let mut map = self.tags.write();
        for tag in tags {
            map.remove(&(page.clone(), *tag));
        }
        Ok(())
    }

    async fn latest_revision(&self, page: &PageTitle, tag: RevTag) -> Result<Option<RevisionId>> {
        Ok(self
            .tags
            .read()
            .get(&(page.clone(), tag))
            .and_then(|revisions| revisions.last().copied()))
    }

    async fn pages_with_tag(&self, tag: RevTag) -> Result<Vec<PageTitle>> {
        Ok(self
            .tags
            .read()
            .iter()
            .filter(|((_, t), revisions)| *t == tag && !revisions.is_empty())
            .map(|((page, _), _)| page.clone())
            .collect())
    }

    async fn move_tags(&self, old: &PageTitle, new: &PageTitle) -> Result<()> {
        let mut map = self.tags.write();
        let moved: Vec<RevTag> = map
            .keys()
            .filter(|(page, _)| page == old)
            .map(|(_, tag)| *tag)
            .collect();
        for tag in moved {
            if let Some(revisions) = map.remove(&(old.clone(), tag)) {
                map.entry((new.clone(), tag)).or_default().extend(revisions);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lang(code: &str) -> LanguageCode {
        LanguageCode::new(code).unwrap()
    }

    fn unit_title(page: &str, id: &str, code: &str) -> UnitTitle {
        UnitTitle::new(PageTitle::new(page).unwrap(), id, lang(code))
    }

    #[tokio::test]
    async fn test_source_fuzzy_write_marks_translations() {
        let store = InMemoryUnitStore::new();
        let en = lang("en");
        let source = unit_title("Welcome", "1", "en");
        let fi = unit_title("Welcome", "1", "fi");

        store.update_unit(&source, "Hello", false, &en).await.unwrap();
        store.update_unit(&fi, "Hei", false, &en).await.unwrap();
        store.update_unit(&source, "Hello!", true, &en).await.unwrap();

        let translation = store.get_unit(&fi).await.unwrap().unwrap();
        assert!(translation.fuzzy);
        assert_eq!(translation.text, "Hei");

        // Re-translating clears the flag again
        store.update_unit(&fi, "Hei!", false, &en).await.unwrap();
        assert!(!store.get_unit(&fi).await.unwrap().unwrap().fuzzy);
    }

    #[tokio::test]
    async fn test_source_write_is_never_fuzzy() {
        let store = InMemoryUnitStore::new();
        let en = lang("en");
        let source = unit_title("Welcome", "1", "en");

        store.update_unit(&source, "Hello", true, &en).await.unwrap();
        assert!(!store.get_unit(&source).await.unwrap().unwrap().fuzzy);
    }

    #[tokio::test]
    async fn test_move_units() {
        let store = InMemoryUnitStore::new();
        let en = lang("en");
        let old = PageTitle::new("Old").unwrap();
        let new = PageTitle::new("New").unwrap();

        store
            .save_sections(&old, &[TranslationUnit::new("1", "Hi", crate::UnitChange::New)])
            .await
            .unwrap();
        store.update_unit(&unit_title("Old", "1", "en"), "Hi", false, &en).await.unwrap();
        store.update_unit(&unit_title("Old", "1", "fi"), "Hei", false, &en).await.unwrap();

        assert_eq!(store.move_units(&old, &new).await.unwrap(), 2);
        assert!(store.sections(&old).await.unwrap().is_empty());
        assert_eq!(store.sections(&new).await.unwrap().len(), 1);
        assert!(store.units_for_page(&old).await.unwrap().is_empty());
        let fi = store.get_unit(&unit_title("New", "1", "fi")).await.unwrap().unwrap();
        assert_eq!(fi.text, "Hei");
        assert_eq!(store.unit_history(&unit_title("New", "1", "fi")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_retained() {
        let store = InMemoryUnitStore::new();
        let en = lang("en");
        let title = unit_title("Welcome", "1", "en");

        store.update_unit(&title, "v1", false, &en).await.unwrap();
        store.update_unit(&title, "v2", true, &en).await.unwrap();

        let history = store.unit_history(&title).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["v1", "v2"]);
        assert_eq!(store.update_count(), 2);
    }

    #[tokio::test]
    async fn test_metadata_absent_differs_from_empty() {
        let store = InMemoryMetadataStore::new();
        let group = GroupId::new("page-Welcome").unwrap();

        assert_eq!(store.get(&group, MetadataKey::Version).await.unwrap(), None);
        store.set(&group, MetadataKey::Version, Some("")).await.unwrap();
        assert_eq!(
            store.get(&group, MetadataKey::Version).await.unwrap(),
            Some(String::new())
        );
        store.set(&group, MetadataKey::Version, None).await.unwrap();
        assert_eq!(store.get(&group, MetadataKey::Version).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rev_tags_move() {
        let store = InMemoryRevTagStore::new();
        let old = PageTitle::new("Old").unwrap();
        let new = PageTitle::new("New").unwrap();

        store.add_tag(&old, RevTag::Mark, RevisionId(3)).await.unwrap();
        store.add_tag(&old, RevTag::Mark, RevisionId(7)).await.unwrap();
        store.move_tags(&old, &new).await.unwrap();

        assert_eq!(store.latest_revision(&old, RevTag::Mark).await.unwrap(), None);
        assert_eq!(
            store.latest_revision(&new, RevTag::Mark).await.unwrap(),
            Some(RevisionId(7))
        );
        assert_eq!(store.pages_with_tag(RevTag::Mark).await.unwrap(), vec![new]);
    }

    #[tokio::test]
    async fn test_document_store_failure_modes() {
        let store = InMemoryDocumentStore::new();
        let title = PageTitle::new("Welcome").unwrap();

        assert!(store.wait_for_replication(Duration::from_secs(1)).await.unwrap());
        store.set_replication_lagging(true);
        assert!(!store.wait_for_replication(Duration::from_secs(1)).await.unwrap());

        store.purge(&title).await.unwrap();
        store.set_purge_failing(true);
        assert!(store.purge(&title).await.is_err());
        assert_eq!(store.purged(), vec![title]);
    }

    #[tokio::test]
    async fn test_subpages() {
        let store = InMemoryDocumentStore::new();
        let base = PageTitle::new("Welcome").unwrap();
        for title in ["Welcome", "Welcome/fi", "Welcome/de", "Welcome/fi/x", "Other/fi"] {
            store
                .update_content(&PageTitle::new(title).unwrap(), "x", "tester", "")
                .await
                .unwrap();
        }

        let subpages: Vec<String> = store
            .subpages(&base)
            .await
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(subpages, vec!["Welcome/de", "Welcome/fi"]);
    }
}
