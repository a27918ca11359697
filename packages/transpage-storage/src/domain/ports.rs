//! Storage ports
//!
//! The orchestration layer only talks to storage through these traits.
//! In-memory adapters live in `infrastructure::memory`, SQLite adapters in
//! `infrastructure::sqlite`.

use async_trait::async_trait;
use std::time::Duration;

use super::{
    GroupId, LanguageCode, MetadataKey, PageTitle, RevTag, RevisionId, TranslationUnit,
    UnitRecord, UnitRevision, UnitTitle,
};
use crate::Result;

/// Versioned page storage (external collaborator).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current content, `None` if the page does not exist.
    async fn get_content(&self, title: &PageTitle) -> Result<Option<String>>;

    /// Save a new revision.
    async fn update_content(
        &self,
        title: &PageTitle,
        text: &str,
        editor: &str,
        summary: &str,
    ) -> Result<RevisionId>;

    /// Block until replicas caught up; `false` on timeout.
    async fn wait_for_replication(&self, timeout: Duration) -> Result<bool>;

    /// Existing direct subpages of `title`.
    async fn subpages(&self, title: &PageTitle) -> Result<Vec<PageTitle>>;

    /// Content language of a page, if one was set explicitly.
    async fn page_language(&self, title: &PageTitle) -> Result<Option<LanguageCode>>;

    /// Drop cached rendered output of a page.
    async fn purge(&self, title: &PageTitle) -> Result<()>;
}

/// Unit pages and the sections recorded when a page was marked.
#[async_trait]
pub trait UnitStore: Send + Sync {
    /// Write a unit page revision.
    ///
    /// A source-language write with `fuzzy = true` marks every existing
    /// translation of the unit fuzzy; the source record itself stays clean.
    /// A translation write sets its own flag.
    async fn update_unit(
        &self,
        title: &UnitTitle,
        text: &str,
        fuzzy: bool,
        source_language: &LanguageCode,
    ) -> Result<RevisionId>;

    async fn get_unit(&self, title: &UnitTitle) -> Result<Option<UnitRecord>>;

    /// Current records of every unit page under `page`, all languages.
    async fn units_for_page(&self, page: &PageTitle) -> Result<Vec<UnitRecord>>;

    /// Oldest first.
    async fn unit_history(&self, title: &UnitTitle) -> Result<Vec<UnitRevision>>;

    /// Replace the recorded sections of a page.
    async fn save_sections(&self, page: &PageTitle, units: &[TranslationUnit]) -> Result<()>;

    /// Sections in page order.
    async fn sections(&self, page: &PageTitle) -> Result<Vec<TranslationUnit>>;

    async fn remove_sections(&self, page: &PageTitle) -> Result<()>;

    /// Re-key sections and unit pages (with history) of `old` to `new`.
    /// Returns the number of unit pages moved.
    async fn move_units(&self, old: &PageTitle, new: &PageTitle) -> Result<usize>;
}

/// Durable `(group id, key) -> value` store.
///
/// Absence is distinct from the empty string.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, group: &GroupId, key: MetadataKey) -> Result<Option<String>>;

    /// `None` clears the entry.
    async fn set(&self, group: &GroupId, key: MetadataKey, value: Option<&str>) -> Result<()>;

    /// All groups that have `key` set, with their values.
    async fn groups_with_key(&self, key: MetadataKey) -> Result<Vec<(GroupId, String)>>;

    /// Warm any read cache for the given groups in one round-trip.
    async fn preload(&self, _groups: &[GroupId]) -> Result<()> {
        Ok(())
    }
}

/// Revision tags of source pages.
#[async_trait]
pub trait RevTagStore: Send + Sync {
    async fn add_tag(&self, page: &PageTitle, tag: RevTag, revision: RevisionId) -> Result<()>;

    async fn remove_tags(&self, page: &PageTitle, tags: &[RevTag]) -> Result<()>;

    async fn latest_revision(&self, page: &PageTitle, tag: RevTag) -> Result<Option<RevisionId>>;

    /// Sorted by title.
    async fn pages_with_tag(&self, tag: RevTag) -> Result<Vec<PageTitle>>;

    /// Re-key every tag of `old` to `new`.
    async fn move_tags(&self, old: &PageTitle, new: &PageTitle) -> Result<()>;
}
