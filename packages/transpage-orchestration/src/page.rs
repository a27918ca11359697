//! Translatable page projection
//!
//! A [`TranslatablePage`] is computed from the page title and the stores;
//! it is never persisted on its own. [`PageResolver`] caches projections per
//! source page until `clear_source_page_cache` is called.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use transpage_storage::{
    DocumentStore, GroupId, LanguageCode, PageTitle, RevTag, RevTagStore, RevisionId, UnitStore,
};

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatablePage {
    pub title: PageTitle,
    pub group_id: GroupId,
    pub source_language: LanguageCode,
    /// Unit ids in page order.
    pub units: Vec<String>,
    /// Existing `Title/xx` pages, source language excluded, sorted.
    pub translation_pages: Vec<PageTitle>,
    pub marked_revision: RevisionId,
}

impl TranslatablePage {
    /// `Title/<source language>`
    pub fn source_translation_page(&self) -> PageTitle {
        self.title.subpage(self.source_language.as_str())
    }

    pub fn target_languages(&self) -> Vec<LanguageCode> {
        self.translation_pages
            .iter()
            .filter_map(PageTitle::language_suffix)
            .collect()
    }

    /// Every translation page plus the source-language page, exactly once.
    pub fn render_targets(&self) -> Vec<PageTitle> {
        let source = self.source_translation_page();
        let mut targets = self.translation_pages.clone();
        if !targets.contains(&source) {
            targets.push(source);
        }
        targets
    }
}

/// Things that can receive a null-revision tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslatableBundle {
    Page(PageTitle),
    MessageBundle(PageTitle),
}

impl TranslatableBundle {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TranslatableBundle::Page(_) => "translatable page",
            TranslatableBundle::MessageBundle(_) => "message bundle",
        }
    }

    pub fn title(&self) -> &PageTitle {
        match self {
            TranslatableBundle::Page(title) | TranslatableBundle::MessageBundle(title) => title,
        }
    }
}

pub struct PageResolver {
    docs: Arc<dyn DocumentStore>,
    units: Arc<dyn UnitStore>,
    rev_tags: Arc<dyn RevTagStore>,
    default_source_language: LanguageCode,
    cache: DashMap<PageTitle, TranslatablePage>,
}

impl PageResolver {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        units: Arc<dyn UnitStore>,
        rev_tags: Arc<dyn RevTagStore>,
        default_source_language: LanguageCode,
    ) -> Self {
        Self {
            docs,
            units,
            rev_tags,
            default_source_language,
            cache: DashMap::new(),
        }
    }

    /// Fails with `NotTranslatable` unless the page carries the mark tag.
    pub async fn resolve(&self, title: &PageTitle) -> Result<TranslatablePage> {
        if let Some(page) = self.cache.get(title).map(|p| p.value().clone()) {
            return Ok(page);
        }

        let marked_revision = self
            .rev_tags
            .latest_revision(title, RevTag::Mark)
            .await?
            .ok_or_else(|| OrchestratorError::NotTranslatable(title.to_string()))?;

        let source_language = self
            .docs
            .page_language(title)
            .await?
            .unwrap_or_else(|| self.default_source_language.clone());

        let units = self
            .units
            .sections(title)
            .await?
            .into_iter()
            .map(|unit| unit.id)
            .collect();

        let mut translation_pages: Vec<PageTitle> = self
            .docs
            .subpages(title)
            .await?
            .into_iter()
            .filter(|p| {
                p.language_suffix()
                    .map_or(false, |language| language != source_language)
            })
            .collect();
        translation_pages.sort();

        let page = TranslatablePage {
            title: title.clone(),
            group_id: GroupId::for_page(title),
            source_language,
            units,
            translation_pages,
            marked_revision,
        };
        self.cache.insert(title.clone(), page.clone());
        Ok(page)
    }

    pub fn default_source_language(&self) -> &LanguageCode {
        &self.default_source_language
    }

    pub fn clear_source_page_cache(&self, title: &PageTitle) {
        if self.cache.remove(title).is_some() {
            debug!("Cleared page cache of {}", title);
        }
    }

    pub fn clear_all(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use transpage_storage::infrastructure::{
        InMemoryDocumentStore, InMemoryRevTagStore, InMemoryUnitStore,
    };
    use transpage_storage::{TranslationUnit, UnitChange};

    fn title(s: &str) -> PageTitle {
        PageTitle::new(s).unwrap()
    }

    struct Fixture {
        docs: Arc<InMemoryDocumentStore>,
        rev_tags: Arc<InMemoryRevTagStore>,
        resolver: PageResolver,
    }

    async fn fixture() -> Fixture {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let units = Arc::new(InMemoryUnitStore::new());
        let rev_tags = Arc::new(InMemoryRevTagStore::new());
        let welcome = title("Welcome");

        units
            .save_sections(
                &welcome,
                &[
                    TranslationUnit::new("1", "Hello", UnitChange::New),
                    TranslationUnit::new("2", "World", UnitChange::New),
                ],
            )
            .await
            .unwrap();
        for page in ["Welcome", "Welcome/fi", "Welcome/en", "Welcome/de", "Welcome/Archive"] {
            docs.update_content(&title(page), "text", "Admin", "").await.unwrap();
        }

        let resolver = PageResolver::new(
            docs.clone(),
            units,
            rev_tags.clone(),
            LanguageCode::new("en").unwrap(),
        );
        Fixture {
            docs,
            rev_tags,
            resolver,
        }
    }

    #[tokio::test]
    async fn test_unmarked_page_is_not_translatable() {
        let f = fixture().await;
        let result = f.resolver.resolve(&title("Welcome")).await;
        assert!(matches!(result, Err(OrchestratorError::NotTranslatable(_))));
    }

    #[tokio::test]
    async fn test_resolve_marked_page() {
        let f = fixture().await;
        f.rev_tags
            .add_tag(&title("Welcome"), RevTag::Mark, RevisionId(7))
            .await
            .unwrap();

        let page = f.resolver.resolve(&title("Welcome")).await.unwrap();
        assert_eq!(page.group_id.as_str(), "page-Welcome");
        assert_eq!(page.units, vec!["1", "2"]);
        assert_eq!(page.translation_pages, vec![title("Welcome/de"), title("Welcome/fi")]);
        assert_eq!(page.marked_revision, RevisionId(7));
        assert_eq!(
            page.render_targets(),
            vec![title("Welcome/de"), title("Welcome/fi"), title("Welcome/en")]
        );
    }

    #[tokio::test]
    async fn test_cache_until_cleared() {
        let f = fixture().await;
        let welcome = title("Welcome");
        f.rev_tags.add_tag(&welcome, RevTag::Mark, RevisionId(1)).await.unwrap();
        f.resolver.resolve(&welcome).await.unwrap();

        f.docs.update_content(&title("Welcome/sv"), "text", "Admin", "").await.unwrap();
        assert_eq!(f.resolver.resolve(&welcome).await.unwrap().translation_pages.len(), 2);

        f.resolver.clear_source_page_cache(&welcome);
        assert_eq!(f.resolver.resolve(&welcome).await.unwrap().translation_pages.len(), 3);
    }

    #[test]
    fn test_bundle_kind() {
        let bundle = TranslatableBundle::MessageBundle(title("Bundle"));
        assert_eq!(bundle.kind_name(), "message bundle");
        assert_eq!(bundle.title().as_str(), "Bundle");
    }
}
