//! Message group of a translatable page
//!
//! Definitions are the sections recorded when the page was marked; keys are
//! `Page/unitId`. Translations are the unit pages in the target language.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use transpage_storage::{GroupId, LanguageCode, PageTitle, UnitStore, UnitTitle};

use super::{GroupKind, MessageGroup, MessageTranslation};
use crate::error::Result;

pub struct WikiPageGroup {
    id: GroupId,
    page: PageTitle,
    source_language: LanguageCode,
    units: Arc<dyn UnitStore>,
    definitions: Mutex<Option<BTreeMap<String, String>>>,
}

impl WikiPageGroup {
    pub fn new(page: PageTitle, source_language: LanguageCode, units: Arc<dyn UnitStore>) -> Self {
        Self {
            id: GroupId::for_page(&page),
            page,
            source_language,
            units,
            definitions: Mutex::new(None),
        }
    }

    pub fn page(&self) -> &PageTitle {
        &self.page
    }
}

#[async_trait]
impl MessageGroup for WikiPageGroup {
    fn id(&self) -> &GroupId {
        &self.id
    }

    fn label(&self) -> &str {
        self.page.as_str()
    }

    fn source_language(&self) -> &LanguageCode {
        &self.source_language
    }

    fn kind(&self) -> GroupKind {
        GroupKind::WikiPage
    }

    fn exists(&self) -> bool {
        // Only constructed for pages carrying the mark tag
        true
    }

    async fn definitions(&self) -> Result<BTreeMap<String, String>> {
        let cached = self.definitions.lock().clone();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let sections = self.units.sections(&self.page).await?;
        let definitions: BTreeMap<String, String> = sections
            .iter()
            .map(|unit| {
                let title = UnitTitle::new(
                    self.page.clone(),
                    unit.id.clone(),
                    self.source_language.clone(),
                );
                (title.message_key(), unit.text_with_variables())
            })
            .collect();

        *self.definitions.lock() = Some(definitions.clone());
        Ok(definitions)
    }

    async fn translations(
        &self,
        language: &LanguageCode,
    ) -> Result<BTreeMap<String, MessageTranslation>> {
        let definitions = self.definitions().await?;
        let records = self.units.units_for_page(&self.page).await?;

        Ok(records
            .into_iter()
            .filter(|r| &r.title.language == language)
            .map(|r| {
                (
                    r.title.message_key(),
                    MessageTranslation {
                        text: r.text,
                        fuzzy: r.fuzzy,
                    },
                )
            })
            // Unit pages of removed sections do not count
            .filter(|(key, _)| definitions.contains_key(key))
            .collect())
    }

    async fn translation_languages(&self) -> Result<Vec<LanguageCode>> {
        let records = self.units.units_for_page(&self.page).await?;
        let languages: BTreeSet<LanguageCode> = records
            .into_iter()
            .map(|r| r.title.language)
            .filter(|l| l != &self.source_language)
            .collect();
        Ok(languages.into_iter().collect())
    }

    fn clear_caches(&self) {
        *self.definitions.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use transpage_storage::infrastructure::InMemoryUnitStore;
    use transpage_storage::{TranslationUnit, UnitChange};

    fn lang(code: &str) -> LanguageCode {
        LanguageCode::new(code).unwrap()
    }

    async fn fixture() -> (Arc<InMemoryUnitStore>, WikiPageGroup) {
        let units = Arc::new(InMemoryUnitStore::new());
        let page = PageTitle::new("Welcome").unwrap();
        units
            .save_sections(
                &page,
                &[
                    TranslationUnit::new("1", "Hello", UnitChange::New),
                    TranslationUnit::new("2", "Get <tvar name=v>1.0</tvar>", UnitChange::New),
                ],
            )
            .await
            .unwrap();
        let group = WikiPageGroup::new(page, lang("en"), units.clone());
        (units, group)
    }

    #[tokio::test]
    async fn test_definitions_from_sections() {
        let (_, group) = fixture().await;

        let definitions = group.definitions().await.unwrap();
        assert_eq!(
            definitions.into_iter().collect::<Vec<_>>(),
            vec![
                ("Welcome/1".to_string(), "Hello".to_string()),
                ("Welcome/2".to_string(), "Get $v".to_string()),
            ]
        );
        assert_eq!(group.id().as_str(), "page-Welcome");
    }

    #[tokio::test]
    async fn test_definitions_cached_until_cleared() {
        let (units, group) = fixture().await;
        group.definitions().await.unwrap();

        let page = PageTitle::new("Welcome").unwrap();
        units
            .save_sections(&page, &[TranslationUnit::new("1", "Hello", UnitChange::New)])
            .await
            .unwrap();
        assert_eq!(group.definitions().await.unwrap().len(), 2);

        group.clear_caches();
        assert_eq!(group.definitions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_translations_and_languages() {
        let (units, group) = fixture().await;
        let page = PageTitle::new("Welcome").unwrap();
        let en = lang("en");

        units
            .update_unit(&UnitTitle::new(page.clone(), "1", lang("fi")), "Hei", false, &en)
            .await
            .unwrap();
        units
            .update_unit(&UnitTitle::new(page.clone(), "9", lang("fi")), "Orpo", false, &en)
            .await
            .unwrap();
        units
            .update_unit(&UnitTitle::new(page.clone(), "1", en.clone()), "Hello", false, &en)
            .await
            .unwrap();

        let fi = group.translations(&lang("fi")).await.unwrap();
        assert_eq!(fi.len(), 1);
        assert_eq!(fi["Welcome/1"].text, "Hei");
        assert_eq!(group.translation_languages().await.unwrap(), vec![lang("fi")]);
    }
}
