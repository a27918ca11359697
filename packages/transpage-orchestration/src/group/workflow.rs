//! Labels of the translation workflow states
//!
//! One message per configured state. The definition lives on
//! `MediaWiki:Translate-workflow-state-<state>`; a missing page is created
//! with the state name as its content the first time definitions are read.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;
use transpage_storage::{DocumentStore, GroupId, LanguageCode, PageTitle};

use super::{GroupKind, MessageGroup, MessageTranslation};
use crate::error::Result;

pub const WORKFLOW_GROUP_ID: &str = "translate-workflow-states";
pub const KEY_PREFIX: &str = "Translate-workflow-state-";
pub const PAGE_NAMESPACE: &str = "MediaWiki";

pub struct WorkflowStatesGroup {
    id: GroupId,
    states: Vec<String>,
    source_language: LanguageCode,
    docs: Arc<dyn DocumentStore>,
    editor: String,
    definitions: Mutex<Option<BTreeMap<String, String>>>,
}

impl WorkflowStatesGroup {
    pub fn new(
        states: Vec<String>,
        source_language: LanguageCode,
        docs: Arc<dyn DocumentStore>,
        editor: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            id: GroupId::new(WORKFLOW_GROUP_ID)?,
            states,
            source_language,
            docs,
            editor: editor.into(),
            definitions: Mutex::new(None),
        })
    }

    pub fn message_key(state: &str) -> String {
        format!("{}{}", KEY_PREFIX, state.to_lowercase())
    }

    fn page_for(key: &str) -> Result<PageTitle> {
        Ok(PageTitle::new(format!("{}:{}", PAGE_NAMESPACE, key))?)
    }
}

#[async_trait]
impl MessageGroup for WorkflowStatesGroup {
    fn id(&self) -> &GroupId {
        &self.id
    }

    fn label(&self) -> &str {
        "Translation workflow states"
    }

    fn source_language(&self) -> &LanguageCode {
        &self.source_language
    }

    fn kind(&self) -> GroupKind {
        GroupKind::WorkflowStates
    }

    /// Present only when workflow states are configured.
    fn exists(&self) -> bool {
        !self.states.is_empty()
    }

    fn workflow_states(&self) -> Vec<String> {
        self.states.clone()
    }

    async fn definitions(&self) -> Result<BTreeMap<String, String>> {
        let cached = self.definitions.lock().clone();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let mut definitions = BTreeMap::new();
        for state in &self.states {
            let key = Self::message_key(state);
            let page = Self::page_for(&key)?;

            let text = match self.docs.get_content(&page).await? {
                Some(text) => text,
                None => {
                    self.docs
                        .update_content(&page, state, &self.editor, "")
                        .await?;
                    info!("Created workflow state page {}", page);
                    state.clone()
                }
            };
            definitions.insert(key, text);
        }

        *self.definitions.lock() = Some(definitions.clone());
        Ok(definitions)
    }

    async fn translations(
        &self,
        language: &LanguageCode,
    ) -> Result<BTreeMap<String, MessageTranslation>> {
        let mut translations = BTreeMap::new();
        for state in &self.states {
            let key = Self::message_key(state);
            let page = Self::page_for(&key)?.subpage(language.as_str());
            if let Some(text) = self.docs.get_content(&page).await? {
                translations.insert(key, MessageTranslation { text, fuzzy: false });
            }
        }
        Ok(translations)
    }

    async fn translation_languages(&self) -> Result<Vec<LanguageCode>> {
        let mut languages = BTreeSet::new();
        for state in &self.states {
            let page = Self::page_for(&Self::message_key(state))?;
            for subpage in self.docs.subpages(&page).await? {
                if let Some(language) = subpage.language_suffix() {
                    if language != self.source_language {
                        languages.insert(language);
                    }
                }
            }
        }
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
    use transpage_storage::infrastructure::InMemoryDocumentStore;

    fn lang(code: &str) -> LanguageCode {
        LanguageCode::new(code).unwrap()
    }

    fn group(docs: &Arc<InMemoryDocumentStore>) -> WorkflowStatesGroup {
        WorkflowStatesGroup::new(
            vec!["Proofreading".to_string(), "Ready".to_string()],
            lang("en"),
            docs.clone(),
            "FuzzyBot",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_pages_are_created() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let ready = PageTitle::new("MediaWiki:Translate-workflow-state-ready").unwrap();
        docs.update_content(&ready, "Ready to publish", "Admin", "")
            .await
            .unwrap();

        let definitions = group(&docs).definitions().await.unwrap();

        assert_eq!(
            definitions.into_iter().collect::<Vec<_>>(),
            vec![
                (
                    "Translate-workflow-state-proofreading".to_string(),
                    "Proofreading".to_string()
                ),
                (
                    "Translate-workflow-state-ready".to_string(),
                    "Ready to publish".to_string()
                ),
            ]
        );
        // Only the missing page was written
        assert_eq!(docs.write_count(), 2);
        let created = PageTitle::new("MediaWiki:Translate-workflow-state-proofreading").unwrap();
        assert_eq!(docs.last_edit(&created).unwrap().0, "FuzzyBot");
    }

    #[tokio::test]
    async fn test_translations_from_language_subpages() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let ready = PageTitle::new("MediaWiki:Translate-workflow-state-ready").unwrap();
        docs.update_content(&ready.subpage("fi"), "Valmis", "Admin", "")
            .await
            .unwrap();
        let group = group(&docs);

        let fi = group.translations(&lang("fi")).await.unwrap();
        assert_eq!(fi.len(), 1);
        assert_eq!(fi["Translate-workflow-state-ready"].text, "Valmis");
        assert_eq!(group.translation_languages().await.unwrap(), vec![lang("fi")]);
    }

    #[test]
    fn test_exists_requires_states() {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let empty = WorkflowStatesGroup::new(Vec::new(), lang("en"), docs, "FuzzyBot").unwrap();
        assert!(!empty.exists());
    }
}
