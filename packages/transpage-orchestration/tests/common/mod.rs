//! Shared in-memory world for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use transpage_orchestration::{InMemoryJobQueue, OrchestratorConfig, Ports, Services};
use transpage_storage::infrastructure::{
    InMemoryDocumentStore, InMemoryMetadataStore, InMemoryRevTagStore, InMemoryUnitStore,
};
use transpage_storage::{
    DocumentStore, LanguageCode, PageTitle, RevTag, RevTagStore, RevisionId, TranslationUnit,
    UnitChange, UnitStore, UnitTitle,
};

pub struct World {
    pub docs: Arc<InMemoryDocumentStore>,
    pub units: Arc<InMemoryUnitStore>,
    pub metadata: Arc<InMemoryMetadataStore>,
    pub rev_tags: Arc<InMemoryRevTagStore>,
    pub queue: InMemoryJobQueue,
    pub services: Services,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let units = Arc::new(InMemoryUnitStore::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let rev_tags = Arc::new(InMemoryRevTagStore::new());
        let queue = InMemoryJobQueue::new();

        let mut ports = Ports::in_memory();
        ports.docs = docs.clone();
        ports.units = units.clone();
        ports.metadata = metadata.clone();
        ports.rev_tags = rev_tags.clone();

        let services = Services::new(config, ports, Arc::new(queue.clone()), Vec::new())
            .expect("services");

        Self {
            docs,
            units,
            metadata,
            rev_tags,
            queue,
            services,
        }
    }

    /// A marked page with `sections` (id, text), an existing translation page
    /// per language, and a clean translation of every unit in each language.
    pub async fn translated_page(
        &self,
        title: &str,
        sections: &[(&str, &str)],
        languages: &[&str],
    ) -> PageTitle {
        let page = PageTitle::new(title).unwrap();
        let en = lang("en");

        self.docs
            .update_content(&page, "source text", "Admin", "")
            .await
            .unwrap();
        let units: Vec<TranslationUnit> = sections
            .iter()
            .map(|(id, text)| TranslationUnit::new(*id, *text, UnitChange::New))
            .collect();
        self.units.save_sections(&page, &units).await.unwrap();
        self.rev_tags
            .add_tag(&page, RevTag::Mark, RevisionId(1))
            .await
            .unwrap();

        for code in languages {
            self.docs
                .update_content(&page.subpage(code), "", "FuzzyBot", "")
                .await
                .unwrap();
            for (id, text) in sections {
                let title = UnitTitle::new(page.clone(), *id, lang(code));
                self.units
                    .update_unit(&title, &format!("{} [{}]", text, code), false, &en)
                    .await
                    .unwrap();
            }
        }
        page
    }
}

pub fn lang(code: &str) -> LanguageCode {
    LanguageCode::new(code).unwrap()
}

pub fn title(s: &str) -> PageTitle {
    PageTitle::new(s).unwrap()
}
