//! File-backed message groups
//!
//! Messages live in one file per language. The only bundled format is flat
//! JSON (`<dir>/<lang>.json`, `{"key": "text"}`); keys starting with `@` are
//! file metadata. A translation prefixed with `!!FUZZY!!` is fuzzy.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use transpage_storage::{GroupId, LanguageCode};

use super::{GroupKind, MessageChecker, MessageGroup, MessageTranslation, StringMangler};
use crate::error::{OrchestratorError, Result};

pub const FUZZY_MARKER: &str = "!!FUZZY!!";

/// Reads per-language message files.
pub trait FileFormat: Send + Sync {
    fn path_for(&self, language: &LanguageCode) -> PathBuf;

    /// `None` if the file for `language` does not exist.
    fn read(&self, language: &LanguageCode) -> Result<Option<BTreeMap<String, String>>>;

    /// Languages with a file present.
    fn languages(&self) -> Result<Vec<LanguageCode>>;

    fn exists(&self, language: &LanguageCode) -> bool {
        self.path_for(language).is_file()
    }
}

#[derive(Debug, Clone)]
pub struct JsonFileFormat {
    dir: PathBuf,
}

impl JsonFileFormat {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileFormat for JsonFileFormat {
    fn path_for(&self, language: &LanguageCode) -> PathBuf {
        self.dir.join(format!("{}.json", language))
    }

    fn read(&self, language: &LanguageCode) -> Result<Option<BTreeMap<String, String>>> {
        let path = self.path_for(language);
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        let mut messages = BTreeMap::new();
        for (key, value) in raw {
            if key.starts_with('@') {
                continue;
            }
            match value {
                serde_json::Value::String(text) => {
                    messages.insert(key, text);
                }
                other => {
                    return Err(OrchestratorError::parse(format!(
                        "{}: value of {:?} must be a string, got {}",
                        path.display(),
                        key,
                        other
                    )))
                }
            }
        }
        Ok(Some(messages))
    }

    fn languages(&self) -> Result<Vec<LanguageCode>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut languages = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                if let Some(code) = path.file_stem().and_then(|s| s.to_str()) {
                    // Files that are not named after a language are ignored
                    if let Ok(language) = LanguageCode::new(code) {
                        languages.push(language);
                    }
                }
            }
        }
        languages.sort();
        Ok(languages)
    }
}

/// Prefixes every key, e.g. `mwgrep-` + `desc`.
#[derive(Debug, Clone)]
pub struct PrefixMangler {
    prefix: String,
}

impl PrefixMangler {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl StringMangler for PrefixMangler {
    fn mangle(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn unmangle(&self, key: &str) -> Option<String> {
        key.strip_prefix(&self.prefix).map(str::to_string)
    }
}

pub struct FileBackedGroup {
    id: GroupId,
    label: String,
    description: Option<String>,
    source_language: LanguageCode,
    format: Arc<dyn FileFormat>,
    mangler: Option<Arc<dyn StringMangler>>,
    checker: Option<Arc<dyn MessageChecker>>,
    definitions: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileBackedGroup {
    pub fn new(
        id: GroupId,
        label: impl Into<String>,
        source_language: LanguageCode,
        format: Arc<dyn FileFormat>,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            description: None,
            source_language,
            format,
            mangler: None,
            checker: None,
            definitions: Mutex::new(None),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mangler(mut self, mangler: Arc<dyn StringMangler>) -> Self {
        self.mangler = Some(mangler);
        self
    }

    pub fn with_checker(mut self, checker: Arc<dyn MessageChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    fn mangle(&self, key: String) -> String {
        match &self.mangler {
            Some(m) => m.mangle(&key),
            None => key,
        }
    }
}

#[async_trait]
impl MessageGroup for FileBackedGroup {
    fn id(&self) -> &GroupId {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn source_language(&self) -> &LanguageCode {
        &self.source_language
    }

    fn kind(&self) -> GroupKind {
        GroupKind::FileBacked
    }

    fn exists(&self) -> bool {
        self.format.exists(&self.source_language)
    }

    fn checker(&self) -> Option<Arc<dyn MessageChecker>> {
        self.checker.clone()
    }

    fn mangler(&self) -> Option<Arc<dyn StringMangler>> {
        self.mangler.clone()
    }

    fn file_format(&self) -> Option<Arc<dyn FileFormat>> {
        Some(self.format.clone())
    }

    async fn definitions(&self) -> Result<BTreeMap<String, String>> {
        let cached = self.definitions.lock().clone();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let source = self
            .format
            .read(&self.source_language)?
            .ok_or_else(|| OrchestratorError::GroupNotFound(self.id.to_string()))?;
        let definitions: BTreeMap<String, String> = source
            .into_iter()
            .map(|(key, text)| (self.mangle(key), text))
            .collect();

        *self.definitions.lock() = Some(definitions.clone());
        Ok(definitions)
    }

    async fn translations(
        &self,
        language: &LanguageCode,
    ) -> Result<BTreeMap<String, MessageTranslation>> {
        let messages = self.format.read(language)?.unwrap_or_default();

        Ok(messages
            .into_iter()
            .map(|(key, text)| {
                let translation = match text.strip_prefix(FUZZY_MARKER) {
                    Some(rest) => MessageTranslation {
                        text: rest.to_string(),
                        fuzzy: true,
                    },
                    None => MessageTranslation { text, fuzzy: false },
                };
                (self.mangle(key), translation)
            })
            .collect())
    }

    async fn translation_languages(&self) -> Result<Vec<LanguageCode>> {
        Ok(self
            .format
            .languages()?
            .into_iter()
            .filter(|l| l != &self.source_language)
            .collect())
    }

    fn clear_caches(&self) {
        *self.definitions.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn lang(code: &str) -> LanguageCode {
        LanguageCode::new(code).unwrap()
    }

    fn group_in(dir: &TempDir) -> FileBackedGroup {
        FileBackedGroup::new(
            GroupId::new("ext-grep").unwrap(),
            "Grep extension",
            lang("en"),
            Arc::new(JsonFileFormat::new(dir.path())),
        )
        .with_mangler(Arc::new(PrefixMangler::new("grep-")))
    }

    #[tokio::test]
    async fn test_exists_follows_source_file() {
        let dir = TempDir::new().unwrap();
        let group = group_in(&dir);
        assert!(!group.exists());

        std::fs::write(dir.path().join("en.json"), r#"{"desc": "Search"}"#).unwrap();
        assert!(group.exists());
    }

    #[tokio::test]
    async fn test_definitions_and_translations() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("en.json"),
            r#"{"@metadata": {"authors": []}, "desc": "Search", "title": "Grep"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("fi.json"),
            r#"{"desc": "Haku", "title": "!!FUZZY!!Grepp"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();
        let group = group_in(&dir);

        let definitions = group.definitions().await.unwrap();
        assert_eq!(
            definitions.keys().cloned().collect::<Vec<_>>(),
            vec!["grep-desc", "grep-title"]
        );

        let fi = group.translations(&lang("fi")).await.unwrap();
        assert_eq!(fi["grep-desc"], MessageTranslation { text: "Haku".into(), fuzzy: false });
        assert_eq!(fi["grep-title"], MessageTranslation { text: "Grepp".into(), fuzzy: true });
        assert_eq!(group.translation_languages().await.unwrap(), vec![lang("fi")]);
        assert!(group.file_format().is_some());
        assert!(group.checker().is_none());
    }

    #[tokio::test]
    async fn test_non_string_value_is_parse_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("en.json"), r#"{"desc": 5}"#).unwrap();

        let result = group_in(&dir).definitions().await;
        assert!(matches!(result, Err(OrchestratorError::Parse(_))));
    }

    #[test]
    fn test_prefix_mangler() {
        let mangler = PrefixMangler::new("grep-");
        assert_eq!(mangler.mangle("desc"), "grep-desc");
        assert_eq!(mangler.unmangle("grep-desc").as_deref(), Some("desc"));
        assert_eq!(mangler.unmangle("other-desc"), None);
    }
}
