//! Message groups
//!
//! A message group is a set of translatable messages with a source language.
//! Optional capabilities (checker, key mangler, file format) are exposed as
//! `Option`s; callers must handle absence.
//!
//! Variants:
//! - [`WikiPageGroup`]: a translatable page, one message per unit
//! - [`FileBackedGroup`]: messages read from per-language files
//! - [`AggregateGroup`]: an ordered list of other groups, no messages of its own
//! - [`WorkflowStatesGroup`]: labels of the translation workflow states

pub mod aggregate;
pub mod file;
pub mod wiki;
pub mod workflow;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use transpage_storage::{GroupId, LanguageCode};

use crate::error::Result;

pub use aggregate::AggregateGroup;
pub use file::{FileBackedGroup, FileFormat, JsonFileFormat, PrefixMangler};
pub use wiki::WikiPageGroup;
pub use workflow::WorkflowStatesGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKind {
    WikiPage,
    FileBacked,
    Aggregate,
    WorkflowStates,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::WikiPage => "wiki_page",
            GroupKind::FileBacked => "file_backed",
            GroupKind::Aggregate => "aggregate",
            GroupKind::WorkflowStates => "workflow_states",
        }
    }
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One translation of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTranslation {
    pub text: String,
    pub fuzzy: bool,
}

/// Issue reported by a [`MessageChecker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckIssue {
    pub key: String,
    pub message: String,
}

/// Validates a translation against its definition. Rule sets live elsewhere.
pub trait MessageChecker: Send + Sync {
    fn check(&self, key: &str, definition: &str, translation: &str) -> Vec<CheckIssue>;
}

/// Rewrites message keys between the storage form and the group form.
pub trait StringMangler: Send + Sync {
    fn mangle(&self, key: &str) -> String;

    /// `None` if `key` was not produced by this mangler.
    fn unmangle(&self, key: &str) -> Option<String>;
}

#[async_trait]
pub trait MessageGroup: Send + Sync {
    fn id(&self) -> &GroupId;

    fn label(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn source_language(&self) -> &LanguageCode;

    fn kind(&self) -> GroupKind;

    /// Cheap and side-effect free; misconfigured groups return `false`
    /// and are skipped by the group index.
    fn exists(&self) -> bool;

    fn checker(&self) -> Option<Arc<dyn MessageChecker>> {
        None
    }

    fn mangler(&self) -> Option<Arc<dyn StringMangler>> {
        None
    }

    fn file_format(&self) -> Option<Arc<dyn FileFormat>> {
        None
    }

    /// Workflow state names this group uses.
    fn workflow_states(&self) -> Vec<String> {
        Vec::new()
    }

    /// Member group ids, in order. Empty for groups that hold messages directly.
    async fn subgroups(&self) -> Result<Vec<GroupId>> {
        Ok(Vec::new())
    }

    /// Message key → source text.
    async fn definitions(&self) -> Result<BTreeMap<String, String>>;

    /// Message key → translation in `language`; missing keys are untranslated.
    async fn translations(
        &self,
        language: &LanguageCode,
    ) -> Result<BTreeMap<String, MessageTranslation>>;

    /// Languages that have at least one translation (source language excluded).
    async fn translation_languages(&self) -> Result<Vec<LanguageCode>>;

    /// Drop any definitions cached by this instance.
    fn clear_caches(&self);
}
