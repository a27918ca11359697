//! Domain layer for translatable page storage
//!
//! # Domain Models
//!
//! - `PageTitle`, `LanguageCode`, `GroupId`: validated identifiers
//! - `UnitTitle`: address of one unit page (`Translations:Page/unitId/lang`)
//! - `TranslationUnit`: one translatable fragment of a page (see [`unit`])
//! - `UnitRecord` / `UnitRevision`: persisted unit page and its history
//! - `MetadataKey`, `RevTag`: keys for the group metadata and revision tag stores
//!
//! # Port Traits
//!
//! - `DocumentStore`, `UnitStore`, `MetadataStore`, `RevTagStore` (see [`ports`])

pub mod ports;
pub mod unit;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Result, StorageError};

pub use ports::{DocumentStore, MetadataStore, RevTagStore, UnitStore};
pub use unit::{PayloadFormat, TranslationUnit, UnitChange, UnitVariable};

/// Namespace prefix of unit definition and translation pages.
pub const TRANSLATIONS_NAMESPACE: &str = "Translations";

// ═══════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════

/// Full page title including any namespace prefix, e.g. `Help:Welcome`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PageTitle(String);

impl PageTitle {
    /// Create a title, rejecting empty titles and surrounding whitespace.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.is_empty() {
            return Err(StorageError::invalid_identifier("Page title is empty"));
        }
        if text.trim() != text {
            return Err(StorageError::invalid_identifier(format!(
                "Page title has surrounding whitespace: {:?}",
                text
            )));
        }
        if text.starts_with('/') || text.ends_with('/') || text.contains("//") {
            return Err(StorageError::invalid_identifier(format!(
                "Page title has an empty path segment: {}",
                text
            )));
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `Title/name`
    pub fn subpage(&self, name: &str) -> PageTitle {
        PageTitle(format!("{}/{}", self.0, name))
    }

    /// Split into base page and last path segment.
    pub fn split_leaf(&self) -> Option<(&str, &str)> {
        self.0.rsplit_once('/')
    }

    /// Language code of a translation page (`Title/xx`), if the leaf is one.
    pub fn language_suffix(&self) -> Option<LanguageCode> {
        self.split_leaf()
            .and_then(|(_, leaf)| LanguageCode::new(leaf).ok())
    }

    /// Whether `other` is a direct subpage of this title.
    pub fn is_parent_of(&self, other: &PageTitle) -> bool {
        other
            .split_leaf()
            .map_or(false, |(base, _)| base == self.0)
    }
}

impl fmt::Display for PageTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PageTitle {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PageTitle> for String {
    fn from(value: PageTitle) -> Self {
        value.0
    }
}

/// BCP 47-like language code, lowercase (`en`, `fi`, `zh-hans`, `sr-ec`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn new(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        let mut parts = code.split('-');
        let primary_ok = parts.next().map_or(false, |p| {
            (2..=3).contains(&p.len()) && p.bytes().all(|b| b.is_ascii_lowercase())
        });
        let rest_ok = parts.all(|p| {
            (1..=8).contains(&p.len())
                && p.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        });

        if primary_ok && rest_ok {
            Ok(Self(code))
        } else {
            Err(StorageError::invalid_identifier(format!(
                "Invalid language code: {:?}",
                code
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LanguageCode {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<LanguageCode> for String {
    fn from(value: LanguageCode) -> Self {
        value.0
    }
}

/// Message group identifier.
///
/// For translatable pages the id is derived from the page title, so a page
/// move always changes the group id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    pub const PAGE_PREFIX: &'static str = "page-";

    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.contains(',') {
            // Comma is the separator of aggregate group membership lists
            return Err(StorageError::invalid_identifier(format!(
                "Invalid group id: {:?}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Deterministic group id of a translatable page.
    ///
    /// `%` and `,` are percent-encoded so the id never splits a membership
    /// list and distinct titles keep distinct ids.
    pub fn for_page(title: &PageTitle) -> Self {
        let mut id = String::with_capacity(Self::PAGE_PREFIX.len() + title.as_str().len());
        id.push_str(Self::PAGE_PREFIX);
        for c in title.as_str().chars() {
            match c {
                '%' => id.push_str("%25"),
                ',' => id.push_str("%2C"),
                c => id.push(c),
            }
        }
        Self(id)
    }

    pub fn is_page_group(&self) -> bool {
        self.0.starts_with(Self::PAGE_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic revision number assigned by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionId(pub u64);

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Address of a unit page: `Translations:<page>/<unit id>/<language>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitTitle {
    pub page: PageTitle,
    pub unit_id: String,
    pub language: LanguageCode,
}

impl UnitTitle {
    pub fn new(page: PageTitle, unit_id: impl Into<String>, language: LanguageCode) -> Self {
        Self {
            page,
            unit_id: unit_id.into(),
            language,
        }
    }

    /// Message key of this unit inside the page's message group (`Page/unitId`).
    pub fn message_key(&self) -> String {
        format!("{}/{}", self.page, self.unit_id)
    }

    /// Same unit, other language.
    pub fn in_language(&self, language: LanguageCode) -> Self {
        Self {
            page: self.page.clone(),
            unit_id: self.unit_id.clone(),
            language,
        }
    }

    /// Parse `Translations:Page/With/Slashes/unitId/lang`.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || StorageError::invalid_identifier(format!("Invalid unit title: {}", text));

        let rest = text
            .strip_prefix(TRANSLATIONS_NAMESPACE)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(invalid)?;
        let (rest, language) = rest.rsplit_once('/').ok_or_else(invalid)?;
        let (page, unit_id) = rest.rsplit_once('/').ok_or_else(invalid)?;
        if unit_id.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            page: PageTitle::new(page)?,
            unit_id: unit_id.to_string(),
            language: LanguageCode::new(language)?,
        })
    }
}

impl fmt::Display for UnitTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}/{}",
            TRANSLATIONS_NAMESPACE, self.page, self.unit_id, self.language
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Persisted records
// ═══════════════════════════════════════════════════════════════════════════

/// Current state of a unit page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub title: UnitTitle,
    pub text: String,
    /// Needs re-translation because the source changed
    pub fuzzy: bool,
    pub revision: RevisionId,
    pub updated_at: DateTime<Utc>,
}

/// One historical revision of a unit page. Re-marking appends, never rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRevision {
    pub revision: RevisionId,
    pub text: String,
    pub fuzzy: bool,
    pub timestamp: DateTime<Utc>,
}

/// Metadata key types stored per group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetadataKey {
    MaxId,
    PriorityLangs,
    PriorityForce,
    PriorityReason,
    Transclusion,
    Version,
    /// Discouraged/priority flag of a group
    Priority,
    /// Ordered, comma separated member list of an aggregate group
    Subgroups,
}

impl MetadataKey {
    /// Keys owned by a translatable page group; relinked on move, cleared on delete.
    pub const TRANSLATABLE_PAGE_KEYS: [MetadataKey; 6] = [
        MetadataKey::MaxId,
        MetadataKey::PriorityLangs,
        MetadataKey::PriorityForce,
        MetadataKey::PriorityReason,
        MetadataKey::Transclusion,
        MetadataKey::Version,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataKey::MaxId => "maxid",
            MetadataKey::PriorityLangs => "prioritylangs",
            MetadataKey::PriorityForce => "priorityforce",
            MetadataKey::PriorityReason => "priorityreason",
            MetadataKey::Transclusion => "transclusion",
            MetadataKey::Version => "version",
            MetadataKey::Priority => "priority",
            MetadataKey::Subgroups => "subgroups",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "maxid" => Ok(MetadataKey::MaxId),
            "prioritylangs" => Ok(MetadataKey::PriorityLangs),
            "priorityforce" => Ok(MetadataKey::PriorityForce),
            "priorityreason" => Ok(MetadataKey::PriorityReason),
            "transclusion" => Ok(MetadataKey::Transclusion),
            "version" => Ok(MetadataKey::Version),
            "priority" => Ok(MetadataKey::Priority),
            "subgroups" => Ok(MetadataKey::Subgroups),
            _ => Err(StorageError::invalid_identifier(format!(
                "Unknown metadata key: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Revision tags attached to translatable source pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RevTag {
    /// Revision marked for translation
    Mark,
    /// Revision that carries the translate tag (null revision insert)
    Ready,
}

impl RevTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevTag::Mark => "tp:mark",
            RevTag::Ready => "tp:tag",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "tp:mark" => Ok(RevTag::Mark),
            "tp:tag" => Ok(RevTag::Ready),
            _ => Err(StorageError::invalid_identifier(format!(
                "Unknown revision tag: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for RevTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_title_validation() {
        assert!(PageTitle::new("Welcome").is_ok());
        assert!(PageTitle::new("Help:Getting started/Intro").is_ok());
        assert!(PageTitle::new("").is_err());
        assert!(PageTitle::new(" Welcome").is_err());
        assert!(PageTitle::new("Welcome/").is_err());
        assert!(PageTitle::new("A//B").is_err());
    }

    #[test]
    fn test_page_title_subpage_and_language_suffix() {
        let title = PageTitle::new("Welcome").unwrap();
        let fi = title.subpage("fi");

        assert_eq!(fi.as_str(), "Welcome/fi");
        assert_eq!(fi.language_suffix(), Some(LanguageCode::new("fi").unwrap()));
        assert!(title.is_parent_of(&fi));
        assert_eq!(title.language_suffix(), None);
        assert_eq!(title.subpage("Archive").language_suffix(), None);
    }

    #[test]
    fn test_language_code_validation() {
        for ok in ["en", "fi", "zh-hans", "sr-ec", "be-tarask", "yue"] {
            assert!(LanguageCode::new(ok).is_ok(), "{} should be valid", ok);
        }
        for bad in ["", "e", "EN", "english", "en_", "en-", "-en", "1a"] {
            assert!(LanguageCode::new(bad).is_err(), "{} should be invalid", bad);
        }
    }

    #[test]
    fn test_group_id_for_page_is_deterministic() {
        let title = PageTitle::new("Welcome").unwrap();

        assert_eq!(GroupId::for_page(&title), GroupId::for_page(&title));
        assert_eq!(GroupId::for_page(&title).as_str(), "page-Welcome");
        assert!(GroupId::for_page(&title).is_page_group());
    }

    #[test]
    fn test_group_id_for_page_never_contains_comma() {
        let comma = GroupId::for_page(&PageTitle::new("Hello, world").unwrap());
        let literal = GroupId::for_page(&PageTitle::new("Hello%2C world").unwrap());

        assert_eq!(comma.as_str(), "page-Hello%2C world");
        assert_eq!(literal.as_str(), "page-Hello%252C world");
        assert!(GroupId::new(comma.as_str()).is_ok());
        assert_ne!(comma, literal);
        assert!(GroupId::new("a,b").is_err());
    }

    #[test]
    fn test_unit_title_display_and_parse() {
        let title = UnitTitle::new(
            PageTitle::new("Help:Intro/Part").unwrap(),
            "3",
            LanguageCode::new("de").unwrap(),
        );

        let text = title.to_string();
        assert_eq!(text, "Translations:Help:Intro/Part/3/de");
        assert_eq!(UnitTitle::parse(&text).unwrap(), title);
        assert_eq!(title.message_key(), "Help:Intro/Part/3");
    }

    #[test]
    fn test_unit_title_parse_rejects_garbage() {
        assert!(UnitTitle::parse("Welcome/1/en").is_err());
        assert!(UnitTitle::parse("Translations:Welcome").is_err());
        assert!(UnitTitle::parse("Translations:Welcome/1/EN").is_err());
    }

    #[test]
    fn test_metadata_key_roundtrip() {
        for key in MetadataKey::TRANSLATABLE_PAGE_KEYS
            .iter()
            .chain([MetadataKey::Priority, MetadataKey::Subgroups].iter())
        {
            assert_eq!(MetadataKey::from_str(key.as_str()).unwrap(), *key);
        }
        assert!(MetadataKey::from_str("bogus").is_err());
    }

    #[test]
    fn test_rev_tag_roundtrip() {
        assert_eq!(RevTag::from_str("tp:mark").unwrap(), RevTag::Mark);
        assert_eq!(RevTag::from_str("tp:tag").unwrap(), RevTag::Ready);
        assert!(RevTag::from_str("tp:other").is_err());
    }
}
