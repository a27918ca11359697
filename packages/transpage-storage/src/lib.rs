//! Storage layer for translatable pages
//!
//! Owns the identifiers and records of the translation workflow and the
//! ports through which the orchestration layer reads and writes them.
//!
//! ## Stores
//!
//! | Port | Keyed by | Adapters |
//! |------|----------|----------|
//! | `DocumentStore` | page title | in-memory, SQLite |
//! | `UnitStore` | `Translations:Page/unit/lang` | in-memory, SQLite |
//! | `MetadataStore` | (group id, key) | in-memory, SQLite |
//! | `RevTagStore` | (page title, tag) | in-memory, SQLite |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use transpage_storage::{TranslationUnit, UnitStore, UnitTitle};
//!
//! let unit = TranslationUnit::decode_payload(&payload)?;
//! let title = UnitTitle::new(page.clone(), &unit.id, source_language.clone());
//! store
//!     .update_unit(&title, &unit.text_with_variables(), unit.marks_fuzzy(), &source_language)
//!     .await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    DocumentStore, GroupId, LanguageCode, MetadataKey, MetadataStore, PageTitle, PayloadFormat,
    RevTag, RevTagStore, RevisionId, TranslationUnit, UnitChange, UnitRecord, UnitRevision,
    UnitStore, UnitTitle, UnitVariable,
};
