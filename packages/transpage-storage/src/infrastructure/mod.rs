//! Infrastructure layer - storage adapters

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{
    InMemoryDocumentStore, InMemoryMetadataStore, InMemoryRevTagStore, InMemoryUnitStore,
};

#[cfg(feature = "sqlite")]
pub use sqlite::{
    SqliteDocumentStore, SqliteMetadataStore, SqliteRevTagStore, SqliteUnitStore,
};
