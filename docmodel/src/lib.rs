//! Main docmodel crate providing a unified interface for schema-driven
//! document storage.
//!
//! This crate is the primary entry point for users of the docmodel engine.
//! It re-exports the core types and functionality from various sub-crates
//! and provides convenient access to the bundled storage backends.
//!
//! # Features
//!
//! - **Schema-validated CRUD** - Declare fields, types and rules per collection; invalid writes never reach storage
//! - **Reference composition** - Store foreign-document IDs, read back nested documents, to a configurable depth
//! - **Query rewriting** - Filter on referenced documents' fields in dot notation without storage-level joins
//! - **Hook pipeline** - Named async transforms before and after every operation
//! - **Revision history** - Pre-image snapshots recorded on update and delete, readable per document
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::MemoryDatastore};
//! use bson::{doc, Bson};
//!
//! #[tokio::main]
//! async fn main() -> ModelResult<()> {
//!     // Declare one collection and build the registry around a backend.
//!     let registry = Registry::builder(MemoryDatastore::new())
//!         .schema(
//!             "books",
//!             Schema::new()
//!                 .field("title", FieldDescriptor::new(FieldType::String).required())
//!                 .field("pages", FieldDescriptor::new(FieldType::Number)),
//!         )
//!         .build()?;
//!
//!     let books = registry.model("books")?;
//!
//!     // Create runs validation, assigns an ID and starts versioning at 1.
//!     let created = books
//!         .create(vec![doc! { "title": "Moby-Dick", "pages": 635 }], doc! {})
//!         .await?;
//!     let id = created.results[0].get("_id").and_then(Bson::as_str).unwrap().to_string();
//!
//!     // Reads take operator queries plus paging, sorting and projection.
//!     let found = books
//!         .find(doc! { "pages": { "$gt": 300 } }, &FindOptions::default())
//!         .await?;
//!     assert_eq!(found.metadata.total_count, 1);
//!
//!     // Updates bump the version and snapshot the previous state.
//!     books
//!         .update(doc! { "_id": &id }, doc! { "title": "Moby-Dick; or, The Whale" }, doc! {})
//!         .await?;
//!     let revisions = books.revisions(&id, &FindOptions::default()).await?;
//!     assert_eq!(revisions.len(), 1);
//!
//!     Ok(())
//! }
//! ```
//!
//! # References and Composition
//!
//! Reference fields hold foreign-document IDs. Reads can expand them into
//! the referenced documents, and queries can filter through them using dot
//! notation; the engine resolves matching foreign IDs first and rewrites
//! the condition into an ID membership test.
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::MemoryDatastore};
//! use bson::{doc, Bson};
//!
//! #[tokio::main]
//! async fn main() -> ModelResult<()> {
//!     let registry = Registry::builder(MemoryDatastore::new())
//!         .schema(
//!             "authors",
//!             Schema::new().field("name", FieldDescriptor::new(FieldType::String).required()),
//!         )
//!         .schema(
//!             "books",
//!             Schema::new()
//!                 .field("title", FieldDescriptor::new(FieldType::String).required())
//!                 .field("author", FieldDescriptor::reference_to("authors")),
//!         )
//!         .build()?;
//!
//!     let authors = registry.model("authors")?;
//!     let melville = authors.create(vec![doc! { "name": "Melville" }], doc! {}).await?;
//!     let author_id = melville.results[0].get("_id").cloned().unwrap();
//!
//!     let books = registry.model("books")?;
//!     books
//!         .create(vec![doc! { "title": "Moby-Dick", "author": author_id }], doc! {})
//!         .await?;
//!
//!     // Filter on the referenced author's fields and compose the result.
//!     let found = books
//!         .find(
//!             doc! { "author.name": "Melville" },
//!             &FindOptions::builder().compose(true).build(),
//!         )
//!         .await?;
//!     let author = found.results[0].get("author").and_then(Bson::as_document).unwrap();
//!     assert_eq!(author.get("name").and_then(Bson::as_str), Some("Melville"));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Hooks
//!
//! Hooks are registered by name and wired to pipeline stages in collection
//! settings. Each hook transforms the value flowing through its stage or
//! fails the whole operation.
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::MemoryDatastore};
//! use bson::{doc, Bson};
//!
//! #[derive(Debug)]
//! struct Timestamper;
//!
//! #[async_trait::async_trait]
//! impl Hook for Timestamper {
//!     async fn apply(&self, value: Bson, _ctx: &HookContext<'_>) -> ModelResult<Bson> {
//!         let mut document = match value {
//!             Bson::Document(document) => document,
//!             other => return Ok(other),
//!         };
//!         document.insert("stampedAt", bson::DateTime::now());
//!         Ok(Bson::Document(document))
//!     }
//! }
//!
//! # fn build() -> ModelResult<Registry> {
//! let mut settings = CollectionSettings::default();
//! settings.hooks.before_create = vec![HookConfig::new("timestamper")];
//!
//! let registry = Registry::builder(MemoryDatastore::new())
//!     .hook("timestamper", Timestamper)
//!     .schema("books", Schema::new().settings(settings))
//!     .build()?;
//! # Ok(registry) }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//!
//! Any other backend plugs in by implementing
//! [`datastore::Datastore`](docmodel_core::datastore::Datastore).

pub mod prelude;

pub use docmodel_core::{
    compose, datastore, error, history, hooks, model, query, registry, rewrite, schema, search,
    validate,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmodel_memory::{MemoryDatastore, MemoryDatastoreBuilder};
}
