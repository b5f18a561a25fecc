//! A schema-driven document-model layer over swappable storage backends.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Model engine** ([`model`]) - Schema-validated CRUD, search and revision reads per collection
//! - **Schema types** ([`schema`]) - Field descriptors, reference settings and collection behavior switches
//! - **Registry** ([`registry`]) - Builds and shares schemas, hooks and collaborators across models
//! - **Datastore abstraction** ([`datastore`]) - The trait storage backends implement
//! - **Reference composition** ([`compose`]) - Read-time expansion of reference IDs into documents
//! - **Query rewriting** ([`rewrite`]) - Dot-notation reference conditions resolved into ID sets
//! - **Hook pipeline** ([`hooks`]) - Named async transforms around every operation stage
//! - **Revision history** ([`history`]) - Pre-image snapshots recorded per mutation
//! - **Validation** ([`validate`]) - Document, update and query checks against a schema
//! - **Error handling** ([`error`]) - Model and datastore error types with status mapping
//!
//! # Example
//!
//! ```ignore
//! use docmodel_core::registry::Registry;
//! use docmodel_core::schema::{FieldDescriptor, FieldType, Schema};
//! use bson::doc;
//!
//! # async fn example(datastore: impl docmodel_core::datastore::Datastore + 'static) -> docmodel_core::error::ModelResult<()> {
//! let registry = Registry::builder(datastore)
//!     .schema(
//!         "books",
//!         Schema::new().field("title", FieldDescriptor::new(FieldType::String).required()),
//!     )
//!     .build()?;
//!
//! let books = registry.model("books")?;
//! let created = books.create(vec![doc! { "title": "Moby-Dick" }], doc! {}).await?;
//! assert_eq!(created.results.len(), 1);
//! # Ok(()) }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod compose;
pub mod datastore;
pub mod error;
pub mod history;
pub mod hooks;
pub mod model;
pub mod query;
pub mod registry;
pub mod rewrite;
pub mod schema;
pub mod search;
pub mod validate;
