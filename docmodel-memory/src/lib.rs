//! In-memory storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! `Datastore` trait. It uses async-aware read-write locks for concurrent
//! access and is ideal for development, testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent readers and exclusive writers behind an async-aware RwLock
//! - **Full query support** - Operator documents, sorting, pagination and projection
//! - **Update operators** - `$set`, `$inc` and `$push` sections
//! - **Connection switch** - Simulated disconnects for failure-path testing
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel_core::registry::Registry;
//! use docmodel_core::schema::{FieldDescriptor, FieldType, Schema};
//! use docmodel_memory::MemoryDatastore;
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::builder(MemoryDatastore::new())
//!         .schema(
//!             "books",
//!             Schema::new().field("title", FieldDescriptor::new(FieldType::String).required()),
//!         )
//!         .build()?;
//!
//!     let books = registry.model("books")?;
//!     books.create(vec![doc! { "title": "Moby-Dick" }], doc! {}).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

pub mod evaluator;
pub mod store;

pub use store::{MemoryDatastore, MemoryDatastoreBuilder};
