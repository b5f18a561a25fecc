//! Storage backend abstraction for the model engine.
//!
//! This module defines the trait the engine uses to talk to whatever actually
//! persists documents. The engine never touches storage directly: it holds an
//! `Arc<dyn Datastore>` and routes every read and write through it, so
//! backends can range from the bundled in-memory store to a remote database
//! driver.
//!
//! # Overview
//!
//! The [`Datastore`] trait provides a unified async interface for querying,
//! inserting, updating and deleting documents, plus collection administration
//! (indexes, stats, teardown). Implementations are required to be thread-safe
//! (`Send + Sync`) and support concurrent access.
//!
//! # Connection State
//!
//! A backend that has lost its connection must answer every call with
//! [`DatastoreError::Disconnected`](crate::error::DatastoreError::Disconnected).
//! The engine translates that into a uniform "service unavailable" error at
//! every operation entry point; it never inspects connection state itself.
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::datastore::Datastore;
//! use docmodel::query::QueryOptions;
//! use bson::doc;
//!
//! // Use a concrete datastore implementation
//! let store = MyDatastore::new();
//!
//! let inserted = store
//!     .insert("library", vec![doc! { "title": "Moby Dick" }])
//!     .await?;
//! let outcome = store
//!     .find("library", &doc! { "title": "Moby Dick" }, &QueryOptions::default())
//!     .await?;
//! assert_eq!(outcome.metadata.total_count, 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Document;
use std::fmt::Debug;

use crate::{
    error::DatastoreResult,
    query::{QueryMetadata, QueryOptions},
    schema::IndexSpec,
};

/// The result of a [`Datastore::find`] call: the matching page of documents
/// plus pagination metadata for the full match set.
#[derive(Debug, Clone)]
pub struct FindOutcome {
    /// The documents on the requested page, in sort order.
    pub results: Vec<Document>,
    /// Pagination metadata covering the entire match set.
    pub metadata: QueryMetadata,
}

impl FindOutcome {
    /// An empty outcome produced without touching storage.
    pub fn empty(options: &QueryOptions) -> Self {
        FindOutcome {
            results: Vec::new(),
            metadata: QueryMetadata::empty(options),
        }
    }
}

/// The result of a [`Datastore::update`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Number of documents the query matched and the update was applied to.
    pub matched_count: u64,
}

/// The result of a [`Datastore::delete`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Number of documents removed.
    pub deleted_count: u64,
}

/// Storage interface the model engine runs on.
///
/// Implementers of this trait provide concrete storage strategies for the
/// model engine, from the bundled in-memory store to database drivers. The
/// trait deals in plain BSON documents and operator-document queries; all
/// schema knowledge (validation, references, revisions) lives above it in
/// the engine.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access
/// from multiple async tasks. The exact concurrency model is
/// implementation-specific but should be documented by the implementer.
///
/// # Error Handling
///
/// Operations return [`DatastoreResult<T>`](crate::error::DatastoreResult).
/// A lost connection must be reported as
/// [`DatastoreError::Disconnected`](crate::error::DatastoreError::Disconnected)
/// on every call until the connection returns.
#[async_trait]
pub trait Datastore: Send + Sync + Debug {
    /// Queries documents in a collection.
    ///
    /// Applies the operator-document `query` plus the projection, sort and
    /// pagination in `options`, and returns the matching page together with
    /// metadata for the full match set.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection to read from
    /// * `query` - Operator-document filter, e.g. `{ "age": { "$gte": 18 } }`
    /// * `options` - Projection, sort and pagination
    ///
    /// # Returns
    ///
    /// Returns a [`FindOutcome`] with the page of matching documents and its
    /// [`QueryMetadata`], or a [`DatastoreError`](crate::error::DatastoreError)
    /// on failure.
    async fn find(
        &self,
        collection: &str,
        query: &Document,
        options: &QueryOptions,
    ) -> DatastoreResult<FindOutcome>;

    /// Inserts new documents into a collection.
    ///
    /// The backend assigns each document its `_id` (a UUID string) unless one
    /// is already present, and returns the documents as stored. The
    /// collection is created automatically if it doesn't exist.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection to insert into
    /// * `documents` - The documents to store
    ///
    /// # Returns
    ///
    /// Returns the inserted documents with their assigned IDs, or a
    /// [`DatastoreError`](crate::error::DatastoreError) on failure.
    async fn insert(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DatastoreResult<Vec<Document>>;

    /// Updates all documents matching a query.
    ///
    /// The `update` document carries operator sections: `$set` assigns
    /// fields, `$inc` adds to numeric fields, `$push` appends to array
    /// fields. Fields outside an operator section are ignored.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection containing the documents
    /// * `query` - Operator-document filter selecting the documents to update
    /// * `update` - The operator sections to apply
    ///
    /// # Returns
    ///
    /// Returns an [`UpdateOutcome`] with the number of matched documents, or
    /// a [`DatastoreError`](crate::error::DatastoreError) on failure.
    async fn update(
        &self,
        collection: &str,
        query: &Document,
        update: &Document,
    ) -> DatastoreResult<UpdateOutcome>;

    /// Deletes all documents matching a query.
    ///
    /// Documents that do not exist are silently skipped; deleting an empty
    /// match set is not an error.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection to delete from
    /// * `query` - Operator-document filter selecting the documents to remove
    ///
    /// # Returns
    ///
    /// Returns a [`DeleteOutcome`] with the number of removed documents, or
    /// a [`DatastoreError`](crate::error::DatastoreError) on failure.
    async fn delete(&self, collection: &str, query: &Document) -> DatastoreResult<DeleteOutcome>;

    /// Creates the given indexes on a collection.
    ///
    /// Backends without index support may treat this as a no-op and return
    /// an empty list.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection
    /// * `indexes` - The index specifications to create
    ///
    /// # Returns
    ///
    /// Returns the names of the created indexes, or a
    /// [`DatastoreError`](crate::error::DatastoreError) on failure.
    async fn index(&self, collection: &str, indexes: &[IndexSpec]) -> DatastoreResult<Vec<String>>;

    /// Lists the indexes that exist on a collection.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection
    ///
    /// # Returns
    ///
    /// Returns one descriptor document per index, or a
    /// [`DatastoreError`](crate::error::DatastoreError) on failure.
    async fn get_indexes(&self, collection: &str) -> DatastoreResult<Vec<Document>>;

    /// Reports storage statistics for a collection.
    ///
    /// The exact fields are backend-specific; `count` (number of documents)
    /// is expected from every backend.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection
    ///
    /// # Returns
    ///
    /// Returns a statistics document, or a
    /// [`DatastoreError`](crate::error::DatastoreError) on failure.
    async fn stats(&self, collection: &str) -> DatastoreResult<Document>;

    /// Drops a collection, or the entire database when `collection` is
    /// `None`.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection to drop, or `None` for everything
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` on success, or a
    /// [`DatastoreError`](crate::error::DatastoreError) on failure.
    ///
    /// # Warning
    ///
    /// This operation is irreversible. Ensure you have backups if the data
    /// is important.
    async fn drop_database(&self, collection: Option<&str>) -> DatastoreResult<()>;
}

/// Factory trait for constructing datastore instances.
#[async_trait]
pub trait DatastoreBuilder {
    type Datastore: Datastore;

    async fn build(self) -> DatastoreResult<Self::Datastore>;
}
