//! Full-text search provider abstraction.
//!
//! Search itself is an external collaborator: the engine keeps a provider's
//! index in step with document mutations and delegates ranking to it, but
//! never implements text matching. Configuring a provider is optional;
//! without one, [`Model::search`](crate::model::Model::search) answers with
//! [`ModelError::NotImplemented`](crate::error::ModelError::NotImplemented).

use async_trait::async_trait;
use bson::Document;
use std::fmt::Debug;

use crate::error::ModelResult;

/// An external full-text search index.
///
/// Implementations receive every created, updated and deleted document so
/// they can maintain their index, and answer term queries with a ranked list
/// of document IDs. The engine re-fetches the documents itself and preserves
/// the provider's ranking in the returned result set.
#[async_trait]
pub trait SearchProvider: Send + Sync + Debug {
    /// Adds or refreshes documents in the index.
    ///
    /// Called after successful creates and updates with the stored form of
    /// each document.
    async fn index(&self, collection: &str, documents: &[Document]) -> ModelResult<()>;

    /// Removes documents from the index.
    ///
    /// Called after successful deletes with the IDs of the removed
    /// documents.
    async fn remove(&self, collection: &str, ids: &[String]) -> ModelResult<()>;

    /// Answers a term query with document IDs, best match first.
    async fn query(&self, collection: &str, term: &str) -> ModelResult<Vec<String>>;
}
