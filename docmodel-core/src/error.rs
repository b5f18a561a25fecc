//! Error types and result types for model and datastore operations.
//!
//! Two boundaries, two enums: [`DatastoreError`] is what a storage backend
//! reports, [`ModelError`] is what model operations surface to callers. Use
//! [`ModelResult<T>`] as the return type for fallible model operations and
//! [`DatastoreResult<T>`] inside [`Datastore`](crate::datastore::Datastore)
//! implementations.

use bson::error::Error as BsonError;
use serde::Serialize;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors a storage backend can report.
///
/// Backends stay deliberately coarse: the model layer only distinguishes a
/// lost connection (which maps to a uniform "service unavailable" answer)
/// from everything else.
#[derive(Error, Debug)]
pub enum DatastoreError {
    /// The backend has no usable connection. Model operations translate this
    /// into [`ModelError::Connection`] at every entry point.
    #[error("Datastore disconnected")]
    Disconnected,
    /// The backend rejected a query or update payload it cannot execute.
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// Any other error from the underlying storage engine.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for storage backend operations.
pub type DatastoreResult<T> = Result<T, DatastoreError>;

/// A single failed check from document or query validation.
///
/// Collected into [`ModelError::Validation`] so transport adapters can render
/// the full per-field breakdown in a 400 response body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    /// The offending field, in external (dot-notation) form.
    pub field: String,
    /// Human-readable reason, either schema-supplied or generated.
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        FieldError {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Represents all possible errors that can occur during model operations.
///
/// This enum covers validation failures, missing documents and collections,
/// hook pipeline failures, and storage-level errors. Each variant maps to an
/// HTTP status code through [`ModelError::status`] for transport adapters.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The document or query failed schema validation. Carries one entry per
    /// failed field check.
    #[error("Validation failed")]
    Validation { errors: Vec<FieldError> },
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    NotFound(String, String),
    /// No schema is registered for the requested collection.
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
    /// The datastore is unreachable. All operations answer uniformly with
    /// this error while the connection is down.
    #[error("Datastore connection unavailable")]
    Connection,
    /// A hook handler failed and aborted the operation it protects.
    /// Carries the handler's configured name and its failure payload.
    #[error("Hook {name} failed: {message}")]
    Hook { name: String, message: String },
    /// The operation requires a collaborator that is not configured, such as
    /// search without a search provider.
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    /// Serialization/deserialization error when converting between document
    /// formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An error reported by the storage backend.
    #[error("Storage error: {0}")]
    Store(String),
}

/// A specialized `Result` type for model operations.
///
/// This type alias is used throughout the crate to indicate operations that
/// may fail with a [`ModelError`].
pub type ModelResult<T> = Result<T, ModelError>;

impl ModelError {
    /// Builds a [`ModelError::Validation`] from a single field failure.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ModelError::Validation {
            errors: vec![FieldError::new(field, message)],
        }
    }

    /// The HTTP status code equivalent of this error.
    ///
    /// Validation maps to 400, missing documents and collections to 404,
    /// an unreachable datastore to 503, unconfigured capabilities to 501,
    /// and everything else to 500.
    pub fn status(&self) -> u16 {
        match self {
            ModelError::Validation { .. } => 400,
            ModelError::NotFound(_, _) | ModelError::UnknownCollection(_) => 404,
            ModelError::Connection => 503,
            ModelError::NotImplemented(_) => 501,
            ModelError::Hook { .. } | ModelError::Serialization(_) | ModelError::Store(_) => 500,
        }
    }
}

impl From<DatastoreError> for ModelError {
    fn from(err: DatastoreError) -> Self {
        match err {
            DatastoreError::Disconnected => ModelError::Connection,
            DatastoreError::BadRequest(msg) => ModelError::Store(msg),
            DatastoreError::Backend(msg) => ModelError::Store(msg),
        }
    }
}

impl From<BsonError> for ModelError {
    fn from(err: BsonError) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for ModelError {
    fn from(err: SerdeJsonError) -> Self {
        ModelError::Serialization(err.to_string())
    }
}
