//! Convenient re-exports of commonly used types from docmodel.
//!
//! Import this prelude module to quickly access the most frequently used
//! types and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - Registry construction and per-collection models
//! - Schema, field and collection-settings types
//! - Request options, sorting and pagination metadata
//! - Datastore traits and outcome types for backend implementers
//! - Hook traits and stages
//! - Error and result types

pub use docmodel_core::{
    datastore::{Datastore, DatastoreBuilder, DeleteOutcome, FindOutcome, UpdateOutcome},
    error::{DatastoreError, DatastoreResult, FieldError, ModelError, ModelResult},
    hooks::{Hook, HookContext, HookRegistry, HookStage},
    model::{DeleteResult, Model, ResultSet},
    query::{FindOptions, FindOptionsBuilder, QueryMetadata, QueryOptions, Sort, SortDirection},
    registry::{ModelConfig, Registry, RegistryBuilder},
    schema::{
        CollectionSettings, ComposeSetting, FieldDescriptor, FieldType, FieldValidation,
        HookConfig, HookSet, IndexSpec, ReferenceSettings, Schema,
    },
    search::SearchProvider,
};
