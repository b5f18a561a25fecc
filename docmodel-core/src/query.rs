//! Query options, sorting and pagination metadata for model operations.
//!
//! Queries themselves are plain BSON documents (operator documents such as
//! `{ "age": { "$gte": 18 } }`); this module provides the surrounding request
//! options and the pagination metadata that every result set carries.
//!
//! # Options Building
//!
//! Options can be constructed using the fluent builder API:
//!
//! ```ignore
//! use docmodel::query::{FindOptions, SortDirection};
//!
//! let options = FindOptions::builder()
//!     .fields(["name", "author.name"])
//!     .sort("createdAt", SortDirection::Desc)
//!     .limit(10)
//!     .page(2)
//!     .compose(true)
//!     .build();
//! ```

use serde::{Deserialize, Serialize};

use bson::Document;

/// Default number of documents per result page when no limit is requested.
pub const DEFAULT_LIMIT: usize = 50;

/// Sort direction for query results.
///
/// Serializes to the conventional `1` / `-1` integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl From<SortDirection> for i32 {
    fn from(direction: SortDirection) -> i32 {
        match direction {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

impl TryFrom<i32> for SortDirection {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SortDirection::Asc),
            -1 => Ok(SortDirection::Desc),
            other => Err(format!("invalid sort direction: {other}")),
        }
    }
}

/// Sort specification for query results.
///
/// Specifies which field to sort by and in which direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Sort { field: field.into(), direction }
    }
}

/// Request options for model read operations.
///
/// Everything is optional; unset values fall back to collection settings or
/// built-in defaults. [`FindOptions`] carries both the storage-facing knobs
/// (projection, sort, pagination) and the model-level ones (reference
/// composition, revision history expansion), which the engine strips before
/// the request reaches the datastore.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FindOptions {
    /// Fields to include in returned documents. Dot-notation entries such as
    /// `"author.name"` select fields inside composed reference documents.
    pub fields: Vec<String>,
    /// Sort specifications, applied in order.
    pub sort: Vec<Sort>,
    /// Maximum number of documents per page.
    pub limit: Option<usize>,
    /// The page to return (1-indexed).
    pub page: Option<usize>,
    /// Explicit number of documents to skip. Overrides the page-derived
    /// offset when set.
    pub skip: Option<usize>,
    /// Per-request reference composition switch. `None` defers to the
    /// collection settings.
    pub compose: Option<bool>,
    /// Maximum reference expansion depth for this request. `None` defers to
    /// the collection settings.
    pub compose_depth: Option<usize>,
    /// When set, each returned document additionally carries its expanded
    /// revision history under `_history`.
    pub include_history: bool,
    /// Optional filter applied to expanded revision documents when
    /// `include_history` is set.
    pub history_filters: Option<Document>,
}

impl FindOptions {
    /// Creates empty options: first page, default limit, collection-level
    /// composition behavior.
    pub fn new() -> Self {
        FindOptions::default()
    }

    /// Creates a new options builder for fluent construction.
    pub fn builder() -> FindOptionsBuilder {
        FindOptionsBuilder::new()
    }

    /// The storage-facing subset of these options.
    ///
    /// Model-level switches (composition, history expansion) are not the
    /// datastore's business and are stripped here. A dot-notation selector
    /// keeps its head segment in the projection: the raw reference value must
    /// come back from storage for composition to expand it.
    pub fn storage(&self) -> QueryOptions {
        let mut fields: Vec<String> = Vec::new();
        for field in &self.fields {
            let head = field.split('.').next().unwrap_or(field).to_string();
            if !fields.contains(&head) {
                fields.push(head);
            }
        }
        QueryOptions {
            fields,
            sort: self.sort.clone(),
            limit: self.limit.unwrap_or(DEFAULT_LIMIT),
            page: self.page.unwrap_or(1),
            skip: self.skip,
        }
    }
}

/// Builder for [`FindOptions`].
#[derive(Debug, Clone, Default)]
pub struct FindOptionsBuilder {
    options: FindOptions,
}

impl FindOptionsBuilder {
    /// Creates a new options builder.
    pub fn new() -> Self {
        FindOptionsBuilder { options: FindOptions::default() }
    }

    /// Sets the fields to include in returned documents.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Appends a sort specification.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.options.sort.push(Sort::new(field, direction));
        self
    }

    /// Sets the maximum number of documents per page.
    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = Some(limit);
        self
    }

    /// Sets the page to return (1-indexed).
    pub fn page(mut self, page: usize) -> Self {
        self.options.page = Some(page);
        self
    }

    /// Sets an explicit number of documents to skip.
    pub fn skip(mut self, skip: usize) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Overrides the collection's reference composition setting for this
    /// request.
    pub fn compose(mut self, compose: bool) -> Self {
        self.options.compose = Some(compose);
        self
    }

    /// Overrides the collection's reference expansion depth for this request.
    pub fn compose_depth(mut self, depth: usize) -> Self {
        self.options.compose_depth = Some(depth);
        self
    }

    /// Requests expanded revision history on each returned document.
    pub fn include_history(mut self) -> Self {
        self.options.include_history = true;
        self
    }

    /// Sets a filter applied to expanded revision documents.
    pub fn history_filters(mut self, filters: Document) -> Self {
        self.options.history_filters = Some(filters);
        self
    }

    /// Builds and returns the final options.
    pub fn build(self) -> FindOptions {
        self.options
    }
}

/// The storage-facing subset of request options.
///
/// This is what a [`Datastore`](crate::datastore::Datastore) receives:
/// projection, sort and pagination, nothing model-level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Top-level fields to include in returned documents. Empty means all.
    /// `_id` is always included.
    pub fields: Vec<String>,
    /// Sort specifications, applied in order.
    pub sort: Vec<Sort>,
    /// Maximum number of documents to return.
    pub limit: usize,
    /// The page to return (1-indexed).
    pub page: usize,
    /// Explicit number of documents to skip, overriding the page-derived
    /// offset.
    pub skip: Option<usize>,
}

impl QueryOptions {
    /// The number of documents to skip for this request.
    ///
    /// An explicit `skip` wins; otherwise the offset is derived from the
    /// 1-indexed page: `(page - 1) * limit`.
    pub fn offset(&self) -> usize {
        match self.skip {
            Some(skip) => skip,
            None => (self.page.max(1) - 1) * self.limit,
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            fields: Vec::new(),
            sort: Vec::new(),
            limit: DEFAULT_LIMIT,
            page: 1,
            skip: None,
        }
    }
}

/// Pagination metadata accompanying every result set.
///
/// Datastores compute this through [`QueryMetadata::new`] so every backend
/// reports the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetadata {
    /// The page that was returned (1-indexed).
    pub page: usize,
    /// Number of documents skipped before this page.
    pub offset: usize,
    /// The page size that was applied.
    pub limit: usize,
    /// Total number of documents matching the query, across all pages.
    pub total_count: usize,
    /// Total number of pages at this page size.
    pub total_pages: usize,
}

impl QueryMetadata {
    /// Computes metadata for a query that matched `total_count` documents
    /// under the given options.
    pub fn new(total_count: usize, options: &QueryOptions) -> Self {
        let limit = options.limit.max(1);
        QueryMetadata {
            page: options.page.max(1),
            offset: options.offset(),
            limit,
            total_count,
            total_pages: total_count.div_ceil(limit),
        }
    }

    /// Metadata for an empty result produced without consulting storage,
    /// such as a query short-circuited to an impossible match.
    pub fn empty(options: &QueryOptions) -> Self {
        QueryMetadata::new(0, options)
    }
}
