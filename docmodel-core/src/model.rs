//! The model engine: schema-validated CRUD over one collection.
//!
//! A [`Model`] binds a collection name to its schema and to the registry's
//! shared collaborators (datastore, hook registry, optional search
//! provider). Every operation runs the same pipeline around storage:
//! validation first, then query rewriting, then hooks, then the storage
//! call, then composition, revision tracking and output formatting as the
//! operation requires.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::registry::Registry;
//! use bson::doc;
//!
//! # async fn example(registry: Registry) -> docmodel::error::ModelResult<()> {
//! let books = registry.model("books")?;
//! let created = books
//!     .create(vec![doc! { "title": "Moby-Dick" }], doc! {})
//!     .await?;
//! assert_eq!(created.results.len(), 1);
//! # Ok(()) }
//! ```

use bson::{Bson, Document};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    compose::Composer,
    error::{ModelError, ModelResult},
    history::{HistoryTracker, RevisionAction},
    hooks::HookStage,
    query::{FindOptions, QueryMetadata, QueryOptions},
    registry::Registry,
    rewrite::{QueryRewriter, Rewritten},
    schema::{internal_fields, CollectionSettings, Schema},
    validate,
};

/// A page of documents plus pagination metadata, the result shape of every
/// document-returning operation.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSet {
    /// The documents on the requested page.
    pub results: Vec<Document>,
    /// Pagination metadata covering the entire match set.
    pub metadata: QueryMetadata,
}

impl ResultSet {
    /// An empty result set produced without consulting storage.
    pub fn empty(options: &QueryOptions) -> Self {
        ResultSet {
            results: Vec::new(),
            metadata: QueryMetadata::empty(options),
        }
    }
}

/// The result of a [`Model::delete`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteResult {
    /// Number of documents removed.
    pub deleted_count: u64,
    /// Number of documents remaining in the collection after the deletion.
    pub total_count: u64,
}

/// Schema-validated document operations on a single collection.
///
/// Obtained through [`Registry::model`]; cheap to clone (every field is a
/// name or a shared handle).
#[derive(Debug, Clone)]
pub struct Model {
    collection: String,
    schema: Arc<Schema>,
    registry: Registry,
    composer: Composer,
    rewriter: QueryRewriter,
    history: HistoryTracker,
}

impl Model {
    /// Creates a model bound to one collection (internal use; go through
    /// [`Registry::model`]).
    pub(crate) fn new(collection: String, schema: Arc<Schema>, registry: Registry) -> Self {
        let composer = Composer::new(registry.clone());
        let rewriter = QueryRewriter::new(registry.clone());
        let history = HistoryTracker::new(registry.datastore().clone());
        Model {
            collection,
            schema,
            registry,
            composer,
            rewriter,
            history,
        }
    }

    /// The name of the collection this model operates on.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The schema this model validates against.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn settings(&self) -> &CollectionSettings {
        &self.schema.settings
    }

    /// Validates and inserts a batch of documents.
    ///
    /// Every document is validated before anything is written; the first
    /// failure aborts the whole batch. `internals` holds trusted fields
    /// (timestamps, actor IDs) merged into every document after validation;
    /// they override caller fields of the same name. Inline reference
    /// sub-documents are written to their foreign collection first and
    /// replaced by their IDs. `beforeCreate` and `afterCreate` hooks run
    /// per document, concurrently across the batch.
    ///
    /// # Arguments
    ///
    /// * `documents` - The documents to insert
    /// * `internals` - Trusted fields merged into every document
    ///
    /// # Returns
    ///
    /// The created documents, composed and output-formatted, with
    /// `_version` set to 1 (and `_history` to `[]` when revisioning is on).
    ///
    /// # Errors
    ///
    /// [`ModelError::Validation`] before any write when a document fails its
    /// schema; hook and storage failures abort the operation.
    pub async fn create(
        &self,
        documents: Vec<Document>,
        internals: Document,
    ) -> ModelResult<ResultSet> {
        log::debug!(
            "create: {} document(s) into {}",
            documents.len(),
            self.collection
        );
        for document in &documents {
            validate::validate_document(&self.schema, document)?;
        }

        let mut prepared = Vec::with_capacity(documents.len());
        for mut document in documents {
            for (field, value) in internals.iter() {
                document.insert(field.clone(), value.clone());
            }
            document.insert(internal_fields::VERSION, 1_i64);
            if self.settings().store_revisions {
                document.insert(internal_fields::HISTORY, Bson::Array(Vec::new()));
            }
            self.resolve_inline_references(&mut document).await?;
            prepared.push(document);
        }

        let prepared = self
            .run_document_hooks(HookStage::BeforeCreate, prepared)
            .await?;
        let inserted = self
            .registry
            .datastore()
            .insert(&self.collection, prepared)
            .await?;
        let results = self
            .run_document_hooks(HookStage::AfterCreate, inserted)
            .await?;

        if let Some(provider) = self.registry.search_provider() {
            if let Err(err) = provider.index(&self.collection, &results).await {
                log::error!("search indexing failed for {}: {err}", self.collection);
                return Err(err);
            }
        }

        let options = FindOptions::default();
        let results = if self.settings().compose.resolve(options.compose) {
            self.composer
                .compose(&self.collection, self.schema.clone(), results, &options)
                .await?
        } else {
            results
        };
        let metadata = batch_metadata(results.len());
        Ok(ResultSet {
            results: self.format_for_output(results),
            metadata,
        })
    }

    /// Queries the collection and returns matching documents in internal
    /// format.
    ///
    /// The query is validated, dot-notation reference conditions are
    /// resolved against their foreign collections, and results are composed
    /// when the collection (or the request) enables it. With
    /// `options.include_history`, each result's `_history` IDs are expanded
    /// into the revision documents themselves, optionally filtered by
    /// `options.history_filters`.
    ///
    /// Unlike [`Model::get`], no hooks run and no output formatting is
    /// applied; this is the raw engine read other operations build on.
    ///
    /// # Errors
    ///
    /// [`ModelError::Validation`] for a malformed query, storage errors
    /// verbatim.
    pub async fn find(&self, query: Document, options: &FindOptions) -> ModelResult<ResultSet> {
        validate::validate_query(&self.schema, &query)?;

        let mut storage = options.storage();
        if options.limit.is_none() {
            if let Some(count) = self.settings().count {
                storage.limit = count;
            }
        }

        let query = match self
            .rewriter
            .rewrite(&self.collection, self.schema.clone(), query)
            .await?
        {
            Rewritten::Query(query) => query,
            Rewritten::NoMatch => return Ok(ResultSet::empty(&storage)),
        };

        let outcome = self
            .registry
            .datastore()
            .find(&self.collection, &query, &storage)
            .await?;

        let mut results = if self.settings().compose.resolve(options.compose) {
            self.composer
                .compose(&self.collection, self.schema.clone(), outcome.results, options)
                .await?
        } else {
            outcome.results
        };

        if options.include_history {
            self.expand_history(&mut results, options.history_filters.as_ref())
                .await?;
        }

        Ok(ResultSet {
            results,
            metadata: outcome.metadata,
        })
    }

    /// Queries the collection through the hook pipeline.
    ///
    /// `beforeGet` hooks may transform the query, `afterGet` hooks may
    /// transform the result list; results are output-formatted. This is the
    /// read operation a transport layer should call.
    ///
    /// # Errors
    ///
    /// As [`Model::find`], plus [`ModelError::Hook`] when a hook fails.
    pub async fn get(&self, query: Document, options: &FindOptions) -> ModelResult<ResultSet> {
        let query = self
            .run_value_hook(HookStage::BeforeGet, Bson::Document(query))
            .await?;
        let set = self.find(document_from(query)?, options).await?;

        let transformed = self
            .run_value_hook(
                HookStage::AfterGet,
                Bson::Array(set.results.into_iter().map(Bson::Document).collect()),
            )
            .await?;
        Ok(ResultSet {
            results: self.format_for_output(documents_from(transformed)?),
            metadata: set.metadata,
        })
    }

    /// Updates every document matching `query` with the fields in `update`.
    ///
    /// The update payload is partially validated against the schema (absent
    /// required fields are fine, internal fields are not). Matching
    /// documents are snapshotted uncomposed before the write; one revision
    /// per match is recorded after it. The storage update applies
    /// `{ $set: update + internals, $inc: { _version: 1 } }`.
    ///
    /// # Arguments
    ///
    /// * `query` - Selects the documents to update
    /// * `update` - The fields to assign
    /// * `internals` - Trusted fields assigned alongside, overriding `update`
    ///
    /// # Returns
    ///
    /// The updated documents, re-fetched composed and output-formatted.
    ///
    /// # Errors
    ///
    /// [`ModelError::NotFound`] when an ID-addressed query matches nothing.
    /// A history failure after the committed write surfaces as the
    /// operation's error without rolling the write back.
    pub async fn update(
        &self,
        query: Document,
        update: Document,
        internals: Document,
    ) -> ModelResult<ResultSet> {
        log::debug!("update: {} with {} field(s)", self.collection, update.len());
        validate::validate_query(&self.schema, &query)?;
        validate::validate_update(&self.schema, &update)?;
        let addressed = validate::id_addressed(&query).map(str::to_string);

        let query = match self
            .rewriter
            .rewrite(&self.collection, self.schema.clone(), query)
            .await?
        {
            Rewritten::Query(query) => query,
            Rewritten::NoMatch => {
                return match addressed {
                    Some(id) => Err(ModelError::NotFound(id, self.collection.clone())),
                    None => Ok(ResultSet::empty(&QueryOptions::default())),
                };
            }
        };

        // Pre-images are captured uncomposed: revisions preserve what
        // storage held, not a read-time view.
        let unpaged = QueryOptions { limit: usize::MAX, ..Default::default() };
        let pre_images = self
            .registry
            .datastore()
            .find(&self.collection, &query, &unpaged)
            .await?
            .results;
        if pre_images.is_empty() {
            return match addressed {
                Some(id) => Err(ModelError::NotFound(id, self.collection.clone())),
                None => Ok(ResultSet::empty(&QueryOptions::default())),
            };
        }
        let ids: Vec<String> = pre_images
            .iter()
            .filter_map(|document| {
                document
                    .get(internal_fields::ID)
                    .and_then(Bson::as_str)
                    .map(str::to_string)
            })
            .collect();

        let mut payload = update;
        self.resolve_inline_references(&mut payload).await?;
        let payload = document_from(
            self.run_value_hook(HookStage::BeforeUpdate, Bson::Document(payload))
                .await?,
        )?;

        let mut set_section = payload;
        for (field, value) in internals.iter() {
            set_section.insert(field.clone(), value.clone());
        }
        let targeted = bson::doc! { internal_fields::ID: { "$in": ids.clone() } };
        self.registry
            .datastore()
            .update(
                &self.collection,
                &targeted,
                &bson::doc! {
                    "$set": set_section,
                    "$inc": { internal_fields::VERSION: 1_i64 },
                },
            )
            .await?;

        self.history
            .record(
                &self.collection,
                self.settings(),
                &pre_images,
                RevisionAction::Update,
            )
            .await?;

        let options = FindOptions::default();
        let refetched = self
            .registry
            .datastore()
            .find(&self.collection, &targeted, &unpaged)
            .await?
            .results;
        let refetched = if self.settings().compose.resolve(options.compose) {
            self.composer
                .compose(&self.collection, self.schema.clone(), refetched, &options)
                .await?
        } else {
            refetched
        };
        let results = self
            .run_document_hooks(HookStage::AfterUpdate, refetched)
            .await?;

        if let Some(provider) = self.registry.search_provider() {
            if let Err(err) = provider.index(&self.collection, &results).await {
                log::error!("search re-indexing failed for {}: {err}", self.collection);
                return Err(err);
            }
        }

        let metadata = batch_metadata(results.len());
        Ok(ResultSet {
            results: self.format_for_output(results),
            metadata,
        })
    }

    /// Deletes every document matching `query`.
    ///
    /// The doomed documents are fetched first: one delete-kind revision per
    /// document is recorded before the deletion proceeds, and their IDs are
    /// removed from the search index afterwards. `beforeDelete` hooks run
    /// over the query and may veto the deletion by failing, or narrow it by
    /// rewriting; `afterDelete` hooks receive the deleted set.
    ///
    /// # Returns
    ///
    /// A [`DeleteResult`] with the number of removed documents and the
    /// collection's document count after the deletion.
    ///
    /// # Errors
    ///
    /// [`ModelError::NotFound`] when an ID-addressed query matches nothing;
    /// no revision is written in that case.
    pub async fn delete(&self, query: Document) -> ModelResult<DeleteResult> {
        log::debug!("delete from {}", self.collection);
        validate::validate_query(&self.schema, &query)?;
        let addressed = validate::id_addressed(&query).map(str::to_string);

        let query = match self
            .rewriter
            .rewrite(&self.collection, self.schema.clone(), query)
            .await?
        {
            Rewritten::Query(query) => query,
            Rewritten::NoMatch => {
                return match addressed {
                    Some(id) => Err(ModelError::NotFound(id, self.collection.clone())),
                    None => {
                        let total = self.collection_count().await?;
                        Ok(DeleteResult { deleted_count: 0, total_count: total })
                    }
                };
            }
        };

        let unpaged = QueryOptions { limit: usize::MAX, ..Default::default() };
        let doomed = self
            .registry
            .datastore()
            .find(&self.collection, &query, &unpaged)
            .await?
            .results;
        if doomed.is_empty() {
            return match addressed {
                Some(id) => Err(ModelError::NotFound(id, self.collection.clone())),
                None => {
                    let total = self.collection_count().await?;
                    Ok(DeleteResult { deleted_count: 0, total_count: total })
                }
            };
        }

        let query = document_from(
            self.run_value_hook(HookStage::BeforeDelete, Bson::Document(query))
                .await?,
        )?;

        self.history
            .record(
                &self.collection,
                self.settings(),
                &doomed,
                RevisionAction::Delete,
            )
            .await?;

        let outcome = self
            .registry
            .datastore()
            .delete(&self.collection, &query)
            .await?;

        if let Some(provider) = self.registry.search_provider() {
            let ids: Vec<String> = doomed
                .iter()
                .filter_map(|document| {
                    document
                        .get(internal_fields::ID)
                        .and_then(Bson::as_str)
                        .map(str::to_string)
                })
                .collect();
            if let Err(err) = provider.remove(&self.collection, &ids).await {
                log::error!("search index cleanup failed for {}: {err}", self.collection);
                return Err(err);
            }
        }

        self.run_value_hook(
            HookStage::AfterDelete,
            Bson::Array(doomed.into_iter().map(Bson::Document).collect()),
        )
        .await?;

        let total = self.collection_count().await?;
        Ok(DeleteResult {
            deleted_count: outcome.deleted_count,
            total_count: total,
        })
    }

    /// Counts the documents matching `query` without fetching them.
    ///
    /// # Errors
    ///
    /// As [`Model::find`].
    pub async fn count(&self, query: Document) -> ModelResult<QueryMetadata> {
        let options = FindOptions { compose: Some(false), ..Default::default() };
        Ok(self.find(query, &options).await?.metadata)
    }

    /// Free-text search through the configured search provider.
    ///
    /// The provider returns a ranked ID list; the documents are fetched
    /// through [`Model::get`] (so get-stage hooks apply) and re-sorted into
    /// the provider's ranking.
    ///
    /// # Errors
    ///
    /// [`ModelError::NotImplemented`] when no search provider is configured;
    /// [`ModelError::Validation`] when `term` is shorter than the configured
    /// minimum length.
    pub async fn search(&self, term: &str, options: &FindOptions) -> ModelResult<ResultSet> {
        let Some(provider) = self.registry.search_provider() else {
            return Err(ModelError::NotImplemented(
                "no search provider is configured".to_string(),
            ));
        };
        let minimum = self.registry.config().search_min_length;
        if term.chars().count() < minimum {
            return Err(ModelError::validation(
                "search",
                format!("search term must be at least {minimum} characters long"),
            ));
        }

        let ranked = provider.query(&self.collection, term).await?;
        if ranked.is_empty() {
            return Ok(ResultSet::empty(&options.storage()));
        }

        let query = bson::doc! { internal_fields::ID: { "$in": ranked.clone() } };
        let mut set = self.get(query, options).await?;

        let rank: HashMap<&str, usize> = ranked
            .iter()
            .enumerate()
            .map(|(position, id)| (id.as_str(), position))
            .collect();
        let id_key = self.external_field(internal_fields::ID);
        set.results.sort_by_key(|document| {
            document
                .get(&id_key)
                .and_then(Bson::as_str)
                .and_then(|id| rank.get(id).copied())
                .unwrap_or(usize::MAX)
        });
        Ok(set)
    }

    /// The revision documents of one live document, oldest first.
    ///
    /// Reads the live document's `_history` ID list and fetches those
    /// revisions from the revision collection, optionally narrowed by
    /// `options.history_filters`.
    ///
    /// # Errors
    ///
    /// [`ModelError::NotFound`] when no document has the given ID.
    pub async fn revisions(&self, id: &str, options: &FindOptions) -> ModelResult<Vec<Document>> {
        let query = bson::doc! { internal_fields::ID: id };
        let live = self
            .registry
            .datastore()
            .find(&self.collection, &query, &QueryOptions::default())
            .await?
            .results;
        let Some(document) = live.first() else {
            return Err(ModelError::NotFound(id.to_string(), self.collection.clone()));
        };

        let history_ids: Vec<String> = match document.get(internal_fields::HISTORY) {
            Some(Bson::Array(ids)) => ids
                .iter()
                .filter_map(|entry| entry.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        if history_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut revision_query = options.history_filters.clone().unwrap_or_default();
        revision_query.insert(
            internal_fields::ID,
            bson::doc! { "$in": history_ids.clone() },
        );
        let unpaged = QueryOptions { limit: history_ids.len().max(1), ..Default::default() };
        let revisions = self
            .registry
            .datastore()
            .find(
                &self.settings().revision_collection_for(&self.collection),
                &revision_query,
                &unpaged,
            )
            .await?
            .results;

        // _history is append-only, so its order is the revision order;
        // storage makes no ordering promise of its own.
        let mut by_id: HashMap<String, Document> = revisions
            .into_iter()
            .filter_map(|revision| {
                revision
                    .get(internal_fields::ID)
                    .and_then(Bson::as_str)
                    .map(str::to_string)
                    .map(|id| (id, revision))
            })
            .collect();
        let ordered: Vec<Document> = history_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();
        Ok(self.format_for_output(ordered))
    }

    /// Storage statistics for this collection, as reported by the backend.
    pub async fn stats(&self) -> ModelResult<Document> {
        Ok(self.registry.datastore().stats(&self.collection).await?)
    }

    /// The indexes that exist on this collection.
    pub async fn get_indexes(&self) -> ModelResult<Vec<Document>> {
        Ok(self.registry.datastore().get_indexes(&self.collection).await?)
    }

    /// Creates the indexes declared in the collection's settings.
    ///
    /// # Returns
    ///
    /// The names of the created indexes; empty when the schema declares
    /// none.
    pub async fn ensure_indexes(&self) -> ModelResult<Vec<String>> {
        if self.settings().index.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .registry
            .datastore()
            .index(&self.collection, &self.settings().index)
            .await?)
    }

    /// Renames externally-prefixed top-level fields to their internal form.
    ///
    /// With the default prefix (`_`) this is the identity.
    pub fn format_for_input(&self, documents: Vec<Document>) -> Vec<Document> {
        let external = self.registry.config().external_prefix.clone();
        documents
            .into_iter()
            .map(|document| rename_prefix(document, &external, internal_fields::PREFIX, false))
            .collect()
    }

    /// Renames internally-prefixed top-level fields to their external form
    /// and strips null-valued fields.
    pub fn format_for_output(&self, documents: Vec<Document>) -> Vec<Document> {
        let external = self.registry.config().external_prefix.clone();
        documents
            .into_iter()
            .map(|document| rename_prefix(document, internal_fields::PREFIX, &external, true))
            .collect()
    }

    /// The external (output-formatted) name of an internal field.
    fn external_field(&self, internal: &str) -> String {
        let stripped = internal
            .strip_prefix(internal_fields::PREFIX)
            .unwrap_or(internal);
        format!("{}{}", self.registry.config().external_prefix, stripped)
    }

    async fn run_document_hooks(
        &self,
        stage: HookStage,
        documents: Vec<Document>,
    ) -> ModelResult<Vec<Document>> {
        let configs = self.settings().hooks.stage(stage);
        let values = documents.into_iter().map(Bson::Document).collect();
        let outputs = self
            .registry
            .hooks()
            .run_for_each(configs, values, &self.collection, stage, &self.schema)
            .await?;
        outputs.into_iter().map(document_from).collect()
    }

    async fn run_value_hook(&self, stage: HookStage, value: Bson) -> ModelResult<Bson> {
        let configs = self.settings().hooks.stage(stage);
        self.registry
            .hooks()
            .run(configs, value, &self.collection, stage, &self.schema)
            .await
    }

    /// Replaces inline reference sub-documents with their IDs by writing
    /// them to the foreign collection first: a sub-document carrying an
    /// `_id` updates the foreign document, one without creates it.
    fn resolve_inline_references<'a>(
        &'a self,
        document: &'a mut Document,
    ) -> BoxFuture<'a, ModelResult<()>> {
        async move {
            let inline_fields: Vec<(String, String, Bson)> = self
                .schema
                .reference_fields()
                .filter_map(|(field, descriptor)| {
                    let value = document.get(field)?;
                    if !holds_inline_documents(value) {
                        return None;
                    }
                    let settings = descriptor.reference_settings();
                    let target = settings.target_collection(&self.collection).to_string();
                    Some((field.to_string(), target, value.clone()))
                })
                .collect();

            for (field, target, value) in inline_fields {
                let resolved = match value {
                    Bson::Document(inline) => {
                        Bson::String(self.write_inline(&target, inline).await?)
                    }
                    Bson::Array(items) => {
                        let mut resolved = Vec::with_capacity(items.len());
                        for item in items {
                            match item {
                                Bson::Document(inline) => resolved.push(Bson::String(
                                    self.write_inline(&target, inline).await?,
                                )),
                                other => resolved.push(other),
                            }
                        }
                        Bson::Array(resolved)
                    }
                    other => other,
                };
                document.insert(field, resolved);
            }
            Ok(())
        }
        .boxed()
    }

    /// Writes one inline sub-document to its foreign collection and returns
    /// the ID it ends up under.
    async fn write_inline(&self, target: &str, inline: Document) -> ModelResult<String> {
        let model = self.registry.model(target)?;
        let existing = inline
            .get(internal_fields::ID)
            .and_then(Bson::as_str)
            .map(str::to_string);
        match existing {
            Some(id) => {
                let payload = strip_internal_fields(inline);
                if !payload.is_empty() {
                    model
                        .update(
                            bson::doc! { internal_fields::ID: id.clone() },
                            payload,
                            Document::new(),
                        )
                        .await?;
                }
                Ok(id)
            }
            None => {
                let created = model.create(vec![inline], Document::new()).await?;
                let id_key = self.external_field(internal_fields::ID);
                created
                    .results
                    .first()
                    .and_then(|document| document.get(&id_key))
                    .and_then(Bson::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ModelError::Serialization(format!(
                            "inline create against {target} returned no document ID"
                        ))
                    })
            }
        }
    }

    /// Replaces each result's `_history` ID list with the revision documents
    /// themselves, fetched in one batch.
    async fn expand_history(
        &self,
        results: &mut [Document],
        filters: Option<&Document>,
    ) -> ModelResult<()> {
        let mut all_ids: Vec<String> = Vec::new();
        for document in results.iter() {
            if let Some(Bson::Array(ids)) = document.get(internal_fields::HISTORY) {
                for id in ids.iter().filter_map(Bson::as_str) {
                    if !all_ids.iter().any(|existing| existing == id) {
                        all_ids.push(id.to_string());
                    }
                }
            }
        }
        if all_ids.is_empty() {
            return Ok(());
        }

        let mut query = filters.cloned().unwrap_or_default();
        query.insert(internal_fields::ID, bson::doc! { "$in": all_ids.clone() });
        let unpaged = QueryOptions { limit: all_ids.len().max(1), ..Default::default() };
        let revisions = self
            .registry
            .datastore()
            .find(
                &self.settings().revision_collection_for(&self.collection),
                &query,
                &unpaged,
            )
            .await?
            .results;

        let by_id: HashMap<String, Document> = revisions
            .into_iter()
            .filter_map(|revision| {
                revision
                    .get(internal_fields::ID)
                    .and_then(Bson::as_str)
                    .map(|id| (id.to_string(), revision.clone()))
            })
            .collect();

        for document in results.iter_mut() {
            let Some(Bson::Array(ids)) = document.get(internal_fields::HISTORY) else {
                continue;
            };
            let expanded: Vec<Bson> = ids
                .iter()
                .filter_map(Bson::as_str)
                .filter_map(|id| by_id.get(id).cloned().map(Bson::Document))
                .collect();
            document.insert(internal_fields::HISTORY, Bson::Array(expanded));
        }
        Ok(())
    }

    async fn collection_count(&self) -> ModelResult<u64> {
        let options = QueryOptions { limit: 1, ..Default::default() };
        let outcome = self
            .registry
            .datastore()
            .find(&self.collection, &Document::new(), &options)
            .await?;
        Ok(outcome.metadata.total_count as u64)
    }
}

/// Single-page metadata for a mutation's result batch.
fn batch_metadata(count: usize) -> QueryMetadata {
    let options = QueryOptions { limit: count.max(1), ..Default::default() };
    QueryMetadata::new(count, &options)
}

/// Whether a reference field value carries inline sub-documents that need
/// writing out before the primary operation.
fn holds_inline_documents(value: &Bson) -> bool {
    match value {
        Bson::Document(_) => true,
        Bson::Array(items) => items.iter().any(|item| matches!(item, Bson::Document(_))),
        _ => false,
    }
}

/// Removes internal-prefixed top-level fields from a document.
fn strip_internal_fields(document: Document) -> Document {
    document
        .into_iter()
        .filter(|(key, _)| !key.starts_with(internal_fields::PREFIX))
        .collect()
}

/// Converts a hook chain's output back into a document. `Null` means
/// "continue with the empty value".
fn document_from(value: Bson) -> ModelResult<Document> {
    match value {
        Bson::Document(document) => Ok(document),
        Bson::Null => Ok(Document::new()),
        other => Err(ModelError::Serialization(format!(
            "expected a document from the hook chain, got {}",
            bson_kind(&other)
        ))),
    }
}

/// Converts a hook chain's output back into a document list.
fn documents_from(value: Bson) -> ModelResult<Vec<Document>> {
    match value {
        Bson::Array(items) => items.into_iter().map(document_from).collect(),
        Bson::Null => Ok(Vec::new()),
        other => Err(ModelError::Serialization(format!(
            "expected a document list from the hook chain, got {}",
            bson_kind(&other)
        ))),
    }
}

fn bson_kind(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_) => "a number",
        Bson::String(_) => "a string",
        Bson::Array(_) => "an array",
        Bson::Document(_) => "a document",
        Bson::Boolean(_) => "a boolean",
        Bson::Null => "null",
        _ => "an unsupported value",
    }
}

/// Swaps the prefix of top-level field names, optionally dropping
/// null-valued fields on the way.
fn rename_prefix(document: Document, from: &str, to: &str, strip_nulls: bool) -> Document {
    let mut out = Document::new();
    for (key, value) in document.into_iter() {
        if strip_nulls && value == Bson::Null {
            continue;
        }
        match key.strip_prefix(from) {
            Some(rest) if !from.is_empty() && from != to => {
                out.insert(format!("{to}{rest}"), value);
            }
            _ => {
                out.insert(key, value);
            }
        }
    }
    out
}
