//! In-memory datastore implementation for the model engine.
//!
//! This module provides a simple but complete backend that stores documents
//! in nested maps behind async-aware read-write locks. It supports the full
//! operator-query surface, sorting, pagination and projection, plus a
//! connection switch for exercising disconnected behavior in tests.

use async_trait::async_trait;
use mea::rwlock::RwLock;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use bson::{doc, Bson, Document};

use docmodel_core::{
    datastore::{Datastore, DatastoreBuilder, DeleteOutcome, FindOutcome, UpdateOutcome},
    error::{DatastoreError, DatastoreResult},
    query::{QueryMetadata, QueryOptions, Sort, SortDirection},
    schema::{internal_fields, IndexSpec},
};

use crate::evaluator::{self, Comparable};

/// Documents of one collection, keyed by ID. A `BTreeMap` keeps scans
/// deterministic across runs.
type CollectionMap = BTreeMap<String, Document>;
type StoreMap = HashMap<String, CollectionMap>;

/// Thread-safe in-memory document datastore.
///
/// This struct implements the [`Datastore`] trait to provide a fully
/// functional storage backend that operates entirely in memory using
/// async-aware read-write locks.
///
/// # Thread Safety
///
/// `MemoryDatastore` is cloneable and uses `Arc`-wrapped internal state,
/// allowing it to be safely shared across async tasks. Multiple clones of
/// the same instance share the same underlying data.
///
/// # Performance
///
/// Queries scan all documents in a collection (declared indexes are
/// bookkeeping only). For small to medium datasets this is typically
/// acceptable; larger deployments should use a persistent backend.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::MemoryDatastore;
/// use docmodel_core::datastore::Datastore;
/// use docmodel_core::query::QueryOptions;
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryDatastore::new();
///
///     store.insert("books", vec![doc! { "title": "Moby-Dick" }]).await?;
///     let outcome = store
///         .find("books", &doc! { "title": "Moby-Dick" }, &QueryOptions::default())
///         .await?;
///     assert_eq!(outcome.metadata.total_count, 1);
///
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct MemoryDatastore {
    /// The main storage map: collection name -> (document ID -> document).
    store: Arc<RwLock<StoreMap>>,
    /// Declared indexes per collection, descriptor documents only.
    indexes: Arc<RwLock<HashMap<String, Vec<Document>>>>,
    /// Simulated connection state; `false` makes every call answer
    /// `Disconnected`.
    connected: Arc<RwLock<bool>>,
}

impl MemoryDatastore {
    /// Creates a new empty in-memory datastore in the connected state.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
            indexes: Arc::new(RwLock::new(HashMap::new())),
            connected: Arc::new(RwLock::new(true)),
        }
    }

    /// Creates a builder for constructing a `MemoryDatastore`.
    pub fn builder() -> MemoryDatastoreBuilder {
        MemoryDatastoreBuilder::default()
    }

    /// Switches the simulated connection state.
    ///
    /// While disconnected, every trait method answers
    /// [`DatastoreError::Disconnected`], which the engine surfaces as its
    /// uniform connection-unavailable error.
    pub async fn set_connected(&self, connected: bool) {
        *self.connected.write().await = connected;
    }

    async fn ensure_connected(&self) -> DatastoreResult<()> {
        if *self.connected.read().await {
            Ok(())
        } else {
            Err(DatastoreError::Disconnected)
        }
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        MemoryDatastore::new()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn find(
        &self,
        collection: &str,
        query: &Document,
        options: &QueryOptions,
    ) -> DatastoreResult<FindOutcome> {
        self.ensure_connected().await?;
        let store = self.store.read().await;
        let Some(collection_map) = store.get(collection) else {
            return Ok(FindOutcome::empty(options));
        };

        let mut matched: Vec<&Document> = Vec::new();
        for document in collection_map.values() {
            if evaluator::matches(document, query)? {
                matched.push(document);
            }
        }

        let metadata = QueryMetadata::new(matched.len(), options);

        if !options.sort.is_empty() {
            matched.sort_by(|a, b| compare_documents(a, b, &options.sort));
        }

        let results: Vec<Document> = matched
            .into_iter()
            .skip(options.offset())
            .take(options.limit)
            .map(|document| project(document, &options.fields))
            .collect();

        Ok(FindOutcome { results, metadata })
    }

    async fn insert(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DatastoreResult<Vec<Document>> {
        self.ensure_connected().await?;
        let mut store = self.store.write().await;
        let collection_map = store.entry(collection.to_string()).or_default();

        let mut inserted = Vec::with_capacity(documents.len());
        for mut document in documents {
            let id = match document.get(internal_fields::ID).and_then(Bson::as_str) {
                Some(id) => id.to_string(),
                None => uuid::Uuid::new_v4().to_string(),
            };
            if collection_map.contains_key(&id) {
                return Err(DatastoreError::BadRequest(format!(
                    "document {id} already exists in {collection}"
                )));
            }
            document.insert(internal_fields::ID, id.clone());
            collection_map.insert(id, document.clone());
            inserted.push(document);
        }

        Ok(inserted)
    }

    async fn update(
        &self,
        collection: &str,
        query: &Document,
        update: &Document,
    ) -> DatastoreResult<UpdateOutcome> {
        self.ensure_connected().await?;
        let mut store = self.store.write().await;
        let Some(collection_map) = store.get_mut(collection) else {
            return Ok(UpdateOutcome { matched_count: 0 });
        };

        let set_section = update.get("$set").and_then(Bson::as_document);
        let inc_section = update.get("$inc").and_then(Bson::as_document);
        let push_section = update.get("$push").and_then(Bson::as_document);

        let mut matched_count = 0;
        for document in collection_map.values_mut() {
            if !evaluator::matches(document, query)? {
                continue;
            }
            matched_count += 1;

            if let Some(section) = set_section {
                for (field, value) in section.iter() {
                    document.insert(field.clone(), value.clone());
                }
            }
            if let Some(section) = inc_section {
                for (field, delta) in section.iter() {
                    let incremented = increment(document.get(field), delta)?;
                    document.insert(field.clone(), incremented);
                }
            }
            if let Some(section) = push_section {
                for (field, value) in section.iter() {
                    match document.get_mut(field) {
                        Some(Bson::Array(items)) => items.push(value.clone()),
                        None => {
                            document.insert(field.clone(), Bson::Array(vec![value.clone()]));
                        }
                        Some(_) => {
                            return Err(DatastoreError::BadRequest(format!(
                                "cannot $push into non-array field {field}"
                            )));
                        }
                    }
                }
            }
        }

        Ok(UpdateOutcome { matched_count })
    }

    async fn delete(&self, collection: &str, query: &Document) -> DatastoreResult<DeleteOutcome> {
        self.ensure_connected().await?;
        let mut store = self.store.write().await;
        let Some(collection_map) = store.get_mut(collection) else {
            return Ok(DeleteOutcome { deleted_count: 0 });
        };

        let mut doomed = Vec::new();
        for (id, document) in collection_map.iter() {
            if evaluator::matches(document, query)? {
                doomed.push(id.clone());
            }
        }
        for id in &doomed {
            collection_map.remove(id);
        }

        Ok(DeleteOutcome {
            deleted_count: doomed.len() as u64,
        })
    }

    async fn index(
        &self,
        collection: &str,
        indexes: &[IndexSpec],
    ) -> DatastoreResult<Vec<String>> {
        self.ensure_connected().await?;
        let mut all = self.indexes.write().await;
        let entries = all.entry(collection.to_string()).or_default();

        let mut created = Vec::with_capacity(indexes.len());
        for spec in indexes {
            let name = spec.name();
            let known = entries
                .iter()
                .any(|entry| entry.get("name").and_then(Bson::as_str) == Some(name.as_str()));
            if !known {
                entries.push(doc! {
                    "name": name.clone(),
                    "keys": spec.keys.clone(),
                    "options": spec.options.clone(),
                });
            }
            created.push(name);
        }
        Ok(created)
    }

    async fn get_indexes(&self, collection: &str) -> DatastoreResult<Vec<Document>> {
        self.ensure_connected().await?;
        Ok(self
            .indexes
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn stats(&self, collection: &str) -> DatastoreResult<Document> {
        self.ensure_connected().await?;
        let count = self
            .store
            .read()
            .await
            .get(collection)
            .map(|collection_map| collection_map.len())
            .unwrap_or(0);
        let index_count = self
            .indexes
            .read()
            .await
            .get(collection)
            .map(|entries| entries.len())
            .unwrap_or(0);
        Ok(doc! {
            "collection": collection,
            "count": count as i64,
            "indexes": index_count as i64,
        })
    }

    async fn drop_database(&self, collection: Option<&str>) -> DatastoreResult<()> {
        self.ensure_connected().await?;
        let mut store = self.store.write().await;
        let mut indexes = self.indexes.write().await;
        match collection {
            Some(name) => {
                store.remove(name);
                indexes.remove(name);
            }
            None => {
                store.clear();
                indexes.clear();
            }
        }
        Ok(())
    }
}

/// Multi-key document comparison for sorting, null-last within a direction.
fn compare_documents(a: &Document, b: &Document, sort: &[Sort]) -> Ordering {
    for spec in sort {
        let left = evaluator::resolve_path(a, &spec.field)
            .map(Comparable::from)
            .unwrap_or(Comparable::Null);
        let right = evaluator::resolve_path(b, &spec.field)
            .map(Comparable::from)
            .unwrap_or(Comparable::Null);

        let ordering = match spec.direction {
            SortDirection::Asc => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
            SortDirection::Desc => right.partial_cmp(&left).unwrap_or(Ordering::Equal),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Applies a top-level projection; `_id` is always kept, an empty list
/// keeps everything.
fn project(document: &Document, fields: &[String]) -> Document {
    if fields.is_empty() {
        return document.clone();
    }
    let mut projected = Document::new();
    for (key, value) in document.iter() {
        if key == internal_fields::ID || fields.iter().any(|field| field == key) {
            projected.insert(key.clone(), value.clone());
        }
    }
    projected
}

/// Adds a numeric delta to a field's current value; a missing field starts
/// from zero.
fn increment(current: Option<&Bson>, delta: &Bson) -> DatastoreResult<Bson> {
    fn as_i64(value: &Bson) -> Option<i64> {
        match value {
            Bson::Int32(n) => Some(*n as i64),
            Bson::Int64(n) => Some(*n),
            _ => None,
        }
    }
    fn as_f64(value: &Bson) -> Option<f64> {
        match value {
            Bson::Int32(n) => Some(*n as f64),
            Bson::Int64(n) => Some(*n as f64),
            Bson::Double(f) => Some(*f),
            _ => None,
        }
    }

    let current = current.unwrap_or(&Bson::Int64(0));
    if let (Some(a), Some(b)) = (as_i64(current), as_i64(delta)) {
        return Ok(Bson::Int64(a + b));
    }
    match (as_f64(current), as_f64(delta)) {
        (Some(a), Some(b)) => Ok(Bson::Double(a + b)),
        _ => Err(DatastoreError::BadRequest(
            "cannot $inc a non-numeric field".to_string(),
        )),
    }
}

/// Builder for constructing [`MemoryDatastore`] instances.
#[derive(Default)]
pub struct MemoryDatastoreBuilder;

#[async_trait]
impl DatastoreBuilder for MemoryDatastoreBuilder {
    type Datastore = MemoryDatastore;

    /// Builds and returns a new [`MemoryDatastore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> DatastoreResult<Self::Datastore> {
        Ok(MemoryDatastore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmodel_core::query::SortDirection;

    fn options_with_limit(limit: usize) -> QueryOptions {
        QueryOptions { limit, ..Default::default() }
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_find_returns_them() {
        let store = MemoryDatastore::new();
        let inserted = store
            .insert("books", vec![doc! { "title": "Moby-Dick" }])
            .await
            .unwrap();
        let id = inserted[0].get("_id").and_then(Bson::as_str).unwrap();
        assert!(!id.is_empty());

        let outcome = store
            .find("books", &doc! { "_id": id }, &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.metadata.total_count, 1);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = MemoryDatastore::new();
        store
            .insert("books", vec![doc! { "_id": "b1", "title": "One" }])
            .await
            .unwrap();
        let err = store
            .insert("books", vec![doc! { "_id": "b1", "title": "Two" }])
            .await
            .unwrap_err();
        assert!(matches!(err, DatastoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn pagination_metadata_covers_full_match_set() {
        let store = MemoryDatastore::new();
        let documents = (0..5)
            .map(|n| doc! { "n": n as i32 })
            .collect::<Vec<_>>();
        store.insert("numbers", documents).await.unwrap();

        let options = QueryOptions {
            limit: 2,
            page: 2,
            sort: vec![Sort::new("n", SortDirection::Asc)],
            ..Default::default()
        };
        let outcome = store
            .find("numbers", &Document::new(), &options)
            .await
            .unwrap();
        assert_eq!(outcome.metadata.total_count, 5);
        assert_eq!(outcome.metadata.total_pages, 3);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].get("n"), Some(&Bson::Int32(2)));
    }

    #[tokio::test]
    async fn sort_descending_and_projection() {
        let store = MemoryDatastore::new();
        store
            .insert(
                "books",
                vec![
                    doc! { "title": "A", "pages": 100, "secret": 1 },
                    doc! { "title": "B", "pages": 300, "secret": 2 },
                ],
            )
            .await
            .unwrap();

        let options = QueryOptions {
            sort: vec![Sort::new("pages", SortDirection::Desc)],
            fields: vec!["title".to_string()],
            ..options_with_limit(10)
        };
        let outcome = store
            .find("books", &Document::new(), &options)
            .await
            .unwrap();
        assert_eq!(outcome.results[0].get("title"), Some(&Bson::String("B".into())));
        assert!(outcome.results[0].get("secret").is_none());
        assert!(outcome.results[0].get("_id").is_some());
    }

    #[tokio::test]
    async fn update_applies_set_inc_and_push() {
        let store = MemoryDatastore::new();
        store
            .insert(
                "books",
                vec![doc! { "_id": "b1", "title": "Old", "_version": 1_i64, "_history": [] }],
            )
            .await
            .unwrap();

        let outcome = store
            .update(
                "books",
                &doc! { "_id": "b1" },
                &doc! {
                    "$set": { "title": "New" },
                    "$inc": { "_version": 1_i64 },
                    "$push": { "_history": "rev1" },
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.matched_count, 1);

        let found = store
            .find("books", &doc! { "_id": "b1" }, &QueryOptions::default())
            .await
            .unwrap();
        let document = &found.results[0];
        assert_eq!(document.get("title"), Some(&Bson::String("New".into())));
        assert_eq!(document.get("_version"), Some(&Bson::Int64(2)));
        assert_eq!(
            document.get("_history"),
            Some(&Bson::Array(vec![Bson::String("rev1".into())]))
        );
    }

    #[tokio::test]
    async fn delete_removes_matches_only() {
        let store = MemoryDatastore::new();
        store
            .insert(
                "books",
                vec![doc! { "tag": "keep" }, doc! { "tag": "drop" }, doc! { "tag": "drop" }],
            )
            .await
            .unwrap();

        let outcome = store.delete("books", &doc! { "tag": "drop" }).await.unwrap();
        assert_eq!(outcome.deleted_count, 2);

        let stats = store.stats("books").await.unwrap();
        assert_eq!(stats.get("count"), Some(&Bson::Int64(1)));
    }

    #[tokio::test]
    async fn disconnected_store_answers_every_call_with_disconnected() {
        let store = MemoryDatastore::new();
        store.set_connected(false).await;

        let find = store
            .find("books", &Document::new(), &QueryOptions::default())
            .await;
        assert!(matches!(find, Err(DatastoreError::Disconnected)));
        let insert = store.insert("books", vec![doc! {}]).await;
        assert!(matches!(insert, Err(DatastoreError::Disconnected)));
        let stats = store.stats("books").await;
        assert!(matches!(stats, Err(DatastoreError::Disconnected)));

        store.set_connected(true).await;
        assert!(store.stats("books").await.is_ok());
    }

    #[tokio::test]
    async fn index_bookkeeping_is_idempotent() {
        let store = MemoryDatastore::new();
        let specs = vec![IndexSpec::on("title")];
        let created = store.index("books", &specs).await.unwrap();
        assert_eq!(created, vec!["title_1".to_string()]);

        store.index("books", &specs).await.unwrap();
        let indexes = store.get_indexes("books").await.unwrap();
        assert_eq!(indexes.len(), 1);
    }

    #[tokio::test]
    async fn drop_database_scopes_to_one_collection_or_all() {
        let store = MemoryDatastore::new();
        store.insert("a", vec![doc! {}]).await.unwrap();
        store.insert("b", vec![doc! {}]).await.unwrap();

        store.drop_database(Some("a")).await.unwrap();
        assert_eq!(store.stats("a").await.unwrap().get("count"), Some(&Bson::Int64(0)));
        assert_eq!(store.stats("b").await.unwrap().get("count"), Some(&Bson::Int64(1)));

        store.drop_database(None).await.unwrap();
        assert_eq!(store.stats("b").await.unwrap().get("count"), Some(&Bson::Int64(0)));
    }
}
