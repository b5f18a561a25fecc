//! Hook pipeline behavior through whole model operations: transforms,
//! ordering, vetoes, query rewrites and configuration plumbing.

mod common;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use common::{create_book, id_of, library, raw, str_of};
use docmodel::memory::MemoryDatastore;
use docmodel::prelude::*;
use std::sync::{Arc, Mutex};

/// Derives a slug from the title of every document passing through.
struct Slugify;

#[async_trait]
impl Hook for Slugify {
    async fn apply(&self, value: Bson, _ctx: &HookContext<'_>) -> ModelResult<Bson> {
        let mut document = value.as_document().cloned().unwrap_or_default();
        if let Some(title) = document.get("title").and_then(Bson::as_str) {
            let slug = title.to_lowercase().replace(' ', "-");
            document.insert("slug", slug);
        }
        Ok(Bson::Document(document))
    }
}

/// Appends its tag to a `trail` field, to observe execution order.
struct Trail(&'static str);

#[async_trait]
impl Hook for Trail {
    async fn apply(&self, value: Bson, _ctx: &HookContext<'_>) -> ModelResult<Bson> {
        let mut document = value.as_document().cloned().unwrap_or_default();
        let trail = match document.get("trail").and_then(Bson::as_str) {
            Some(existing) => format!("{existing},{}", self.0),
            None => self.0.to_string(),
        };
        document.insert("trail", trail);
        Ok(Bson::Document(document))
    }
}

fn books_schema_with_hooks(hooks: HookSet) -> Schema {
    Schema::new()
        .field("title", FieldDescriptor::new(FieldType::String).required())
        .field("slug", FieldDescriptor::new(FieldType::String))
        .field("trail", FieldDescriptor::new(FieldType::String))
        .settings(CollectionSettings { hooks, ..Default::default() })
}

#[tokio::test]
async fn before_create_hooks_shape_documents_before_storage() {
    let datastore = MemoryDatastore::new();
    let registry = Registry::builder(datastore.clone())
        .schema(
            "books",
            books_schema_with_hooks(HookSet {
                before_create: vec![HookConfig::new("slugify")],
                ..Default::default()
            }),
        )
        .hook("slugify", Slugify)
        .build()
        .unwrap();

    let books = registry.model("books").unwrap();
    let created = books
        .create(vec![doc! { "title": "Moby Dick" }], doc! {})
        .await
        .unwrap();
    assert_eq!(str_of(&created.results[0], "slug"), "moby-dick");

    // The transform happened before the insert, so storage has it too.
    let stored = datastore
        .find("books", &Document::new(), &QueryOptions::default())
        .await
        .unwrap()
        .results
        .remove(0);
    assert_eq!(str_of(&stored, "slug"), "moby-dick");
}

#[tokio::test]
async fn hooks_run_in_configuration_order() {
    let registry = Registry::builder(MemoryDatastore::new())
        .schema(
            "books",
            books_schema_with_hooks(HookSet {
                before_create: vec![HookConfig::new("first"), HookConfig::new("second")],
                ..Default::default()
            }),
        )
        .hook("first", Trail("first"))
        .hook("second", Trail("second"))
        .build()
        .unwrap();

    let books = registry.model("books").unwrap();
    let created = books
        .create(vec![doc! { "title": "Ordered" }], doc! {})
        .await
        .unwrap();
    assert_eq!(str_of(&created.results[0], "trail"), "first,second");
}

#[tokio::test]
async fn after_update_hooks_transform_the_response_only() {
    /// Marks response documents without touching storage.
    struct Stamp;

    #[async_trait]
    impl Hook for Stamp {
        async fn apply(&self, value: Bson, _ctx: &HookContext<'_>) -> ModelResult<Bson> {
            let mut document = value.as_document().cloned().unwrap_or_default();
            document.insert("audited", true);
            Ok(Bson::Document(document))
        }
    }

    let datastore = MemoryDatastore::new();
    let registry = Registry::builder(datastore.clone())
        .schema(
            "books",
            books_schema_with_hooks(HookSet {
                after_update: vec![HookConfig::new("stamp")],
                ..Default::default()
            }),
        )
        .hook("stamp", Stamp)
        .build()
        .unwrap();

    let books = registry.model("books").unwrap();
    let id = id_of(
        &books
            .create(vec![doc! { "title": "Draft" }], doc! {})
            .await
            .unwrap()
            .results[0],
    );
    let updated = books
        .update(doc! { "_id": &id }, doc! { "title": "Final" }, doc! {})
        .await
        .unwrap();
    assert_eq!(updated.results[0].get("audited"), Some(&Bson::Boolean(true)));

    let stored = datastore
        .find("books", &doc! { "_id": &id }, &QueryOptions::default())
        .await
        .unwrap()
        .results
        .remove(0);
    assert!(stored.get("audited").is_none());
}

#[tokio::test]
async fn failing_before_delete_hooks_veto_the_deletion() {
    /// Refuses every deletion it guards.
    struct Immutable;

    #[async_trait]
    impl Hook for Immutable {
        async fn apply(&self, _value: Bson, _ctx: &HookContext<'_>) -> ModelResult<Bson> {
            Err(ModelError::validation("_id", "this collection keeps everything"))
        }
    }

    let datastore = MemoryDatastore::new();
    let registry = Registry::builder(datastore.clone())
        .schema(
            "books",
            books_schema_with_hooks(HookSet {
                before_delete: vec![HookConfig::new("immutable")],
                ..Default::default()
            }),
        )
        .hook("immutable", Immutable)
        .build()
        .unwrap();

    let books = registry.model("books").unwrap();
    let id = id_of(
        &books
            .create(vec![doc! { "title": "Keeper" }], doc! {})
            .await
            .unwrap()
            .results[0],
    );

    let err = books.delete(doc! { "_id": &id }).await.unwrap_err();
    assert!(matches!(err, ModelError::Hook { ref name, .. } if name == "immutable"));
    assert_eq!(err.status(), 500);

    // The veto fired before anything was written: the document survives
    // and no delete revision exists.
    let live = datastore
        .find("books", &doc! { "_id": &id }, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(live.results.len(), 1);
    let archived = datastore
        .find("booksHistory", &Document::new(), &QueryOptions::default())
        .await
        .unwrap();
    assert!(archived.results.is_empty());
}

#[tokio::test]
async fn before_get_hooks_rewrite_the_query() {
    /// Restricts every read to the author named in the hook's options.
    struct ScopeToAuthor;

    #[async_trait]
    impl Hook for ScopeToAuthor {
        async fn apply(&self, value: Bson, ctx: &HookContext<'_>) -> ModelResult<Bson> {
            let mut query = value.as_document().cloned().unwrap_or_default();
            if let Some(author) = ctx.options.get("author") {
                query.insert("author", author.clone());
            }
            Ok(Bson::Document(query))
        }
    }

    let (fixture_registry, datastore) = library();
    let herman = common::create_author(&fixture_registry, "Herman").await;
    let jules = common::create_author(&fixture_registry, "Jules").await;
    create_book(&fixture_registry, "Moby-Dick", &herman).await;
    create_book(&fixture_registry, "Nemo", &jules).await;

    // A second registry over the same storage, with the scoped read wired
    // up for books.
    let registry = Registry::builder(datastore)
        .schema("authors", common::author_schema())
        .schema(
            "books",
            common::book_schema().settings(CollectionSettings {
                hooks: HookSet {
                    before_get: vec![
                        HookConfig::new("scope").with_options(doc! { "author": &herman }),
                    ],
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
        .hook("scope", ScopeToAuthor)
        .build()
        .unwrap();

    let books = registry.model("books").unwrap();
    let found = books.get(doc! {}, &raw()).await.unwrap();
    assert_eq!(found.metadata.total_count, 1);
    assert_eq!(str_of(&found.results[0], "title"), "Moby-Dick");
}

#[tokio::test]
async fn after_get_hooks_see_the_whole_result_array() {
    /// Strips the email field from every returned author.
    struct Redact;

    #[async_trait]
    impl Hook for Redact {
        async fn apply(&self, value: Bson, _ctx: &HookContext<'_>) -> ModelResult<Bson> {
            let Bson::Array(results) = value else {
                return Ok(value);
            };
            let redacted = results
                .into_iter()
                .map(|entry| {
                    let Bson::Document(mut document) = entry else {
                        return entry;
                    };
                    document.remove("email");
                    Bson::Document(document)
                })
                .collect();
            Ok(Bson::Array(redacted))
        }
    }

    let registry = Registry::builder(MemoryDatastore::new())
        .schema(
            "authors",
            common::author_schema().settings(CollectionSettings {
                hooks: HookSet {
                    after_get: vec![HookConfig::new("redact")],
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
        .hook("redact", Redact)
        .build()
        .unwrap();

    let authors = registry.model("authors").unwrap();
    authors
        .create(
            vec![
                doc! { "name": "Herman", "email": "h@pequod.sea" },
                doc! { "name": "Jules", "email": "j@nautilus.sea" },
            ],
            doc! {},
        )
        .await
        .unwrap();

    let found = authors.get(doc! {}, &raw()).await.unwrap();
    assert_eq!(found.results.len(), 2);
    for document in &found.results {
        assert!(document.get("email").is_none());
        assert!(document.get("name").is_some());
    }
}

#[tokio::test]
async fn hook_context_reports_collection_and_stage() {
    /// Records every invocation it sees.
    struct Recorder {
        seen: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Hook for Recorder {
        async fn apply(&self, value: Bson, ctx: &HookContext<'_>) -> ModelResult<Bson> {
            self.seen
                .lock()
                .unwrap()
                .push((ctx.collection.to_string(), ctx.stage.to_string()));
            Ok(value)
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = Registry::builder(MemoryDatastore::new())
        .schema(
            "books",
            books_schema_with_hooks(HookSet {
                before_create: vec![HookConfig::new("record")],
                after_create: vec![HookConfig::new("record")],
                ..Default::default()
            }),
        )
        .hook("record", Recorder { seen: seen.clone() })
        .build()
        .unwrap();

    registry
        .model("books")
        .unwrap()
        .create(vec![doc! { "title": "Observed" }], doc! {})
        .await
        .unwrap();

    let invocations = seen.lock().unwrap().clone();
    assert_eq!(
        invocations,
        vec![
            ("books".to_string(), "beforeCreate".to_string()),
            ("books".to_string(), "afterCreate".to_string()),
        ]
    );
}

#[tokio::test]
async fn unresolved_hook_names_fail_registry_construction() {
    let err = Registry::builder(MemoryDatastore::new())
        .schema(
            "books",
            books_schema_with_hooks(HookSet {
                before_create: vec![HookConfig::new("ghost")],
                ..Default::default()
            }),
        )
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::Hook { ref name, .. } if name == "ghost"));
}
