//! Hook pipeline: named handlers that run before and after model operations.
//!
//! Collections wire hooks up by name in their schema
//! ([`HookSet`](crate::schema::HookSet)); the handlers themselves are
//! registered once on the [`HookRegistry`] when the engine is built. Name
//! resolution happens at build time, so a schema referencing an unknown
//! handler fails construction rather than a later request.
//!
//! A stage's hooks run as an async left fold: each handler receives the value
//! produced by the previous one (a query, a document, an update payload, or a
//! whole result set, uniformly as [`Bson`]) and returns the value to continue
//! with. The first failure aborts the fold and the operation it protects.
//!
//! # Example
//!
//! ```ignore
//! use async_trait::async_trait;
//! use bson::Bson;
//! use docmodel::hooks::{Hook, HookContext};
//! use docmodel::error::ModelResult;
//!
//! struct Slugify;
//!
//! #[async_trait]
//! impl Hook for Slugify {
//!     async fn apply(&self, value: Bson, ctx: &HookContext<'_>) -> ModelResult<Bson> {
//!         let mut doc = value.as_document().cloned().unwrap_or_default();
//!         if let Some(title) = doc.get("title").and_then(Bson::as_str) {
//!             let slug = title.to_lowercase().replace(' ', "-");
//!             doc.insert("slug", slug);
//!         }
//!         Ok(Bson::Document(doc))
//!     }
//! }
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::future::try_join_all;
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    error::{ModelError, ModelResult},
    schema::{HookConfig, Schema},
};

/// The pipeline stages a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    BeforeGet,
    AfterGet,
}

impl HookStage {
    /// All stages, in lifecycle order.
    pub const ALL: [HookStage; 8] = [
        HookStage::BeforeCreate,
        HookStage::AfterCreate,
        HookStage::BeforeUpdate,
        HookStage::AfterUpdate,
        HookStage::BeforeDelete,
        HookStage::AfterDelete,
        HookStage::BeforeGet,
        HookStage::AfterGet,
    ];

    /// The stage name as it appears in schema files.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::BeforeCreate => "beforeCreate",
            HookStage::AfterCreate => "afterCreate",
            HookStage::BeforeUpdate => "beforeUpdate",
            HookStage::AfterUpdate => "afterUpdate",
            HookStage::BeforeDelete => "beforeDelete",
            HookStage::AfterDelete => "afterDelete",
            HookStage::BeforeGet => "beforeGet",
            HookStage::AfterGet => "afterGet",
        }
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invocation context handed to every hook.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// The collection the protected operation runs against.
    pub collection: &'a str,
    /// The stage this invocation belongs to.
    pub stage: HookStage,
    /// The collection's schema.
    pub schema: &'a Schema,
    /// Options from this hook's configuration entry in the schema.
    pub options: &'a Document,
}

/// A named transformation applied to values flowing through model operations.
///
/// Hooks receive whatever the stage carries: `beforeCreate`/`afterCreate`,
/// `afterUpdate` and `afterDelete` run once per document with a
/// `Bson::Document`; `beforeUpdate` runs over the update payload;
/// `beforeGet` and `beforeDelete` run over the query; `afterGet` runs over
/// the whole result array.
///
/// Returning `Ok(Bson::Null)` is not an error: the fold continues with the
/// empty value, and for query-stage hooks the operation proceeds with an
/// empty query.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Transforms `value`, or fails and aborts the protected operation.
    ///
    /// # Arguments
    ///
    /// * `value` - The accumulated value from earlier hooks in the stage
    /// * `ctx` - Collection, stage, schema and configured options
    ///
    /// # Errors
    ///
    /// Any error aborts the remaining pipeline and the operation. The engine
    /// wraps it into [`ModelError::Hook`] carrying this hook's configured
    /// name.
    async fn apply(&self, value: Bson, ctx: &HookContext<'_>) -> ModelResult<Bson>;
}

/// Maps handler names to implementations.
///
/// Built once, then shared read-only by every model instance. Schemas refer
/// to handlers by name; the
/// [`RegistryBuilder`](crate::registry::RegistryBuilder) resolves all names
/// against this registry at build time.
#[derive(Clone, Default)]
pub struct HookRegistry {
    handlers: HashMap<String, Arc<dyn Hook>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        HookRegistry::default()
    }

    /// Registers a handler under `name`, replacing any previous handler with
    /// the same name.
    pub fn register(&mut self, name: impl Into<String>, handler: impl Hook + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    /// Looks up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Hook>> {
        self.handlers.get(name).cloned()
    }

    /// Whether a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Runs one stage's configured hooks over `value` as a left fold.
    ///
    /// Hooks run in configuration order; each receives the previous hook's
    /// output. The first failure short-circuits the fold.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Hook`] naming the failed (or unresolved)
    /// handler.
    pub async fn run(
        &self,
        configs: &[HookConfig],
        value: Bson,
        collection: &str,
        stage: HookStage,
        schema: &Schema,
    ) -> ModelResult<Bson> {
        // Fast path: no hooks configured for this stage
        if configs.is_empty() {
            return Ok(value);
        }

        let mut current = value;
        for config in configs {
            let handler = self.get(&config.name).ok_or_else(|| ModelError::Hook {
                name: config.name.clone(),
                message: "no handler registered under this name".to_string(),
            })?;
            let ctx = HookContext {
                collection,
                stage,
                schema,
                options: &config.options,
            };
            current = handler
                .apply(current, &ctx)
                .await
                .map_err(|err| hook_failure(&config.name, err))?;
        }
        Ok(current)
    }

    /// Runs one stage's hooks over each value independently.
    ///
    /// Chains execute concurrently across values and sequentially within
    /// each value; output order matches input order. The first failing chain
    /// fails the whole call.
    pub async fn run_for_each(
        &self,
        configs: &[HookConfig],
        values: Vec<Bson>,
        collection: &str,
        stage: HookStage,
        schema: &Schema,
    ) -> ModelResult<Vec<Bson>> {
        if configs.is_empty() {
            return Ok(values);
        }
        try_join_all(
            values
                .into_iter()
                .map(|value| self.run(configs, value, collection, stage, schema)),
        )
        .await
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("HookRegistry").field("handlers", &names).finish()
    }
}

fn hook_failure(name: &str, err: ModelError) -> ModelError {
    match err {
        err @ ModelError::Hook { .. } => err,
        other => ModelError::Hook {
            name: name.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tag(&'static str);

    #[async_trait]
    impl Hook for Tag {
        async fn apply(&self, value: Bson, _ctx: &HookContext<'_>) -> ModelResult<Bson> {
            let mut doc = value.as_document().cloned().unwrap_or_default();
            let trail = match doc.get("trail").and_then(Bson::as_str) {
                Some(existing) => format!("{existing},{}", self.0),
                None => self.0.to_string(),
            };
            doc.insert("trail", trail);
            Ok(Bson::Document(doc))
        }
    }

    struct Fail;

    #[async_trait]
    impl Hook for Fail {
        async fn apply(&self, _value: Bson, _ctx: &HookContext<'_>) -> ModelResult<Bson> {
            Err(ModelError::validation("title", "rejected"))
        }
    }

    struct Count(Arc<AtomicUsize>);

    #[async_trait]
    impl Hook for Count {
        async fn apply(&self, value: Bson, _ctx: &HookContext<'_>) -> ModelResult<Bson> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    fn registry() -> HookRegistry {
        let mut registry = HookRegistry::new();
        registry.register("first", Tag("first"));
        registry.register("second", Tag("second"));
        registry.register("fail", Fail);
        registry
    }

    fn configs(names: &[&str]) -> Vec<HookConfig> {
        names.iter().map(|name| HookConfig::new(*name)).collect()
    }

    #[tokio::test]
    async fn hooks_fold_in_configuration_order() {
        let registry = registry();
        let schema = Schema::new();
        let out = registry
            .run(
                &configs(&["first", "second"]),
                Bson::Document(doc! {}),
                "books",
                HookStage::BeforeCreate,
                &schema,
            )
            .await
            .unwrap();
        let trail = out.as_document().unwrap().get("trail").and_then(Bson::as_str);
        assert_eq!(trail, Some("first,second"));
    }

    #[tokio::test]
    async fn failure_short_circuits_the_stage() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = registry();
        registry.register("count", Count(counter.clone()));
        let schema = Schema::new();

        let err = registry
            .run(
                &configs(&["fail", "count"]),
                Bson::Document(doc! {}),
                "books",
                HookStage::BeforeCreate,
                &schema,
            )
            .await
            .unwrap_err();

        match err {
            ModelError::Hook { name, .. } => assert_eq!(name, "fail"),
            other => panic!("expected hook error, got {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unresolved_name_is_a_hook_error() {
        let registry = HookRegistry::new();
        let schema = Schema::new();
        let err = registry
            .run(
                &configs(&["missing"]),
                Bson::Null,
                "books",
                HookStage::BeforeGet,
                &schema,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Hook { name, .. } if name == "missing"));
    }

    #[tokio::test]
    async fn null_output_continues_the_fold() {
        struct Nullify;

        #[async_trait]
        impl Hook for Nullify {
            async fn apply(&self, _value: Bson, _ctx: &HookContext<'_>) -> ModelResult<Bson> {
                Ok(Bson::Null)
            }
        }

        let mut registry = HookRegistry::new();
        registry.register("nullify", Nullify);
        registry.register("tag", Tag("tag"));
        let schema = Schema::new();

        let out = registry
            .run(
                &configs(&["nullify", "tag"]),
                Bson::Document(doc! { "title": "x" }),
                "books",
                HookStage::BeforeCreate,
                &schema,
            )
            .await
            .unwrap();
        // Nullify dropped the document; Tag rebuilt from empty.
        let trail = out.as_document().unwrap().get("trail").and_then(Bson::as_str);
        assert_eq!(trail, Some("tag"));
    }

    #[tokio::test]
    async fn per_value_chains_preserve_order() {
        let registry = registry();
        let schema = Schema::new();
        let out = registry
            .run_for_each(
                &configs(&["first"]),
                vec![
                    Bson::Document(doc! { "n": 1 }),
                    Bson::Document(doc! { "n": 2 }),
                ],
                "books",
                HookStage::AfterCreate,
                &schema,
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_document().unwrap().get("n"), Some(&Bson::Int32(1)));
        assert_eq!(out[1].as_document().unwrap().get("n"), Some(&Bson::Int32(2)));
    }

    #[tokio::test]
    async fn empty_stage_returns_value_unchanged() {
        let registry = HookRegistry::new();
        let schema = Schema::new();
        let value = Bson::Document(doc! { "title": "x" });
        let out = registry
            .run(&[], value.clone(), "books", HookStage::BeforeGet, &schema)
            .await
            .unwrap();
        assert_eq!(out, value);
    }
}
