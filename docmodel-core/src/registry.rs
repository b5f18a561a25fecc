//! The schema registry: the engine's single assembly point.
//!
//! A [`Registry`] binds together everything a model operation needs: the
//! shared [`Datastore`], the collection schemas, the named hook handlers and
//! the optional search provider. It is built once through
//! [`RegistryBuilder`], validated at build time (every hook name a schema
//! mentions must resolve), and then cloned cheaply wherever models are
//! needed. There is no ambient global state; everything flows from the
//! registry a caller holds.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::registry::Registry;
//! use docmodel::schema::Schema;
//!
//! let registry = Registry::builder(datastore)
//!     .schema("books", books_schema)
//!     .schema("people", people_schema)
//!     .hook("slugify", Slugify)
//!     .build()?;
//!
//! let books = registry.model("books")?;
//! let page = books.find(bson::doc! {}, Default::default()).await?;
//! ```

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};

use crate::{
    datastore::Datastore,
    error::{ModelError, ModelResult},
    hooks::{Hook, HookRegistry},
    model::Model,
    schema::Schema,
    search::SearchProvider,
};

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelConfig {
    /// The field prefix shown to external consumers. Stored documents always
    /// use `_`; output formatting renames to this prefix and input
    /// formatting renames back.
    pub external_prefix: String,
    /// Minimum length of a search term. Shorter terms are rejected with a
    /// validation error before the provider is consulted.
    pub search_min_length: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            external_prefix: "_".to_string(),
            search_min_length: 3,
        }
    }
}

#[derive(Debug)]
pub(crate) struct RegistryInner {
    pub(crate) datastore: Arc<dyn Datastore>,
    pub(crate) schemas: HashMap<String, Arc<Schema>>,
    pub(crate) hooks: HookRegistry,
    pub(crate) search: Option<Arc<dyn SearchProvider>>,
    pub(crate) config: ModelConfig,
}

/// The assembled engine: datastore, schemas, hooks and configuration.
///
/// Cloning is cheap (the inner state is shared); clones see the same
/// datastore and schemas.
#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Starts building a registry around a datastore.
    pub fn builder(datastore: impl Datastore + 'static) -> RegistryBuilder {
        RegistryBuilder::new(datastore)
    }

    /// Binds a collection name to its model.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownCollection`] when no schema is
    /// registered under `collection`.
    pub fn model(&self, collection: &str) -> ModelResult<Model> {
        let schema = self
            .inner
            .schemas
            .get(collection)
            .cloned()
            .ok_or_else(|| ModelError::UnknownCollection(collection.to_string()))?;
        Ok(Model::new(collection.to_string(), schema, self.clone()))
    }

    /// The registered collection names, sorted.
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.schemas.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Looks up the schema registered for a collection.
    pub fn schema(&self, collection: &str) -> Option<Arc<Schema>> {
        self.inner.schemas.get(collection).cloned()
    }

    /// The shared datastore.
    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.inner.datastore
    }

    /// The configured search provider, if any.
    pub fn search_provider(&self) -> Option<&Arc<dyn SearchProvider>> {
        self.inner.search.as_ref()
    }

    /// Engine-wide configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.inner.config
    }

    pub(crate) fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    /// Creates every index declared by the registered schemas.
    ///
    /// # Errors
    ///
    /// Fails on the first collection whose indexes the datastore rejects.
    pub async fn ensure_indexes(&self) -> ModelResult<()> {
        for (collection, schema) in &self.inner.schemas {
            if schema.settings.index.is_empty() {
                continue;
            }
            let created = self
                .inner
                .datastore
                .index(collection, &schema.settings.index)
                .await?;
            log::debug!("created indexes on {collection}: {created:?}");
        }
        Ok(())
    }
}

/// Builder for [`Registry`].
///
/// Collects schemas and hook handlers, then validates the assembly in
/// [`build`](RegistryBuilder::build).
pub struct RegistryBuilder {
    datastore: Arc<dyn Datastore>,
    schemas: HashMap<String, Arc<Schema>>,
    hooks: HookRegistry,
    search: Option<Arc<dyn SearchProvider>>,
    config: ModelConfig,
}

impl RegistryBuilder {
    /// Creates a builder around a datastore.
    pub fn new(datastore: impl Datastore + 'static) -> Self {
        RegistryBuilder::from_arc(Arc::new(datastore))
    }

    /// Creates a builder around an already-shared datastore.
    pub fn from_arc(datastore: Arc<dyn Datastore>) -> Self {
        RegistryBuilder {
            datastore,
            schemas: HashMap::new(),
            hooks: HookRegistry::new(),
            search: None,
            config: ModelConfig::default(),
        }
    }

    /// Registers a collection schema.
    pub fn schema(mut self, collection: impl Into<String>, schema: Schema) -> Self {
        self.schemas.insert(collection.into(), Arc::new(schema));
        self
    }

    /// Registers several collection schemas at once.
    pub fn schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = (S, Schema)>,
        S: Into<String>,
    {
        for (collection, schema) in schemas {
            self.schemas.insert(collection.into(), Arc::new(schema));
        }
        self
    }

    /// Registers a hook handler under a name schemas can refer to.
    pub fn hook(mut self, name: impl Into<String>, handler: impl Hook + 'static) -> Self {
        self.hooks.register(name, handler);
        self
    }

    /// Configures a search provider.
    pub fn search_provider(mut self, provider: impl SearchProvider + 'static) -> Self {
        self.search = Some(Arc::new(provider));
        self
    }

    /// Replaces the engine-wide configuration.
    pub fn config(mut self, config: ModelConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates and assembles the registry.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Hook`] when a schema wires up a hook name with
    /// no registered handler.
    pub fn build(self) -> ModelResult<Registry> {
        for (collection, schema) in &self.schemas {
            for config in schema.settings.hooks.iter() {
                if !self.hooks.contains(&config.name) {
                    return Err(ModelError::Hook {
                        name: config.name.clone(),
                        message: format!(
                            "collection {collection} references a hook with no registered handler"
                        ),
                    });
                }
            }
        }

        Ok(Registry {
            inner: Arc::new(RegistryInner {
                datastore: self.datastore,
                schemas: self.schemas,
                hooks: self.hooks,
                search: self.search,
                config: self.config,
            }),
        })
    }
}
