//! Collection schemas: field descriptors, reference settings, hook wiring
//! and collection-level behavior switches.
//!
//! A [`Schema`] is plain data. It is usually deserialized from a JSON file
//! and registered once with the
//! [`RegistryBuilder`](crate::registry::RegistryBuilder); the engine treats
//! it as immutable afterwards and shares it as `Arc<Schema>`.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::schema::{FieldDescriptor, FieldType, ReferenceSettings, Schema};
//!
//! let schema = Schema::new()
//!     .field("title", FieldDescriptor::new(FieldType::String).required())
//!     .field(
//!         "author",
//!         FieldDescriptor::reference_to("people"),
//!     );
//! ```

use bson::Document;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{error::ModelResult, hooks::HookStage};

/// Reserved document fields maintained by the engine.
///
/// These names are the stored form; output formatting may rename the prefix
/// for external consumers.
pub mod internal_fields {
    /// Document identity, assigned by the datastore on insert.
    pub const ID: &str = "_id";
    /// Monotonic version counter. Starts at 1, incremented once per update.
    pub const VERSION: &str = "_version";
    /// Append-only list of revision document IDs.
    pub const HISTORY: &str = "_history";
    /// Per-document reference map for polymorphic references:
    /// `{ field: { id: collection } }`.
    pub const REF: &str = "_ref";
    /// Read-time annotation recording raw reference values that were
    /// expanded through the `_ref` map. Never stored.
    pub const COMPOSED: &str = "_composed";
    /// Creation timestamp, merged in through operation internals.
    pub const CREATED_AT: &str = "_createdAt";
    /// Last mutation timestamp, merged in through operation internals.
    pub const LAST_MODIFIED_AT: &str = "_lastModifiedAt";
    /// On a revision document: the ID of the live document it snapshots.
    pub const ORIGINAL_DOCUMENT_ID: &str = "_originalDocumentId";
    /// On a revision document: the mutation that produced it.
    pub const ACTION: &str = "_action";

    /// The prefix shared by all reserved fields in stored form.
    pub const PREFIX: &str = "_";
}

/// The declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    DateTime,
    /// Holds the ID (or IDs) of documents in another collection. Expanded at
    /// read time by the composer; addressable in queries through dot
    /// notation.
    Reference,
    /// Accepts any BSON value without type checking.
    Mixed,
}

/// Validation rules attached to a field, applied after type checking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldValidation {
    /// Minimum length for strings and arrays.
    pub min_length: Option<usize>,
    /// Maximum length for strings and arrays.
    pub max_length: Option<usize>,
    /// Regular expression a string value must match.
    pub regex: Option<String>,
}

impl FieldValidation {
    pub fn is_empty(&self) -> bool {
        self.min_length.is_none() && self.max_length.is_none() && self.regex.is_none()
    }
}

/// Per-field settings for [`FieldType::Reference`] fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceSettings {
    /// The referenced collection. `None` (or `"self"`) means the field
    /// points back into its own collection.
    pub collection: Option<String>,
    /// Whether the field holds a list of IDs rather than a single ID.
    pub multiple: bool,
    /// Strict composition: keep duplicate IDs, and substitute null for IDs
    /// with no matching document instead of dropping them.
    pub strict_compose: bool,
    /// Projection applied to composed documents. Empty means all fields.
    pub fields: Vec<String>,
    /// Inverse relation: the foreign field holding IDs that point back at
    /// this collection. Queries through this reference resolve against the
    /// foreign side.
    pub link_field: Option<String>,
}

impl ReferenceSettings {
    /// The collection this reference resolves against, given the collection
    /// the field lives in.
    pub fn target_collection<'a>(&'a self, current: &'a str) -> &'a str {
        match self.collection.as_deref() {
            None | Some("") | Some("self") => current,
            Some(other) => other,
        }
    }
}

/// Describes one field of a collection schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// The declared type of the field.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the field must be present on created documents.
    #[serde(default)]
    pub required: bool,
    /// Validation rules applied after type checking.
    #[serde(default)]
    pub validation: FieldValidation,
    /// Overrides the generated message on validation failure.
    #[serde(default)]
    pub message: Option<String>,
    /// Reference settings. Only meaningful on [`FieldType::Reference`]
    /// fields; a reference field without settings points at its own
    /// collection.
    #[serde(default)]
    pub settings: Option<ReferenceSettings>,
}

impl FieldDescriptor {
    /// Creates a descriptor of the given type with no rules attached.
    pub fn new(field_type: FieldType) -> Self {
        FieldDescriptor {
            field_type,
            required: false,
            validation: FieldValidation::default(),
            message: None,
            settings: None,
        }
    }

    /// Creates a reference descriptor pointing at `collection`.
    pub fn reference_to(collection: impl Into<String>) -> Self {
        FieldDescriptor::new(FieldType::Reference).settings(ReferenceSettings {
            collection: Some(collection.into()),
            ..Default::default()
        })
    }

    /// Marks the field as required on create.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attaches validation rules.
    pub fn validation(mut self, validation: FieldValidation) -> Self {
        self.validation = validation;
        self
    }

    /// Overrides the generated validation failure message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches reference settings.
    pub fn settings(mut self, settings: ReferenceSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Whether this field holds document references.
    pub fn is_reference(&self) -> bool {
        self.field_type == FieldType::Reference
    }

    /// The reference settings in effect for this field, defaulted when the
    /// schema declares none.
    pub fn reference_settings(&self) -> ReferenceSettings {
        self.settings.clone().unwrap_or_default()
    }
}

/// When reference composition runs for a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeSetting {
    /// Compose on read unless the request disables it.
    #[default]
    Enabled,
    /// Do not compose unless the request asks for it.
    Disabled,
    /// Always compose; requests cannot disable it.
    Override,
}

impl ComposeSetting {
    /// Resolves the effective switch for one request.
    pub fn resolve(self, requested: Option<bool>) -> bool {
        match self {
            ComposeSetting::Override => true,
            ComposeSetting::Enabled => requested.unwrap_or(true),
            ComposeSetting::Disabled => requested.unwrap_or(false),
        }
    }
}

/// A single index to maintain on a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// The indexed fields and their sort order, e.g. `{ "title": 1 }`.
    pub keys: Document,
    /// Backend-specific index options, e.g. `{ "unique": true }`.
    #[serde(default)]
    pub options: Document,
}

impl IndexSpec {
    /// Creates an ascending single-field index.
    pub fn on(field: impl Into<String>) -> Self {
        IndexSpec {
            keys: bson::doc! { field.into(): 1 },
            options: Document::new(),
        }
    }

    /// A stable name for this index, derived from its keys.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|(field, order)| format!("{field}_{order}"))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// One configured hook: the registered handler name plus free-form options
/// passed through to it.
///
/// Deserializes from either a bare name (`"slugify"`) or the full form
/// (`{ "hook": "slugify", "options": { ... } }`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "HookConfigRepr")]
pub struct HookConfig {
    /// The handler name, resolved against the hook registry at build time.
    #[serde(rename = "hook")]
    pub name: String,
    /// Free-form options handed to the handler on every invocation.
    pub options: Document,
}

impl HookConfig {
    pub fn new(name: impl Into<String>) -> Self {
        HookConfig {
            name: name.into(),
            options: Document::new(),
        }
    }

    pub fn with_options(mut self, options: Document) -> Self {
        self.options = options;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HookConfigRepr {
    Name(String),
    Full {
        hook: String,
        #[serde(default)]
        options: Document,
    },
}

impl From<HookConfigRepr> for HookConfig {
    fn from(repr: HookConfigRepr) -> Self {
        match repr {
            HookConfigRepr::Name(name) => HookConfig::new(name),
            HookConfigRepr::Full { hook, options } => HookConfig { name: hook, options },
        }
    }
}

/// The hooks configured for each pipeline stage of a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HookSet {
    pub before_create: Vec<HookConfig>,
    pub after_create: Vec<HookConfig>,
    pub before_update: Vec<HookConfig>,
    pub after_update: Vec<HookConfig>,
    pub before_delete: Vec<HookConfig>,
    pub after_delete: Vec<HookConfig>,
    pub before_get: Vec<HookConfig>,
    pub after_get: Vec<HookConfig>,
}

impl HookSet {
    /// The configured hooks for one stage, in execution order.
    pub fn stage(&self, stage: HookStage) -> &[HookConfig] {
        match stage {
            HookStage::BeforeCreate => &self.before_create,
            HookStage::AfterCreate => &self.after_create,
            HookStage::BeforeUpdate => &self.before_update,
            HookStage::AfterUpdate => &self.after_update,
            HookStage::BeforeDelete => &self.before_delete,
            HookStage::AfterDelete => &self.after_delete,
            HookStage::BeforeGet => &self.before_get,
            HookStage::AfterGet => &self.after_get,
        }
    }

    /// Iterates over every configured hook across all stages.
    pub fn iter(&self) -> impl Iterator<Item = &HookConfig> {
        HookStage::ALL
            .iter()
            .flat_map(|stage| self.stage(*stage).iter())
    }
}

/// Collection-level behavior switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CollectionSettings {
    /// When reference composition runs for reads of this collection.
    pub compose: ComposeSetting,
    /// Maximum reference expansion depth, unless a request overrides it.
    pub compose_depth: usize,
    /// Whether mutations record revision snapshots.
    pub store_revisions: bool,
    /// Where revision snapshots are stored. `None` means
    /// `<collection>History`.
    pub revision_collection: Option<String>,
    /// Default page size for this collection, overriding the built-in
    /// default.
    pub count: Option<usize>,
    /// Indexes to maintain on the collection.
    pub index: Vec<IndexSpec>,
    /// Hook wiring for the eight pipeline stages.
    pub hooks: HookSet,
}

impl CollectionSettings {
    /// The revision collection name in effect for `collection`.
    pub fn revision_collection_for(&self, collection: &str) -> String {
        match &self.revision_collection {
            Some(name) => name.clone(),
            None => format!("{collection}History"),
        }
    }
}

impl Default for CollectionSettings {
    fn default() -> Self {
        CollectionSettings {
            compose: ComposeSetting::default(),
            compose_depth: 3,
            store_revisions: true,
            revision_collection: None,
            count: None,
            index: Vec::new(),
            hooks: HookSet::default(),
        }
    }
}

/// A collection schema: its fields plus collection-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    /// Field descriptors keyed by field name.
    pub fields: BTreeMap<String, FieldDescriptor>,
    /// Collection-level behavior switches.
    pub settings: CollectionSettings,
}

impl Schema {
    /// Creates an empty schema with default settings.
    pub fn new() -> Self {
        Schema::default()
    }

    /// Parses a schema from its JSON definition.
    ///
    /// # Errors
    ///
    /// [`ModelError::Serialization`](crate::error::ModelError::Serialization)
    /// when the definition is not valid JSON or does not match the schema
    /// shape.
    pub fn from_json(definition: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(definition)?)
    }

    /// Adds a field descriptor.
    pub fn field(mut self, name: impl Into<String>, descriptor: FieldDescriptor) -> Self {
        self.fields.insert(name.into(), descriptor);
        self
    }

    /// Replaces the collection settings.
    pub fn settings(mut self, settings: CollectionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Looks up the descriptor for a field.
    pub fn descriptor(&self, field: &str) -> Option<&FieldDescriptor> {
        self.fields.get(field)
    }

    /// Iterates over the reference fields of this schema.
    pub fn reference_fields(&self) -> impl Iterator<Item = (&str, &FieldDescriptor)> {
        self.fields
            .iter()
            .filter(|(_, descriptor)| descriptor.is_reference())
            .map(|(name, descriptor)| (name.as_str(), descriptor))
    }
}
