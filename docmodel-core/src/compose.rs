//! Reference composition: read-time expansion of reference fields.
//!
//! Stored documents hold foreign document IDs in their reference fields.
//! Composition replaces those IDs with the referenced documents, recursively
//! up to a depth bound, without ever mutating what storage holds. Expansion
//! is batched: all IDs pointing at one foreign collection resolve with a
//! single `find`, and distinct foreign collections resolve concurrently.
//!
//! A document can override the schema's target collection per ID through its
//! `_ref` map (`{ field: { id: collection } }`), which is how one field
//! references documents of several collections. Any field that resolved
//! through `_ref` gets a `_composed` annotation carrying the original raw
//! value, so callers can still reach the plain IDs.

use bson::{Bson, Document};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::{
    error::ModelResult,
    query::{FindOptions, QueryOptions},
    registry::Registry,
    schema::{internal_fields, ReferenceSettings, Schema},
};

/// Expands reference fields across result sets.
#[derive(Debug, Clone)]
pub struct Composer {
    registry: Registry,
}

/// One reference-field occurrence scheduled for expansion.
struct FieldPlan {
    doc_index: usize,
    field: String,
    raw: Bson,
    elements: Vec<Element>,
    scalar: bool,
    strict: bool,
    narrow_to: Vec<String>,
    used_ref: bool,
}

enum Element {
    /// An ID to resolve against a foreign collection.
    Resolve { id: String, collection: String },
    /// A value carried through untouched (inline documents, unresolvable
    /// IDs, non-string entries).
    Keep(Bson),
}

/// The batched lookup for one foreign collection.
struct Batch {
    ids: Vec<String>,
    /// `None` fetches all fields; otherwise the union of every interested
    /// field's projection.
    projection: Option<BTreeSet<String>>,
    /// Union of nested selectors to carry into the recursive composition.
    children: Vec<String>,
}

impl Batch {
    fn new() -> Self {
        Batch {
            ids: Vec::new(),
            projection: Some(BTreeSet::new()),
            children: Vec::new(),
        }
    }

    fn add_id(&mut self, id: &str) {
        if !self.ids.iter().any(|existing| existing == id) {
            self.ids.push(id.to_string());
        }
    }

    fn widen(&mut self, fields: &[String], children: &[String]) {
        if fields.is_empty() && children.is_empty() {
            self.projection = None;
        } else if let Some(projection) = &mut self.projection {
            for field in fields {
                projection.insert(field.clone());
            }
            for child in children {
                projection.insert(head_of(child).to_string());
            }
        }
        for child in children {
            if !self.children.contains(child) {
                self.children.push(child.clone());
            }
        }
    }
}

impl Composer {
    pub fn new(registry: Registry) -> Self {
        Composer { registry }
    }

    /// Expands reference fields across `documents`, recursively up to the
    /// depth bound.
    ///
    /// The bound comes from `options.compose_depth`, falling back to the
    /// collection's `compose_depth` setting. Dot-notation entries in
    /// `options.fields` (such as `"author.name"`) narrow composed documents
    /// and are carried into deeper levels.
    ///
    /// # Errors
    ///
    /// A failed foreign lookup fails the whole composition; partially
    /// composed results are never returned.
    pub async fn compose(
        &self,
        collection: &str,
        schema: Arc<Schema>,
        documents: Vec<Document>,
        options: &FindOptions,
    ) -> ModelResult<Vec<Document>> {
        let max_depth = options
            .compose_depth
            .unwrap_or(schema.settings.compose_depth);
        self.compose_level(
            collection.to_string(),
            schema,
            documents,
            options.fields.clone(),
            0,
            max_depth,
        )
        .await
    }

    fn compose_level(
        &self,
        collection: String,
        schema: Arc<Schema>,
        mut documents: Vec<Document>,
        selectors: Vec<String>,
        level: usize,
        max_depth: usize,
    ) -> BoxFuture<'_, ModelResult<Vec<Document>>> {
        async move {
            if documents.is_empty() {
                return Ok(documents);
            }
            if level >= max_depth {
                log::debug!("composition depth bound reached for {collection}, leaving IDs raw");
                return Ok(documents);
            }

            let (plans, batches) = self.plan(&collection, &schema, &documents, &selectors);
            if plans.is_empty() {
                return Ok(documents);
            }

            // One find per foreign collection, all in flight together.
            let fetches = batches.into_iter().map(|(target, batch)| {
                let level = level + 1;
                async move {
                    let Some(foreign) = self.registry.schema(&target) else {
                        return Ok((target, Vec::new()));
                    };
                    let query = bson::doc! {
                        internal_fields::ID: { "$containsAny": batch.ids.clone() }
                    };
                    let options = QueryOptions {
                        fields: pushed_projection(batch.projection),
                        limit: batch.ids.len().max(1),
                        ..Default::default()
                    };
                    let outcome = self
                        .registry
                        .datastore()
                        .find(&target, &query, &options)
                        .await?;
                    let composed = self
                        .compose_level(
                            target.clone(),
                            foreign,
                            outcome.results,
                            batch.children,
                            level,
                            max_depth,
                        )
                        .await?;
                    ModelResult::Ok((target, composed))
                }
            });
            let fetched = try_join_all(fetches).await?;

            let mut resolved: HashMap<String, HashMap<String, Document>> = HashMap::new();
            for (target, foreign_documents) in fetched {
                let by_id = resolved.entry(target).or_default();
                for document in foreign_documents {
                    if let Some(id) = document.get(internal_fields::ID).and_then(Bson::as_str) {
                        by_id.insert(id.to_string(), document.clone());
                    }
                }
            }

            let mut annotations: HashMap<usize, Document> = HashMap::new();
            for plan in plans {
                let expanded = expand(&plan, &resolved);
                let document = &mut documents[plan.doc_index];
                match expanded {
                    Some(value) => {
                        document.insert(plan.field.clone(), value);
                    }
                    None => {
                        document.remove(&plan.field);
                    }
                }
                if plan.used_ref {
                    annotations
                        .entry(plan.doc_index)
                        .or_default()
                        .insert(plan.field, plan.raw);
                }
            }
            for (doc_index, annotation) in annotations {
                documents[doc_index].insert(internal_fields::COMPOSED, annotation);
            }

            Ok(documents)
        }
        .boxed()
    }

    /// Scans a result set and schedules every expandable reference value.
    fn plan(
        &self,
        collection: &str,
        schema: &Schema,
        documents: &[Document],
        selectors: &[String],
    ) -> (Vec<FieldPlan>, HashMap<String, Batch>) {
        let mut plans = Vec::new();
        let mut batches: HashMap<String, Batch> = HashMap::new();
        let mut unresolvable: BTreeSet<String> = BTreeSet::new();

        for (doc_index, document) in documents.iter().enumerate() {
            let ref_map = document
                .get(internal_fields::REF)
                .and_then(Bson::as_document);

            for (field, descriptor) in schema.reference_fields() {
                let raw = match document.get(field) {
                    None | Some(Bson::Null) => continue,
                    Some(value) => value.clone(),
                };
                let settings = descriptor.reference_settings();
                let children = selector_children(selectors, field);

                let (elements, scalar) = match &raw {
                    Bson::String(id) => (vec![Some(id.clone())], true),
                    Bson::Array(items) => (
                        items
                            .iter()
                            .map(|item| match item {
                                Bson::String(id) => Some(id.clone()),
                                _ => None,
                            })
                            .collect(),
                        false,
                    ),
                    // Inline documents are already expanded; leave them be.
                    _ => continue,
                };
                if elements.iter().all(Option::is_none) {
                    continue;
                }

                let field_refs = ref_map.and_then(|map| map.get(field)).and_then(Bson::as_document);
                let mut used_ref = false;
                let mut planned: Vec<Element> = Vec::new();
                let raw_elements: Vec<&Bson> = match &raw {
                    Bson::Array(items) => items.iter().collect(),
                    other => vec![other],
                };

                for (slot, id) in elements.into_iter().enumerate() {
                    let Some(id) = id else {
                        planned.push(Element::Keep(raw_elements[slot].clone()));
                        continue;
                    };
                    let target = match field_refs.and_then(|map| map.get(&id)).and_then(Bson::as_str)
                    {
                        Some(mapped) => {
                            used_ref = true;
                            mapped.to_string()
                        }
                        None => settings.target_collection(collection).to_string(),
                    };
                    if self.registry.schema(&target).is_none() {
                        if unresolvable.insert(target.clone()) {
                            log::warn!(
                                "reference field {field} points at unknown collection {target}, leaving IDs raw"
                            );
                        }
                        planned.push(Element::Keep(Bson::String(id)));
                        continue;
                    }
                    batches
                        .entry(target.clone())
                        .or_insert_with(Batch::new)
                        .add_id(&id);
                    planned.push(Element::Resolve { id, collection: target });
                }

                if !planned
                    .iter()
                    .any(|element| matches!(element, Element::Resolve { .. }))
                {
                    continue;
                }

                if !settings.strict_compose {
                    planned = dedupe_elements(planned);
                }

                for element in &planned {
                    if let Element::Resolve { collection: target, .. } = element {
                        if let Some(batch) = batches.get_mut(target) {
                            batch.widen(&settings.fields, &children);
                        }
                    }
                }

                plans.push(FieldPlan {
                    doc_index,
                    field: field.to_string(),
                    raw,
                    elements: planned,
                    scalar,
                    strict: settings.strict_compose,
                    narrow_to: narrowing_fields(&settings, &children),
                    used_ref,
                });
            }
        }

        (plans, batches)
    }
}

/// Substitutes resolved documents into one field's elements.
///
/// Returns `None` when a non-strict scalar reference found no match, which
/// removes the field from the document.
fn expand(plan: &FieldPlan, resolved: &HashMap<String, HashMap<String, Document>>) -> Option<Bson> {
    let mut out: Vec<Bson> = Vec::new();
    for element in &plan.elements {
        match element {
            Element::Keep(value) => out.push(value.clone()),
            Element::Resolve { id, collection } => {
                match resolved.get(collection).and_then(|by_id| by_id.get(id)) {
                    Some(document) => {
                        out.push(Bson::Document(narrow(document, &plan.narrow_to)));
                    }
                    None if plan.strict => out.push(Bson::Null),
                    None => {}
                }
            }
        }
    }

    if plan.scalar {
        out.into_iter().next()
    } else {
        Some(Bson::Array(out))
    }
}

fn dedupe_elements(elements: Vec<Element>) -> Vec<Element> {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    let mut out = Vec::with_capacity(elements.len());
    for element in elements {
        match &element {
            Element::Resolve { id, collection } => {
                if seen.insert((collection.clone(), id.clone())) {
                    out.push(element);
                }
            }
            Element::Keep(_) => out.push(element),
        }
    }
    out
}

/// The nested selectors under `field`: `"author.name"` yields `"name"` for
/// field `author`.
fn selector_children(selectors: &[String], field: &str) -> Vec<String> {
    selectors
        .iter()
        .filter_map(|selector| {
            let (head, rest) = selector.split_once('.')?;
            (head == field).then(|| rest.to_string())
        })
        .collect()
}

fn head_of(selector: &str) -> &str {
    selector.split('.').next().unwrap_or(selector)
}

/// Fields to keep on a composed document for one reference field: the
/// schema's projection plus the caller's nested selectors. Empty keeps
/// everything.
fn narrowing_fields(settings: &ReferenceSettings, children: &[String]) -> Vec<String> {
    let mut fields: Vec<String> = settings.fields.clone();
    for child in children {
        let head = head_of(child).to_string();
        if !fields.contains(&head) {
            fields.push(head);
        }
    }
    fields
}

fn narrow(document: &Document, fields: &[String]) -> Document {
    if fields.is_empty() {
        return document.clone();
    }
    let mut narrowed = Document::new();
    for (name, value) in document.iter() {
        let keep = name == internal_fields::ID
            || name == internal_fields::COMPOSED
            || fields.iter().any(|field| field == name);
        if keep {
            narrowed.insert(name.clone(), value.clone());
        }
    }
    narrowed
}

fn pushed_projection(projection: Option<BTreeSet<String>>) -> Vec<String> {
    match projection {
        None => Vec::new(),
        Some(fields) => {
            let mut pushed: Vec<String> = fields.into_iter().collect();
            // Nested polymorphic resolution needs the _ref map of composed
            // documents.
            pushed.push(internal_fields::REF.to_string());
            pushed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn selector_children_strip_one_level() {
        let selectors = vec![
            "author.name".to_string(),
            "author.friends.name".to_string(),
            "title".to_string(),
        ];
        assert_eq!(
            selector_children(&selectors, "author"),
            vec!["name".to_string(), "friends.name".to_string()]
        );
        assert!(selector_children(&selectors, "title").is_empty());
    }

    #[test]
    fn narrow_keeps_identity_fields() {
        let document = doc! { "_id": "p1", "name": "Herman", "email": "h@x", "_composed": {} };
        let narrowed = narrow(&document, &["name".to_string()]);
        assert_eq!(narrowed.len(), 3);
        assert!(narrowed.get("email").is_none());
        assert!(narrowed.get("_id").is_some());
    }

    #[test]
    fn narrowing_fields_merge_schema_and_selectors() {
        let settings = ReferenceSettings {
            fields: vec!["name".to_string()],
            ..Default::default()
        };
        let merged = narrowing_fields(&settings, &["friends.name".to_string()]);
        assert_eq!(merged, vec!["name".to_string(), "friends".to_string()]);
    }

    #[test]
    fn expand_strict_scalar_miss_becomes_null() {
        let plan = FieldPlan {
            doc_index: 0,
            field: "author".into(),
            raw: Bson::String("p1".into()),
            elements: vec![Element::Resolve { id: "p1".into(), collection: "people".into() }],
            scalar: true,
            strict: true,
            narrow_to: Vec::new(),
            used_ref: false,
        };
        assert_eq!(expand(&plan, &HashMap::new()), Some(Bson::Null));
    }

    #[test]
    fn expand_lenient_scalar_miss_removes_field() {
        let plan = FieldPlan {
            doc_index: 0,
            field: "author".into(),
            raw: Bson::String("p1".into()),
            elements: vec![Element::Resolve { id: "p1".into(), collection: "people".into() }],
            scalar: true,
            strict: false,
            narrow_to: Vec::new(),
            used_ref: false,
        };
        assert_eq!(expand(&plan, &HashMap::new()), None);
    }

    #[test]
    fn expand_array_drops_or_keeps_misses_by_strictness() {
        let resolved: HashMap<String, HashMap<String, Document>> = HashMap::from([(
            "people".to_string(),
            HashMap::from([("p1".to_string(), doc! { "_id": "p1", "name": "H" })]),
        )]);
        let elements = || {
            vec![
                Element::Resolve { id: "p1".into(), collection: "people".into() },
                Element::Resolve { id: "p2".into(), collection: "people".into() },
            ]
        };

        let lenient = FieldPlan {
            doc_index: 0,
            field: "authors".into(),
            raw: Bson::Array(vec!["p1".into(), "p2".into()]),
            elements: elements(),
            scalar: false,
            strict: false,
            narrow_to: Vec::new(),
            used_ref: false,
        };
        let Some(Bson::Array(values)) = expand(&lenient, &resolved) else {
            panic!("expected array");
        };
        assert_eq!(values.len(), 1);

        let strict = FieldPlan { strict: true, elements: elements(), ..lenient };
        let Some(Bson::Array(values)) = expand(&strict, &resolved) else {
            panic!("expected array");
        };
        assert_eq!(values.len(), 2);
        assert_eq!(values[1], Bson::Null);
    }

    #[test]
    fn duplicate_ids_collapse_unless_strict() {
        let elements = vec![
            Element::Resolve { id: "p1".into(), collection: "people".into() },
            Element::Resolve { id: "p1".into(), collection: "people".into() },
            Element::Keep(Bson::String("raw".into())),
        ];
        let deduped = dedupe_elements(elements);
        assert_eq!(deduped.len(), 2);
    }
}
