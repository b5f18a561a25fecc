//! Query rewriting for dot-notation conditions on reference fields.
//!
//! A query such as `{ "author.name": "Herman" }` addresses a field of the
//! *referenced* document. Storage only sees IDs in reference fields, so the
//! engine resolves such conditions before the outer query runs: it queries
//! the foreign collection for matching documents, collects their IDs, and
//! folds them back into the outer query as a containment condition on the
//! reference field.
//!
//! Conditions sharing a reference field resolve with a single foreign query
//! (`{ "author.name": x, "author.email": y }` is one lookup against the
//! people collection), and nested paths resolve bottom-up: the deepest
//! segment first, each level feeding IDs to the one above it. A foreign
//! query that matches nothing makes the whole outer query unsatisfiable,
//! and resolution stops there.

use bson::{Bson, Document};
use futures::future::{BoxFuture, FutureExt};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
    error::{ModelError, ModelResult},
    query::QueryOptions,
    registry::Registry,
    schema::{internal_fields, Schema},
};

/// The outcome of rewriting a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Rewritten {
    /// The query to run against storage, with reference conditions folded
    /// into ID containment checks.
    Query(Document),
    /// A referenced-field condition matched no foreign documents; the outer
    /// query cannot match anything and storage need not be consulted.
    NoMatch,
}

/// Resolves dot-notation reference conditions against foreign collections.
#[derive(Debug, Clone)]
pub struct QueryRewriter {
    registry: Registry,
}

impl QueryRewriter {
    pub fn new(registry: Registry) -> Self {
        QueryRewriter { registry }
    }

    /// Rewrites `query` for `collection` so storage only sees conditions on
    /// the collection's own fields.
    ///
    /// Queries without dot-notation reference conditions come back
    /// unchanged. Dot paths whose head is not a reference field (nested
    /// object access) pass through for storage to evaluate.
    ///
    /// # Errors
    ///
    /// Fails with [`ModelError::UnknownCollection`] when a reference
    /// condition points at a collection with no registered schema, or with
    /// the underlying datastore error when a foreign lookup fails.
    pub async fn rewrite(
        &self,
        collection: &str,
        schema: Arc<Schema>,
        query: Document,
    ) -> ModelResult<Rewritten> {
        self.rewrite_level(collection.to_string(), schema, query).await
    }

    fn rewrite_level(
        &self,
        collection: String,
        schema: Arc<Schema>,
        query: Document,
    ) -> BoxFuture<'_, ModelResult<Rewritten>> {
        async move {
            let (mut base, branches) = split_reference_paths(&schema, query);
            if branches.is_empty() {
                return Ok(Rewritten::Query(base));
            }

            // Branches resolve one after another: any of them can prove the
            // query unsatisfiable, and then the rest never hit storage.
            for (field, sub_query) in branches {
                let settings = schema
                    .descriptor(&field)
                    .map(|descriptor| descriptor.reference_settings())
                    .unwrap_or_default();
                let target = settings.target_collection(&collection).to_string();
                let Some(foreign) = self.registry.schema(&target) else {
                    return Err(ModelError::UnknownCollection(target));
                };

                // A condition on the foreign ID alone needs no lookup.
                if settings.link_field.is_none() {
                    if let Some(id) = id_only_condition(&sub_query) {
                        let folded = containment(vec![id], settings.multiple);
                        if !merge_condition(&mut base, &field, folded) {
                            return Ok(Rewritten::NoMatch);
                        }
                        continue;
                    }
                }

                let sub_query = match self
                    .rewrite_level(target.clone(), foreign, sub_query)
                    .await?
                {
                    Rewritten::Query(rewritten) => rewritten,
                    Rewritten::NoMatch => return Ok(Rewritten::NoMatch),
                };

                let projected = match &settings.link_field {
                    Some(link) => link.clone(),
                    None => internal_fields::ID.to_string(),
                };
                let options = QueryOptions {
                    fields: vec![projected.clone()],
                    limit: usize::MAX,
                    ..Default::default()
                };
                let outcome = self
                    .registry
                    .datastore()
                    .find(&target, &sub_query, &options)
                    .await?;

                let ids = collect_ids(&outcome.results, &projected);
                if ids.is_empty() {
                    return Ok(Rewritten::NoMatch);
                }

                let (fold_field, folded) = match &settings.link_field {
                    // Inverse relation: the foreign side holds the IDs of
                    // our documents.
                    Some(_) => (
                        internal_fields::ID.to_string(),
                        bson::doc! { "$in": ids },
                    ),
                    None => (field.clone(), containment(ids, settings.multiple)),
                };
                if !merge_condition(&mut base, &fold_field, folded) {
                    return Ok(Rewritten::NoMatch);
                }
            }

            Ok(Rewritten::Query(base))
        }
        .boxed()
    }
}

/// Splits a query into conditions storage can evaluate directly and
/// dot-notation branches grouped by their reference field.
///
/// `{ "author.name": x, "author.email": y, "title": z }` yields the base
/// `{ "title": z }` plus one branch `("author", { "name": x, "email": y })`.
fn split_reference_paths(
    schema: &Schema,
    query: Document,
) -> (Document, BTreeMap<String, Document>) {
    let mut base = Document::new();
    let mut branches: BTreeMap<String, Document> = BTreeMap::new();

    for (key, value) in query.into_iter() {
        let Some((head, rest)) = key.split_once('.') else {
            base.insert(key, value);
            continue;
        };
        let is_reference = schema
            .descriptor(head)
            .map(|descriptor| descriptor.is_reference())
            .unwrap_or(false);
        if is_reference {
            branches
                .entry(head.to_string())
                .or_default()
                .insert(rest.to_string(), value);
        } else {
            base.insert(key, value);
        }
    }

    (base, branches)
}

/// Detects a branch that only constrains the foreign `_id` to a plain
/// string, which folds without a storage round trip.
fn id_only_condition(sub_query: &Document) -> Option<String> {
    if sub_query.len() != 1 {
        return None;
    }
    sub_query
        .get(internal_fields::ID)
        .and_then(Bson::as_str)
        .map(str::to_string)
}

/// The containment condition for a resolved ID set: array-valued reference
/// fields intersect, scalar ones test membership.
fn containment(ids: Vec<String>, multiple: bool) -> Document {
    if multiple {
        bson::doc! { "$containsAny": ids }
    } else {
        bson::doc! { "$in": ids }
    }
}

/// Collects the resolved IDs from foreign matches: document IDs for direct
/// references, the link field's values (flattening arrays) for inverse ones.
fn collect_ids(results: &[Document], field: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let mut push = |id: &str| {
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    };
    for document in results {
        match document.get(field) {
            Some(Bson::String(id)) => push(id),
            Some(Bson::Array(items)) => {
                for item in items {
                    if let Some(id) = item.as_str() {
                        push(id);
                    }
                }
            }
            _ => {}
        }
    }
    ids
}

/// Merges a resolved containment condition into the outer query, preserving
/// any condition the caller already placed on the same field.
///
/// Returns `false` when the merge proves the query unsatisfiable.
fn merge_condition(base: &mut Document, field: &str, condition: Document) -> bool {
    match base.get_mut(field) {
        None => {
            base.insert(field.to_string(), condition);
            true
        }
        // A direct equality on the field survives if it is inside the
        // resolved ID set.
        Some(Bson::String(existing)) => {
            let existing = existing.clone();
            condition
                .iter()
                .all(|(_, operand)| id_list_contains(operand, &existing))
        }
        Some(Bson::Document(existing)) => {
            for (operator, operand) in condition.into_iter() {
                match existing.get(&operator) {
                    // Two resolved branches constraining the same field
                    // intersect their ID sets.
                    Some(current) => {
                        let narrowed = intersect_id_lists(current, &operand);
                        if narrowed.is_empty() {
                            return false;
                        }
                        existing.insert(operator, narrowed);
                    }
                    None => {
                        existing.insert(operator, operand);
                    }
                }
            }
            true
        }
        Some(_) => false,
    }
}

fn id_list_contains(operand: &Bson, id: &str) -> bool {
    match operand {
        Bson::Array(items) => items.iter().any(|item| item.as_str() == Some(id)),
        _ => false,
    }
}

fn intersect_id_lists(left: &Bson, right: &Bson) -> Vec<Bson> {
    let Bson::Array(left) = left else {
        return Vec::new();
    };
    left.iter()
        .filter(|item| {
            item.as_str()
                .map(|id| id_list_contains(right, id))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, FieldType};
    use bson::doc;

    fn book_schema() -> Schema {
        Schema::new()
            .field("title", FieldDescriptor::new(FieldType::String))
            .field("meta", FieldDescriptor::new(FieldType::Object))
            .field("author", FieldDescriptor::reference_to("people"))
    }

    #[test]
    fn split_groups_conditions_by_reference_field() {
        let (base, branches) = split_reference_paths(
            &book_schema(),
            doc! {
                "title": "Moby-Dick",
                "author.name": "Herman",
                "author.email": "h@x",
                "meta.tag": "classic",
            },
        );
        assert_eq!(base.len(), 2);
        assert!(base.get("meta.tag").is_some());
        assert_eq!(branches.len(), 1);
        assert_eq!(
            branches.get("author"),
            Some(&doc! { "name": "Herman", "email": "h@x" })
        );
    }

    #[test]
    fn id_only_branches_fold_without_lookup() {
        assert_eq!(
            id_only_condition(&doc! { "_id": "p1" }),
            Some("p1".to_string())
        );
        assert_eq!(id_only_condition(&doc! { "_id": "p1", "name": "H" }), None);
        assert_eq!(id_only_condition(&doc! { "name": "H" }), None);
    }

    #[test]
    fn containment_shape_follows_multiplicity() {
        assert_eq!(
            containment(vec!["a".into()], false),
            doc! { "$in": ["a"] }
        );
        assert_eq!(
            containment(vec!["a".into()], true),
            doc! { "$containsAny": ["a"] }
        );
    }

    #[test]
    fn collect_ids_flattens_link_field_arrays() {
        let results = vec![
            doc! { "books": ["b1", "b2"] },
            doc! { "books": "b3" },
            doc! { "books": ["b2"] },
            doc! {},
        ];
        assert_eq!(collect_ids(&results, "books"), vec!["b1", "b2", "b3"]);
    }

    #[test]
    fn merge_keeps_compatible_direct_equality() {
        let mut base = doc! { "author": "p1" };
        assert!(merge_condition(
            &mut base,
            "author",
            doc! { "$in": ["p1", "p2"] }
        ));
        assert_eq!(base, doc! { "author": "p1" });
    }

    #[test]
    fn merge_rejects_contradicting_equality() {
        let mut base = doc! { "author": "p9" };
        assert!(!merge_condition(
            &mut base,
            "author",
            doc! { "$in": ["p1", "p2"] }
        ));
    }

    #[test]
    fn merge_intersects_two_resolved_branches() {
        let mut base = doc! { "_id": { "$in": ["a", "b", "c"] } };
        assert!(merge_condition(
            &mut base,
            "_id",
            doc! { "$in": ["b", "c", "d"] }
        ));
        assert_eq!(base, doc! { "_id": { "$in": ["b", "c"] } });

        let mut disjoint = doc! { "_id": { "$in": ["a"] } };
        assert!(!merge_condition(
            &mut disjoint,
            "_id",
            doc! { "$in": ["z"] }
        ));
    }
}
