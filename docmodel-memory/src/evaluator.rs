//! Operator-document evaluation for in-memory filtering.
//!
//! This module decides whether a stored document matches an operator-document
//! query such as `{ "age": { "$gte": 18 }, "tags": "classic" }`, and provides
//! the comparable value wrapper the store also sorts with.

use regex::Regex;
use std::{cmp::Ordering, collections::HashMap};

use bson::{datetime::DateTime, Bson, Document};

use docmodel_core::error::{DatastoreError, DatastoreResult};

/// A borrowed view of a BSON value, bucketed by comparison type.
///
/// Filtering and sorting both reduce values to this shape: every integer
/// width and `Double` collapse into one numeric bucket, sub-documents
/// become maps, and anything storage cannot meaningfully compare (object
/// IDs, binary blobs) degrades to `Null`. Values in different buckets are
/// never ordered relative to each other.
#[derive(Debug, PartialEq)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    /// Every numeric BSON type, widened to `f64`.
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(value: &'a Bson) -> Self {
        match value {
            Bson::Null => Comparable::Null,
            Bson::Boolean(flag) => Comparable::Bool(*flag),
            Bson::Int32(n) => Comparable::Number(f64::from(*n)),
            Bson::Int64(n) => Comparable::Number(*n as f64),
            Bson::Double(n) => Comparable::Number(*n),
            Bson::DateTime(at) => Comparable::DateTime(*at),
            Bson::String(text) => Comparable::String(text),
            Bson::Array(items) => {
                Comparable::Array(items.iter().map(Comparable::from).collect())
            }
            Bson::Document(fields) => Comparable::Map(
                fields
                    .iter()
                    .map(|(name, field)| (name.as_str(), Comparable::from(field)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Number(lhs), Comparable::Number(rhs)) => lhs.partial_cmp(rhs),
            (Comparable::String(lhs), Comparable::String(rhs)) => lhs.partial_cmp(rhs),
            (Comparable::DateTime(lhs), Comparable::DateTime(rhs)) => lhs.partial_cmp(rhs),
            (Comparable::Bool(lhs), Comparable::Bool(rhs)) => lhs.partial_cmp(rhs),
            _ => None,
        }
    }
}

/// Whether `document` satisfies every condition in `query`.
///
/// Top-level keys may be dotted paths into nested sub-documents. A condition
/// is either a literal (equality, with array containment for array-valued
/// fields) or an operator document whose conditions must all hold.
///
/// # Errors
///
/// [`DatastoreError::BadRequest`] for an unknown operator or an invalid
/// `$regex` pattern.
pub(crate) fn matches(document: &Document, query: &Document) -> DatastoreResult<bool> {
    for (path, condition) in query.iter() {
        let value = resolve_path(document, path);
        if !condition_holds(value, condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Resolves a dotted path through nested sub-documents.
///
/// A path segment that lands on anything but a sub-document ends the
/// descent; reference traversal never reaches storage.
pub(crate) fn resolve_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }
    Some(current)
}

fn condition_holds(value: Option<&Bson>, condition: &Bson) -> DatastoreResult<bool> {
    if let Bson::Document(operators) = condition {
        if operators.keys().any(|key| key.starts_with('$')) {
            for (operator, operand) in operators.iter() {
                if !operator_holds(value, operator, operand)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
    }
    // Missing fields compare as null, so { "field": null } matches absence.
    Ok(equals(value.unwrap_or(&Bson::Null), condition))
}

fn operator_holds(value: Option<&Bson>, operator: &str, operand: &Bson) -> DatastoreResult<bool> {
    if operator == "$exists" {
        let should_exist = matches!(operand, Bson::Boolean(true));
        return Ok(value.is_some() == should_exist);
    }

    let value = value.unwrap_or(&Bson::Null);
    match operator {
        "$in" | "$containsAny" => Ok(any_of(value, operand)),
        "$ne" => Ok(!equals(value, operand)),
        "$gt" | "$gte" | "$lt" | "$lte" => {
            match Comparable::from(value).partial_cmp(&Comparable::from(operand)) {
                Some(ordering) => Ok(match operator {
                    "$gt" => ordering == Ordering::Greater,
                    "$gte" => ordering != Ordering::Less,
                    "$lt" => ordering == Ordering::Less,
                    "$lte" => ordering != Ordering::Greater,
                    _ => unreachable!(),
                }),
                None => Ok(false),
            }
        }
        "$regex" => {
            let Bson::String(pattern) = operand else {
                return Ok(false);
            };
            let regex = Regex::new(pattern).map_err(|err| {
                DatastoreError::BadRequest(format!("invalid $regex pattern: {err}"))
            })?;
            Ok(value
                .as_str()
                .map(|text| regex.is_match(text))
                .unwrap_or(false))
        }
        other => Err(DatastoreError::BadRequest(format!(
            "unsupported query operator: {other}"
        ))),
    }
}

/// Literal equality, with array containment: an array-valued field equals a
/// scalar condition when any element does.
fn equals(value: &Bson, condition: &Bson) -> bool {
    let left = Comparable::from(value);
    let right = Comparable::from(condition);
    if left == right {
        return true;
    }
    match (left, right) {
        (Comparable::Array(items), scalar) => items.iter().any(|item| item == &scalar),
        _ => false,
    }
}

/// Set intersection over scalars and arrays on either side.
fn any_of(value: &Bson, operand: &Bson) -> bool {
    match (Comparable::from(value), Comparable::from(operand)) {
        (Comparable::Array(items), Comparable::Array(candidates)) => candidates
            .iter()
            .any(|candidate| items.iter().any(|item| item == candidate)),
        (Comparable::Array(items), single) => items.iter().any(|item| item == &single),
        (single, Comparable::Array(candidates)) => {
            candidates.iter().any(|candidate| candidate == &single)
        }
        (left, right) => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn book() -> Document {
        doc! {
            "_id": "b1",
            "title": "Moby-Dick",
            "pages": 635,
            "tags": ["classic", "sea"],
            "meta": { "language": "en" },
        }
    }

    #[test]
    fn literal_equality_and_array_containment() {
        assert!(matches(&book(), &doc! { "title": "Moby-Dick" }).unwrap());
        assert!(!matches(&book(), &doc! { "title": "Typee" }).unwrap());
        assert!(matches(&book(), &doc! { "tags": "classic" }).unwrap());
        assert!(!matches(&book(), &doc! { "tags": "romance" }).unwrap());
    }

    #[test]
    fn missing_fields_compare_as_null() {
        assert!(matches(&book(), &doc! { "subtitle": Bson::Null }).unwrap());
        assert!(matches(&book(), &doc! { "subtitle": { "$ne": "x" } }).unwrap());
        assert!(matches(&book(), &doc! { "subtitle": { "$exists": false } }).unwrap());
        assert!(matches(&book(), &doc! { "title": { "$exists": true } }).unwrap());
    }

    #[test]
    fn ordering_operators() {
        assert!(matches(&book(), &doc! { "pages": { "$gt": 600 } }).unwrap());
        assert!(matches(&book(), &doc! { "pages": { "$gte": 635 } }).unwrap());
        assert!(!matches(&book(), &doc! { "pages": { "$lt": 635 } }).unwrap());
        assert!(matches(&book(), &doc! { "pages": { "$lte": 635.0 } }).unwrap());
        // Incomparable types never match
        assert!(!matches(&book(), &doc! { "title": { "$gt": 3 } }).unwrap());
    }

    #[test]
    fn containment_set_intersects_either_side() {
        assert!(matches(&book(), &doc! { "tags": { "$containsAny": ["sea", "air"] } }).unwrap());
        assert!(!matches(&book(), &doc! { "tags": { "$containsAny": ["air"] } }).unwrap());
        assert!(matches(&book(), &doc! { "_id": { "$in": ["b1", "b2"] } }).unwrap());
        assert!(!matches(&book(), &doc! { "_id": { "$in": ["b2"] } }).unwrap());
    }

    #[test]
    fn dotted_paths_descend_sub_documents() {
        assert!(matches(&book(), &doc! { "meta.language": "en" }).unwrap());
        assert!(!matches(&book(), &doc! { "meta.language": "de" }).unwrap());
        assert!(matches(&book(), &doc! { "meta.missing": { "$exists": false } }).unwrap());
    }

    #[test]
    fn regex_matches_strings_only() {
        assert!(matches(&book(), &doc! { "title": { "$regex": "^Moby" } }).unwrap());
        assert!(!matches(&book(), &doc! { "pages": { "$regex": "^6" } }).unwrap());
        assert!(matches(&book(), &doc! { "title": { "$regex": "[" } }).is_err());
    }

    #[test]
    fn unknown_operator_is_a_bad_request() {
        let err = matches(&book(), &doc! { "title": { "$near": 1 } }).unwrap_err();
        assert!(matches!(err, DatastoreError::BadRequest(_)));
    }

    #[test]
    fn multiple_operators_on_one_field_all_apply() {
        assert!(matches(&book(), &doc! { "pages": { "$gt": 100, "$lt": 700 } }).unwrap());
        assert!(!matches(&book(), &doc! { "pages": { "$gt": 100, "$lt": 200 } }).unwrap());
    }
}
