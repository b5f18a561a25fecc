//! Schema validation for documents, update payloads and queries.
//!
//! Validation is pure: functions of a [`Schema`] and an input, with no I/O.
//! Failures are accumulated per field and surfaced as a single
//! [`ModelError::Validation`] so a caller sees every problem at once, not
//! just the first.
//!
//! The engine runs these before any storage traffic: a request that fails
//! validation never reaches the datastore.

use bson::{Bson, Document};
use regex::Regex;
use uuid::Uuid;

use crate::{
    error::{FieldError, ModelError, ModelResult},
    schema::{internal_fields, FieldDescriptor, FieldType, Schema},
};

/// Query operators accepted inside operator documents.
///
/// Logical `$and` / `$or` are deliberately absent: top-level keys conjoin
/// implicitly, and any other `$` key at the query root is rejected.
pub const QUERY_OPERATORS: [&str; 9] = [
    "$in",
    "$containsAny",
    "$ne",
    "$gt",
    "$gte",
    "$lt",
    "$lte",
    "$exists",
    "$regex",
];

/// Validates a full document for create.
///
/// Checks required fields, declared types and per-field rules, and rejects
/// fields the schema doesn't know. Internal (`_`-prefixed) fields are the
/// engine's own and are skipped entirely.
///
/// # Errors
///
/// Returns [`ModelError::Validation`] carrying one [`FieldError`] per failed
/// check.
pub fn validate_document(schema: &Schema, document: &Document) -> ModelResult<()> {
    let mut errors = Vec::new();

    for (name, descriptor) in &schema.fields {
        if descriptor.required {
            let missing = match document.get(name) {
                None | Some(Bson::Null) => true,
                Some(_) => false,
            };
            if missing {
                errors.push(field_error(name, descriptor, "must be specified"));
            }
        }
    }

    for (name, value) in document.iter() {
        if name.starts_with(internal_fields::PREFIX) {
            continue;
        }
        match schema.descriptor(name) {
            Some(descriptor) => validate_value(name, descriptor, value, &mut errors),
            None => errors.push(FieldError::new(
                name,
                "is not defined in the collection schema",
            )),
        }
    }

    finish(errors)
}

/// Validates a partial update payload.
///
/// Like [`validate_document`] but without required-field enforcement: absent
/// fields stay untouched by the update. Internal fields are rejected here
/// rather than skipped, since an update payload flows straight into storage
/// writes.
///
/// # Errors
///
/// Returns [`ModelError::Validation`] carrying one [`FieldError`] per failed
/// check.
pub fn validate_update(schema: &Schema, update: &Document) -> ModelResult<()> {
    let mut errors = Vec::new();

    for (name, value) in update.iter() {
        if name.starts_with(internal_fields::PREFIX) {
            errors.push(FieldError::new(name, "cannot be modified directly"));
            continue;
        }
        match schema.descriptor(name) {
            Some(descriptor) => validate_value(name, descriptor, value, &mut errors),
            None => errors.push(FieldError::new(
                name,
                "is not defined in the collection schema",
            )),
        }
    }

    finish(errors)
}

/// Validates a query document.
///
/// Top-level keys must be schema fields, internal fields, or dot-notation
/// paths rooted at a schema field. Operator documents may only use the
/// operators in [`QUERY_OPERATORS`], with sane operand shapes. `_id` values
/// must parse as UUIDs.
///
/// # Errors
///
/// Returns [`ModelError::Validation`] carrying one [`FieldError`] per failed
/// check.
pub fn validate_query(schema: &Schema, query: &Document) -> ModelResult<()> {
    let mut errors = Vec::new();

    for (key, value) in query.iter() {
        if key.starts_with('$') {
            errors.push(FieldError::new(key, "is not a supported query operator"));
            continue;
        }

        let head = key.split('.').next().unwrap_or(key);
        let known = head.starts_with(internal_fields::PREFIX) || schema.descriptor(head).is_some();
        if !known {
            errors.push(FieldError::new(key, "is not a valid query field"));
            continue;
        }

        if head == internal_fields::ID {
            validate_id_condition(key, value, &mut errors);
        }

        if let Bson::Document(condition) = value {
            validate_condition(key, condition, &mut errors);
        }
    }

    finish(errors)
}

/// Whether a query addresses a single document by ID: its `_id` key holds a
/// plain string. Returns the ID when it does.
pub fn id_addressed(query: &Document) -> Option<&str> {
    query.get(internal_fields::ID).and_then(Bson::as_str)
}

fn finish(errors: Vec<FieldError>) -> ModelResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ModelError::Validation { errors })
    }
}

fn field_error(name: &str, descriptor: &FieldDescriptor, fallback: &str) -> FieldError {
    match &descriptor.message {
        Some(message) => FieldError::new(name, message.clone()),
        None => FieldError::new(name, fallback),
    }
}

fn validate_value(
    name: &str,
    descriptor: &FieldDescriptor,
    value: &Bson,
    errors: &mut Vec<FieldError>,
) {
    if matches!(value, Bson::Null) {
        return;
    }

    let type_ok = match descriptor.field_type {
        FieldType::String => matches!(value, Bson::String(_)),
        FieldType::Number => {
            matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
        }
        FieldType::Boolean => matches!(value, Bson::Boolean(_)),
        FieldType::Object => matches!(value, Bson::Document(_)),
        FieldType::Array => matches!(value, Bson::Array(_)),
        FieldType::DateTime => is_datetime(value),
        FieldType::Reference => is_reference_value(value),
        FieldType::Mixed => true,
    };
    if !type_ok {
        errors.push(field_error(
            name,
            descriptor,
            &format!("must be of type {:?}", descriptor.field_type),
        ));
        return;
    }

    let rules = &descriptor.validation;
    if rules.is_empty() {
        return;
    }

    let length = match value {
        Bson::String(s) => Some(s.chars().count()),
        Bson::Array(a) => Some(a.len()),
        _ => None,
    };
    if let (Some(length), Some(min)) = (length, rules.min_length) {
        if length < min {
            errors.push(field_error(name, descriptor, "is too short"));
        }
    }
    if let (Some(length), Some(max)) = (length, rules.max_length) {
        if length > max {
            errors.push(field_error(name, descriptor, "is too long"));
        }
    }

    if let (Some(pattern), Bson::String(s)) = (&rules.regex, value) {
        match Regex::new(pattern) {
            Ok(regex) => {
                if !regex.is_match(s) {
                    errors.push(field_error(name, descriptor, "should match the pattern"));
                }
            }
            Err(_) => {
                errors.push(FieldError::new(name, "has an invalid validation pattern"));
            }
        }
    }
}

fn is_datetime(value: &Bson) -> bool {
    match value {
        Bson::DateTime(_) => true,
        Bson::String(s) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
        _ => false,
    }
}

// A reference holds an ID, an inline document to be written to the foreign
// collection, or a list of either.
fn is_reference_value(value: &Bson) -> bool {
    match value {
        Bson::String(_) | Bson::Document(_) => true,
        Bson::Array(items) => items
            .iter()
            .all(|item| matches!(item, Bson::String(_) | Bson::Document(_))),
        _ => false,
    }
}

fn validate_id_condition(key: &str, value: &Bson, errors: &mut Vec<FieldError>) {
    match value {
        Bson::String(id) => {
            if Uuid::parse_str(id).is_err() {
                errors.push(FieldError::new(key, "is not a valid document identifier"));
            }
        }
        Bson::Document(condition) => {
            for (_, operand) in condition.iter().filter(|(op, _)| is_set_operator(op)) {
                if let Bson::Array(ids) = operand {
                    for id in ids {
                        if id.as_str().is_none_or(|id| Uuid::parse_str(id).is_err()) {
                            errors.push(FieldError::new(
                                key,
                                "contains an invalid document identifier",
                            ));
                            break;
                        }
                    }
                }
            }
        }
        _ => errors.push(FieldError::new(key, "is not a valid document identifier")),
    }
}

fn is_set_operator(op: &str) -> bool {
    op == "$in" || op == "$containsAny"
}

fn validate_condition(key: &str, condition: &Document, errors: &mut Vec<FieldError>) {
    let operator_keys = condition.keys().filter(|k| k.starts_with('$')).count();
    if operator_keys == 0 {
        // Exact-match subdocument, passed through to storage as-is.
        return;
    }
    if operator_keys != condition.len() {
        errors.push(FieldError::new(
            key,
            "mixes operators and literal fields in one condition",
        ));
        return;
    }

    for (operator, operand) in condition.iter() {
        if !QUERY_OPERATORS.contains(&operator.as_str()) {
            errors.push(FieldError::new(
                key,
                format!("uses the unsupported operator {operator}"),
            ));
            continue;
        }
        let operand_ok = match operator.as_str() {
            "$in" | "$containsAny" => matches!(operand, Bson::Array(_)),
            "$exists" => matches!(operand, Bson::Boolean(_)),
            "$regex" => matches!(operand, Bson::String(s) if Regex::new(s).is_ok()),
            _ => true,
        };
        if !operand_ok {
            errors.push(FieldError::new(
                key,
                format!("has an invalid operand for {operator}"),
            ));
        }
    }
}
