//! Shared fixtures for the integration tests: a small library domain with
//! authors referencing each other and books referencing authors.
#![allow(dead_code)]

use bson::{doc, Bson, Document};
use docmodel::memory::MemoryDatastore;
use docmodel::prelude::*;

/// Authors: a name, an optional email, and an optional reference to another
/// author.
pub fn author_schema() -> Schema {
    Schema::new()
        .field("name", FieldDescriptor::new(FieldType::String).required())
        .field("email", FieldDescriptor::new(FieldType::String))
        .field("friend", FieldDescriptor::reference_to("authors"))
}

/// Books: a required title, a page count, a nested metadata object and a
/// reference to their author.
pub fn book_schema() -> Schema {
    Schema::new()
        .field("title", FieldDescriptor::new(FieldType::String).required())
        .field("pages", FieldDescriptor::new(FieldType::Number))
        .field("meta", FieldDescriptor::new(FieldType::Object))
        .field("author", FieldDescriptor::reference_to("authors"))
}

/// A registry over a fresh in-memory datastore, plus a handle to the store
/// itself for direct inspection and connection toggling.
pub fn library() -> (Registry, MemoryDatastore) {
    let datastore = MemoryDatastore::new();
    let registry = Registry::builder(datastore.clone())
        .schema("authors", author_schema())
        .schema("books", book_schema())
        .build()
        .expect("registry should build");
    (registry, datastore)
}

/// The `_id` of a result document.
pub fn id_of(document: &Document) -> String {
    document
        .get("_id")
        .and_then(Bson::as_str)
        .expect("document should carry an _id")
        .to_string()
}

pub fn str_of<'a>(document: &'a Document, field: &str) -> &'a str {
    document
        .get(field)
        .and_then(Bson::as_str)
        .unwrap_or_else(|| panic!("{field} should hold a string"))
}

pub fn doc_of<'a>(document: &'a Document, field: &str) -> &'a Document {
    document
        .get(field)
        .and_then(Bson::as_document)
        .unwrap_or_else(|| panic!("{field} should hold a document"))
}

pub async fn create_author(registry: &Registry, name: &str) -> String {
    let authors = registry.model("authors").unwrap();
    let created = authors
        .create(vec![doc! { "name": name }], doc! {})
        .await
        .unwrap();
    id_of(&created.results[0])
}

pub async fn create_book(registry: &Registry, title: &str, author_id: &str) -> String {
    let books = registry.model("books").unwrap();
    let created = books
        .create(vec![doc! { "title": title, "author": author_id }], doc! {})
        .await
        .unwrap();
    id_of(&created.results[0])
}

/// Options that skip composition, for asserting on stored form.
pub fn raw() -> FindOptions {
    FindOptions::builder().compose(false).build()
}
