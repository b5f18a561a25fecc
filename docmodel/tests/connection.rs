//! How the engine reports a storage backend that has lost its connection.

mod common;

use bson::doc;
use common::{id_of, library, raw};
use docmodel::prelude::*;

#[tokio::test]
async fn every_operation_reports_the_lost_connection() {
    let (registry, datastore) = library();
    let books = registry.model("books").unwrap();
    let created = books
        .create(vec![doc! { "title": "Moby-Dick" }], doc! {})
        .await
        .unwrap();
    let id = id_of(&created.results[0]);
    datastore.set_connected(false).await;
    let err = books.find(doc! {}, &raw()).await.unwrap_err();
    assert!(matches!(err, ModelError::Connection));
    assert_eq!(err.status(), 503);

    let err = books
        .create(vec![doc! { "title": "Unreachable" }], doc! {})
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Connection));

    let err = books
        .update(doc! { "_id": &id }, doc! { "title": "Nope" }, doc! {})
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Connection));

    let err = books.delete(doc! { "_id": &id }).await.unwrap_err();
    assert!(matches!(err, ModelError::Connection));

    let err = books.stats().await.unwrap_err();
    assert!(matches!(err, ModelError::Connection));
}

#[tokio::test]
async fn operations_recover_when_the_connection_returns() {
    let (registry, datastore) = library();
    let books = registry.model("books").unwrap();

    datastore.set_connected(false).await;
    assert!(books.find(doc! {}, &raw()).await.is_err());

    datastore.set_connected(true).await;
    let created = books
        .create(vec![doc! { "title": "Back Online" }], doc! {})
        .await
        .unwrap();
    assert_eq!(created.results.len(), 1);
    let found = books.find(doc! {}, &raw()).await.unwrap();
    assert_eq!(found.metadata.total_count, 1);
}
