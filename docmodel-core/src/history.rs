//! Revision history: snapshots of documents taken before each mutation.
//!
//! Revisions live in a sibling collection (`<collection>History` unless the
//! schema names one) and are plain documents: the pre-image minus its
//! identity fields, plus `_originalDocumentId`, `_action` and a timestamp.
//! The live document keeps an append-only `_history` array of revision IDs,
//! which is the engine's only link between the two collections; storage
//! knows nothing about the relationship.
//!
//! Snapshots are always taken from the stored form of a document (raw
//! reference IDs, never composed values), so a revision records what storage
//! held at that moment.

use bson::{Bson, Document};
use futures::future::try_join_all;
use std::sync::Arc;

use crate::{
    datastore::Datastore,
    error::ModelResult,
    schema::{internal_fields, CollectionSettings},
};

/// The mutation a revision snapshot was taken ahead of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionAction {
    Update,
    Delete,
}

impl RevisionAction {
    /// The value stored under `_action` on the revision document.
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionAction::Update => "update",
            RevisionAction::Delete => "delete",
        }
    }
}

/// Records revision snapshots and maintains the live documents' `_history`.
#[derive(Debug, Clone)]
pub struct HistoryTracker {
    datastore: Arc<dyn Datastore>,
}

impl HistoryTracker {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        HistoryTracker { datastore }
    }

    /// Records one revision per pre-image and appends each revision's ID to
    /// its live document's `_history`.
    ///
    /// Does nothing (observably, at debug level) when the collection has
    /// revisions switched off. Pre-images without an `_id` are skipped.
    ///
    /// # Errors
    ///
    /// A storage failure here surfaces as the operation's error. The primary
    /// mutation is not rolled back; the failure is also logged since the
    /// document and its history are now out of step.
    pub async fn record(
        &self,
        collection: &str,
        settings: &CollectionSettings,
        pre_images: &[Document],
        action: RevisionAction,
    ) -> ModelResult<Vec<String>> {
        if !settings.store_revisions {
            log::debug!("revisions disabled for {collection}, skipping snapshot");
            return Ok(Vec::new());
        }
        if pre_images.is_empty() {
            return Ok(Vec::new());
        }

        let snapshots: Vec<(String, Document)> = pre_images
            .iter()
            .filter_map(|document| snapshot(document, action))
            .collect();
        if snapshots.is_empty() {
            return Ok(Vec::new());
        }

        let revision_collection = settings.revision_collection_for(collection);
        let originals: Vec<String> = snapshots.iter().map(|(id, _)| id.clone()).collect();
        let revisions: Vec<Document> = snapshots.into_iter().map(|(_, doc)| doc).collect();

        let inserted = match self.datastore.insert(&revision_collection, revisions).await {
            Ok(inserted) => inserted,
            Err(err) => {
                log::error!("failed to record {} revisions for {collection}: {err}", action.as_str());
                return Err(err.into());
            }
        };

        let revision_ids: Vec<String> = inserted
            .iter()
            .filter_map(|revision| {
                revision
                    .get(internal_fields::ID)
                    .and_then(Bson::as_str)
                    .map(str::to_string)
            })
            .collect();

        let appends = originals.iter().zip(revision_ids.iter()).map(|(original, revision)| {
            let query = bson::doc! { internal_fields::ID: original };
            let update = bson::doc! { "$push": { internal_fields::HISTORY: revision } };
            async move {
                self.datastore.update(collection, &query, &update).await?;
                ModelResult::Ok(())
            }
        });
        if let Err(err) = try_join_all(appends).await {
            log::error!("failed to append revision ids to {collection} history: {err}");
            return Err(err);
        }

        Ok(revision_ids)
    }
}

/// Builds the revision document for one pre-image.
///
/// Returns `None` when the pre-image has no `_id` to link back to.
fn snapshot(document: &Document, action: RevisionAction) -> Option<(String, Document)> {
    let original_id = document
        .get(internal_fields::ID)
        .and_then(Bson::as_str)?
        .to_string();

    let mut revision = document.clone();
    revision.remove(internal_fields::ID);
    revision.remove(internal_fields::HISTORY);
    revision.insert(internal_fields::ORIGINAL_DOCUMENT_ID, original_id.clone());
    revision.insert(internal_fields::ACTION, action.as_str());
    revision.insert(internal_fields::CREATED_AT, Bson::DateTime(bson::DateTime::now()));

    Some((original_id, revision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn snapshot_strips_identity_and_links_back() {
        let document = doc! {
            "_id": "doc-1",
            "_version": 3,
            "_history": ["rev-1", "rev-2"],
            "title": "Moby Dick",
        };

        let (original, revision) = snapshot(&document, RevisionAction::Update).unwrap();
        assert_eq!(original, "doc-1");
        assert!(revision.get(internal_fields::ID).is_none());
        assert!(revision.get(internal_fields::HISTORY).is_none());
        assert_eq!(
            revision.get(internal_fields::ORIGINAL_DOCUMENT_ID),
            Some(&Bson::String("doc-1".into()))
        );
        assert_eq!(
            revision.get(internal_fields::ACTION),
            Some(&Bson::String("update".into()))
        );
        assert_eq!(revision.get("title"), Some(&Bson::String("Moby Dick".into())));
        assert_eq!(revision.get("_version"), Some(&Bson::Int32(3)));
        assert!(matches!(
            revision.get(internal_fields::CREATED_AT),
            Some(Bson::DateTime(_))
        ));
    }

    #[test]
    fn snapshot_requires_an_id() {
        assert!(snapshot(&doc! { "title": "x" }, RevisionAction::Delete).is_none());
    }
}
