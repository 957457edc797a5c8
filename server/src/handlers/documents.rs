//! Document reads and whole-document writes.
//!
//! Shared by the HTTP routes and the WebSocket protocol. Every committed
//! write is published to the subscription hub.

use crate::db::{self, StoredDocument};
use crate::document::DocumentId;
use crate::error::{AppError, Result};
use crate::websocket::Change;
use crate::AppState;
use rollcall_engine::wire::{AckBody, DocumentBody};
use serde_json::Value;

/// Read a live document. Deleted documents read as `None`.
pub async fn read_document(state: &AppState, id: &DocumentId) -> Result<Option<StoredDocument>> {
    let stored = db::get_document(&state.pool, id).await?;
    Ok(stored.filter(|doc| doc.value.is_some()))
}

/// Revision of a document, 0 when it was never written.
pub async fn current_revision(state: &AppState, id: &DocumentId) -> Result<u64> {
    Ok(db::get_document(&state.pool, id)
        .await?
        .map(|doc| doc.wire_revision())
        .unwrap_or(0))
}

/// Replace a document, or delete it when `value` is missing or null.
///
/// Returns the new revision, or `None` when a delete found nothing to delete.
pub async fn write_document(
    state: &AppState,
    id: &DocumentId,
    value: Option<Value>,
) -> Result<Option<u64>> {
    let stored = match value.filter(|v| !v.is_null()) {
        Some(value) => Some(db::put_document(&state.pool, id, &value).await?),
        None => db::delete_document(&state.pool, id).await?,
    };

    let Some(doc) = stored else {
        return Ok(None);
    };
    let revision = doc.wire_revision();
    let recipients = state.hub.publish(Change {
        document: id.clone(),
        value: doc.value,
        revision,
    });

    tracing::info!(
        document = %id,
        revision,
        recipients,
        "Document written"
    );
    Ok(Some(revision))
}

/// GET body for a document.
pub async fn handle_get(state: &AppState, id: &DocumentId) -> Result<DocumentBody> {
    let doc = read_document(state, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {} does not exist", id)))?;
    Ok(to_body(doc))
}

/// PUT a document. A null value deletes it; the ack then carries the current
/// revision.
pub async fn handle_put(state: &AppState, id: &DocumentId, value: Value) -> Result<AckBody> {
    let revision = match write_document(state, id, Some(value)).await? {
        Some(revision) => revision,
        None => current_revision(state, id).await?,
    };
    Ok(AckBody { revision })
}

/// DELETE a document.
pub async fn handle_delete(state: &AppState, id: &DocumentId) -> Result<AckBody> {
    write_document(state, id, None)
        .await?
        .map(|revision| AckBody { revision })
        .ok_or_else(|| AppError::NotFound(format!("document {} does not exist", id)))
}

/// All live documents of a collection, ordered by key.
pub async fn handle_list(state: &AppState, collection: &str) -> Result<Vec<DocumentBody>> {
    let docs = db::list_documents(&state.pool, collection).await?;
    Ok(docs.into_iter().map(to_body).collect())
}

fn to_body(doc: StoredDocument) -> DocumentBody {
    let revision = doc.wire_revision();
    DocumentBody {
        key: doc.key,
        value: doc.value.unwrap_or(Value::Null),
        revision,
    }
}
