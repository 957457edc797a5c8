//! Document endpoint routes.

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
    Json, Router,
};
use futures::Stream;
use rollcall_engine::wire::{AckBody, DocumentBody, WriteBody};
use std::convert::Infallible;

use crate::auth::AuthUser;
use crate::document::DocumentId;
use crate::error::Result;
use crate::handlers::{handle_delete, handle_events, handle_get, handle_list, handle_put};
use crate::AppState;

/// Create document routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/documents/{collection}", get(list_handler))
        .route(
            "/documents/{collection}/{key}",
            get(get_handler).put(put_handler).delete(delete_handler),
        )
        .route("/documents/{collection}/{key}/events", get(events_handler))
}

/// GET /documents/{collection} - List live documents.
async fn list_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(collection): Path<String>,
) -> Result<Json<Vec<DocumentBody>>> {
    // Validates the collection segment; the key is a placeholder.
    DocumentId::parse(&collection, "_")?;
    Ok(Json(handle_list(&state, &collection).await?))
}

/// GET /documents/{collection}/{key} - Read one document.
async fn get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((collection, key)): Path<(String, String)>,
) -> Result<Json<DocumentBody>> {
    let id = DocumentId::parse(&collection, &key)?;
    Ok(Json(handle_get(&state, &id).await?))
}

/// PUT /documents/{collection}/{key} - Replace one document.
async fn put_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((collection, key)): Path<(String, String)>,
    Json(body): Json<WriteBody>,
) -> Result<Json<AckBody>> {
    let id = DocumentId::parse(&collection, &key)?;
    Ok(Json(handle_put(&state, &id, body.value).await?))
}

/// DELETE /documents/{collection}/{key} - Delete one document.
async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((collection, key)): Path<(String, String)>,
) -> Result<Json<AckBody>> {
    let id = DocumentId::parse(&collection, &key)?;
    Ok(Json(handle_delete(&state, &id).await?))
}

/// GET /documents/{collection}/{key}/events - Follow one document.
async fn events_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((collection, key)): Path<(String, String)>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let id = DocumentId::parse(&collection, &key)?;
    handle_events(&state, id).await
}
