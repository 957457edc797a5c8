//! Server-Sent Events stream for one document.
//!
//! The first event is the current document (value `null` when it does not
//! exist); later events are changes with a higher revision. A reconnecting
//! client therefore always resynchronizes from the first event.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use rollcall_engine::wire::DocumentEvent;
use tokio::sync::mpsc;

use crate::db;
use crate::document::DocumentId;
use crate::error::{AppError, Result};
use crate::websocket::{Change, SubscriptionHub};
use crate::AppState;

/// Unregisters the stream from the hub when the client goes away.
struct Registration {
    hub: Arc<SubscriptionHub>,
    conn_id: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.unregister(&self.conn_id);
    }
}

/// Open an event stream for `id`.
pub async fn handle_events(
    state: &AppState,
    id: DocumentId,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    // Subscribe before reading so no change between the read and the first
    // event is lost.
    let (tx, rx) = mpsc::unbounded_channel::<Change>();
    let registration = Registration {
        hub: state.hub.clone(),
        conn_id: state.hub.register(tx),
    };
    state.hub.subscribe(&registration.conn_id, id.clone());

    let current = db::get_document(&state.pool, &id).await?;
    let initial_revision = current.as_ref().map(|doc| doc.wire_revision()).unwrap_or(0);
    let first = DocumentEvent {
        key: id.key.clone(),
        value: current.and_then(|doc| doc.value),
        revision: (initial_revision > 0).then_some(initial_revision),
    };
    let first = Event::default()
        .json_data(&first)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::debug!(
        document = %id,
        revision = initial_revision,
        "Event stream opened"
    );

    let changes = stream::unfold((rx, registration), move |(mut rx, registration)| async move {
        loop {
            let Some(change) = rx.recv().await else {
                return None;
            };
            if change.revision <= initial_revision {
                continue;
            }
            match change_event(&change) {
                Ok(event) => return Some((Ok(event), (rx, registration))),
                Err(e) => {
                    tracing::warn!(document = %change.document, error = %e, "Dropping unencodable change");
                }
            }
        }
    });

    let events = stream::once(async move { Ok(first) }).chain(changes);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn change_event(change: &Change) -> std::result::Result<Event, axum::Error> {
    Event::default().json_data(DocumentEvent {
        key: change.document.key.clone(),
        value: change.value.clone(),
        revision: Some(change.revision),
    })
}
