//! Rollcall Server - shared document store for Rollcall clients.
//!
//! Each client keeps whole JSON documents (roster, attendance records, admin
//! credential) under `/documents/{collection}/{key}`. Writes replace the whole
//! document and bump its revision; every subscriber of that document, the
//! writer included, is told about the change over Server-Sent Events or
//! WebSocket.
//!
//! There is no merging: when two clients write the same document, the last
//! committed write wins and the other is lost. Deletes keep the row with a
//! null value so revisions never go backwards.

pub mod auth;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod websocket;

use crate::config::Config;
use crate::db::Pool;
use crate::websocket::SubscriptionHub;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
    pub hub: Arc<SubscriptionHub>,
}

impl AppState {
    pub fn new(pool: Pool, config: Config) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            hub: SubscriptionHub::new_shared(),
        }
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
