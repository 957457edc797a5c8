//! Request handlers for document operations.

mod documents;
mod events;
mod websocket;

pub use documents::*;
pub use events::*;
pub use websocket::*;
