//! Live document updates.
//!
//! The hub tracks which connection follows which document. WebSocket
//! clients speak the JSON protocol in [`protocol`]; SSE streams register
//! with the hub the same way.

mod hub;
mod protocol;

pub use hub::{Change, ChangeSender, SubscriptionHub};
pub use protocol::*;
