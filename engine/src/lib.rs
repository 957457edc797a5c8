//! # Rollcall Engine
//!
//! Dual-store sync engine for the Rollcall roster and attendance ledger.
//!
//! Application state lives in memory and is mirrored to two stores:
//!
//! - a **local cache** on the device ([`cache::LocalCache`]), read
//!   synchronously and written best-effort on every mutation
//! - an optional shared **remote store** ([`remote::RemoteStore`]) that
//!   pushes live updates to every connected device
//!
//! ## Core Concepts
//!
//! ### Keys
//!
//! Each persisted value lives under a [`StoreKey`]. Keys are resolved and
//! persisted independently. The admin session flag is local-only and never
//! reaches the remote store, so logging in on one device never logs in the
//! others.
//!
//! ### Load resolution
//!
//! On startup each key consults both stores. A present remote value wins and
//! overwrites the local cache; an absent remote value is seeded from a
//! non-empty local one; otherwise the default is used. See
//! [`coordinator::KeySync::load`].
//!
//! ### Echo suppression
//!
//! The remote store notifies subscribers of every change, including our own.
//! Each key keeps a self-write marker, refined by the revision the store
//! acknowledges, so our own writes are never applied twice. See
//! [`coordinator::EchoGuard`].
//!
//! ### Concurrency
//!
//! Values are replaced whole. Two devices editing the same key concurrently
//! resolve by last write wins at the remote store.
//!
//! ## Quick Start
//!
//! ```rust
//! use rollcall_engine::cache::MemoryCache;
//! use rollcall_engine::remote::MemoryRemote;
//! use rollcall_engine::{ReactiveState, RosterEntry, SyncContext};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let remote = MemoryRemote::new();
//! let ctx = SyncContext::new(
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(remote.clone()),
//!     Duration::from_secs(5),
//! );
//!
//! let state = ReactiveState::open(ctx.clone()).await;
//! state.add_roster_entry(RosterEntry::new("Kim", "1")).unwrap();
//! assert_eq!(state.award_points("Kim", "1"), Some(1));
//!
//! state.flush().await;
//! assert!(remote.document(rollcall_engine::StoreKey::Roster).is_some());
//!
//! state.close();
//! ctx.shutdown();
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod credential;
pub mod error;
pub mod key;
pub mod migrate;
pub mod record;
pub mod remote;
pub mod snapshot;
pub mod state;
pub mod wire;

// Re-export main types at crate root
pub use config::{RemoteConfig, SyncConfig};
pub use context::SyncContext;
pub use credential::LoginOutcome;
pub use error::{Error, Result};
pub use key::StoreKey;
pub use record::{AttendanceRecord, AttendanceStatus, Document, RosterEntry};
pub use snapshot::{Snapshot, SNAPSHOT_FORMAT_VERSION};
pub use state::{AttendanceSummary, ImportSummary, ReactiveState, Scope, Stats};
