//! The Turnhall table engine.
//!
//! Everything that touches a table's authoritative state lives here:
//!
//! - [`TableRegistry`]: owns the live tables, membership, the per-user
//!   seat index, persistence, and crash recovery.
//! - [`ActionDispatcher`]: validate-then-commit of live actions.
//! - [`ReplayDispatcher`]: per-viewer cursors over committed history.
//! - [`HandlerTable`]: the closed mapping from [`ActionKind`] to rules.
//!
//! The engine is synchronous. Each table sits behind its own mutex and a
//! thread holds at most one at a time; nothing here awaits, so callers on
//! an async runtime should use `spawn_blocking` for operations that may
//! write snapshots.
//!
//! [`ActionKind`]: turnhall_protocol::ActionKind

mod config;
mod dispatch;
mod error;
mod game;
mod handlers;
mod registry;
mod replay;
mod table;

pub use config::{RegistryConfig, SeatConflictPolicy};
pub use dispatch::{ActionDispatcher, CommitResult};
pub use error::TableError;
pub use game::{Card, GameState};
pub use handlers::{Handler, HandlerTable, MAX_NOTE_CHARS, Rules};
pub use registry::{FlushReport, RecoveryReport, TableRegistry};
pub use replay::ReplayDispatcher;
pub use table::{Committed, Outbox, Seat, Table, TableGuard, TableHandle, WatcherId};
