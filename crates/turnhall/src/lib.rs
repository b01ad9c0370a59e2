//! # Turnhall
//!
//! Authoritative server for turn-based, multi-seat card tables.
//!
//! Turnhall keeps one ordered, append-only action log per table. Every
//! client action is validated and committed under that table's lock,
//! fanned out to observers in commit order, and snapshotted to a store so
//! ongoing tables survive a restart. Finished tables can be stepped
//! through action by action.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use turnhall::prelude::*;
//!
//! # async fn run() -> Result<(), TurnhallError> {
//! let server = TurnhallServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(DevAuthenticator)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod server;

pub use error::TurnhallError;
pub use handler::SessionBridge;
pub use server::{PROTOCOL_VERSION, TurnhallServer, TurnhallServerBuilder};

/// Re-exports of the types most servers and tests need.
pub mod prelude {
    pub use crate::{
        PROTOCOL_VERSION, SessionBridge, TurnhallError, TurnhallServer, TurnhallServerBuilder,
    };
    pub use turnhall_protocol::{
        Action, ActionBody, ActionKind, ClientFrame, Codec, Delta, Envelope, Hint, JoinRole,
        JsonCodec, ReplayFrame, ServerFrame, TableId, TableOptions, TableStatus, TableSummary,
        TableView, UserId,
    };
    pub use turnhall_session::{Authenticator, DevAuthenticator, SessionConfig, SessionError};
    pub use turnhall_store::{FileTableStore, MemoryTableStore, TableStore};
    pub use turnhall_table::{RegistryConfig, SeatConflictPolicy, TableError, TableRegistry};
    pub use turnhall_transport::{Connection, MemoryConnection, memory_pair};
}
