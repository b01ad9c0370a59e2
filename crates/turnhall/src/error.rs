//! Unified error type for the Turnhall server.

use turnhall_protocol::ProtocolError;
use turnhall_session::SessionError;
use turnhall_store::StoreError;
use turnhall_table::TableError;
use turnhall_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `turnhall` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate.
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TurnhallError {
    /// A transport-level error (connection, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (auth, already connected).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A table engine error (full, illegal action, replay boundary, ...).
    #[error(transparent)]
    Table(#[from] TableError),

    /// The table store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A blocking engine call panicked or was cancelled.
    #[error("engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl TurnhallError {
    /// The numeric code sent to the client in an `Error` frame.
    pub fn code(&self) -> u16 {
        match self {
            Self::Transport(_) | Self::Task(_) => 500,
            Self::Protocol(_) => 400,
            Self::Session(e) => e.code(),
            Self::Table(e) => e.code(),
            Self::Store(e) if e.is_corrupt() => 500,
            Self::Store(_) => 503,
        }
    }
}
