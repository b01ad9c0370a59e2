//! Error types raised by table stores.

use turnhall_protocol::TableId;

/// Errors surfaced by [`TableStore`](crate::TableStore) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no snapshot stored for table {0}")]
    NotFound(TableId),

    /// The stored bytes exist but cannot be turned into a snapshot.
    #[error("snapshot for table {table_id} is corrupt: {reason}")]
    Corrupt { table_id: TableId, reason: String },

    /// Written by a newer build than this one understands.
    #[error("snapshot for table {table_id} has format version {found}, newest supported is {supported}")]
    UnsupportedVersion {
        table_id: TableId,
        found: u32,
        supported: u32,
    },

    #[error("snapshot encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The backend refuses writes entirely (disk gone, store poisoned).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// `true` when the entry itself is unusable but the store is healthy.
    ///
    /// Recovery skips such entries and carries on with the rest.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. } | Self::UnsupportedVersion { .. })
    }
}
