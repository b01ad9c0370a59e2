//! Table persistence for Turnhall.
//!
//! The engine survives restarts by writing a [`TableSnapshot`] of every
//! ongoing table through the [`TableStore`] trait and reading them back at
//! boot. Backends are interchangeable:
//!
//! - [`FileTableStore`]: one JSON file per table, atomic replace on write.
//! - [`MemoryTableStore`]: a map in memory, with hooks to simulate
//!   corrupt entries and failing writes in tests.
//!
//! Snapshots carry a [`FORMAT_VERSION`] marker; files written by older
//! builds are upgraded on load, files from newer builds are refused.

mod error;
mod file;
mod memory;
mod snapshot;

pub use error::StoreError;
pub use file::FileTableStore;
pub use memory::MemoryTableStore;
pub use snapshot::{FORMAT_VERSION, SeatRecord, TableSnapshot};

use turnhall_protocol::TableId;

/// Durable key-value storage for table snapshots, keyed by [`TableId`].
///
/// Implementations must make `save` atomic per key: a concurrent `load`
/// sees either the previous snapshot or the new one, never a mix.
pub trait TableStore: Send + Sync + 'static {
    /// Writes (or replaces) the snapshot stored under `table_id`.
    fn save(
        &self,
        table_id: TableId,
        snapshot: &TableSnapshot,
    ) -> Result<(), StoreError>;

    /// Lists every stored table, in ascending ID order.
    fn list(&self) -> Result<Vec<TableId>, StoreError>;

    /// Reads one snapshot.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] if nothing is stored under the key,
    /// [`StoreError::Corrupt`] if the stored bytes don't decode.
    fn load(&self, table_id: TableId) -> Result<TableSnapshot, StoreError>;

    /// Removes a snapshot. Deleting a missing key is not an error.
    fn delete(&self, table_id: TableId) -> Result<(), StoreError>;
}

impl<S: TableStore + ?Sized> TableStore for std::sync::Arc<S> {
    fn save(
        &self,
        table_id: TableId,
        snapshot: &TableSnapshot,
    ) -> Result<(), StoreError> {
        (**self).save(table_id, snapshot)
    }

    fn list(&self) -> Result<Vec<TableId>, StoreError> {
        (**self).list()
    }

    fn load(&self, table_id: TableId) -> Result<TableSnapshot, StoreError> {
        (**self).load(table_id)
    }

    fn delete(&self, table_id: TableId) -> Result<(), StoreError> {
        (**self).delete(table_id)
    }
}
