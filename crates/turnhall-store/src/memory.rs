//! In-memory [`TableStore`] for tests and throwaway servers.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use turnhall_protocol::TableId;

use crate::{StoreError, TableSnapshot, TableStore};

/// Keeps encoded snapshots in a map.
///
/// Snapshots are stored encoded, exactly as a disk backend would hold
/// them, so decode paths (and corruption) behave the same.
#[derive(Default)]
pub struct MemoryTableStore {
    entries: RwLock<BTreeMap<TableId, Vec<u8>>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores raw bytes under a key, bypassing encoding.
    pub fn insert_raw(&self, table_id: TableId, bytes: Vec<u8>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(table_id, bytes);
        }
    }

    /// Makes every subsequent `save` fail with
    /// [`StoreError::Unavailable`] until switched back off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// `true` if anything is stored under `table_id`.
    pub fn contains(&self, table_id: TableId) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(&table_id))
            .unwrap_or(false)
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".into())
}

impl TableStore for MemoryTableStore {
    fn save(
        &self,
        table_id: TableId,
        snapshot: &TableSnapshot,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        let bytes = snapshot.encode()?;
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .insert(table_id, bytes);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list(&self) -> Result<Vec<TableId>, StoreError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| poisoned())?
            .keys()
            .copied()
            .collect())
    }

    fn load(&self, table_id: TableId) -> Result<TableSnapshot, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let bytes = entries
            .get(&table_id)
            .ok_or(StoreError::NotFound(table_id))?;
        TableSnapshot::decode(table_id, bytes)
    }

    fn delete(&self, table_id: TableId) -> Result<(), StoreError> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .remove(&table_id);
        Ok(())
    }
}
