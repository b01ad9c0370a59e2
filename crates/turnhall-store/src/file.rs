//! File-based [`TableStore`].

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use turnhall_protocol::TableId;

use crate::{StoreError, TableSnapshot, TableStore};

/// Stores each table as `{table_id}.json` in one directory.
///
/// Writes go to `{table_id}.json.tmp`, are flushed to disk, then renamed
/// over the real file, so a crash mid-write leaves the previous snapshot
/// intact. Stray `.tmp` files are ignored by [`list`](TableStore::list).
pub struct FileTableStore {
    base_dir: PathBuf,
}

impl FileTableStore {
    /// Opens (creating if needed) a store rooted at `base_dir`.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        tracing::info!(dir = %base_dir.display(), "file table store opened");
        Ok(Self { base_dir })
    }

    /// The directory snapshots live in.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn table_path(&self, table_id: TableId) -> PathBuf {
        self.base_dir.join(format!("{}.json", table_id.0))
    }
}

impl TableStore for FileTableStore {
    fn save(
        &self,
        table_id: TableId,
        snapshot: &TableSnapshot,
    ) -> Result<(), StoreError> {
        let path = self.table_path(table_id);
        let temp_path = path.with_extension("json.tmp");
        let bytes = snapshot.encode()?;

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, &path)?;

        tracing::debug!(
            %table_id,
            seq = snapshot.last_seq(),
            path = %path.display(),
            "saved table snapshot"
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<TableId>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if let Some(id) = path
                .file_name()
                .and_then(|s| s.to_str())
                .and_then(|name| name.strip_suffix(".json"))
                .and_then(|stem| stem.parse::<TableId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn load(&self, table_id: TableId) -> Result<TableSnapshot, StoreError> {
        let path = self.table_path(table_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(table_id));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        TableSnapshot::decode(table_id, &bytes)
    }

    fn delete(&self, table_id: TableId) -> Result<(), StoreError> {
        match fs::remove_file(self.table_path(table_id)) {
            Ok(()) => {
                tracing::debug!(%table_id, "deleted table snapshot");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}
