//! The serialized form of a table.

use serde::{Deserialize, Serialize};
use turnhall_protocol::{Action, TableId, TableOptions, TableStatus, UserId};

use crate::StoreError;

/// Current snapshot layout version.
///
/// History:
/// - `0`: no `format_version` field, no `created_at`.
/// - `1`: adds both.
pub const FORMAT_VERSION: u32 = 1;

/// One seated player as persisted.
///
/// Connection state is deliberately absent: after a restart nobody is
/// connected, whatever the snapshot was taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatRecord {
    pub user_id: UserId,
    pub ready: bool,
}

/// Everything needed to rebuild a table after a restart.
///
/// Game state is not stored: it is re-derived by replaying `log` from the
/// initial deal, which `options.seed` and `seats` fully determine.
/// `current_turn` is stored anyway so recovery can check the replay
/// landed where the live table was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    #[serde(default)]
    pub format_version: u32,
    pub table_id: TableId,
    pub status: TableStatus,
    pub owner: UserId,
    /// Options with the seed resolved, so the deal is reproducible.
    pub options: TableOptions,
    /// Seat order is significant.
    pub seats: Vec<SeatRecord>,
    pub log: Vec<Action>,
    pub current_turn: Option<usize>,
    /// Creation time, milliseconds since the Unix epoch.
    #[serde(default)]
    pub created_at: u64,
}

impl TableSnapshot {
    /// Sequence number of the last committed action (0 for an empty log).
    pub fn last_seq(&self) -> u64 {
        self.log.last().map_or(0, |a| a.seq)
    }

    /// Encodes the snapshot at the current format version.
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let mut stamped = self.clone();
        stamped.format_version = FORMAT_VERSION;
        serde_json::to_vec_pretty(&stamped).map_err(StoreError::Encode)
    }

    /// Decodes bytes stored under `table_id`, upgrading older layouts.
    ///
    /// # Errors
    /// [`StoreError::Corrupt`] for anything that doesn't parse or whose
    /// log is out of order; [`StoreError::UnsupportedVersion`] for layouts
    /// newer than [`FORMAT_VERSION`].
    pub fn decode(table_id: TableId, bytes: &[u8]) -> Result<Self, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt { table_id, reason };

        let raw: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
        let found = raw
            .get("format_version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        let found = u32::try_from(found).unwrap_or(u32::MAX);
        if found > FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                table_id,
                found,
                supported: FORMAT_VERSION,
            });
        }

        let mut snapshot: TableSnapshot =
            serde_json::from_value(raw).map_err(|e| corrupt(e.to_string()))?;
        if found < FORMAT_VERSION {
            tracing::debug!(%table_id, from = found, "upgrading snapshot layout");
            snapshot.format_version = FORMAT_VERSION;
        }

        if snapshot.table_id != table_id {
            return Err(corrupt(format!(
                "stored under {table_id} but describes {}",
                snapshot.table_id
            )));
        }
        for (i, action) in snapshot.log.iter().enumerate() {
            if action.seq != i as u64 + 1 {
                return Err(corrupt(format!(
                    "log entry {i} has seq {}, expected {}",
                    action.seq,
                    i + 1
                )));
            }
        }
        if let Some(turn) = snapshot.current_turn {
            if turn >= snapshot.seats.len() {
                return Err(corrupt(format!(
                    "turn index {turn} out of range for {} seats",
                    snapshot.seats.len()
                )));
            }
        }
        Ok(snapshot)
    }
}
