//! Read-only navigation over committed history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use turnhall_protocol::{Action, ReplayFrame, TableId, TableOptions, TableStatus, UserId};

use crate::game::GameState;
use crate::handlers::Rules;
use crate::{TableError, TableRegistry};

/// Per-viewer cursors over tables' action logs.
///
/// A cursor at index `i` shows the state after the first `i` actions;
/// `0` is the initial deal. Moving a cursor copies the needed prefix of
/// the log under the table's lock and rebuilds the state after releasing
/// it, so replay never blocks live play for longer than a copy and never
/// writes to the log. Cursors are independent per `(table, viewer)`.
pub struct ReplayDispatcher {
    registry: Arc<TableRegistry>,
    cursors: Mutex<HashMap<(TableId, UserId), u64>>,
}

struct History {
    options: TableOptions,
    seats: Vec<UserId>,
    prefix: Vec<Action>,
    total: u64,
}

impl ReplayDispatcher {
    pub fn new(registry: Arc<TableRegistry>) -> Self {
        Self {
            registry,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// The viewer's cursor, if they have moved one on this table.
    pub fn cursor(&self, table_id: TableId, viewer: UserId) -> Option<u64> {
        self.lock_cursors().get(&(table_id, viewer)).copied()
    }

    /// Moves the viewer's cursor to `index`.
    ///
    /// # Errors
    /// `BoundaryError` if `index` is past the end of the log. The cursor
    /// is left where it was.
    pub fn seek(&self, table_id: TableId, viewer: UserId, index: u64) -> Result<ReplayFrame, TableError> {
        let requested = i64::try_from(index).unwrap_or(i64::MAX);
        self.move_to(table_id, viewer, |_, _| requested)
    }

    /// Moves the viewer's cursor by `delta` (usually ±1).
    ///
    /// A viewer without a cursor starts from the live end of the log.
    pub fn step(&self, table_id: TableId, viewer: UserId, delta: i64) -> Result<ReplayFrame, TableError> {
        self.move_to(table_id, viewer, |cursor, total| {
            let from = cursor.unwrap_or(total);
            i64::try_from(from).unwrap_or(i64::MAX).saturating_add(delta)
        })
    }

    /// Forgets every cursor `viewer` holds.
    pub fn forget_viewer(&self, viewer: UserId) {
        self.lock_cursors().retain(|(_, v), _| *v != viewer);
    }

    /// Forgets every cursor on a table the registry no longer holds.
    /// Returns how many were dropped.
    pub fn prune_removed(&self) -> usize {
        let mut tables: Vec<TableId> = self.lock_cursors().keys().map(|(t, _)| *t).collect();
        tables.sort();
        tables.dedup();
        // Checked without the cursor lock held; `move_to` takes table locks.
        tables.retain(|&t| self.registry.get(t).is_err());
        if tables.is_empty() {
            return 0;
        }
        let mut cursors = self.lock_cursors();
        let before = cursors.len();
        cursors.retain(|(t, _), _| !tables.contains(t));
        before - cursors.len()
    }

    fn move_to(
        &self,
        table_id: TableId,
        viewer: UserId,
        target: impl FnOnce(Option<u64>, u64) -> i64,
    ) -> Result<ReplayFrame, TableError> {
        let cursor = self.cursor(table_id, viewer);
        let history = self.history(table_id, |total| {
            let requested = target(cursor, total);
            u64::try_from(requested)
                .ok()
                .filter(|&i| i <= total)
                .ok_or(TableError::BoundaryError { requested, len: total })
        })?;

        let index = history.prefix.len() as u64;
        let rules = Rules {
            table_id,
            options: &history.options,
            seats: &history.seats,
        };
        let initial = GameState::deal(&history.options, history.seats.len());
        let state = rules.replay(initial, &history.prefix).map_err(|e| TableError::PersistenceCorrupt {
            table_id,
            reason: e.to_string(),
        })?;

        self.lock_cursors().insert((table_id, viewer), index);
        tracing::debug!(%table_id, %viewer, index, total = history.total, "replay cursor moved");

        Ok(ReplayFrame {
            table_id,
            index,
            total: history.total,
            action: history.prefix.last().cloned(),
            state: state.to_value(),
        })
    }

    /// Copies what a replay needs out of the table, resolving the target
    /// index against the log length seen under the lock.
    fn history(
        &self,
        table_id: TableId,
        resolve: impl FnOnce(u64) -> Result<u64, TableError>,
    ) -> Result<History, TableError> {
        let handle = self.registry.get(table_id)?;
        let table = handle.lock()?;
        if table.status() == TableStatus::Lobby {
            return Err(TableError::IllegalAction(format!("table {table_id} has not started")));
        }
        let total = table.log().len() as u64;
        let index = resolve(total)?;
        Ok(History {
            options: table.options().clone(),
            seats: table.seat_users(),
            prefix: table.log()[..index as usize].to_vec(),
            total,
        })
    }

    fn lock_cursors(&self) -> std::sync::MutexGuard<'_, HashMap<(TableId, UserId), u64>> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
