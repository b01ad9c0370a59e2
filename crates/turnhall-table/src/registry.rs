//! The table registry: owns every live table.
//!
//! The registry keeps two maps, each behind its own short-held lock:
//!
//! - `tables`: `TableId → Arc<TableHandle>`, touched only to insert,
//!   look up, or remove a handle. Gameplay never happens under it.
//! - `seated`: `UserId → TableId`, the "one unfinished seat per user"
//!   index. A join reserves the entry before it locks the table and gives
//!   it back if the join fails, so two concurrent joins by the same user
//!   can't both win.
//!
//! Neither map lock is ever held while a table lock is taken, and table
//! locks are taken one at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use turnhall_protocol::{JoinRole, ServerFrame, TableId, TableOptions, TableStatus, TableSummary, TableView, UserId};
use turnhall_store::TableStore;

use crate::table::{Outbox, Table, TableHandle, WatcherId, now_ms};
use crate::{RegistryConfig, TableError};

/// What [`TableRegistry::recover`] did with each stored table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tables back in the registry as `Ongoing`.
    pub restored: Vec<TableId>,
    /// Entries that could not be read or replayed. Left in the store.
    pub skipped: Vec<TableId>,
    /// Terminal (or never-started) entries deleted from the store.
    pub purged: Vec<TableId>,
}

/// What [`TableRegistry::flush`] managed to write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Tables whose snapshot was written.
    pub written: usize,
    /// Tables whose write failed. Their pending commits are not durable.
    pub failed: Vec<TableId>,
}

/// Owns the set of live tables.
pub struct TableRegistry {
    config: RegistryConfig,
    store: Arc<dyn TableStore>,
    tables: RwLock<HashMap<TableId, Arc<TableHandle>>>,
    seated: Mutex<HashMap<UserId, TableId>>,
    next_id: AtomicU64,
}

impl TableRegistry {
    /// Creates an empty registry writing through `store`.
    ///
    /// Call [`recover`](Self::recover) before serving to bring back
    /// tables from a previous run.
    pub fn new(config: RegistryConfig, store: Arc<dyn TableStore>) -> Self {
        Self {
            config,
            store,
            tables: RwLock::new(HashMap::new()),
            seated: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn get(&self, table_id: TableId) -> Result<Arc<TableHandle>, TableError> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&table_id)
            .cloned()
            .ok_or(TableError::NotFound(table_id))
    }

    pub fn len(&self) -> usize {
        self.tables.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The unfinished table `user` is seated at, if any.
    pub fn seated_table(&self, user: UserId) -> Option<TableId> {
        self.seated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .copied()
    }

    pub fn view(&self, table_id: TableId) -> Result<TableView, TableError> {
        Ok(self.get(table_id)?.lock()?.view())
    }

    /// Summaries of every table, in ID order.
    pub fn list(&self) -> Vec<TableSummary> {
        let mut handles: Vec<Arc<TableHandle>> = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        handles.sort_by_key(|h| h.id());
        handles
            .iter()
            .filter_map(|h| h.lock().ok().map(|t| t.summary()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Creates a lobby owned (and first seated) by `owner`.
    ///
    /// A missing seed is drawn here, so the deal is fixed from creation on.
    pub fn create(&self, owner: UserId, mut options: TableOptions) -> Result<TableId, TableError> {
        options.validate().map_err(TableError::InvalidOptions)?;
        if options.seed.is_none() {
            options.seed = Some(rand::random());
        }

        let table_id = TableId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.reserve(owner, table_id)
            .map_err(|other| TableError::AlreadyJoined { user_id: owner, table_id: other })?;

        let table = Table::new(table_id, owner, options, now_ms());
        {
            let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
            if tables.len() >= self.config.max_tables {
                drop(tables);
                self.release(owner, table_id);
                return Err(TableError::TooManyTables(self.config.max_tables));
            }
            tables.insert(table_id, Arc::new(TableHandle::new(table, 0)));
        }
        tracing::info!(%table_id, %owner, "table created");
        Ok(table_id)
    }

    /// Adds `user` to a table.
    ///
    /// # Errors
    /// - `NotFound` if the table doesn't exist.
    /// - `TableFull` if a lobby has no free seat.
    /// - `AlreadyJoined` if the user is already seated (here, in a lobby,
    ///   or at another unfinished table), or if the table has started and
    ///   the seat-conflict policy is `Reject`.
    /// - `TableClosed` if the table has ended.
    pub fn join(&self, table_id: TableId, user: UserId) -> Result<JoinRole, TableError> {
        self.join_handle(self.get(table_id)?, user)
    }

    /// The part of [`join`](Self::join) after lookup. The table may be
    /// removed in between; `admit` sees that under the lock and refuses.
    fn join_handle(&self, handle: Arc<TableHandle>, user: UserId) -> Result<JoinRole, TableError> {
        let table_id = handle.id();
        let reservation = self.reserve(user, table_id);
        let result = handle
            .lock()
            .and_then(|mut table| table.admit(user, reservation, self.config.seat_conflict));

        let keep = matches!(result, Ok(JoinRole::Seated { .. } | JoinRole::Rebound { .. }));
        if reservation == Ok(true) && !keep {
            self.release(user, table_id);
        }
        match &result {
            Ok(role) => tracing::info!(%table_id, %user, ?role, "joined table"),
            Err(e) => tracing::debug!(%table_id, %user, error = %e, "join rejected"),
        }
        result
    }

    /// Adds `user` as a spectator.
    pub fn spectate(&self, table_id: TableId, user: UserId) -> Result<(), TableError> {
        self.get(table_id)?.lock()?.add_spectator(user)
    }

    /// Removes `user` from a table.
    ///
    /// In a lobby the seat is freed (ownership passes to the next seat,
    /// and an emptied lobby is destroyed). At an ongoing table the player
    /// keeps the seat; only their live connection is dropped. Spectators
    /// are simply removed.
    pub fn leave(&self, table_id: TableId, user: UserId) -> Result<(), TableError> {
        let handle = self.get(table_id)?;
        let departure = handle.lock()?.depart(user)?;
        if departure.release_seat {
            self.release(user, table_id);
        }
        if departure.remove_table {
            self.remove(table_id);
        }
        tracing::info!(%table_id, %user, "left table");
        Ok(())
    }

    pub fn set_ready(&self, table_id: TableId, user: UserId, ready: bool) -> Result<(), TableError> {
        self.get(table_id)?.lock()?.set_ready(user, ready)
    }

    /// Starts a lobby. Only the owner may, with at least `min_players`
    /// seated and every seat ready.
    pub fn start(&self, table_id: TableId, user: UserId) -> Result<TableView, TableError> {
        let handle = self.get(table_id)?;
        let view = handle.lock()?.start(user)?;
        tracing::info!(%table_id, players = view.seats.len(), "table started");
        if let Err(e) = self.persist(&handle, true) {
            tracing::warn!(%table_id, error = %e, "initial snapshot write failed");
        }
        Ok(view)
    }

    /// Removes a finished table with no spectators, along with its
    /// persisted entry.
    pub fn destroy(&self, table_id: TableId) -> Result<(), TableError> {
        let handle = self.get(table_id)?;
        {
            let table = handle.lock()?;
            if !table.status().is_terminal() {
                return Err(TableError::IllegalAction(format!(
                    "table {table_id} is {}; only finished tables can be destroyed",
                    table.status()
                )));
            }
            if !table.spectators().is_empty() {
                return Err(TableError::IllegalAction(format!(
                    "table {table_id} still has spectators"
                )));
            }
        }
        self.remove(table_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    /// Registers `outbox` as an observer and queues a full snapshot to it.
    ///
    /// Only members (seated or spectating) may watch.
    pub fn watch(
        &self,
        table_id: TableId,
        user: UserId,
        watcher: WatcherId,
        outbox: Outbox,
    ) -> Result<TableView, TableError> {
        let handle = self.get(table_id)?;
        let mut table = handle.lock()?;
        if table.seat_of(user).is_none() && !table.spectators().contains(&user) {
            return Err(TableError::NotSeated { user_id: user, table_id });
        }
        Ok(table.watch(watcher, user, outbox))
    }

    /// Drops an observer. An ended table nobody watches any more is
    /// removed.
    pub fn unwatch(&self, table_id: TableId, watcher: WatcherId) {
        let Ok(handle) = self.get(table_id) else {
            return;
        };
        let idle = match handle.lock() {
            Ok(mut table) => {
                table.unwatch(watcher);
                table.is_idle()
            }
            Err(_) => false,
        };
        if idle {
            self.remove(table_id);
        }
    }

    /// Removes an ended table if nobody is watching or spectating.
    pub(crate) fn reap_if_idle(&self, table_id: TableId) {
        let idle = self
            .get(table_id)
            .and_then(|h| h.lock().map(|t| t.is_idle()))
            .unwrap_or(false);
        if idle {
            self.remove(table_id);
        }
    }

    // -----------------------------------------------------------------------
    // Seat index
    // -----------------------------------------------------------------------

    /// Claims `user`'s seat-index entry for `table_id`.
    ///
    /// `Ok(true)` if newly claimed, `Ok(false)` if it already pointed
    /// here, `Err(other)` if it points at another table.
    fn reserve(&self, user: UserId, table_id: TableId) -> Result<bool, TableId> {
        let mut seated = self.seated.lock().unwrap_or_else(PoisonError::into_inner);
        match seated.get(&user) {
            Some(&current) if current == table_id => Ok(false),
            Some(&other) => Err(other),
            None => {
                seated.insert(user, table_id);
                Ok(true)
            }
        }
    }

    fn release(&self, user: UserId, table_id: TableId) {
        let mut seated = self.seated.lock().unwrap_or_else(PoisonError::into_inner);
        if seated.get(&user) == Some(&table_id) {
            seated.remove(&user);
        }
    }

    /// Frees every listed user's entry that points at `table_id`.
    pub(crate) fn release_all(&self, table_id: TableId, users: &[UserId]) {
        for &user in users {
            self.release(user, table_id);
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Writes a snapshot of `handle` if enough commits are pending, or
    /// unconditionally when `force` is set.
    ///
    /// Writes for one table are serialized and never go backwards: a
    /// snapshot older than the last one stored is not written. Lobby
    /// tables and removed tables are never written.
    pub(crate) fn persist(&self, handle: &TableHandle, force: bool) -> Result<bool, TableError> {
        let mut saved = handle.saved.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.removed.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let snapshot = {
            let table = handle.lock()?;
            if table.status() == TableStatus::Lobby {
                return Ok(false);
            }
            let pending = (table.log().len() as u64).saturating_sub(*saved);
            if !force && pending < self.config.snapshot_interval() {
                return Ok(false);
            }
            table.snapshot()
        };
        self.store
            .save(handle.id(), &snapshot)
            .map_err(TableError::PersistenceUnavailable)?;
        *saved = snapshot.last_seq();
        tracing::debug!(table_id = %handle.id(), seq = *saved, "snapshot written");
        Ok(true)
    }

    /// Forces a snapshot of every ongoing table. Used at shutdown.
    ///
    /// A table whose write fails is logged and reported; the rest are
    /// still written.
    pub fn flush(&self) -> FlushReport {
        let mut handles: Vec<Arc<TableHandle>> = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        handles.sort_by_key(|h| h.id());

        let mut report = FlushReport::default();
        for handle in handles {
            match self.persist(&handle, true) {
                Ok(true) => report.written += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(table_id = %handle.id(), error = %e, "flush failed for table");
                    report.failed.push(handle.id());
                }
            }
        }
        report
    }

    /// Takes a table out of the registry, tells its observers, frees its
    /// seat-index entries, and deletes its persisted entry.
    fn remove(&self, table_id: TableId) {
        let Some(handle) = self
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&table_id)
        else {
            return;
        };

        let (users, status) = match handle.lock() {
            Ok(mut table) => {
                table.close();
                let status = table.status();
                table.broadcast(&ServerFrame::TableClosed { table_id, status });
                (table.seat_users(), status)
            }
            Err(_) => (Vec::new(), TableStatus::Aborted),
        };
        self.release_all(table_id, &users);

        let _saved = handle.saved.lock().unwrap_or_else(PoisonError::into_inner);
        handle.removed.store(true, Ordering::SeqCst);
        if let Err(e) = self.store.delete(table_id) {
            tracing::warn!(%table_id, error = %e, "failed to delete persisted table");
        }
        tracing::info!(%table_id, %status, "table destroyed");
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Reloads every stored table.
    ///
    /// Ongoing snapshots that replay cleanly are restored with every seat
    /// disconnected. Terminal snapshots are deleted. Anything unreadable is
    /// logged and skipped without affecting the rest.
    ///
    /// # Errors
    /// `PersistenceUnavailable` only if the store can't even be listed.
    pub fn recover(&self) -> Result<RecoveryReport, TableError> {
        let ids = self.store.list().map_err(TableError::PersistenceUnavailable)?;
        let mut report = RecoveryReport::default();

        // Never hand out an ID that is still on disk, whatever becomes of it.
        if let Some(max) = ids.iter().max() {
            self.next_id.fetch_max(max.0 + 1, Ordering::Relaxed);
        }

        for table_id in ids {
            let snapshot = match self.store.load(table_id) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(%table_id, error = %e, "skipping unreadable table snapshot");
                    report.skipped.push(table_id);
                    continue;
                }
            };

            if snapshot.status != TableStatus::Ongoing {
                if let Err(e) = self.store.delete(table_id) {
                    tracing::warn!(%table_id, error = %e, "failed to purge finished table");
                }
                tracing::info!(%table_id, status = %snapshot.status, "purged stored table");
                report.purged.push(table_id);
                continue;
            }

            let saved_seq = snapshot.last_seq();
            let table = match Table::restore(snapshot) {
                Ok(table) => table,
                Err(e) => {
                    tracing::warn!(%table_id, error = %e, "skipping corrupt table snapshot");
                    report.skipped.push(table_id);
                    continue;
                }
            };

            for user in table.seat_users() {
                if let Err(other) = self.reserve(user, table_id) {
                    tracing::warn!(%table_id, %user, %other, "user seated at two recovered tables");
                }
            }
            self.tables
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(table_id, Arc::new(TableHandle::new(table, saved_seq)));
            tracing::info!(%table_id, actions = saved_seq, "table recovered");
            report.restored.push(table_id);
        }

        Ok(report)
    }
}
