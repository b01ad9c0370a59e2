//! A single table and the lock that guards it.
//!
//! [`Table`] holds everything about one game session: membership, the
//! authoritative action log, and the live game state. It is only ever
//! reached through a [`TableHandle`], whose [`lock`](TableHandle::lock)
//! enforces the engine's one rule about locks: a thread holds at most one
//! table lock at a time. Debug builds assert it on every acquisition.
//!
//! Observers register an [`Outbox`] with [`Table::watch`]. Frames are
//! pushed into outboxes while the lock is held, which is what gives every
//! observer the table's commit order; the sockets themselves are written
//! later by each connection's own writer task.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use turnhall_protocol::{
    Action, ActionBody, Delta, JoinRole, SeatView, ServerFrame, TableId, TableOptions, TableStatus,
    TableSummary, TableView, UserId,
};
use turnhall_store::{FORMAT_VERSION, SeatRecord, TableSnapshot};

use crate::config::SeatConflictPolicy;
use crate::game::GameState;
use crate::handlers::Rules;
use crate::TableError;

/// Identifies one observer of a table (in practice, one connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(pub u64);

impl std::fmt::Display for WatcherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watcher-{}", self.0)
    }
}

/// Where a table pushes frames for one observer.
pub type Outbox = mpsc::UnboundedSender<ServerFrame>;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// A seated player.
#[derive(Debug, Clone)]
pub struct Seat {
    pub user_id: UserId,
    pub ready: bool,
    /// The observer currently representing this player, if connected.
    /// Losing it never unseats the player.
    pub connection: Option<WatcherId>,
}

/// What a successful commit produced.
#[derive(Debug, Clone)]
pub struct Committed {
    pub action: Action,
    pub status: TableStatus,
    pub current_turn: Option<usize>,
    /// Seated users, for index bookkeeping once the table ends.
    pub seated: Vec<UserId>,
}

/// What leaving a table requires of the registry afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Departure {
    pub release_seat: bool,
    pub remove_table: bool,
}

/// One game session.
#[derive(Debug)]
pub struct Table {
    id: TableId,
    owner: UserId,
    options: TableOptions,
    status: TableStatus,
    seats: Vec<Seat>,
    spectators: BTreeSet<UserId>,
    log: Vec<Action>,
    game: Option<GameState>,
    created_at: u64,
    watchers: BTreeMap<WatcherId, Outbox>,
    /// Set once the registry has dropped (or is about to drop) this table.
    /// A handle obtained earlier must not admit anyone afterwards.
    closed: bool,
}

impl Table {
    /// A fresh lobby with `owner` in seat 0.
    pub(crate) fn new(id: TableId, owner: UserId, options: TableOptions, created_at: u64) -> Self {
        Self {
            id,
            owner,
            options,
            status: TableStatus::Lobby,
            seats: vec![Seat {
                user_id: owner,
                ready: false,
                connection: None,
            }],
            spectators: BTreeSet::new(),
            log: Vec::new(),
            game: None,
            created_at,
            watchers: BTreeMap::new(),
            closed: false,
        }
    }

    /// Rebuilds an ongoing table from its snapshot by replaying the log
    /// over the initial deal.
    pub(crate) fn restore(snapshot: TableSnapshot) -> Result<Self, TableError> {
        let table_id = snapshot.table_id;
        let corrupt = |reason: String| TableError::PersistenceCorrupt { table_id, reason };

        if snapshot.status != TableStatus::Ongoing {
            return Err(corrupt(format!("cannot restore a {} table", snapshot.status)));
        }
        if snapshot.seats.is_empty() {
            return Err(corrupt("no seats".into()));
        }
        snapshot.options.validate().map_err(&corrupt)?;

        let users: Vec<UserId> = snapshot.seats.iter().map(|s| s.user_id).collect();
        let rules = Rules {
            table_id,
            options: &snapshot.options,
            seats: &users,
        };
        let initial = GameState::deal(&snapshot.options, users.len());
        let game = rules
            .replay(initial, &snapshot.log)
            .map_err(|e| corrupt(e.to_string()))?;
        if let Some(outcome) = game.outcome {
            return Err(corrupt(format!("log ends {outcome} but snapshot says Ongoing")));
        }
        if snapshot.current_turn != Some(game.turn) {
            return Err(corrupt(format!(
                "replayed turn {} disagrees with stored {:?}",
                game.turn, snapshot.current_turn
            )));
        }

        Ok(Self {
            id: table_id,
            owner: snapshot.owner,
            status: TableStatus::Ongoing,
            seats: snapshot
                .seats
                .into_iter()
                .map(|s| Seat {
                    user_id: s.user_id,
                    ready: s.ready,
                    connection: None,
                })
                .collect(),
            spectators: BTreeSet::new(),
            log: snapshot.log,
            game: Some(game),
            created_at: snapshot.created_at,
            options: snapshot.options,
            watchers: BTreeMap::new(),
            closed: false,
        })
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn status(&self) -> TableStatus {
        self.status
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    pub fn log(&self) -> &[Action] {
        &self.log
    }

    pub fn game(&self) -> Option<&GameState> {
        self.game.as_ref()
    }

    pub fn spectators(&self) -> &BTreeSet<UserId> {
        &self.spectators
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn seat_of(&self, user: UserId) -> Option<usize> {
        self.seats.iter().position(|s| s.user_id == user)
    }

    pub fn seat_users(&self) -> Vec<UserId> {
        self.seats.iter().map(|s| s.user_id).collect()
    }

    /// Whose turn it is. `None` unless the table is ongoing.
    pub fn current_turn(&self) -> Option<usize> {
        match self.status {
            TableStatus::Ongoing => self.game.as_ref().map(|g| g.turn),
            _ => None,
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Terminal with nobody left looking at it.
    pub fn is_idle(&self) -> bool {
        self.status.is_terminal() && self.spectators.is_empty() && self.watchers.is_empty()
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn view(&self) -> TableView {
        let present = |seat: usize| {
            self.game
                .as_ref()
                .and_then(|g| g.present.get(seat).copied())
                .unwrap_or(true)
        };
        TableView {
            table_id: self.id,
            name: self.options.name.clone(),
            status: self.status,
            owner: self.owner,
            options: self.options.clone(),
            seats: self
                .seats
                .iter()
                .enumerate()
                .map(|(i, s)| SeatView {
                    seat: i,
                    user_id: s.user_id,
                    ready: s.ready,
                    connected: s.connection.is_some(),
                    present: present(i),
                })
                .collect(),
            spectators: self.spectators.iter().copied().collect(),
            current_turn: self.current_turn(),
            log_len: self.log.len() as u64,
            state: self
                .game
                .as_ref()
                .map_or(serde_json::Value::Null, GameState::to_value),
        }
    }

    pub fn summary(&self) -> TableSummary {
        TableSummary {
            table_id: self.id,
            name: self.options.name.clone(),
            status: self.status,
            seated: self.seats.len(),
            max_players: self.options.max_players,
            spectators: self.spectators.len(),
        }
    }

    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            format_version: FORMAT_VERSION,
            table_id: self.id,
            status: self.status,
            owner: self.owner,
            options: self.options.clone(),
            seats: self
                .seats
                .iter()
                .map(|s| SeatRecord {
                    user_id: s.user_id,
                    ready: s.ready,
                })
                .collect(),
            log: self.log.clone(),
            current_turn: self.current_turn(),
            created_at: self.created_at,
        }
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    /// Registers an outbox and sends it a full snapshot first.
    ///
    /// If `user` holds a seat, the seat's connection is bound to `watcher`.
    pub(crate) fn watch(&mut self, watcher: WatcherId, user: UserId, outbox: Outbox) -> TableView {
        if let Some(seat) = self.seat_of(user) {
            self.seats[seat].connection = Some(watcher);
        }
        let view = self.view();
        if outbox.send(ServerFrame::Snapshot { table: view.clone() }).is_ok() {
            self.watchers.insert(watcher, outbox);
        }
        self.broadcast_view_except(watcher);
        view
    }

    /// Drops an outbox. A seat bound to it becomes disconnected.
    pub(crate) fn unwatch(&mut self, watcher: WatcherId) -> bool {
        let removed = self.watchers.remove(&watcher).is_some();
        let mut changed = false;
        for seat in &mut self.seats {
            if seat.connection == Some(watcher) {
                seat.connection = None;
                changed = true;
            }
        }
        if changed {
            self.broadcast_view();
        }
        removed
    }

    /// Pushes a frame to every outbox, forgetting closed ones.
    pub(crate) fn broadcast(&mut self, frame: &ServerFrame) {
        let table_id = self.id;
        self.watchers.retain(|watcher, outbox| {
            let open = outbox.send(frame.clone()).is_ok();
            if !open {
                tracing::debug!(%table_id, %watcher, "dropping closed outbox");
            }
            open
        });
    }

    fn broadcast_view(&mut self) {
        let frame = ServerFrame::Snapshot { table: self.view() };
        self.broadcast(&frame);
    }

    fn broadcast_view_except(&mut self, skip: WatcherId) {
        let frame = ServerFrame::Snapshot { table: self.view() };
        self.watchers
            .retain(|watcher, outbox| *watcher == skip || outbox.send(frame.clone()).is_ok());
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Seats `user` or admits them some other way, depending on status.
    ///
    /// `reservation` is the registry's answer to "may this user take a
    /// seat here": `Ok(_)` if so, `Err(other)` if they already sit at
    /// another unfinished table.
    pub(crate) fn admit(
        &mut self,
        user: UserId,
        reservation: Result<bool, TableId>,
        policy: SeatConflictPolicy,
    ) -> Result<JoinRole, TableError> {
        if self.closed {
            return Err(TableError::NotFound(self.id));
        }
        let role = match self.status {
            TableStatus::Lobby => {
                if self.seat_of(user).is_some() {
                    return Err(TableError::AlreadyJoined { user_id: user, table_id: self.id });
                }
                if let Err(other) = reservation {
                    return Err(TableError::AlreadyJoined { user_id: user, table_id: other });
                }
                if self.seats.len() >= self.options.max_players {
                    return Err(TableError::TableFull(self.id));
                }
                self.spectators.remove(&user);
                self.seats.push(Seat {
                    user_id: user,
                    ready: false,
                    connection: None,
                });
                JoinRole::Seated { seat: self.seats.len() - 1 }
            }
            TableStatus::Ongoing => match self.seat_of(user) {
                Some(seat) => JoinRole::Rebound { seat },
                None => match policy {
                    SeatConflictPolicy::Spectate => {
                        self.spectators.insert(user);
                        JoinRole::Spectator
                    }
                    SeatConflictPolicy::Reject => {
                        return Err(TableError::AlreadyJoined { user_id: user, table_id: self.id });
                    }
                },
            },
            TableStatus::Finished | TableStatus::Aborted => {
                return Err(TableError::TableClosed(self.id));
            }
        };
        self.broadcast_view();
        Ok(role)
    }

    pub(crate) fn add_spectator(&mut self, user: UserId) -> Result<(), TableError> {
        if self.closed {
            return Err(TableError::NotFound(self.id));
        }
        if self.seat_of(user).is_some() {
            return Err(TableError::AlreadyJoined { user_id: user, table_id: self.id });
        }
        if self.spectators.insert(user) {
            self.broadcast_view();
        }
        Ok(())
    }

    pub(crate) fn depart(&mut self, user: UserId) -> Result<Departure, TableError> {
        if self.spectators.remove(&user) {
            self.broadcast_view();
            return Ok(Departure {
                release_seat: false,
                remove_table: self.is_idle(),
            });
        }
        let seat = self.seat_of(user).ok_or(TableError::NotSeated {
            user_id: user,
            table_id: self.id,
        })?;
        let departure = match self.status {
            TableStatus::Lobby => {
                self.seats.remove(seat);
                if self.owner == user {
                    if let Some(next) = self.seats.first() {
                        self.owner = next.user_id;
                    }
                }
                Departure {
                    release_seat: true,
                    remove_table: self.seats.is_empty(),
                }
            }
            // The seat stays; only the live connection goes.
            TableStatus::Ongoing => {
                self.seats[seat].connection = None;
                Departure {
                    release_seat: false,
                    remove_table: false,
                }
            }
            TableStatus::Finished | TableStatus::Aborted => Departure {
                release_seat: true,
                remove_table: self.is_idle(),
            },
        };
        if departure.remove_table {
            self.closed = true;
        }
        self.broadcast_view();
        Ok(departure)
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn set_ready(&mut self, user: UserId, ready: bool) -> Result<(), TableError> {
        if self.status != TableStatus::Lobby {
            return Err(TableError::NotJoinable(self.id));
        }
        let seat = self.seat_of(user).ok_or(TableError::NotSeated {
            user_id: user,
            table_id: self.id,
        })?;
        self.seats[seat].ready = ready;
        self.broadcast_view();
        Ok(())
    }

    /// Deals the initial state and moves the table to `Ongoing`.
    pub(crate) fn start(&mut self, user: UserId) -> Result<TableView, TableError> {
        match self.status {
            TableStatus::Lobby => {}
            TableStatus::Ongoing => {
                return Err(TableError::IllegalAction(format!("table {} already started", self.id)));
            }
            TableStatus::Finished | TableStatus::Aborted => {
                return Err(TableError::TableClosed(self.id));
            }
        }
        if user != self.owner {
            return Err(TableError::NotOwner(self.id));
        }
        let not_ready = |reason: String| TableError::NotReady {
            table_id: self.id,
            reason,
        };
        if self.seats.len() < self.options.min_players {
            return Err(not_ready(format!(
                "{} of {} required players seated",
                self.seats.len(),
                self.options.min_players
            )));
        }
        if let Some(seat) = self.seats.iter().position(|s| !s.ready) {
            return Err(not_ready(format!("seat {seat} is not ready")));
        }

        debug_assert!(self.status.can_transition_to(TableStatus::Ongoing));
        self.game = Some(GameState::deal(&self.options, self.seats.len()));
        self.status = TableStatus::Ongoing;
        self.broadcast_view();
        Ok(self.view())
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Validates and commits one action, then queues its delta to every
    /// observer. Nothing changes unless every check passes.
    pub(crate) fn commit(
        &mut self,
        actor: UserId,
        body: ActionBody,
        now: u64,
    ) -> Result<Committed, TableError> {
        if self.status != TableStatus::Ongoing {
            return Err(TableError::TableClosed(self.id));
        }
        let users = self.seat_users();
        let Some(game) = self.game.as_mut() else {
            return Err(TableError::TableClosed(self.id));
        };
        let rules = Rules {
            table_id: self.id,
            options: &self.options,
            seats: &users,
        };
        let (seat, handler) = rules.validate(game, actor, &body)?;

        let action = Action {
            seq: self.log.len() as u64 + 1,
            actor,
            body,
            committed_at: now,
        };
        rules.apply(handler, game, seat, &action.body);
        if let Some(outcome) = game.outcome {
            debug_assert!(self.status.can_transition_to(outcome));
            self.status = outcome;
        }
        let state = game.to_value();
        self.log.push(action.clone());

        let current_turn = self.current_turn();
        self.broadcast(&ServerFrame::Delta {
            delta: Delta {
                table_id: self.id,
                action: action.clone(),
                status: self.status,
                current_turn,
                state,
            },
        });
        if self.status.is_terminal() {
            self.broadcast(&ServerFrame::TableClosed {
                table_id: self.id,
                status: self.status,
            });
        }

        Ok(Committed {
            action,
            status: self.status,
            current_turn,
            seated: users,
        })
    }
}

// ---------------------------------------------------------------------------
// TableHandle
// ---------------------------------------------------------------------------

thread_local! {
    static HELD_TABLE: Cell<Option<TableId>> = const { Cell::new(None) };
}

/// Shared ownership of one table plus its persistence bookkeeping.
#[derive(Debug)]
pub struct TableHandle {
    id: TableId,
    table: Mutex<Table>,
    /// Sequence number of the last snapshot that reached the store.
    /// Held for the whole of a write so snapshots land in order.
    pub(crate) saved: Mutex<u64>,
    pub(crate) removed: AtomicBool,
}

impl TableHandle {
    pub(crate) fn new(table: Table, saved_seq: u64) -> Self {
        Self {
            id: table.id,
            table: Mutex::new(table),
            saved: Mutex::new(saved_seq),
            removed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    /// Takes this table's exclusive lock.
    ///
    /// # Panics
    /// In debug builds, if this thread already holds a table lock.
    pub fn lock(&self) -> Result<TableGuard<'_>, TableError> {
        HELD_TABLE.with(|held| {
            debug_assert!(
                held.get().is_none(),
                "locking table {} while already holding table {:?}",
                self.id,
                held.get()
            );
        });
        let guard = self
            .table
            .lock()
            .map_err(|_| TableError::LockPoisoned(self.id))?;
        HELD_TABLE.with(|held| held.set(Some(self.id)));
        Ok(TableGuard { guard })
    }
}

/// Exclusive access to a [`Table`]; releases the lock when dropped.
pub struct TableGuard<'a> {
    guard: MutexGuard<'a, Table>,
}

impl Deref for TableGuard<'_> {
    type Target = Table;

    fn deref(&self) -> &Table {
        &self.guard
    }
}

impl DerefMut for TableGuard<'_> {
    fn deref_mut(&mut self) -> &mut Table {
        &mut self.guard
    }
}

impl Drop for TableGuard<'_> {
    fn drop(&mut self) {
        HELD_TABLE.with(|held| held.set(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(id: u64) -> UserId {
        UserId(id)
    }

    fn options() -> TableOptions {
        TableOptions {
            seed: Some(3),
            min_players: 2,
            max_players: 3,
            ..TableOptions::default()
        }
    }

    fn started(players: u64) -> Table {
        let mut table = Table::new(TableId(1), pid(1), options(), 0);
        for u in 2..=players {
            table.admit(pid(u), Ok(true), SeatConflictPolicy::Spectate).unwrap();
        }
        for u in 1..=players {
            table.set_ready(pid(u), true).unwrap();
        }
        table.start(pid(1)).unwrap();
        table
    }

    #[test]
    fn test_new_table_seats_owner() {
        let table = Table::new(TableId(1), pid(7), options(), 0);
        assert_eq!(table.status(), TableStatus::Lobby);
        assert_eq!(table.seat_users(), vec![pid(7)]);
        assert_eq!(table.owner(), pid(7));
        assert_eq!(table.current_turn(), None);
    }

    #[test]
    fn test_admit_full_lobby_is_rejected() {
        let mut table = Table::new(TableId(1), pid(1), options(), 0);
        table.admit(pid(2), Ok(true), SeatConflictPolicy::Spectate).unwrap();
        table.admit(pid(3), Ok(true), SeatConflictPolicy::Spectate).unwrap();

        let err = table.admit(pid(4), Ok(true), SeatConflictPolicy::Spectate).unwrap_err();
        assert!(matches!(err, TableError::TableFull(TableId(1))));
        assert_eq!(table.seats().len(), 3);
    }

    #[test]
    fn test_admit_twice_is_already_joined() {
        let mut table = Table::new(TableId(1), pid(1), options(), 0);
        let err = table.admit(pid(1), Ok(false), SeatConflictPolicy::Spectate).unwrap_err();
        assert!(matches!(err, TableError::AlreadyJoined { .. }));
    }

    #[test]
    fn test_admit_ongoing_rebinds_or_spectates() {
        let mut table = started(2);
        assert_eq!(
            table.admit(pid(2), Ok(false), SeatConflictPolicy::Reject).unwrap(),
            JoinRole::Rebound { seat: 1 }
        );
        assert_eq!(
            table.admit(pid(9), Ok(true), SeatConflictPolicy::Spectate).unwrap(),
            JoinRole::Spectator
        );
        assert!(table.spectators().contains(&pid(9)));
        assert!(matches!(
            table.admit(pid(8), Ok(true), SeatConflictPolicy::Reject),
            Err(TableError::AlreadyJoined { .. })
        ));
        assert_eq!(table.seats().len(), 2);
    }

    #[test]
    fn test_start_requires_owner_and_readiness() {
        let mut table = Table::new(TableId(1), pid(1), options(), 0);
        assert!(matches!(table.start(pid(1)), Err(TableError::NotReady { .. })));

        table.admit(pid(2), Ok(true), SeatConflictPolicy::Spectate).unwrap();
        table.set_ready(pid(1), true).unwrap();
        assert!(matches!(table.start(pid(1)), Err(TableError::NotReady { .. })));

        table.set_ready(pid(2), true).unwrap();
        assert!(matches!(table.start(pid(2)), Err(TableError::NotOwner(_))));

        let view = table.start(pid(1)).unwrap();
        assert_eq!(view.status, TableStatus::Ongoing);
        assert_eq!(view.current_turn, Some(0));
    }

    #[test]
    fn test_owner_leaving_lobby_passes_ownership() {
        let mut table = Table::new(TableId(1), pid(1), options(), 0);
        table.admit(pid(2), Ok(true), SeatConflictPolicy::Spectate).unwrap();

        let departure = table.depart(pid(1)).unwrap();

        assert!(departure.release_seat);
        assert!(!departure.remove_table);
        assert_eq!(table.owner(), pid(2));
    }

    #[test]
    fn test_leaving_ongoing_keeps_seat() {
        let mut table = started(2);
        let departure = table.depart(pid(2)).unwrap();
        assert!(!departure.release_seat);
        assert_eq!(table.seats().len(), 2);
    }

    #[test]
    fn test_commit_appends_and_broadcasts_in_order() {
        let mut table = started(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        table.watch(WatcherId(1), pid(9), tx);

        table.commit(pid(2), ActionBody::Note { text: "a".into() }, 1).unwrap();
        table.commit(pid(1), ActionBody::Note { text: "b".into() }, 2).unwrap();

        assert!(matches!(rx.try_recv().unwrap(), ServerFrame::Snapshot { .. }));
        for expected in 1..=2 {
            match rx.try_recv().unwrap() {
                ServerFrame::Delta { delta } => assert_eq!(delta.action.seq, expected),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(table.log().len(), 2);
    }

    #[test]
    fn test_commit_rejection_changes_nothing() {
        let mut table = started(2);
        let before = (table.log().len(), table.game().cloned(), table.current_turn());

        let err = table.commit(pid(2), ActionBody::Play { slot: 0 }, 1).unwrap_err();

        assert!(matches!(err, TableError::IllegalAction(_)));
        assert_eq!((table.log().len(), table.game().cloned(), table.current_turn()), before);
    }

    #[test]
    fn test_commit_on_lobby_is_closed() {
        let mut table = Table::new(TableId(1), pid(1), options(), 0);
        let err = table.commit(pid(1), ActionBody::Terminate, 0).unwrap_err();
        assert!(matches!(err, TableError::TableClosed(_)));
    }

    #[test]
    fn test_terminate_closes_table_for_watchers() {
        let mut table = started(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        table.watch(WatcherId(1), pid(1), tx);

        let committed = table.commit(pid(2), ActionBody::Terminate, 1).unwrap();

        assert_eq!(committed.status, TableStatus::Aborted);
        assert_eq!(committed.current_turn, None);
        let frames: Vec<ServerFrame> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(matches!(
            frames.last(),
            Some(ServerFrame::TableClosed { status: TableStatus::Aborted, .. })
        ));
        assert!(matches!(
            table.commit(pid(1), ActionBody::Terminate, 2),
            Err(TableError::TableClosed(_))
        ));
    }

    #[test]
    fn test_watch_binds_seat_connection_and_unwatch_clears_it() {
        let mut table = started(2);
        let (tx, _rx) = mpsc::unbounded_channel();

        table.watch(WatcherId(5), pid(2), tx);
        assert_eq!(table.seats()[1].connection, Some(WatcherId(5)));

        assert!(table.unwatch(WatcherId(5)));
        assert_eq!(table.seats()[1].connection, None);
        assert_eq!(table.seats().len(), 2);
    }

    #[test]
    fn test_restore_round_trips_snapshot() {
        let mut table = started(3);
        table.commit(pid(2), ActionBody::Vacate, 1).unwrap();
        table.commit(pid(3), ActionBody::Note { text: "n".into() }, 2).unwrap();
        table.commit(pid(2), ActionBody::Reclaim, 3).unwrap();
        let snapshot = table.snapshot();

        let restored = Table::restore(snapshot.clone()).unwrap();

        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.game(), table.game());
    }

    #[test]
    fn test_restore_rejects_turn_mismatch() {
        let table = started(2);
        let mut snapshot = table.snapshot();
        snapshot.current_turn = Some(1);
        assert!(matches!(
            Table::restore(snapshot),
            Err(TableError::PersistenceCorrupt { .. })
        ));
    }

    #[test]
    fn test_lock_guard_clears_held_marker() {
        let handle = TableHandle::new(Table::new(TableId(1), pid(1), options(), 0), 0);
        let other = TableHandle::new(Table::new(TableId(2), pid(2), options(), 0), 0);
        drop(handle.lock().unwrap());
        // Sequential locking of different tables is fine.
        drop(other.lock().unwrap());
        drop(handle.lock().unwrap());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already holding table")]
    fn test_nested_table_locks_panic_in_debug() {
        let a = TableHandle::new(Table::new(TableId(1), pid(1), options(), 0), 0);
        let b = TableHandle::new(Table::new(TableId(2), pid(2), options(), 0), 0);
        let _held = a.lock().unwrap();
        let _ = b.lock();
    }
}
