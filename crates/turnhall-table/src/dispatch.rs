//! Live action dispatch.

use std::sync::Arc;

use turnhall_protocol::{ActionBody, TableId, TableStatus, UserId};

use crate::table::now_ms;
use crate::{TableError, TableRegistry};

/// The outcome of a committed action, returned to whoever submitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub table_id: TableId,
    pub seq: u64,
    pub status: TableStatus,
    pub current_turn: Option<usize>,
}

/// Validates and commits actions against live tables.
///
/// A dispatch takes the table's lock, runs every check, appends the action
/// and applies it, queues the delta to observers, and releases the lock.
/// Persistence happens after release: ordinary commits are acknowledged
/// once they're in memory (a failed snapshot write is logged and retried
/// with the next commit), while a commit that ends the game is only
/// acknowledged after its snapshot is stored.
#[derive(Clone)]
pub struct ActionDispatcher {
    registry: Arc<TableRegistry>,
}

impl ActionDispatcher {
    pub fn new(registry: Arc<TableRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    /// Commits a player-submitted action.
    ///
    /// # Errors
    /// - `TableClosed` unless the table is ongoing.
    /// - `NotSeated` if `actor` has no seat.
    /// - `IllegalAction` for turn or rule violations, and for the
    ///   server-only kinds (`vacate`, `reclaim`).
    /// - `UnknownActionType` if the table's variant has no handler for
    ///   the kind.
    /// - `PersistenceUnavailable` if the action ended the game but the
    ///   final snapshot could not be stored. The action is still
    ///   committed.
    pub fn dispatch(
        &self,
        table_id: TableId,
        actor: UserId,
        body: ActionBody,
    ) -> Result<CommitResult, TableError> {
        let kind = body.kind();
        if kind.is_system() {
            return Err(TableError::IllegalAction(format!(
                "{kind} actions are issued by the server"
            )));
        }
        self.commit(table_id, actor, body)
    }

    /// Marks `user`'s seat vacant after their grace period ran out.
    pub fn vacate(&self, table_id: TableId, user: UserId) -> Result<CommitResult, TableError> {
        self.commit(table_id, user, ActionBody::Vacate)
    }

    /// Marks a vacated seat present again when its owner returns.
    pub fn reclaim(&self, table_id: TableId, user: UserId) -> Result<CommitResult, TableError> {
        self.commit(table_id, user, ActionBody::Reclaim)
    }

    fn commit(
        &self,
        table_id: TableId,
        actor: UserId,
        body: ActionBody,
    ) -> Result<CommitResult, TableError> {
        let handle = self.registry.get(table_id)?;
        let kind = body.kind();
        let committed = handle
            .lock()
            .and_then(|mut table| table.commit(actor, body, now_ms()))
            .inspect_err(|e| {
                tracing::debug!(%table_id, %actor, %kind, error = %e, "action rejected");
            })?;

        let seq = committed.action.seq;
        tracing::debug!(%table_id, %actor, %kind, seq, "action committed");

        if committed.status.is_terminal() {
            tracing::info!(%table_id, status = %committed.status, seq, "table ended");
            self.registry.release_all(table_id, &committed.seated);
            self.registry.persist(&handle, true)?;
            self.registry.reap_if_idle(table_id);
        } else if let Err(e) = self.registry.persist(&handle, false) {
            tracing::warn!(%table_id, seq, error = %e, "snapshot write failed; retrying on next commit");
        }

        Ok(CommitResult {
            table_id,
            seq,
            status: committed.status,
            current_turn: committed.current_turn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegistryConfig;
    use turnhall_protocol::TableOptions;
    use turnhall_store::{MemoryTableStore, TableStore};

    fn pid(id: u64) -> UserId {
        UserId(id)
    }

    fn setup(config: RegistryConfig) -> (ActionDispatcher, Arc<MemoryTableStore>, TableId) {
        let store = Arc::new(MemoryTableStore::new());
        let registry = Arc::new(TableRegistry::new(config, store.clone()));
        let options = TableOptions {
            seed: Some(42),
            ..TableOptions::default()
        };
        let id = registry.create(pid(1), options).unwrap();
        registry.join(id, pid(2)).unwrap();
        registry.set_ready(id, pid(1), true).unwrap();
        registry.set_ready(id, pid(2), true).unwrap();
        registry.start(id, pid(1)).unwrap();
        (ActionDispatcher::new(registry), store, id)
    }

    fn note(text: &str) -> ActionBody {
        ActionBody::Note { text: text.into() }
    }

    #[test]
    fn test_dispatch_assigns_consecutive_seqs() {
        let (dispatcher, _, id) = setup(RegistryConfig::default());
        let a = dispatcher.dispatch(id, pid(1), note("a")).unwrap();
        let b = dispatcher.dispatch(id, pid(2), note("b")).unwrap();
        assert_eq!((a.seq, b.seq), (1, 2));
        assert_eq!(b.status, TableStatus::Ongoing);
    }

    #[test]
    fn test_dispatch_refuses_system_kinds() {
        let (dispatcher, _, id) = setup(RegistryConfig::default());
        let err = dispatcher.dispatch(id, pid(1), ActionBody::Vacate).unwrap_err();
        assert!(matches!(err, TableError::IllegalAction(_)));
        assert_eq!(dispatcher.registry().view(id).unwrap().log_len, 0);
    }

    #[test]
    fn test_dispatch_unknown_table() {
        let (dispatcher, _, _) = setup(RegistryConfig::default());
        assert!(matches!(
            dispatcher.dispatch(TableId(404), pid(1), note("x")),
            Err(TableError::NotFound(_))
        ));
    }

    #[test]
    fn test_every_commit_is_persisted_by_default() {
        let (dispatcher, store, id) = setup(RegistryConfig::default());
        dispatcher.dispatch(id, pid(1), note("a")).unwrap();
        dispatcher.dispatch(id, pid(2), note("b")).unwrap();
        assert_eq!(store.load(id).unwrap().log.len(), 2);
    }

    #[test]
    fn test_batched_snapshots_bound_the_loss_window() {
        let (dispatcher, store, id) = setup(RegistryConfig::default().with_snapshot_every(3));
        for i in 0..4 {
            dispatcher.dispatch(id, pid(1), note(&i.to_string())).unwrap();
        }
        // Start wrote seq 0, the third commit wrote seq 3, the fourth waits.
        assert_eq!(store.load(id).unwrap().log.len(), 3);
    }

    #[test]
    fn test_failed_write_is_retried_on_next_commit() {
        let (dispatcher, store, id) = setup(RegistryConfig::default());
        store.set_fail_writes(true);
        dispatcher.dispatch(id, pid(1), note("a")).unwrap();
        store.set_fail_writes(false);
        dispatcher.dispatch(id, pid(1), note("b")).unwrap();
        assert_eq!(store.load(id).unwrap().log.len(), 2);
    }

    #[test]
    fn test_terminal_commit_requires_durable_write() {
        let (dispatcher, store, id) = setup(RegistryConfig::default());
        store.set_fail_writes(true);

        let err = dispatcher.dispatch(id, pid(2), ActionBody::Terminate).unwrap_err();

        assert!(matches!(err, TableError::PersistenceUnavailable(_)));
        // The commit itself stands.
        let view = dispatcher.registry().view(id).unwrap();
        assert_eq!(view.status, TableStatus::Aborted);
        assert_eq!(view.log_len, 1);
    }

    #[test]
    fn test_terminal_commit_frees_seats_and_reaps_unwatched_table() {
        let (dispatcher, store, id) = setup(RegistryConfig::default());
        let result = dispatcher.dispatch(id, pid(2), ActionBody::Terminate).unwrap();

        assert_eq!(result.status, TableStatus::Aborted);
        assert_eq!(result.current_turn, None);
        assert!(matches!(dispatcher.registry().get(id), Err(TableError::NotFound(_))));
        assert!(!store.contains(id));
        assert_eq!(dispatcher.registry().seated_table(pid(1)), None);
    }

    #[test]
    fn test_vacate_and_reclaim_go_through_the_log() {
        let (dispatcher, _, id) = setup(RegistryConfig::default());
        let v = dispatcher.vacate(id, pid(1)).unwrap();
        assert_eq!(v.current_turn, Some(1));
        let r = dispatcher.reclaim(id, pid(1)).unwrap();
        assert_eq!(r.seq, 2);
        let view = dispatcher.registry().view(id).unwrap();
        assert!(view.seats[0].present);
    }
}
