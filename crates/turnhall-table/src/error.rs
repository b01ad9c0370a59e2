//! Error types for the table engine.

use turnhall_protocol::{ActionKind, TableId, UserId};
use turnhall_store::StoreError;

/// Errors returned by the registry and the two dispatchers.
///
/// Every variant is local to one request: none of them leaves a table
/// partially mutated, and none affects any other table.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// The table does not exist (or was already destroyed).
    #[error("table {0} not found")]
    NotFound(TableId),

    /// Every seat is taken.
    #[error("table {0} is full")]
    TableFull(TableId),

    /// The user already holds a seat here, or holds one at another
    /// unfinished table.
    #[error("user {user_id} already joined table {table_id}")]
    AlreadyJoined { user_id: UserId, table_id: TableId },

    /// Out of turn, or the payload breaks the variant's rules.
    /// Table state is unchanged.
    #[error("illegal action: {0}")]
    IllegalAction(String),

    /// No handler is registered for this kind at this table.
    #[error("unknown action type: {0}")]
    UnknownActionType(ActionKind),

    /// Replay navigation outside `0..=len`.
    #[error("replay index {requested} out of range 0..={len}")]
    BoundaryError { requested: i64, len: u64 },

    /// Mutation attempted on a table that is not ongoing.
    #[error("table {0} is closed")]
    TableClosed(TableId),

    /// A stored snapshot could not be turned back into a table.
    #[error("persisted table {table_id} is corrupt: {reason}")]
    PersistenceCorrupt { table_id: TableId, reason: String },

    /// A write that must be durable did not reach the store.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[source] StoreError),

    /// The table is no longer accepting this kind of membership change.
    #[error("table {0} is not accepting players")]
    NotJoinable(TableId),

    #[error("user {user_id} is not seated at table {table_id}")]
    NotSeated { user_id: UserId, table_id: TableId },

    #[error("only the owner of table {0} can do that")]
    NotOwner(TableId),

    /// Start conditions (seat count, readiness) are not met.
    #[error("table {table_id} cannot start: {reason}")]
    NotReady { table_id: TableId, reason: String },

    /// Rejected table options.
    #[error("invalid table options: {0}")]
    InvalidOptions(String),

    /// The registry is at its configured table limit.
    #[error("table limit of {0} reached")]
    TooManyTables(usize),

    /// A thread panicked while holding this table's lock.
    #[error("table {0} lock poisoned")]
    LockPoisoned(TableId),
}

impl TableError {
    /// The numeric code reported to clients.
    pub fn code(&self) -> u16 {
        match self {
            Self::IllegalAction(_)
            | Self::UnknownActionType(_)
            | Self::InvalidOptions(_) => 400,
            Self::NotSeated { .. } | Self::NotOwner(_) => 403,
            Self::NotFound(_) => 404,
            Self::TableFull(_)
            | Self::AlreadyJoined { .. }
            | Self::TableClosed(_)
            | Self::NotJoinable(_)
            | Self::NotReady { .. } => 409,
            Self::BoundaryError { .. } => 416,
            Self::PersistenceUnavailable(_) | Self::TooManyTables(_) => 503,
            Self::PersistenceCorrupt { .. } | Self::LockPoisoned(_) => 500,
        }
    }
}

impl From<StoreError> for TableError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt { table_id, reason } => TableError::PersistenceCorrupt { table_id, reason },
            other => TableError::PersistenceUnavailable(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_by_category() {
        assert_eq!(TableError::NotFound(TableId(1)).code(), 404);
        assert_eq!(TableError::IllegalAction("x".into()).code(), 400);
        assert_eq!(
            TableError::UnknownActionType(ActionKind::Clue).code(),
            400
        );
        assert_eq!(TableError::TableClosed(TableId(1)).code(), 409);
        assert_eq!(
            TableError::BoundaryError { requested: -1, len: 3 }.code(),
            416
        );
        assert_eq!(
            TableError::PersistenceUnavailable(StoreError::Unavailable(
                "down".into()
            ))
            .code(),
            503
        );
    }

    #[test]
    fn test_unknown_action_type_names_the_kind() {
        let err = TableError::UnknownActionType(ActionKind::Clue);
        assert_eq!(err.to_string(), "unknown action type: clue");
    }
}
