//! Registry configuration.

use serde::{Deserialize, Serialize};

/// What happens when someone who isn't seated tries to join a table
/// that has already started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SeatConflictPolicy {
    /// Let them in as a spectator.
    #[default]
    Spectate,
    /// Refuse with `AlreadyJoined`.
    Reject,
}

/// Configuration for a [`TableRegistry`](crate::TableRegistry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Commits between snapshot writes. At most `snapshot_every - 1`
    /// committed actions can be lost in a crash. Terminal commits are
    /// always written. `0` is treated as `1`.
    pub snapshot_every: usize,

    /// How strangers joining an ongoing table are handled.
    pub seat_conflict: SeatConflictPolicy,

    /// Upper bound on live tables.
    pub max_tables: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            snapshot_every: 1,
            seat_conflict: SeatConflictPolicy::Spectate,
            max_tables: 1024,
        }
    }
}

impl RegistryConfig {
    pub fn with_snapshot_every(mut self, every: usize) -> Self {
        self.snapshot_every = every;
        self
    }

    pub fn with_seat_conflict(mut self, policy: SeatConflictPolicy) -> Self {
        self.seat_conflict = policy;
        self
    }

    pub fn with_max_tables(mut self, max: usize) -> Self {
        self.max_tables = max;
        self
    }

    pub(crate) fn snapshot_interval(&self) -> u64 {
        self.snapshot_every.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_config_default() {
        let config = RegistryConfig::default();
        assert_eq!(config.snapshot_every, 1);
        assert_eq!(config.seat_conflict, SeatConflictPolicy::Spectate);
        assert_eq!(config.max_tables, 1024);
    }

    #[test]
    fn test_zero_snapshot_interval_means_every_commit() {
        let config = RegistryConfig::default().with_snapshot_every(0);
        assert_eq!(config.snapshot_interval(), 1);
    }
}
