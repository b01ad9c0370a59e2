//! Session types.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use turnhall_protocol::{TableId, UserId};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Timing for disconnects and the sweeper that expires them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a disconnected user keeps their session (and their seat
    /// stays occupied) before the vacancy policy applies.
    pub reconnect_grace_secs: u64,

    /// How often the server checks for sessions past their grace period.
    pub sweep_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_grace_secs: 30,
            sweep_interval_ms: 1000,
        }
    }
}

impl SessionConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
///
/// ```text
///   Connected ──(disconnect)──→ Disconnected ──(grace elapsed)──→ Expired
///       ↑                            │
///       └───────(same user)──────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Bound to the live connection with this ID.
    Connected { connection: u64 },

    /// Lost its connection at `since`.
    Disconnected { since: Instant },

    /// Grace period elapsed; waiting to be cleaned up.
    Expired,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One user's presence on the server.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub state: SessionState,
    /// The table the user is playing at (seated, lobby or ongoing).
    pub play_table: Option<TableId>,
    /// Tables the user is spectating. Any number.
    pub spectating: BTreeSet<TableId>,
}

impl Session {
    pub(crate) fn new(user_id: UserId, connection: u64) -> Self {
        Self {
            user_id,
            state: SessionState::Connected { connection },
            play_table: None,
            spectating: BTreeSet::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected { .. })
    }

    /// The live connection's ID, if connected.
    pub fn connection(&self) -> Option<u64> {
        match self.state {
            SessionState::Connected { connection } => Some(connection),
            _ => None,
        }
    }

    /// Every table this session is bound to, play table first.
    pub fn tables(&self) -> Vec<TableId> {
        self.play_table
            .iter()
            .chain(self.spectating.iter())
            .copied()
            .collect()
    }
}
