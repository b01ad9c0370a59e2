//! Table-level wire types: status, options, and the views sent to
//! observers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Action, TableId, UserId};

// ---------------------------------------------------------------------------
// TableStatus
// ---------------------------------------------------------------------------

/// The lifecycle state of a table.
///
/// Transitions are monotonic:
///
/// ```text
/// Lobby → Ongoing → Finished
///               └─→ Aborted
/// ```
///
/// No table ever re-enters `Lobby`, and terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableStatus {
    Lobby,
    Ongoing,
    Finished,
    Aborted,
}

impl TableStatus {
    /// `true` for `Finished` and `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }

    /// Returns `true` if moving to `target` respects the lifecycle order.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Lobby, Self::Ongoing)
                | (Self::Ongoing, Self::Finished)
                | (Self::Ongoing, Self::Aborted)
        )
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lobby => "Lobby",
            Self::Ongoing => "Ongoing",
            Self::Finished => "Finished",
            Self::Aborted => "Aborted",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// TableOptions
// ---------------------------------------------------------------------------

/// Variant and seating parameters chosen when a table is created.
///
/// Every field has a default, so a client may send `{}` or only the
/// fields it cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    /// Display name in table listings.
    pub name: String,
    /// Seats that must be filled (and ready) before the owner can start.
    pub min_players: usize,
    /// Seat capacity.
    pub max_players: usize,
    /// Number of suits in the deck.
    pub suits: u8,
    /// Highest rank per suit; each suit holds ranks `1..=max_rank`.
    pub max_rank: u8,
    /// Cards per hand. `None` picks 5 for up to three seats, 4 otherwise.
    pub hand_size: Option<usize>,
    /// Clue token cap (and starting amount).
    pub max_clues: u8,
    /// Strikes that end the game.
    pub max_strikes: u8,
    /// Deck shuffle seed. `None` lets the server draw one at creation.
    pub seed: Option<u64>,
    /// Whether the `clue` action kind is available at this table.
    pub allow_clues: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            name: "table".to_string(),
            min_players: 2,
            max_players: 5,
            suits: 5,
            max_rank: 5,
            hand_size: None,
            max_clues: 8,
            max_strikes: 3,
            seed: None,
            allow_clues: true,
        }
    }
}

impl TableOptions {
    /// Checks the options for internal consistency.
    ///
    /// # Errors
    /// Returns a human-readable reason for the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_players == 0 {
            return Err("min_players must be at least 1".into());
        }
        if self.min_players > self.max_players {
            return Err(format!(
                "min_players ({}) exceeds max_players ({})",
                self.min_players, self.max_players
            ));
        }
        if self.max_players > 8 {
            return Err("max_players must be at most 8".into());
        }
        if self.suits == 0 || self.suits > 8 {
            return Err("suits must be between 1 and 8".into());
        }
        if self.max_rank == 0 || self.max_rank > 9 {
            return Err("max_rank must be between 1 and 9".into());
        }
        if self.max_strikes == 0 {
            return Err("max_strikes must be at least 1".into());
        }
        if self.hand_size == Some(0) {
            return Err("hand_size must be at least 1".into());
        }
        let deck = usize::from(self.suits) * usize::from(self.max_rank);
        let hand = self.hand_size_for(self.max_players);
        if hand * self.max_players > deck {
            return Err(format!(
                "a deck of {deck} cards cannot deal {hand} cards to {} seats",
                self.max_players
            ));
        }
        Ok(())
    }

    /// The hand size used for `players` seated players.
    pub fn hand_size_for(&self, players: usize) -> usize {
        self.hand_size
            .unwrap_or(if players <= 3 { 5 } else { 4 })
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// One line of a table listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    pub table_id: TableId,
    pub name: String,
    pub status: TableStatus,
    pub seated: usize,
    pub max_players: usize,
    pub spectators: usize,
}

/// Public view of one seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatView {
    pub seat: usize,
    pub user_id: UserId,
    pub ready: bool,
    /// A live connection is currently bound to the seat.
    pub connected: bool,
    /// `false` once the seat has been vacated after a missed grace period.
    pub present: bool,
}

/// Full snapshot of a table, sent to newly joined or reconnected viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableView {
    pub table_id: TableId,
    pub name: String,
    pub status: TableStatus,
    pub owner: UserId,
    pub options: TableOptions,
    pub seats: Vec<SeatView>,
    pub spectators: Vec<UserId>,
    pub current_turn: Option<usize>,
    /// Number of committed actions.
    pub log_len: u64,
    /// Engine-defined game state; `null` while in the lobby.
    pub state: serde_json::Value,
}

/// The observable effect of one committed action.
///
/// Deltas for a table are delivered to every observer in `action.seq`
/// order with no gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub table_id: TableId,
    pub action: Action,
    pub status: TableStatus,
    pub current_turn: Option<usize>,
    /// Engine-defined game state after the action.
    pub state: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use TableStatus::*;
        assert!(Lobby.can_transition_to(Ongoing));
        assert!(Ongoing.can_transition_to(Finished));
        assert!(Ongoing.can_transition_to(Aborted));
        assert!(!Ongoing.can_transition_to(Lobby));
        assert!(!Finished.can_transition_to(Ongoing));
        assert!(!Aborted.can_transition_to(Finished));
        assert!(!Lobby.can_transition_to(Finished));
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(!TableStatus::Lobby.is_terminal());
        assert!(!TableStatus::Ongoing.is_terminal());
        assert!(TableStatus::Finished.is_terminal());
        assert!(TableStatus::Aborted.is_terminal());
    }

    #[test]
    fn test_options_default_is_valid() {
        assert!(TableOptions::default().validate().is_ok());
    }

    #[test]
    fn test_options_partial_json_fills_defaults() {
        let opts: TableOptions =
            serde_json::from_str(r#"{ "name": "quick", "max_players": 3 }"#)
                .unwrap();
        assert_eq!(opts.name, "quick");
        assert_eq!(opts.max_players, 3);
        assert_eq!(opts.max_clues, 8);
        assert!(opts.allow_clues);
    }

    #[test]
    fn test_options_reject_min_above_max() {
        let opts = TableOptions {
            min_players: 4,
            max_players: 3,
            ..TableOptions::default()
        };
        assert!(opts.validate().unwrap_err().contains("exceeds"));
    }

    #[test]
    fn test_options_reject_deck_too_small() {
        let opts = TableOptions {
            suits: 1,
            max_rank: 3,
            ..TableOptions::default()
        };
        assert!(opts.validate().unwrap_err().contains("cannot deal"));
    }

    #[test]
    fn test_hand_size_depends_on_seat_count() {
        let opts = TableOptions::default();
        assert_eq!(opts.hand_size_for(2), 5);
        assert_eq!(opts.hand_size_for(4), 4);
        let fixed = TableOptions {
            hand_size: Some(3),
            ..TableOptions::default()
        };
        assert_eq!(fixed.hand_size_for(5), 3);
    }
}
