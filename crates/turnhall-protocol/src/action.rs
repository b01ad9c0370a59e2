//! The action model: what a table's authoritative log is made of.
//!
//! Every state change to an ongoing table is an [`Action`]. The log of
//! actions, replayed from the table's initial deal, reproduces the table
//! exactly, so everything an action needs to be re-applied lives in its
//! [`ActionBody`].

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, UserId};

/// The closed set of action kinds the engine knows about.
///
/// Wire names are snake_case (`"play"`, `"clue"`, ...). `strum` provides
/// `FromStr`/`Display` so inbound frames can name a kind as a plain string
/// and get a precise "unknown kind" error instead of a generic decode
/// failure.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Play,
    Discard,
    Clue,
    Note,
    Terminate,
    Vacate,
    Reclaim,
}

impl ActionKind {
    /// Turn-bound kinds may only be submitted by the seat whose turn it is.
    pub fn is_turn_bound(self) -> bool {
        matches!(self, Self::Play | Self::Discard | Self::Clue)
    }

    /// System kinds are produced by the server (grace-period expiry,
    /// rejoin) and are never accepted from a client frame.
    pub fn is_system(self) -> bool {
        matches!(self, Self::Vacate | Self::Reclaim)
    }
}

/// What a clue points at in the target's hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Hint {
    Suit(u8),
    Rank(u8),
}

/// The kind-specific payload of an action.
///
/// Internally tagged on `kind`, so `{"kind":"play","slot":2}` is a play of
/// the card in slot 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionBody {
    Play { slot: usize },
    Discard { slot: usize },
    Clue { target: UserId, hint: Hint },
    Note { text: String },
    Terminate,
    Vacate,
    Reclaim,
}

impl ActionBody {
    /// The type tag of this payload.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Play { .. } => ActionKind::Play,
            Self::Discard { .. } => ActionKind::Discard,
            Self::Clue { .. } => ActionKind::Clue,
            Self::Note { .. } => ActionKind::Note,
            Self::Terminate => ActionKind::Terminate,
            Self::Vacate => ActionKind::Vacate,
            Self::Reclaim => ActionKind::Reclaim,
        }
    }

    /// Builds a body from an inbound `(kind, payload)` pair.
    ///
    /// `payload` may be `null` for kinds without fields.
    ///
    /// # Errors
    /// - [`ProtocolError::UnknownActionKind`] if `kind` names nothing.
    /// - [`ProtocolError::InvalidPayload`] if the payload doesn't fit.
    pub fn parse(
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<Self, ProtocolError> {
        let parsed = ActionKind::from_str(kind)
            .map_err(|_| ProtocolError::UnknownActionKind(kind.to_string()))?;

        let mut fields = match payload {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(ProtocolError::InvalidPayload {
                    kind: kind.to_string(),
                    reason: format!("expected an object, got {other}"),
                });
            }
        };
        fields.insert(
            "kind".to_string(),
            serde_json::Value::String(parsed.to_string()),
        );

        serde_json::from_value(serde_json::Value::Object(fields)).map_err(|e| {
            ProtocolError::InvalidPayload {
                kind: kind.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// A committed entry in a table's log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Position in the log, starting at 1, assigned at commit time.
    pub seq: u64,

    /// The user the action is attributed to.
    pub actor: UserId,

    /// Kind and payload.
    pub body: ActionBody,

    /// Wall-clock commit time, milliseconds since the Unix epoch.
    pub committed_at: u64,
}

impl Action {
    /// The action's type tag.
    pub fn kind(&self) -> ActionKind {
        self.body.kind()
    }
}
