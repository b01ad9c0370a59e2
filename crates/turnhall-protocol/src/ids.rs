//! Identity newtypes.
//!
//! Both serialize as plain numbers (`#[serde(transparent)]`), so a
//! `TableId(42)` is just `42` on the wire and in snapshot files.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An authenticated user's identity.
///
/// The core never checks credentials; a `UserId` reaching the engine has
/// already been vouched for by the authenticator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

/// A unique identifier for a table (one game session).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TableId(pub u64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T-{}", self.0)
    }
}

impl std::str::FromStr for TableId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(TableId)
    }
}
