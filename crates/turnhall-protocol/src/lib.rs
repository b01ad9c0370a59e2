//! Wire protocol for Turnhall.
//!
//! This crate defines the "language" that clients, the server, and the
//! persistence layer share:
//!
//! - **Identity** ([`UserId`], [`TableId`]): newtypes that travel everywhere.
//! - **Actions** ([`ActionKind`], [`ActionBody`], [`Action`]): the entries
//!   of a table's authoritative log.
//! - **Table views** ([`TableStatus`], [`TableOptions`], [`TableView`],
//!   [`Delta`]): what observers are told about a table.
//! - **Frames** ([`Envelope`], [`ClientFrame`], [`ServerFrame`]): the
//!   message-framed connection protocol.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): bytes in, frames out.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope<Frame>) → Session bridge
//! ```
//!
//! Game state itself is opaque here (`serde_json::Value`); only the table
//! engine knows its shape.

mod action;
mod codec;
mod error;
mod frames;
mod ids;
mod table;

pub use action::{Action, ActionBody, ActionKind, Hint};
pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use frames::{ClientFrame, Envelope, JoinRole, ReplayFrame, ServerFrame};
pub use ids::{TableId, UserId};
pub use table::{
    Delta, SeatView, TableOptions, TableStatus, TableSummary, TableView,
};
