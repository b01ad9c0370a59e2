//! Frames exchanged over a connection, and the envelope around them.
//!
//! Both directions use internally tagged JSON (`{"type": "JoinTable", ...}`)
//! so browser clients can switch on a single field.

use serde::{Deserialize, Serialize};

use crate::{
    Action, Delta, TableId, TableOptions, TableStatus, TableSummary, TableView,
    UserId,
};

/// The top-level wrapper. Every frame on the wire is an `Envelope`.
///
/// `seq` is per-direction and per-connection; it is unrelated to the
/// action sequence numbers inside a table's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<F> {
    /// Auto-incrementing frame counter.
    pub seq: u64,
    /// Milliseconds since the sender started.
    pub timestamp: u64,
    /// The frame itself.
    pub payload: F,
}

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Must be the first frame on a connection.
    Handshake {
        version: u32,
        token: Option<String>,
    },

    /// Keep-alive; answered with `HeartbeatAck`.
    Heartbeat { client_time: u64 },

    ListTables,

    CreateTable {
        #[serde(default)]
        options: TableOptions,
    },

    /// Take a seat (lobby) or rebind an existing seat (ongoing).
    JoinTable { table_id: TableId },

    Spectate { table_id: TableId },

    LeaveTable { table_id: TableId },

    SetReady { table_id: TableId, ready: bool },

    StartTable { table_id: TableId },

    /// A game action. `kind` is kept as a string so an unknown kind can
    /// be reported as such rather than as a malformed frame.
    Action {
        table_id: TableId,
        kind: String,
        #[serde(default)]
        payload: serde_json::Value,
    },

    /// Move this viewer's replay cursor to an absolute log position.
    ReplaySeek { table_id: TableId, index: u64 },

    /// Move this viewer's replay cursor by `delta` positions.
    ReplayStep { table_id: TableId, delta: i64 },

    Disconnect { reason: String },
}

/// How a `JoinTable` or `Spectate` request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum JoinRole {
    /// Newly seated in a lobby.
    Seated { seat: usize },
    /// An existing seat was bound to this connection again.
    Rebound { seat: usize },
    /// Watching without a seat.
    Spectator,
}

/// A replay position delivered to one viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    pub table_id: TableId,
    /// Cursor position: number of log entries applied.
    pub index: u64,
    /// Log length at the time of the request.
    pub total: u64,
    /// The action that produced this position (`None` at index 0).
    pub action: Option<Action>,
    /// Engine-defined game state at this position.
    pub state: serde_json::Value,
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Handshake accepted. `resumed` lists tables whose seats were
    /// re-bound because the user came back within the grace period.
    HandshakeAck {
        user_id: UserId,
        server_time: u64,
        resumed: Vec<TableId>,
    },

    HeartbeatAck {
        client_time: u64,
        server_time: u64,
    },

    TableList { tables: Vec<TableSummary> },

    TableCreated { table_id: TableId },

    Joined { table_id: TableId, role: JoinRole },

    Left { table_id: TableId },

    /// Full table state; always precedes deltas for a new observer.
    Snapshot { table: TableView },

    /// One committed action, fanned out to every observer.
    Delta { delta: Delta },

    /// Acknowledgement to the originator of an action.
    Committed { table_id: TableId, seq: u64 },

    Replay { frame: ReplayFrame },

    /// The table reached a terminal status or was removed.
    TableClosed {
        table_id: TableId,
        status: TableStatus,
    },

    /// `code` follows HTTP conventions (400 bad request, 404 not found, ...).
    Error { code: u16, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionBody, JsonCodec, Codec};

    #[test]
    fn test_client_frame_handshake_json_format() {
        let msg = ClientFrame::Handshake {
            version: 1,
            token: Some("abc".into()),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "Handshake");
        assert_eq!(json["version"], 1);
        assert_eq!(json["token"], "abc");
    }

    #[test]
    fn test_client_frame_action_payload_defaults_to_null() {
        let json = r#"{ "type": "Action", "table_id": 4, "kind": "terminate" }"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::Action { table_id, kind, payload } => {
                assert_eq!(table_id, TableId(4));
                assert_eq!(kind, "terminate");
                assert!(payload.is_null());
            }
            other => panic!("expected Action, got {other:?}"),
        }
    }

    #[test]
    fn test_client_frame_create_table_without_options() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{ "type": "CreateTable" }"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::CreateTable {
                options: TableOptions::default()
            }
        );
    }

    #[test]
    fn test_join_role_json_format() {
        let json = serde_json::to_value(JoinRole::Seated { seat: 2 }).unwrap();
        assert_eq!(json["role"], "Seated");
        assert_eq!(json["seat"], 2);
        let json = serde_json::to_value(JoinRole::Spectator).unwrap();
        assert_eq!(json["role"], "Spectator");
    }

    #[test]
    fn test_server_frame_delta_json_format() {
        let frame = ServerFrame::Delta {
            delta: Delta {
                table_id: TableId(1),
                action: Action {
                    seq: 7,
                    actor: UserId(2),
                    body: ActionBody::Play { slot: 0 },
                    committed_at: 0,
                },
                status: TableStatus::Ongoing,
                current_turn: Some(1),
                state: serde_json::json!({ "score": 1 }),
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "Delta");
        assert_eq!(json["delta"]["action"]["seq"], 7);
        assert_eq!(json["delta"]["status"], "Ongoing");
    }

    #[test]
    fn test_envelope_round_trip_through_codec() {
        let envelope = Envelope {
            seq: 42,
            timestamp: 15000,
            payload: ServerFrame::Error {
                code: 409,
                message: "table T-1 is full".into(),
            },
        };
        let bytes = JsonCodec.encode(&envelope).unwrap();
        let decoded: Envelope<ServerFrame> = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn test_decode_unknown_frame_type_returns_error() {
        let unknown = r#"{"type": "FlyToMoon", "speed": 9000}"#;
        let result: Result<ClientFrame, _> = serde_json::from_str(unknown);
        assert!(result.is_err());
    }
}
