//! Error types for the protocol layer.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields,
    /// wrong data types, or truncated messages.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// An action frame named a kind that does not exist.
    #[error("unknown action kind: {0}")]
    UnknownActionKind(String),

    /// The action kind exists but its payload does not fit it.
    #[error("invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: String, reason: String },

    /// The message is invalid at the protocol level.
    ///
    /// For logical errors that pass deserialization but violate
    /// protocol rules, e.g. a handshake with the wrong version.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
