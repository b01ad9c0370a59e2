//! Error types for the session layer.

use turnhall_protocol::UserId;

/// Errors that can occur during session management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The [`Authenticator`](crate::Authenticator) rejected the token.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No session exists for the user.
    #[error("no session for user {0}")]
    NotFound(UserId),

    /// The user already has a live connection. One at a time.
    #[error("user {0} is already connected")]
    AlreadyConnected(UserId),

    /// The user is already playing at another table.
    #[error("user {user_id} is already playing at table {table_id}")]
    AlreadyPlaying {
        user_id: UserId,
        table_id: turnhall_protocol::TableId,
    },
}

impl SessionError {
    /// The numeric code reported to clients.
    pub fn code(&self) -> u16 {
        match self {
            Self::AuthFailed(_) => 401,
            Self::NotFound(_) => 404,
            Self::AlreadyConnected(_) | Self::AlreadyPlaying { .. } => 409,
        }
    }
}
