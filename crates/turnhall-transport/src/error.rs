//! Transport-layer errors.

use crate::ConnectionId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Either side closed the connection.
    #[error("{0} is closed")]
    ConnectionClosed(ConnectionId),

    /// The listener could not be bound.
    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Accepting a socket or upgrading it to a WebSocket failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// `true` when the error only means the peer went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed(_) | Self::SendFailed(_) | Self::ReceiveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_closed_names_the_connection() {
        let err = TransportError::ConnectionClosed(ConnectionId::new(4));
        assert_eq!(err.to_string(), "conn-4 is closed");
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_bind_failure_is_not_a_disconnect() {
        let err = TransportError::Bind {
            addr: "127.0.0.1:1".into(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().contains("127.0.0.1:1"));
        assert!(!err.is_disconnect());
    }
}
