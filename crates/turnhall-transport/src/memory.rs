//! In-process duplex connection.
//!
//! Two [`MemoryConnection`]s created by [`memory_pair`] are wired back to
//! back: whatever one side sends, the other receives, in order. Closing
//! either side ends the peer's stream.

use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::{Connection, ConnectionId, TransportError};

/// One end of an in-memory duplex connection.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: StdMutex<Option<UnboundedSender<Vec<u8>>>>,
    rx: Mutex<UnboundedReceiver<Vec<u8>>>,
}

/// Creates two connected endpoints.
pub fn memory_pair() -> (MemoryConnection, MemoryConnection) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    let a = MemoryConnection {
        id: ConnectionId::next(),
        tx: StdMutex::new(Some(a_tx)),
        rx: Mutex::new(a_rx),
    };
    let b = MemoryConnection {
        id: ConnectionId::next(),
        tx: StdMutex::new(Some(b_tx)),
        rx: Mutex::new(b_rx),
    };
    (a, b)
}

impl MemoryConnection {
    fn sender(&self) -> Result<UnboundedSender<Vec<u8>>, TransportError> {
        let guard = self.tx.lock().map_err(|_| TransportError::Shutdown)?;
        guard
            .clone()
            .ok_or_else(|| TransportError::ConnectionClosed(self.id))
    }
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.sender()?
            .send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed(self.id))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
