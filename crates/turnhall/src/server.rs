//! `TurnhallServer` builder and server loop.
//!
//! This is the entry point for running a Turnhall server. It ties together
//! all the layers: transport → protocol → session bridge → table engine →
//! store.

use std::future::Future;
use std::sync::Arc;

use turnhall_protocol::{Codec, JsonCodec};
use turnhall_session::{Authenticator, SessionConfig, SessionManager};
use turnhall_store::{MemoryTableStore, TableStore};
use turnhall_table::{RecoveryReport, RegistryConfig, TableRegistry};
use turnhall_transport::{Transport, WebSocketTransport};

use crate::{SessionBridge, TurnhallError};

/// The current protocol version. Clients must send this in their
/// handshake or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Builder for configuring and starting a Turnhall server.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use turnhall::prelude::*;
///
/// # async fn run() -> Result<(), TurnhallError> {
/// let server = TurnhallServer::builder()
///     .bind("0.0.0.0:8080")
///     .store(Arc::new(FileTableStore::new("./ongoing_tables")?))
///     .build(DevAuthenticator)
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct TurnhallServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
    registry_config: RegistryConfig,
    store: Option<Arc<dyn TableStore>>,
}

impl TurnhallServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            session_config: SessionConfig::default(),
            registry_config: RegistryConfig::default(),
            store: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Sets the registry configuration.
    pub fn registry_config(mut self, config: RegistryConfig) -> Self {
        self.registry_config = config;
        self
    }

    /// Sets where ongoing tables are persisted. Defaults to an in-memory
    /// store, which does not survive a restart.
    pub fn store(mut self, store: Arc<dyn TableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Recovers stored tables, binds the listener, and returns a server
    /// ready to [`run`](TurnhallServer::run).
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<A: Authenticator>(
        self,
        auth: A,
    ) -> Result<TurnhallServer<A, JsonCodec>, TurnhallError> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTableStore::new()));
        let registry = Arc::new(TableRegistry::new(self.registry_config, store));

        let recovery = {
            let registry = Arc::clone(&registry);
            tokio::task::spawn_blocking(move || registry.recover()).await??
        };
        tracing::info!(
            restored = recovery.restored.len(),
            skipped = recovery.skipped.len(),
            purged = recovery.purged.len(),
            "recovery complete"
        );

        let bridge = Arc::new(SessionBridge::new(
            registry,
            SessionManager::new(self.session_config),
            auth,
            JsonCodec,
        ));
        bridge.adopt_recovered(&recovery).await;

        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        Ok(TurnhallServer {
            transport,
            bridge,
            recovery,
        })
    }
}

impl Default for TurnhallServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Turnhall server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct TurnhallServer<A, C> {
    transport: WebSocketTransport,
    bridge: Arc<SessionBridge<A, C>>,
    recovery: RecoveryReport,
}

impl TurnhallServer<(), JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> TurnhallServerBuilder {
        TurnhallServerBuilder::new()
    }
}

impl<A, C> TurnhallServer<A, C>
where
    A: Authenticator,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    pub fn bridge(&self) -> &Arc<SessionBridge<A, C>> {
        &self.bridge
    }

    /// What startup recovery found in the store.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Runs the server until the process is terminated.
    pub async fn run(self) -> Result<(), TurnhallError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop and the grace-period sweeper until `shutdown`
    /// completes, then stops accepting and flushes every table to the
    /// store.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), TurnhallError> {
        tracing::info!("Turnhall server running");

        let sweeper = {
            let bridge = Arc::clone(&self.bridge);
            let period = bridge.sweep_interval().await;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    let expired = bridge.sweep().await;
                    if expired > 0 {
                        tracing::debug!(expired, "sweep applied vacancy policy");
                    }
                }
            })
        };

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let bridge = Arc::clone(&self.bridge);
                        tokio::spawn(async move {
                            if let Err(e) = bridge.serve(conn).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!("shutting down");
        sweeper.abort();
        if let Err(e) = self.transport.shutdown().await {
            tracing::debug!(error = %e, "transport shutdown failed");
        }
        let registry = Arc::clone(self.bridge.registry());
        let flushed = tokio::task::spawn_blocking(move || registry.flush()).await?;
        if flushed.failed.is_empty() {
            tracing::info!(written = flushed.written, "tables flushed");
        } else {
            tracing::warn!(
                written = flushed.written,
                failed = ?flushed.failed,
                "some tables could not be flushed"
            );
        }
        Ok(())
    }
}
