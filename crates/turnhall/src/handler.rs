//! The session bridge: per-connection handshake, routing, and fan-out.
//!
//! Each accepted connection gets its own Tokio task running
//! [`SessionBridge::serve`]. The flow is:
//!   1. Receive Handshake → validate version
//!   2. Authenticate token → get UserId, connect the session
//!   3. Send HandshakeAck, then rebind every table the user still holds
//!   4. Loop: receive frames → registry, action dispatcher, or replay
//!   5. On close: unwatch every table and start the grace period
//!
//! Replies and table fan-out share one outbox per connection, drained by
//! a writer task. Tables enqueue deltas while holding their lock, so a
//! connection sees a table's actions in commit order.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use turnhall_protocol::{
    ActionBody, ClientFrame, Codec, Envelope, JoinRole, JsonCodec, ProtocolError, ServerFrame,
    TableId, TableStatus, TableView, UserId,
};
use turnhall_session::{Authenticator, Session, SessionManager};
use turnhall_table::{
    ActionDispatcher, Outbox, RecoveryReport, ReplayDispatcher, TableError, TableRegistry,
    WatcherId,
};
use turnhall_transport::{Connection, TransportError};

use crate::TurnhallError;
use crate::server::PROTOCOL_VERSION;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(15);
/// How long a closing connection waits for queued frames to go out.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Binds authenticated connections to the table engine.
///
/// Shared by every connection task through an `Arc`. The engine types are
/// synchronous; calls that may write to the store run on the blocking
/// pool, and no table lock is ever held across an `.await`.
pub struct SessionBridge<A, C = JsonCodec> {
    sessions: Mutex<SessionManager>,
    registry: Arc<TableRegistry>,
    dispatcher: ActionDispatcher,
    replay: ReplayDispatcher,
    auth: A,
    codec: C,
    started: Instant,
}

/// One authenticated connection.
struct Link {
    user_id: UserId,
    connection: u64,
    watcher: WatcherId,
    outbox: Outbox,
    watching: BTreeSet<TableId>,
}

impl Link {
    fn send(&self, frame: ServerFrame) {
        // The receiver lives until the connection is torn down.
        let _ = self.outbox.send(frame);
    }
}

fn error_frame(err: &TurnhallError) -> ServerFrame {
    ServerFrame::Error {
        code: err.code(),
        message: err.to_string(),
    }
}

fn is_member(view: &TableView, user: UserId) -> bool {
    view.seats.iter().any(|s| s.user_id == user) || view.spectators.contains(&user)
}

impl<A: Authenticator, C: Codec> SessionBridge<A, C> {
    pub fn new(registry: Arc<TableRegistry>, sessions: SessionManager, auth: A, codec: C) -> Self {
        Self {
            sessions: Mutex::new(sessions),
            dispatcher: ActionDispatcher::new(Arc::clone(&registry)),
            replay: ReplayDispatcher::new(Arc::clone(&registry)),
            registry,
            auth,
            codec,
            started: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Whether `user` currently has a live connection.
    pub async fn is_connected(&self, user: UserId) -> bool {
        self.sessions
            .lock()
            .await
            .get(user)
            .is_some_and(|s| s.is_connected())
    }

    /// How often [`sweep`](Self::sweep) should run.
    pub async fn sweep_interval(&self) -> Duration {
        self.sessions.lock().await.config().sweep_interval()
    }

    fn server_time(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Starts the grace period for every player seated at a recovered
    /// table. Players who never come back are vacated by the sweeper.
    pub async fn adopt_recovered(&self, report: &RecoveryReport) -> usize {
        let mut sessions = self.sessions.lock().await;
        let mut adopted = 0;
        for &table_id in &report.restored {
            let Ok(view) = self.registry.view(table_id) else {
                continue;
            };
            for seat in &view.seats {
                if sessions.restore(seat.user_id, table_id) {
                    adopted += 1;
                }
            }
        }
        adopted
    }

    /// Runs a synchronous engine call on the blocking pool.
    async fn blocking<R, F>(self: &Arc<Self>, f: F) -> Result<R, TurnhallError>
    where
        F: FnOnce(&Self) -> Result<R, TableError> + Send + 'static,
        R: Send + 'static,
    {
        let bridge = Arc::clone(self);
        Ok(tokio::task::spawn_blocking(move || f(&*bridge)).await??)
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Handles a single connection from accept to close.
    pub async fn serve<T>(self: Arc<Self>, conn: T) -> Result<(), TurnhallError>
    where
        T: Connection<Error = TransportError>,
    {
        let conn = Arc::new(conn);
        let conn_id = conn.id();
        tracing::debug!(%conn_id, "handling new connection");

        let (outbox, outbound) = mpsc::unbounded_channel();
        let writer = self.spawn_writer(Arc::clone(&conn), outbound);

        let result = match self.handshake(conn.as_ref(), &outbox).await {
            Ok(mut link) => {
                let result = self.run(conn.as_ref(), &mut link).await;
                self.release(link).await;
                result
            }
            Err(e) => Err(e),
        };

        drop(outbox);
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, writer).await;
        if let Err(e) = conn.close().await {
            tracing::debug!(%conn_id, error = %e, "close failed");
        }
        result
    }

    fn spawn_writer<T>(
        self: &Arc<Self>,
        conn: Arc<T>,
        mut outbound: mpsc::UnboundedReceiver<ServerFrame>,
    ) -> JoinHandle<()>
    where
        T: Connection<Error = TransportError>,
    {
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let mut seq = 0;
            while let Some(frame) = outbound.recv().await {
                seq += 1;
                let envelope = Envelope {
                    seq,
                    timestamp: bridge.server_time(),
                    payload: frame,
                };
                let bytes = match bridge.codec.encode(&envelope) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(conn_id = %conn.id(), error = %e, "dropping unencodable frame");
                        continue;
                    }
                };
                if let Err(e) = conn.send(&bytes).await {
                    tracing::debug!(conn_id = %conn.id(), error = %e, "send failed, writer stopping");
                    break;
                }
            }
        })
    }

    /// Receives Handshake, authenticates, connects the session, sends
    /// HandshakeAck, and rebinds the user's tables.
    async fn handshake<T>(self: &Arc<Self>, conn: &T, outbox: &Outbox) -> Result<Link, TurnhallError>
    where
        T: Connection<Error = TransportError>,
    {
        let refuse = |err: TurnhallError| {
            let _ = outbox.send(error_frame(&err));
            Err(err)
        };

        let data = match tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                return Err(ProtocolError::InvalidMessage("connection closed before handshake".into()).into());
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return refuse(ProtocolError::InvalidMessage("handshake timed out".into()).into());
            }
        };

        let envelope: Envelope<ClientFrame> = match self.codec.decode(&data) {
            Ok(envelope) => envelope,
            Err(e) => return refuse(e.into()),
        };
        let ClientFrame::Handshake { version, token } = envelope.payload else {
            return refuse(ProtocolError::InvalidMessage("first frame must be Handshake".into()).into());
        };
        if version != PROTOCOL_VERSION {
            return refuse(
                ProtocolError::InvalidMessage(format!(
                    "protocol version mismatch: expected {PROTOCOL_VERSION}, got {version}"
                ))
                .into(),
            );
        }

        let user_id = match self.auth.authenticate(token.as_deref().unwrap_or("")).await {
            Ok(user_id) => user_id,
            Err(e) => return refuse(e.into()),
        };

        let connection = conn.id().into_inner();
        let resumed = match self.sessions.lock().await.connect(user_id, connection) {
            Ok(resumed) => resumed,
            Err(e) => return refuse(e.into()),
        };
        tracing::info!(conn_id = %conn.id(), %user_id, resumed, "user authenticated");

        let mut link = Link {
            user_id,
            connection,
            watcher: WatcherId(connection),
            outbox: outbox.clone(),
            watching: BTreeSet::new(),
        };

        let tables = self.held_tables(user_id).await;
        link.send(ServerFrame::HandshakeAck {
            user_id,
            server_time: self.server_time(),
            resumed: tables.clone(),
        });
        for table_id in tables {
            if let Err(e) = self.attach(&mut link, table_id).await {
                tracing::warn!(%user_id, %table_id, error = %e, "failed to rebind table");
                link.send(error_frame(&e));
            }
        }
        Ok(link)
    }

    /// Tables the user is still a member of: whatever their session was
    /// bound to, plus the seat the registry holds for them (which survives
    /// restarts). Stale session bindings are dropped.
    async fn held_tables(&self, user: UserId) -> Vec<TableId> {
        let mut sessions = self.sessions.lock().await;
        let mut candidates: BTreeSet<TableId> = sessions
            .get(user)
            .map(|s| s.tables().into_iter().collect())
            .unwrap_or_default();
        candidates.extend(self.registry.seated_table(user));

        let mut held = Vec::new();
        for table_id in candidates {
            let member = self
                .registry
                .view(table_id)
                .is_ok_and(|view| !view.status.is_terminal() && is_member(&view, user));
            if member {
                held.push(table_id);
            } else {
                sessions.unbind(user, table_id);
            }
        }
        held
    }

    /// Registers the connection as an observer of `table_id`, records the
    /// binding on the session, and reclaims a vacated seat.
    async fn attach(self: &Arc<Self>, link: &mut Link, table_id: TableId) -> Result<(), TurnhallError> {
        let user = link.user_id;
        let view = self
            .registry
            .watch(table_id, user, link.watcher, link.outbox.clone())?;
        link.watching.insert(table_id);

        let Some(seat) = view.seats.iter().find(|s| s.user_id == user) else {
            self.sessions.lock().await.bind_spectate(user, table_id)?;
            return Ok(());
        };

        {
            let mut sessions = self.sessions.lock().await;
            let stale = sessions
                .get(user)
                .and_then(|s| s.play_table)
                .filter(|&t| t != table_id);
            if let Some(stale) = stale {
                sessions.unbind(user, stale);
            }
            sessions.bind_play(user, table_id)?;
        }

        if view.status == TableStatus::Ongoing && !seat.present {
            let result = self
                .blocking(move |b| b.dispatcher.reclaim(table_id, user))
                .await?;
            tracing::info!(%table_id, %user, seq = result.seq, "seat reclaimed");
        }
        Ok(())
    }

    /// Unwatches every table and starts the grace period.
    async fn release(self: &Arc<Self>, link: Link) {
        let Link {
            user_id,
            connection,
            watcher,
            outbox,
            watching,
        } = link;
        drop(outbox);

        let tables: Vec<TableId> = watching.into_iter().collect();
        let unwatched = self
            .blocking(move |b| {
                for table_id in tables {
                    b.registry.unwatch(table_id, watcher);
                }
                Ok(())
            })
            .await;
        if let Err(e) = unwatched {
            tracing::warn!(%user_id, error = %e, "failed to unwatch tables");
        }

        match self.sessions.lock().await.disconnect(user_id, connection) {
            Ok(true) => tracing::info!(%user_id, "connection released"),
            Ok(false) => tracing::debug!(%user_id, "superseded connection released"),
            Err(e) => tracing::debug!(%user_id, error = %e, "no session to release"),
        }
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    async fn run<T>(self: &Arc<Self>, conn: &T, link: &mut Link) -> Result<(), TurnhallError>
    where
        T: Connection<Error = TransportError>,
    {
        let user_id = link.user_id;
        loop {
            let data = match tokio::time::timeout(IDLE_TIMEOUT, conn.recv()).await {
                Ok(Ok(Some(data))) => data,
                Ok(Ok(None)) => {
                    tracing::info!(%user_id, "connection closed cleanly");
                    return Ok(());
                }
                Ok(Err(e)) if e.is_disconnect() => {
                    tracing::info!(%user_id, error = %e, "connection dropped");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::debug!(%user_id, error = %e, "recv error");
                    return Err(e.into());
                }
                Err(_) => {
                    tracing::info!(%user_id, "connection timed out");
                    return Ok(());
                }
            };

            let frame = match self.codec.decode::<Envelope<ClientFrame>>(&data) {
                Ok(envelope) => envelope.payload,
                Err(e) => {
                    tracing::debug!(%user_id, error = %e, "failed to decode envelope");
                    link.send(error_frame(&TurnhallError::from(e)));
                    continue;
                }
            };

            match self.route(link, frame).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(%user_id, error = %e, "request rejected");
                    link.send(error_frame(&e));
                }
            }
        }
    }

    /// Handles one frame. Returns `true` if the connection should close.
    async fn route(self: &Arc<Self>, link: &mut Link, frame: ClientFrame) -> Result<bool, TurnhallError> {
        let user = link.user_id;
        match frame {
            ClientFrame::Heartbeat { client_time } => {
                link.send(ServerFrame::HeartbeatAck {
                    client_time,
                    server_time: self.server_time(),
                });
            }

            ClientFrame::ListTables => {
                link.send(ServerFrame::TableList {
                    tables: self.registry.list(),
                });
            }

            ClientFrame::CreateTable { options } => {
                let table_id = self
                    .blocking(move |b| b.registry.create(user, options))
                    .await?;
                link.send(ServerFrame::TableCreated { table_id });
                self.attach(link, table_id).await?;
            }

            ClientFrame::JoinTable { table_id } => {
                let role = self
                    .blocking(move |b| b.registry.join(table_id, user))
                    .await?;
                link.send(ServerFrame::Joined { table_id, role });
                self.attach(link, table_id).await?;
            }

            ClientFrame::Spectate { table_id } => {
                self.blocking(move |b| b.registry.spectate(table_id, user))
                    .await?;
                link.send(ServerFrame::Joined {
                    table_id,
                    role: JoinRole::Spectator,
                });
                self.attach(link, table_id).await?;
            }

            ClientFrame::LeaveTable { table_id } => {
                let watcher = link.watcher;
                self.blocking(move |b| {
                    b.registry.leave(table_id, user)?;
                    b.registry.unwatch(table_id, watcher);
                    Ok(())
                })
                .await?;
                link.watching.remove(&table_id);
                // A player leaving a started table keeps the seat.
                if self.registry.seated_table(user) != Some(table_id) {
                    self.sessions.lock().await.unbind(user, table_id);
                }
                link.send(ServerFrame::Left { table_id });
            }

            ClientFrame::SetReady { table_id, ready } => {
                self.blocking(move |b| b.registry.set_ready(table_id, user, ready))
                    .await?;
            }

            ClientFrame::StartTable { table_id } => {
                self.blocking(move |b| b.registry.start(table_id, user))
                    .await?;
            }

            ClientFrame::Action {
                table_id,
                kind,
                payload,
            } => {
                let body = ActionBody::parse(&kind, payload)?;
                let result = self
                    .blocking(move |b| b.dispatcher.dispatch(table_id, user, body))
                    .await?;
                link.send(ServerFrame::Committed {
                    table_id,
                    seq: result.seq,
                });
            }

            ClientFrame::ReplaySeek { table_id, index } => {
                let frame = self
                    .blocking(move |b| b.replay.seek(table_id, user, index))
                    .await?;
                link.send(ServerFrame::Replay { frame });
            }

            ClientFrame::ReplayStep { table_id, delta } => {
                let frame = self
                    .blocking(move |b| b.replay.step(table_id, user, delta))
                    .await?;
                link.send(ServerFrame::Replay { frame });
            }

            ClientFrame::Handshake { .. } => {
                return Err(ProtocolError::InvalidMessage("already authenticated".into()).into());
            }

            ClientFrame::Disconnect { reason } => {
                tracing::info!(%user, %reason, "client disconnected");
                return Ok(true);
            }
        }
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Grace period
    // -----------------------------------------------------------------------

    /// Applies the vacancy policy to every session whose grace period ran
    /// out: an ongoing seat is vacated, a lobby seat is given up, and
    /// spectated tables are left. Also drops session bindings and replay
    /// cursors that point at removed tables. Returns how many sessions
    /// expired.
    pub async fn sweep(self: &Arc<Self>) -> usize {
        let expired = self.sessions.lock().await.expire_stale();
        for session in &expired {
            self.apply_vacancy(session).await;
        }
        {
            let mut sessions = self.sessions.lock().await;
            sessions.cleanup_expired();
            sessions.retain_tables(|table_id| self.registry.get(table_id).is_ok());
        }
        let pruned = self.replay.prune_removed();
        if pruned > 0 {
            tracing::debug!(pruned, "dropped replay cursors of removed tables");
        }
        expired.len()
    }

    /// Vacates what an expired session held.
    ///
    /// The user can reconnect between expiry and here. A fresh session
    /// found before the vacate skips it; one found after gets the seat
    /// reclaimed.
    async fn apply_vacancy(self: &Arc<Self>, session: &Session) {
        let user = session.user_id;
        if self.is_connected(user).await {
            tracing::debug!(%user, "reconnected before vacancy was applied");
            return;
        }
        if let Some(table_id) = session.play_table {
            match self.blocking(move |b| b.vacate_seat(table_id, user)).await {
                Ok(true) => self.reclaim_if_reconnected(table_id, user).await,
                Ok(false) => {}
                Err(e) => tracing::debug!(%table_id, %user, error = %e, "vacancy not applied"),
            }
        }
        if self.is_connected(user).await {
            return;
        }
        for &table_id in &session.spectating {
            if let Err(e) = self.blocking(move |b| b.registry.leave(table_id, user)).await {
                tracing::debug!(%table_id, %user, error = %e, "spectator not removed");
            }
        }
        self.replay.forget_viewer(user);
    }

    async fn reclaim_if_reconnected(self: &Arc<Self>, table_id: TableId, user: UserId) {
        if !self.is_connected(user).await {
            return;
        }
        // The handshake may have reclaimed it already.
        match self.blocking(move |b| b.dispatcher.reclaim(table_id, user)).await {
            Ok(result) => tracing::info!(%table_id, %user, seq = result.seq, "seat reclaimed after late vacancy"),
            Err(e) => tracing::debug!(%table_id, %user, error = %e, "seat not reclaimed"),
        }
    }

    /// `Ok(true)` if a `vacate` action was committed.
    fn vacate_seat(&self, table_id: TableId, user: UserId) -> Result<bool, TableError> {
        match self.registry.view(table_id)?.status {
            TableStatus::Lobby => self.registry.leave(table_id, user).map(|()| false),
            TableStatus::Ongoing => {
                let result = self.dispatcher.vacate(table_id, user)?;
                tracing::info!(%table_id, %user, seq = result.seq, "seat vacated");
                Ok(true)
            }
            TableStatus::Finished | TableStatus::Aborted => Ok(false),
        }
    }
}
