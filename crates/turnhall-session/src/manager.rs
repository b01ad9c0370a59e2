//! The session manager: tracks every user's session and table bindings.
//!
//! `SessionManager` is a plain struct over a `HashMap`; the server wraps
//! it in a mutex and holds that only for the duration of one call, never
//! across an await and never while calling into the table engine.

use std::collections::HashMap;
use std::time::Instant;

use turnhall_protocol::{TableId, UserId};

use crate::{Session, SessionConfig, SessionError, SessionState};

/// Manages every user's session.
///
/// ## Lifecycle
///
/// ```text
/// connect() ──→ [Connected] ──disconnect()──→ [Disconnected]
///     ↑                                            │
///     └──────────── connect() (resumes) ───────────┤
///                                                  ▼ expire_stale()
///                                              [Expired] ──→ cleanup_expired()
/// ```
pub struct SessionManager {
    sessions: HashMap<UserId, Session>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Binds `user` to a new live connection.
    ///
    /// A disconnected session that hasn't been expired yet is resumed with
    /// its bindings intact; returns `true` in that case. An expired or
    /// missing session is replaced by a fresh one.
    ///
    /// # Errors
    /// [`SessionError::AlreadyConnected`] if the user is connected
    /// elsewhere.
    pub fn connect(&mut self, user_id: UserId, connection: u64) -> Result<bool, SessionError> {
        match self.sessions.get_mut(&user_id) {
            Some(session) => match session.state {
                SessionState::Connected { .. } => Err(SessionError::AlreadyConnected(user_id)),
                SessionState::Disconnected { since } => {
                    session.state = SessionState::Connected { connection };
                    tracing::info!(
                        %user_id,
                        away_ms = since.elapsed().as_millis() as u64,
                        "session resumed"
                    );
                    Ok(true)
                }
                SessionState::Expired => {
                    *session = Session::new(user_id, connection);
                    tracing::info!(%user_id, "session created (previous one expired)");
                    Ok(false)
                }
            },
            None => {
                self.sessions.insert(user_id, Session::new(user_id, connection));
                tracing::info!(%user_id, "session created");
                Ok(false)
            }
        }
    }

    /// Marks the user disconnected and starts the grace period.
    ///
    /// Only the connection the session is bound to can disconnect it; a
    /// late call from an older connection is ignored and returns `false`.
    pub fn disconnect(&mut self, user_id: UserId, connection: u64) -> Result<bool, SessionError> {
        let session = self
            .sessions
            .get_mut(&user_id)
            .ok_or(SessionError::NotFound(user_id))?;
        if session.connection() != Some(connection) {
            return Ok(false);
        }
        session.state = SessionState::Disconnected {
            since: Instant::now(),
        };
        tracing::info!(%user_id, "user disconnected, grace period started");
        Ok(true)
    }

    /// Registers a disconnected session for a user seated at a recovered
    /// table, so their grace period starts now. Does nothing if the user
    /// already has a session.
    pub fn restore(&mut self, user_id: UserId, table_id: TableId) -> bool {
        if self.sessions.contains_key(&user_id) {
            return false;
        }
        let mut session = Session::new(user_id, 0);
        session.state = SessionState::Disconnected {
            since: Instant::now(),
        };
        session.play_table = Some(table_id);
        self.sessions.insert(user_id, session);
        true
    }

    /// Records that the user is playing at `table_id`.
    ///
    /// # Errors
    /// [`SessionError::AlreadyPlaying`] if bound to a different table.
    pub fn bind_play(&mut self, user_id: UserId, table_id: TableId) -> Result<(), SessionError> {
        let session = self.get_mut(user_id)?;
        match session.play_table {
            Some(current) if current != table_id => Err(SessionError::AlreadyPlaying {
                user_id,
                table_id: current,
            }),
            _ => {
                session.play_table = Some(table_id);
                session.spectating.remove(&table_id);
                Ok(())
            }
        }
    }

    pub fn bind_spectate(&mut self, user_id: UserId, table_id: TableId) -> Result<(), SessionError> {
        let session = self.get_mut(user_id)?;
        if session.play_table != Some(table_id) {
            session.spectating.insert(table_id);
        }
        Ok(())
    }

    /// Drops whatever binding the user has to `table_id`.
    pub fn unbind(&mut self, user_id: UserId, table_id: TableId) {
        if let Some(session) = self.sessions.get_mut(&user_id) {
            if session.play_table == Some(table_id) {
                session.play_table = None;
            }
            session.spectating.remove(&table_id);
        }
    }

    /// Drops every binding to a table for which `keep` returns `false`.
    pub fn retain_tables(&mut self, keep: impl Fn(TableId) -> bool) {
        for session in self.sessions.values_mut() {
            if session.play_table.is_some_and(|t| !keep(t)) {
                session.play_table = None;
            }
            session.spectating.retain(|&t| keep(t));
        }
    }

    /// Expires every disconnected session past its grace period.
    ///
    /// Returns the expired sessions, bindings included, so the caller can
    /// vacate seats and drop spectators before [`cleanup_expired`]
    /// discards them.
    ///
    /// [`cleanup_expired`]: Self::cleanup_expired
    pub fn expire_stale(&mut self) -> Vec<Session> {
        let grace = self.config.grace();
        let mut expired = Vec::new();
        for session in self.sessions.values_mut() {
            if let SessionState::Disconnected { since } = session.state {
                if since.elapsed() >= grace {
                    session.state = SessionState::Expired;
                    tracing::info!(user_id = %session.user_id, "session expired (grace period elapsed)");
                    expired.push(session.clone());
                }
            }
        }
        expired.sort_by_key(|s| s.user_id);
        expired
    }

    /// Removes expired sessions.
    pub fn cleanup_expired(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.state != SessionState::Expired);
        before - self.sessions.len()
    }

    pub fn get(&self, user_id: UserId) -> Option<&Session> {
        self.sessions.get(&user_id)
    }

    fn get_mut(&mut self, user_id: UserId) -> Result<&mut Session, SessionError> {
        self.sessions
            .get_mut(&user_id)
            .ok_or(SessionError::NotFound(user_id))
    }

    /// Sessions in any state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================
