//! User sessions for Turnhall.
//!
//! This crate handles the lifecycle of a user's presence on the server:
//!
//! 1. **Authentication**: turning a handshake token into a [`UserId`]
//!    ([`Authenticator`] trait). The engine itself never checks
//!    credentials.
//! 2. **Session tracking**: who is connected, and through which
//!    connection ([`SessionManager`]).
//! 3. **Reconnection**: a user who drops keeps their session, and with it
//!    their table bindings, for a grace period. Coming back with the same
//!    identity resumes it; letting the grace period run out hands the
//!    bindings to the caller so it can apply the vacancy policy.
//!
//! ```text
//! Bridge (above)   ← binds connections to sessions, routes frames
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Protocol (below) ← UserId, TableId
//! ```
//!
//! [`UserId`]: turnhall_protocol::UserId

mod auth;
mod error;
mod manager;
mod session;

pub use auth::{Authenticator, DevAuthenticator};
pub use error::SessionError;
pub use manager::SessionManager;
pub use session::{Session, SessionConfig, SessionState};
