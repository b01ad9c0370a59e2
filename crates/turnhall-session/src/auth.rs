//! Authentication hook.
//!
//! Turnhall doesn't authenticate anyone itself. The [`Authenticator`]
//! trait is the seam: the bridge hands it the token from the client's
//! handshake and gets back a [`UserId`] or an error. Plug in JWT
//! validation, an auth service call, or anything else.

use turnhall_protocol::UserId;

use crate::SessionError;

/// Validates a client's auth token and returns their identity.
///
/// `Send + Sync + 'static` because one authenticator is shared by every
/// connection task for the life of the server.
///
/// # Example
///
/// ```rust
/// use turnhall_protocol::UserId;
/// use turnhall_session::{Authenticator, SessionError};
///
/// struct FixedUsers;
///
/// impl Authenticator for FixedUsers {
///     async fn authenticate(&self, token: &str) -> Result<UserId, SessionError> {
///         match token {
///             "alice" => Ok(UserId(1)),
///             "bob" => Ok(UserId(2)),
///             other => Err(SessionError::AuthFailed(format!("unknown user {other}"))),
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `token` and returns who it belongs to.
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<UserId, SessionError>> + Send;
}

/// Accepts any numeric token and uses it as the user ID.
///
/// For local development and tests only: anyone can claim any identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevAuthenticator;

impl Authenticator for DevAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserId, SessionError> {
        let id: u64 = token
            .trim()
            .parse()
            .map_err(|_| SessionError::AuthFailed("token must be a number".into()))?;
        if id == 0 {
            return Err(SessionError::AuthFailed("user 0 is reserved".into()));
        }
        Ok(UserId(id))
    }
}
