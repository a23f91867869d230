//! Who is signed in.

use crate::types::UserId;
use parking_lot::RwLock;

/// The current authentication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    /// Nobody is signed in.
    SignedOut,
    /// Local-only usage; visits are never created or synced.
    Anonymous,
    /// A signed-in user.
    Authenticated {
        /// The user's id.
        user_id: UserId,
    },
}

impl Session {
    /// Creates an authenticated session.
    pub fn authenticated(user_id: impl Into<UserId>) -> Self {
        Session::Authenticated {
            user_id: user_id.into(),
        }
    }

    /// Returns the user id of an authenticated session.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Session::Authenticated { user_id } => Some(user_id),
            Session::SignedOut | Session::Anonymous => None,
        }
    }

    /// Returns `true` for an authenticated session.
    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }
}

/// Supplies the current session to components that need an identity.
pub trait SessionProvider: Send + Sync {
    /// Returns the session as of now.
    fn current_session(&self) -> Session;
}

/// A session provider holding a settable session.
#[derive(Debug)]
pub struct StaticSession {
    session: RwLock<Session>,
}

impl StaticSession {
    /// Creates a provider with the given session.
    pub fn new(session: Session) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }

    /// Replaces the session.
    pub fn set(&self, session: Session) {
        *self.session.write() = session;
    }
}

impl SessionProvider for StaticSession {
    fn current_session(&self) -> Session {
        self.session.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_authenticated_sessions_have_user_ids() {
        assert_eq!(Session::authenticated("u-1").user_id(), Some("u-1"));
        assert_eq!(Session::Anonymous.user_id(), None);
        assert!(!Session::SignedOut.is_authenticated());
    }

    #[test]
    fn static_session_can_change() {
        let provider = StaticSession::new(Session::SignedOut);
        provider.set(Session::authenticated("u-2"));
        assert_eq!(provider.current_session().user_id(), Some("u-2"));
    }
}
