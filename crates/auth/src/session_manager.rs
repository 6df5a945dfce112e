//! Session lifecycle.
//!
//! Per user: `NoActiveSession -> Active -> {Expired, Invalidated, Replaced}`.
//!
//! ## Single active session
//!
//! `create_session` first invalidates the user's active sessions, then inserts
//! the new one. The insert itself is exclusive at the adapter level (see
//! [`AuthStore::create_session`]), so two concurrent logins for the same user
//! end with exactly one active session: last write wins.
//!
//! ## Lazy expiration
//!
//! An expired session is deleted when it is next validated. Rows nobody looks
//! at are left for [`SessionManager::delete_expired_sessions`].

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use warden_core::{Clock, DomainError, DomainResult, UserId};

use crate::store::{AuthStore, store_err};
use crate::session::expiry_after;
use crate::{Session, SessionId, User};

pub struct SessionManager<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S> core::fmt::Debug for SessionManager<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

impl<S: AuthStore> SessionManager<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Start a session for `user_id`, replacing any active one.
    pub async fn create_session(&self, user_id: UserId, ttl: Duration) -> DomainResult<Session> {
        if ttl <= Duration::zero() {
            return Err(DomainError::validation("session ttl must be positive"));
        }

        let now = self.clock.now();
        let session = Session::new(SessionId::generate()?, user_id, now, ttl)?;
        let replaced = self
            .store
            .invalidate_user_sessions(user_id, now)
            .await
            .map_err(store_err("invalidate_user_sessions"))?;

        let session = self
            .store
            .create_session(session)
            .await
            .map_err(store_err("create_session"))?;

        info!(
            %user_id,
            session = session.id.fingerprint(),
            expires = %session.expires,
            replaced,
            "session created"
        );
        Ok(session)
    }

    /// Resolve a session to its user.
    ///
    /// Missing, expired (deleted as a side effect) or orphaned sessions all
    /// resolve to `None`.
    pub async fn validate_session(&self, session_id: &SessionId) -> DomainResult<Option<User>> {
        let Some(session) = self
            .store
            .get_session(session_id)
            .await
            .map_err(store_err("get_session"))?
        else {
            debug!(session = session_id.fingerprint(), "session not found");
            return Ok(None);
        };

        let now = self.clock.now();
        if session.is_expired(now) {
            self.store
                .delete_session(session_id)
                .await
                .map_err(store_err("delete_session"))?;
            warn!(
                session = session_id.fingerprint(),
                user_id = %session.user_id,
                "expired session removed"
            );
            return Ok(None);
        }

        let user = self
            .store
            .get_user_by_id(session.user_id)
            .await
            .map_err(store_err("get_user_by_id"))?;
        if user.is_none() {
            warn!(
                session = session_id.fingerprint(),
                user_id = %session.user_id,
                "session references a missing user"
            );
        } else {
            debug!(session = session_id.fingerprint(), "session validated");
        }
        Ok(user)
    }

    /// Delete a session. Deleting a missing session is not an error.
    pub async fn destroy_session(&self, session_id: &SessionId) -> DomainResult<()> {
        let removed = self
            .store
            .delete_session(session_id)
            .await
            .map_err(store_err("delete_session"))?;
        info!(session = session_id.fingerprint(), removed, "session destroyed");
        Ok(())
    }

    /// Delete every active session of `user_id`; returns how many.
    pub async fn invalidate_all_user_sessions(&self, user_id: UserId) -> DomainResult<u64> {
        let count = self
            .store
            .invalidate_user_sessions(user_id, self.clock.now())
            .await
            .map_err(store_err("invalidate_user_sessions"))?;
        debug!(%user_id, count, "invalidated active sessions");
        Ok(count)
    }

    /// Delete every session of `user_id`, expired ones included.
    pub async fn delete_all_user_sessions(&self, user_id: UserId) -> DomainResult<u64> {
        self.store
            .delete_user_sessions(user_id)
            .await
            .map_err(store_err("delete_user_sessions"))
    }

    pub async fn get_active_sessions(&self, user_id: UserId) -> DomainResult<Vec<Session>> {
        let sessions = self
            .store
            .get_active_sessions(user_id, self.clock.now())
            .await
            .map_err(store_err("get_active_sessions"))?;
        debug!(%user_id, count = sessions.len(), "active sessions retrieved");
        Ok(sessions)
    }

    /// Extend an active session to `now + ttl`.
    ///
    /// Expired sessions are removed instead and yield `None`, like
    /// [`Self::validate_session`].
    pub async fn refresh_session(
        &self,
        session_id: &SessionId,
        ttl: Duration,
    ) -> DomainResult<Option<Session>> {
        if ttl <= Duration::zero() {
            return Err(DomainError::validation("session ttl must be positive"));
        }

        let Some(session) = self
            .store
            .get_session(session_id)
            .await
            .map_err(store_err("get_session"))?
        else {
            return Ok(None);
        };

        let now = self.clock.now();
        if session.is_expired(now) {
            self.store
                .delete_session(session_id)
                .await
                .map_err(store_err("delete_session"))?;
            return Ok(None);
        }
        let expires = expiry_after(now, ttl)?;

        let refreshed = self
            .store
            .update_session_expiry(session_id, expires, now)
            .await
            .map_err(store_err("update_session_expiry"))?;
        if let Some(s) = &refreshed {
            debug!(
                session = session_id.fingerprint(),
                expires = %s.expires,
                "session expiry updated"
            );
        }
        Ok(refreshed)
    }

    /// Purge all sessions with `expires <= now`; returns how many.
    pub async fn delete_expired_sessions(&self) -> DomainResult<u64> {
        let count = self
            .store
            .delete_expired_sessions(self.clock.now())
            .await
            .map_err(store_err("delete_expired_sessions"))?;
        info!(deleted = count, "expired sessions deleted");
        Ok(count)
    }
}
