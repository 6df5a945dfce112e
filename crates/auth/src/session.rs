use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult, Entity, UserId};

use crate::secret;

/// Opaque session identifier (the value a route layer stores in its cookie).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh, non-guessable session id.
    pub fn generate() -> DomainResult<Self> {
        Ok(Self(secret::opaque_hex()?))
    }

    /// Wrap an id received from a transport layer.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, log-safe prefix of the id.
    pub fn fingerprint(&self) -> &str {
        let end = self.0.char_indices().nth(8).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl core::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SessionId({}…)", self.fingerprint())
    }
}

impl core::fmt::Display for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `now + ttl`, or a validation error when the result leaves the representable range.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DomainResult<DateTime<Utc>> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| DomainError::validation("ttl out of range"))
}

/// Server-side record binding a user to an expiration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub expires: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: SessionId,
        user_id: UserId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> DomainResult<Self> {
        Ok(Self {
            id,
            user_id,
            expires: expiry_after(now, ttl)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Active means `expires > now`; a session expiring exactly now is expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires > now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_active(now)
    }
}

impl Entity for Session {
    type Id = SessionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_boundary_is_exclusive() {
        let now = Utc::now();
        let session = Session::new(
            SessionId::generate().unwrap(),
            UserId::new(),
            now,
            Duration::seconds(10),
        )
        .unwrap();

        assert!(session.is_active(now));
        assert!(session.is_active(now + Duration::seconds(9)));
        assert!(session.is_expired(now + Duration::seconds(10)));
    }

    #[test]
    fn overflowing_ttl_is_a_validation_error() {
        let err = Session::new(SessionId::from_raw("s"), UserId::new(), Utc::now(), Duration::MAX)
            .unwrap_err();
        assert_eq!(err.kind(), warden_core::ErrorKind::Validation);
    }

    #[test]
    fn debug_does_not_leak_full_id() {
        let id = SessionId::generate().unwrap();
        let debug = format!("{id:?}");
        assert!(!debug.contains(id.as_str()));
        assert!(debug.contains(id.fingerprint()));
    }

    #[test]
    fn fingerprint_of_short_id() {
        assert_eq!(SessionId::from_raw("abc").fingerprint(), "abc");
    }
}
