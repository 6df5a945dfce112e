use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use warden_core::{DomainError, DomainResult, Entity, UserId};

use crate::secret;
use crate::session::expiry_after;

/// Opaque single-use credential value (e-mail verification, password reset).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenValue(String);

impl TokenValue {
    pub fn generate() -> DomainResult<Self> {
        Ok(Self(secret::opaque_hex()?))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn fingerprint(&self) -> &str {
        let end = self.0.char_indices().nth(8).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl core::fmt::Debug for TokenValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "TokenValue({}…)", self.fingerprint())
    }
}

impl core::fmt::Display for TokenValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted token record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: TokenValue,
    pub user_id: UserId,
    pub email: String,
    pub expires: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn new(
        value: TokenValue,
        user_id: UserId,
        email: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> DomainResult<Self> {
        Ok(Self {
            value,
            user_id,
            email: email.into(),
            expires: expiry_after(now, ttl)?,
            created_at: now,
            consumed_at: None,
        })
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }

    /// Check a token against the presenting user, without mutating anything.
    ///
    /// Reasons are reported in a fixed order: owner first, then consumption,
    /// then expiry.
    pub fn check(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), TokenRejection> {
        if self.user_id != user_id {
            return Err(TokenRejection::UserMismatch);
        }
        if self.is_consumed() {
            return Err(TokenRejection::AlreadyConsumed);
        }
        if self.is_expired(now) {
            return Err(TokenRejection::Expired);
        }
        Ok(())
    }
}

impl Entity for Token {
    type Id = TokenValue;

    fn id(&self) -> &Self::Id {
        &self.value
    }
}

/// Why a token could not be validated or consumed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRejection {
    #[error("token not found")]
    NotFound,

    #[error("token belongs to a different user")]
    UserMismatch,

    #[error("token has expired")]
    Expired,

    #[error("token was already consumed")]
    AlreadyConsumed,
}

impl From<TokenRejection> for DomainError {
    fn from(value: TokenRejection) -> Self {
        match value {
            TokenRejection::NotFound => DomainError::not_found(value.to_string()),
            TokenRejection::UserMismatch => DomainError::forbidden(value.to_string()),
            TokenRejection::Expired => DomainError::expired(value.to_string()),
            TokenRejection::AlreadyConsumed => DomainError::conflict(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use warden_core::ErrorKind;

    use super::*;

    fn token(owner: UserId, now: DateTime<Utc>) -> Token {
        let value = TokenValue::generate().unwrap();
        Token::new(value, owner, "alice@x.com", now, Duration::seconds(900)).unwrap()
    }

    #[test]
    fn fresh_token_checks_ok() {
        let now = Utc::now();
        let owner = UserId::new();
        assert_eq!(token(owner, now).check(owner, now), Ok(()));
    }

    #[test]
    fn user_mismatch_wins_over_other_reasons() {
        let now = Utc::now();
        let owner = UserId::new();
        let mut t = token(owner, now);
        t.consumed_at = Some(now);

        let later = now + Duration::seconds(901);
        assert_eq!(t.check(UserId::new(), later), Err(TokenRejection::UserMismatch));
        assert_eq!(t.check(owner, later), Err(TokenRejection::AlreadyConsumed));
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let now = Utc::now();
        let owner = UserId::new();
        let t = token(owner, now);
        assert_eq!(t.check(owner, now + Duration::seconds(900)), Err(TokenRejection::Expired));
    }

    #[test]
    fn rejections_map_to_error_kinds() {
        assert_eq!(DomainError::from(TokenRejection::NotFound).kind(), ErrorKind::NotFound);
        assert_eq!(DomainError::from(TokenRejection::UserMismatch).kind(), ErrorKind::Forbidden);
        assert_eq!(DomainError::from(TokenRejection::Expired).kind(), ErrorKind::Expired);
        assert_eq!(DomainError::from(TokenRejection::AlreadyConsumed).kind(), ErrorKind::Conflict);
    }
}
