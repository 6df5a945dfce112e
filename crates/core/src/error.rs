//! Domain error model.

use serde::Serialize;
use thiserror::Error;

/// Result type used across the auth core.
pub type DomainResult<T> = Result<T, DomainError>;

/// Machine-checkable category of a [`DomainError`].
///
/// Route layers match on this to pick a transport response without parsing
/// messages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Expired,
    Conflict,
    Unauthorized,
    Forbidden,
    Storage,
    Internal,
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Expired => "expired",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Domain-level error.
///
/// Every variant carries a human-readable message. Absence on read paths is
/// not represented here: lookups resolve to `None` instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A session or token is past its expiry.
    #[error("expired: {0}")]
    Expired(String),

    /// A uniqueness or state conflict (duplicate email, consumed token, role in use).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Credentials were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller is known but not allowed (blocked user, missing permission).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The storage adapter failed; the outcome of the operation is unknown.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A local facility failed (entropy source, password hasher).
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn expired(msg: impl Into<String>) -> Self {
        Self::Expired(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_) => ErrorKind::Validation,
            DomainError::NotFound(_) => ErrorKind::NotFound,
            DomainError::Expired(_) => ErrorKind::Expired,
            DomainError::Conflict(_) => ErrorKind::Conflict,
            DomainError::Unauthorized(_) => ErrorKind::Unauthorized,
            DomainError::Forbidden(_) => ErrorKind::Forbidden,
            DomainError::Storage(_) => ErrorKind::Storage,
            DomainError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            DomainError::Validation(m)
            | DomainError::NotFound(m)
            | DomainError::Expired(m)
            | DomainError::Conflict(m)
            | DomainError::Unauthorized(m)
            | DomainError::Forbidden(m)
            | DomainError::Storage(m)
            | DomainError::Internal(m) => m,
        }
    }

    /// Storage failures leave the outcome unknown; idempotent operations may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Storage(_))
    }
}
