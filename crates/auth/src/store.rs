//! Storage adapter boundary.
//!
//! The auth core never talks to a database directly. Everything it persists
//! goes through [`AuthStore`], implemented by a persistence collaborator
//! (`warden-infra` ships an in-memory one).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::error;

use warden_core::{DomainError, PermissionId, RoleId, UserId};

use crate::{
    Permission, PermissionPatch, Role, RolePatch, Session, SessionId, Token, TokenValue, User,
    UserPatch,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage adapter error.
///
/// `Backend` covers anything infrastructural (network, driver, poisoned lock):
/// the outcome of the call is unknown.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Convert into a [`DomainError`], logging backend failures with the
    /// operation that hit them.
    pub fn into_domain(self, operation: &'static str) -> DomainError {
        match self {
            StoreError::NotFound { .. } => DomainError::not_found(self.to_string()),
            StoreError::Conflict(msg) => DomainError::conflict(msg),
            StoreError::Backend(msg) => {
                error!(operation, error = %msg, "auth storage operation failed");
                DomainError::storage(format!("{operation}: {msg}"))
            }
        }
    }
}

/// Map-err helper: `.map_err(store_err("create_session"))`.
pub fn store_err(operation: &'static str) -> impl FnOnce(StoreError) -> DomainError {
    move |e| e.into_domain(operation)
}

/// Persistence contract for users, sessions, tokens, roles and permissions.
///
/// ## Ownership
///
/// Every returned value is a detached copy. Mutating it never changes stored
/// state; only the adapter's update operations do.
///
/// ## Atomicity requirements
///
/// The core performs no locking of its own. Adapters must guarantee:
/// - **Unique email**: `create_user`/`update_user` fail with `Conflict` on collision
///   (case-insensitive, emails arrive normalized).
/// - **Unique role name** and **unique token value**: `Conflict` on collision.
/// - **Exclusive session insert**: `create_session` removes every other active
///   session of the same user in the same atomic step as the insert, so racing
///   logins settle on exactly one survivor.
/// - **Conditional consume**: `mark_token_consumed` flips the consumed flag only
///   if it is still unset, and reports whether this call did it.
///
/// ## Absence
///
/// Lookups return `Ok(None)` for missing records. Deletes return whether a
/// record was removed and are idempotent. Updates of missing records fail with
/// `StoreError::NotFound`.
#[async_trait]
pub trait AuthStore: Send + Sync {
    // ── Users ────────────────────────────────────────────────────────────────

    async fn create_user(&self, user: User) -> StoreResult<User>;

    async fn update_user(
        &self,
        user_id: UserId,
        patch: &UserPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<User>;

    async fn delete_user(&self, user_id: UserId) -> StoreResult<bool>;

    async fn get_user_by_id(&self, user_id: UserId) -> StoreResult<Option<User>>;

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn get_all_users(&self) -> StoreResult<Vec<User>>;

    async fn get_user_count(&self) -> StoreResult<u64>;

    async fn count_users_with_role(&self, role_id: RoleId) -> StoreResult<u64>;

    // ── Sessions ─────────────────────────────────────────────────────────────

    /// Insert a session, atomically dropping any other active session of its user.
    async fn create_session(&self, session: Session) -> StoreResult<Session>;

    async fn get_session(&self, session_id: &SessionId) -> StoreResult<Option<Session>>;

    /// Move the expiry of a session. `Ok(None)` if it does not exist.
    async fn update_session_expiry(
        &self,
        session_id: &SessionId,
        expires: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>>;

    async fn delete_session(&self, session_id: &SessionId) -> StoreResult<bool>;

    /// Delete the user's sessions with `expires > now`; returns how many.
    async fn invalidate_user_sessions(&self, user_id: UserId, now: DateTime<Utc>)
    -> StoreResult<u64>;

    /// Delete every session of the user regardless of expiry.
    async fn delete_user_sessions(&self, user_id: UserId) -> StoreResult<u64>;

    async fn get_active_sessions(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>>;

    /// Delete all sessions with `expires <= now`; returns how many.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    // ── Tokens ───────────────────────────────────────────────────────────────

    async fn create_token(&self, token: Token) -> StoreResult<Token>;

    async fn get_token(&self, value: &TokenValue) -> StoreResult<Option<Token>>;

    /// Conditionally mark a token consumed.
    ///
    /// Returns `Ok(true)` only for the single call that flipped the flag.
    /// Missing or already-consumed tokens yield `Ok(false)`.
    async fn mark_token_consumed(&self, value: &TokenValue, now: DateTime<Utc>)
    -> StoreResult<bool>;

    async fn delete_token(&self, value: &TokenValue) -> StoreResult<bool>;

    async fn delete_user_tokens(&self, user_id: UserId) -> StoreResult<u64>;

    async fn get_all_tokens(&self) -> StoreResult<Vec<Token>>;

    /// Delete all tokens with `expires <= now`; returns how many.
    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    // ── Roles ────────────────────────────────────────────────────────────────

    async fn create_role(&self, role: Role) -> StoreResult<Role>;

    async fn update_role(
        &self,
        role_id: RoleId,
        patch: &RolePatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Role>;

    /// Delete a role and its permission links.
    async fn delete_role(&self, role_id: RoleId) -> StoreResult<bool>;

    /// Delete a role only while no user references it, as one atomic step.
    ///
    /// `Conflict` while the role is assigned; `Ok(false)` when it is absent.
    async fn delete_role_if_unused(&self, role_id: RoleId) -> StoreResult<bool>;

    async fn get_role_by_id(&self, role_id: RoleId) -> StoreResult<Option<Role>>;

    async fn get_all_roles(&self) -> StoreResult<Vec<Role>>;

    // ── Permissions ──────────────────────────────────────────────────────────

    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission>;

    async fn update_permission(
        &self,
        permission_id: PermissionId,
        patch: &PermissionPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Permission>;

    async fn delete_permission(&self, permission_id: PermissionId) -> StoreResult<bool>;

    async fn get_permission_by_id(
        &self,
        permission_id: PermissionId,
    ) -> StoreResult<Option<Permission>>;

    async fn get_all_permissions(&self) -> StoreResult<Vec<Permission>>;

    // ── Links ────────────────────────────────────────────────────────────────

    /// Idempotent. Fails with `NotFound` if either side is missing.
    async fn assign_permission_to_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> StoreResult<()>;

    /// Idempotent; returns whether a link was removed.
    async fn remove_permission_from_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> StoreResult<bool>;

    async fn get_permissions_for_role(&self, role_id: RoleId) -> StoreResult<Vec<Permission>>;

    /// Idempotent. Fails with `NotFound` if either side is missing.
    async fn assign_permission_to_user(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> StoreResult<()>;

    /// Idempotent; returns whether a link was removed.
    async fn remove_permission_from_user(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> StoreResult<bool>;

    async fn get_permissions_for_user(&self, user_id: UserId) -> StoreResult<Vec<Permission>>;

    /// Remove every direct grant of a user; returns how many links were removed.
    async fn remove_user_permissions(&self, user_id: UserId) -> StoreResult<u64>;

    /// Remove a permission from every role and user; returns how many links were removed.
    async fn remove_permission_links(&self, permission_id: PermissionId) -> StoreResult<u64>;
}

#[cfg(test)]
mod tests {
    use warden_core::ErrorKind;

    use super::*;

    #[test]
    fn store_errors_map_to_domain_kinds() {
        assert_eq!(
            StoreError::not_found("user", UserId::new()).into_domain("get").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            StoreError::conflict("email taken").into_domain("create_user").kind(),
            ErrorKind::Conflict
        );

        let err = StoreError::backend("connection reset").into_domain("create_session");
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.is_retryable());
        assert!(err.message().contains("create_session"));
    }
}
