//! Auth facade consumed by route handlers.
//!
//! `AuthService` composes the session manager, token manager and permission
//! resolver, and owns the policies that span several entities:
//!
//! - **Blocking** writes `blocked = true` and then invalidates every active
//!   session of the user before returning. `authenticate` refuses blocked users
//!   on its own, so a failed invalidation never leaves a usable session.
//! - **User deletion** runs sessions -> tokens -> direct grants -> user record.
//!   Each step is idempotent and the record goes last, so a failed deletion can
//!   simply be retried.
//! - **Role deletion** is rejected while any user references the role.
//! - **Permission deletion** first unlinks the permission from every role and
//!   user, then deletes it.
//! - **Password change/reset** invalidates every active session of the user.
//!
//! Every operation returns a [`DomainResult`]: a value, or a typed failure.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use warden_core::{Clock, DomainError, DomainResult, PermissionId, RoleId, SystemClock, UserId};

use crate::config::AuthConfig;
use crate::password::{hash_password, verify_dummy, verify_password};
use crate::resolver::{AuthorizationExplanation, PermissionResolver};
use crate::session_manager::SessionManager;
use crate::store::{AuthStore, store_err};
use crate::token_manager::{TokenManager, TokenOutcome};
use crate::user::{normalize_email, validate_password};
use crate::{
    NewPermission, NewRole, NewUser, Permission, PermissionKey, PermissionPatch, Role, RolePatch,
    Session, SessionId, Token, TokenValue, User, UserPatch,
};

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginOutcome {
    pub session: Session,
    pub user: User,
}

/// A freshly issued token and who it was issued to (for the mailer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub user_id: UserId,
    pub email: String,
    pub value: TokenValue,
}

/// Counts removed by one maintenance pass.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub sessions: u64,
    pub tokens: u64,
}

pub struct AuthService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    sessions: SessionManager<S>,
    tokens: TokenManager<S>,
    resolver: PermissionResolver<S>,
}

impl<S> Clone for AuthService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            sessions: self.sessions.clone(),
            tokens: self.tokens.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

impl<S> core::fmt::Debug for AuthService<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: AuthStore> AuthService<S> {
    pub fn new(store: Arc<S>, config: AuthConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    pub fn with_clock(store: Arc<S>, clock: Arc<dyn Clock>, config: AuthConfig) -> Self {
        Self {
            sessions: SessionManager::new(Arc::clone(&store), Arc::clone(&clock)),
            tokens: TokenManager::new(Arc::clone(&store), Arc::clone(&clock)),
            resolver: PermissionResolver::new(Arc::clone(&store)),
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager<S> {
        &self.sessions
    }

    pub fn tokens(&self) -> &TokenManager<S> {
        &self.tokens
    }

    pub fn resolver(&self) -> &PermissionResolver<S> {
        &self.resolver
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a new account. The email must not be in use.
    pub async fn register_user(&self, input: NewUser) -> DomainResult<User> {
        input.validate()?;
        if let Some(role_id) = input.role_id {
            self.require_role(role_id).await?;
        }

        // Early exit before paying for the hash; the adapter's unique index is authoritative.
        let email = normalize_email(&input.email);
        if self.fetch_user_by_email(&email).await?.is_some() {
            return Err(DomainError::conflict(format!("email '{email}' is already registered")));
        }

        let hash = hash_password(&input.password, self.config.password_cost)?;
        let user = input.into_user(UserId::new(), hash, self.clock.now());
        let user = self
            .store
            .create_user(user)
            .await
            .map_err(store_err("create_user"))?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: UserId) -> DomainResult<Option<User>> {
        self.store
            .get_user_by_id(user_id)
            .await
            .map_err(store_err("get_user_by_id"))
    }

    pub async fn get_user_by_email(&self, email: &str) -> DomainResult<Option<User>> {
        self.fetch_user_by_email(&normalize_email(email)).await
    }

    pub async fn list_users(&self) -> DomainResult<Vec<User>> {
        self.store
            .get_all_users()
            .await
            .map_err(store_err("get_all_users"))
    }

    pub async fn user_count(&self) -> DomainResult<u64> {
        self.store
            .get_user_count()
            .await
            .map_err(store_err("get_user_count"))
    }

    /// Apply a patch to a user.
    ///
    /// Setting `blocked = true` also invalidates every active session of the
    /// user before this returns.
    pub async fn update_user(&self, user_id: UserId, patch: UserPatch) -> DomainResult<User> {
        patch.validate()?;
        if let Some(Some(role_id)) = patch.role_id {
            self.require_role(role_id).await?;
        }
        if patch.is_empty() {
            return self.require_user(user_id).await;
        }

        let user = self
            .store
            .update_user(user_id, &patch, self.clock.now())
            .await
            .map_err(store_err("update_user"))?;
        info!(%user_id, ?patch, "user updated");

        if patch.blocked == Some(true) {
            let invalidated = self.sessions.invalidate_all_user_sessions(user_id).await?;
            info!(%user_id, invalidated, "user blocked, sessions invalidated");
        }

        Ok(user)
    }

    pub async fn block_user(&self, user_id: UserId) -> DomainResult<User> {
        self.update_user(user_id, UserPatch::blocked(true)).await
    }

    pub async fn unblock_user(&self, user_id: UserId) -> DomainResult<User> {
        self.update_user(user_id, UserPatch::blocked(false)).await
    }

    /// Block several users, in order. Stops at the first failure; users before
    /// it stay blocked.
    pub async fn block_users(&self, user_ids: &[UserId]) -> DomainResult<Vec<User>> {
        let mut blocked = Vec::with_capacity(user_ids.len());
        for &user_id in user_ids {
            blocked.push(self.block_user(user_id).await?);
        }
        Ok(blocked)
    }

    /// Unblock several users, in order. Stops at the first failure.
    pub async fn unblock_users(&self, user_ids: &[UserId]) -> DomainResult<Vec<User>> {
        let mut unblocked = Vec::with_capacity(user_ids.len());
        for &user_id in user_ids {
            unblocked.push(self.unblock_user(user_id).await?);
        }
        Ok(unblocked)
    }

    /// Set or clear the role of a user.
    pub async fn assign_role(
        &self,
        user_id: UserId,
        role_id: Option<RoleId>,
    ) -> DomainResult<User> {
        self.update_user(user_id, UserPatch::role(role_id)).await
    }

    /// Delete a user with all of its sessions, tokens and direct grants.
    pub async fn delete_user(&self, user_id: UserId) -> DomainResult<()> {
        self.require_user(user_id).await?;

        let sessions = self.sessions.delete_all_user_sessions(user_id).await?;
        let tokens = self.tokens.delete_user_tokens(user_id).await?;
        let grants = self
            .store
            .remove_user_permissions(user_id)
            .await
            .map_err(store_err("remove_user_permissions"))?;
        self.store
            .delete_user(user_id)
            .await
            .map_err(store_err("delete_user"))?;

        info!(%user_id, sessions, tokens, grants, "user deleted");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Credentials & sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify credentials and start a session, replacing any active one.
    pub async fn login(&self, email: &str, password: &str) -> DomainResult<LoginOutcome> {
        let email = normalize_email(email);
        let Some(user) = self.fetch_user_by_email(&email).await? else {
            warn!(%email, "login for unknown email");
            verify_dummy(password, self.config.password_cost)?;
            return Err(DomainError::unauthorized("invalid credentials"));
        };

        if !verify_password(password, &user.password_hash)? {
            warn!(user_id = %user.id, "login with wrong password");
            return Err(DomainError::unauthorized("invalid credentials"));
        }
        if user.is_blocked() {
            warn!(user_id = %user.id, "login refused for blocked user");
            return Err(DomainError::forbidden("user is blocked"));
        }

        let session = self
            .sessions
            .create_session(user.id, self.config.session_ttl)
            .await?;
        Ok(LoginOutcome { session, user })
    }

    /// Resolve a session id to an operating user.
    ///
    /// Sessions of blocked users are deleted and resolve to `None`.
    pub async fn authenticate(&self, session_id: &SessionId) -> DomainResult<Option<User>> {
        let Some(user) = self.sessions.validate_session(session_id).await? else {
            return Ok(None);
        };
        if user.is_blocked() {
            self.sessions.destroy_session(session_id).await?;
            warn!(user_id = %user.id, "session of blocked user rejected");
            return Ok(None);
        }
        Ok(Some(user))
    }

    pub async fn logout(&self, session_id: &SessionId) -> DomainResult<()> {
        self.sessions.destroy_session(session_id).await
    }

    /// End every active session of a user; returns how many.
    pub async fn logout_everywhere(&self, user_id: UserId) -> DomainResult<u64> {
        self.sessions.invalidate_all_user_sessions(user_id).await
    }

    /// Extend a session by the configured ttl.
    pub async fn refresh_session(&self, session_id: &SessionId) -> DomainResult<Option<Session>> {
        self.sessions
            .refresh_session(session_id, self.config.session_ttl)
            .await
    }

    pub async fn active_sessions(&self, user_id: UserId) -> DomainResult<Vec<Session>> {
        self.sessions.get_active_sessions(user_id).await
    }

    /// Change a password after re-verifying the current one.
    pub async fn change_password(
        &self,
        user_id: UserId,
        current: &str,
        new_password: &str,
    ) -> DomainResult<()> {
        validate_password(new_password)?;
        let user = self.require_user(user_id).await?;
        if !verify_password(current, &user.password_hash)? {
            warn!(%user_id, "password change with wrong current password");
            return Err(DomainError::unauthorized("invalid credentials"));
        }
        self.set_password(user_id, new_password).await
    }

    /// Issue a password reset token for the account behind `email`.
    pub async fn request_password_reset(&self, email: &str) -> DomainResult<IssuedToken> {
        let email = normalize_email(email);
        let user = self
            .fetch_user_by_email(&email)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("no user with email '{email}'")))?;
        if user.is_blocked() {
            return Err(DomainError::forbidden("user is blocked"));
        }

        let value = self
            .tokens
            .create_token(user.id, &user.email, self.config.token_ttl)
            .await?;
        Ok(IssuedToken {
            user_id: user.id,
            email: user.email,
            value,
        })
    }

    /// Consume a reset token and set a new password.
    pub async fn reset_password(
        &self,
        token: &TokenValue,
        user_id: UserId,
        new_password: &str,
    ) -> DomainResult<()> {
        validate_password(new_password)?;
        self.tokens
            .consume_token(token, user_id)
            .await?
            .map_err(DomainError::from)?;
        self.set_password(user_id, new_password).await
    }

    async fn set_password(&self, user_id: UserId, new_password: &str) -> DomainResult<()> {
        let hash = hash_password(new_password, self.config.password_cost)?;
        let patch = UserPatch {
            password_hash: Some(hash),
            ..Default::default()
        };
        self.store
            .update_user(user_id, &patch, self.clock.now())
            .await
            .map_err(store_err("update_user"))?;

        let invalidated = self.sessions.invalidate_all_user_sessions(user_id).await?;
        info!(%user_id, invalidated, "password changed, sessions invalidated");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tokens
    // ─────────────────────────────────────────────────────────────────────────

    /// Issue a token to an existing user's email address.
    pub async fn issue_token(&self, user_id: UserId) -> DomainResult<TokenValue> {
        let user = self.require_user(user_id).await?;
        self.tokens
            .create_token(user.id, &user.email, self.config.token_ttl)
            .await
    }

    pub async fn validate_token(
        &self,
        token: &TokenValue,
        user_id: UserId,
    ) -> DomainResult<TokenOutcome> {
        self.tokens.validate_token(token, user_id).await
    }

    pub async fn consume_token(
        &self,
        token: &TokenValue,
        user_id: UserId,
    ) -> DomainResult<TokenOutcome> {
        self.tokens.consume_token(token, user_id).await
    }

    pub async fn list_tokens(&self) -> DomainResult<Vec<Token>> {
        self.tokens.get_all_tokens().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_role(&self, input: NewRole) -> DomainResult<Role> {
        input.validate()?;
        for &permission_id in &input.permissions {
            self.require_permission(permission_id).await?;
        }

        let role = input.into_role(RoleId::new(), self.clock.now());
        let role = self
            .store
            .create_role(role)
            .await
            .map_err(store_err("create_role"))?;
        info!(role_id = %role.id, name = %role.name, "role created");
        Ok(role)
    }

    pub async fn update_role(&self, role_id: RoleId, patch: RolePatch) -> DomainResult<Role> {
        patch.validate()?;
        let role = self
            .store
            .update_role(role_id, &patch, self.clock.now())
            .await
            .map_err(store_err("update_role"))?;
        info!(%role_id, "role updated");
        Ok(role)
    }

    /// Delete an unused role.
    ///
    /// Fails with `Conflict` while users reference it. The adapter checks and
    /// deletes in one step, so a concurrent assignment either lands first and
    /// blocks the delete, or fails with `NotFound`.
    pub async fn delete_role(&self, role_id: RoleId) -> DomainResult<()> {
        let role = self.require_role(role_id).await?;
        let deleted = self
            .store
            .delete_role_if_unused(role_id)
            .await
            .map_err(store_err("delete_role_if_unused"))?;
        if !deleted {
            return Err(DomainError::not_found(format!("role {role_id}")));
        }
        info!(%role_id, name = %role.name, "role deleted");
        Ok(())
    }

    pub async fn get_role(&self, role_id: RoleId) -> DomainResult<Option<Role>> {
        self.store
            .get_role_by_id(role_id)
            .await
            .map_err(store_err("get_role_by_id"))
    }

    pub async fn list_roles(&self) -> DomainResult<Vec<Role>> {
        self.store
            .get_all_roles()
            .await
            .map_err(store_err("get_all_roles"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_permission(&self, input: NewPermission) -> DomainResult<Permission> {
        let permission = input.into_permission(PermissionId::new(), self.clock.now());
        let permission = self
            .store
            .create_permission(permission)
            .await
            .map_err(store_err("create_permission"))?;
        info!(permission_id = %permission.id, key = %permission, "permission created");
        Ok(permission)
    }

    pub async fn update_permission(
        &self,
        permission_id: PermissionId,
        patch: PermissionPatch,
    ) -> DomainResult<Permission> {
        let permission = self
            .store
            .update_permission(permission_id, &patch, self.clock.now())
            .await
            .map_err(store_err("update_permission"))?;
        info!(%permission_id, key = %permission, "permission updated");
        Ok(permission)
    }

    /// Unlink a permission from every role and user, then delete it.
    /// Returns how many links were removed.
    pub async fn delete_permission(&self, permission_id: PermissionId) -> DomainResult<u64> {
        self.require_permission(permission_id).await?;
        let unlinked = self
            .store
            .remove_permission_links(permission_id)
            .await
            .map_err(store_err("remove_permission_links"))?;
        self.store
            .delete_permission(permission_id)
            .await
            .map_err(store_err("delete_permission"))?;
        info!(%permission_id, unlinked, "permission deleted");
        Ok(unlinked)
    }

    pub async fn get_permission(
        &self,
        permission_id: PermissionId,
    ) -> DomainResult<Option<Permission>> {
        self.store
            .get_permission_by_id(permission_id)
            .await
            .map_err(store_err("get_permission_by_id"))
    }

    pub async fn list_permissions(&self) -> DomainResult<Vec<Permission>> {
        self.store
            .get_all_permissions()
            .await
            .map_err(store_err("get_all_permissions"))
    }

    pub async fn grant_permission_to_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> DomainResult<()> {
        self.store
            .assign_permission_to_role(role_id, permission_id)
            .await
            .map_err(store_err("assign_permission_to_role"))?;
        info!(%role_id, %permission_id, "permission assigned to role");
        Ok(())
    }

    pub async fn revoke_permission_from_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> DomainResult<bool> {
        self.store
            .remove_permission_from_role(role_id, permission_id)
            .await
            .map_err(store_err("remove_permission_from_role"))
    }

    pub async fn grant_permission_to_user(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> DomainResult<()> {
        self.store
            .assign_permission_to_user(user_id, permission_id)
            .await
            .map_err(store_err("assign_permission_to_user"))?;
        info!(%user_id, %permission_id, "permission granted to user");
        Ok(())
    }

    pub async fn revoke_permission_from_user(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> DomainResult<bool> {
        self.store
            .remove_permission_from_user(user_id, permission_id)
            .await
            .map_err(store_err("remove_permission_from_user"))
    }

    pub async fn permissions_for_role(
        &self,
        role_id: RoleId,
    ) -> DomainResult<BTreeSet<Permission>> {
        self.resolver.permissions_for_role(role_id).await
    }

    /// Effective permissions of a user; empty for unknown users.
    pub async fn permissions_for_user(
        &self,
        user_id: UserId,
    ) -> DomainResult<BTreeSet<Permission>> {
        match self.get_user(user_id).await? {
            Some(user) => self.resolver.permissions_for_user(&user).await,
            None => Ok(BTreeSet::new()),
        }
    }

    /// Permission check; unknown users are denied.
    pub async fn user_has_permission(
        &self,
        user_id: UserId,
        required: &PermissionKey,
    ) -> DomainResult<bool> {
        self.resolver.user_id_has_permission(user_id, required).await
    }

    pub async fn explain_permission(
        &self,
        user_id: UserId,
        required: &PermissionKey,
    ) -> DomainResult<AuthorizationExplanation> {
        let user = self.require_user(user_id).await?;
        self.resolver.explain(&user, required).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Purge expired sessions and tokens.
    pub async fn reap_expired(&self) -> DomainResult<ReapReport> {
        let sessions = self.sessions.delete_expired_sessions().await?;
        let tokens = self.tokens.delete_expired_tokens().await?;
        Ok(ReapReport { sessions, tokens })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    async fn fetch_user_by_email(&self, normalized: &str) -> DomainResult<Option<User>> {
        self.store
            .get_user_by_email(normalized)
            .await
            .map_err(store_err("get_user_by_email"))
    }

    async fn require_user(&self, user_id: UserId) -> DomainResult<User> {
        self.get_user(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("user {user_id}")))
    }

    async fn require_role(&self, role_id: RoleId) -> DomainResult<Role> {
        self.get_role(role_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("role {role_id}")))
    }

    async fn require_permission(&self, permission_id: PermissionId) -> DomainResult<Permission> {
        self.get_permission(permission_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("permission {permission_id}")))
    }
}
