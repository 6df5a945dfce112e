//! In-memory [`AuthStore`].
//!
//! Intended for tests/dev. All tables sit behind one lock, which is what gives
//! the multi-record guarantees the trait asks for (unique email, exclusive
//! session insert, conditional token consume) for free.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use warden_auth::user::normalize_email;
use warden_auth::{
    AuthStore, Permission, PermissionPatch, Role, RolePatch, Session, SessionId, StoreError,
    StoreResult, Token, TokenValue, User, UserPatch,
};
use warden_core::{Entity, PermissionId, RoleId, UserId};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    sessions: HashMap<SessionId, Session>,
    tokens: HashMap<TokenValue, Token>,
    roles: HashMap<RoleId, Role>,
    permissions: HashMap<PermissionId, Permission>,
    role_permissions: BTreeSet<(RoleId, PermissionId)>,
    user_permissions: BTreeSet<(UserId, PermissionId)>,
}

/// Insert an entity under its own id, refusing to overwrite.
fn insert_new<E>(table: &mut HashMap<E::Id, E>, entity: E, kind: &str) -> StoreResult<()>
where
    E: Entity,
{
    let id = entity.id().clone();
    if table.contains_key(&id) {
        return Err(StoreError::conflict(format!("{kind} {id:?} already exists")));
    }
    table.insert(id, entity);
    Ok(())
}

impl Tables {
    fn user(&self, stored: &User) -> User {
        let mut user = stored.clone();
        let id = user.id;
        user.permissions = self
            .user_permissions
            .iter()
            .filter(|(u, p)| *u == id && self.permissions.contains_key(p))
            .map(|(_, p)| *p)
            .collect();
        user
    }

    fn role(&self, stored: &Role) -> Role {
        let mut role = stored.clone();
        let id = role.id;
        role.permissions = self
            .role_permissions
            .iter()
            .filter(|(r, p)| *r == id && self.permissions.contains_key(p))
            .map(|(_, p)| *p)
            .collect();
        role
    }

    fn email_taken(&self, email: &str, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn role_name_taken(&self, name: &str, except: Option<RoleId>) -> bool {
        let name = name.trim();
        self.roles
            .values()
            .any(|r| r.name.eq_ignore_ascii_case(name) && Some(r.id) != except)
    }

    fn require_permission(&self, permission_id: PermissionId) -> StoreResult<()> {
        if self.permissions.contains_key(&permission_id) {
            Ok(())
        } else {
            Err(StoreError::not_found("permission", permission_id))
        }
    }

    fn linked_permissions<'a>(
        &self,
        ids: impl Iterator<Item = &'a PermissionId>,
    ) -> Vec<Permission> {
        let mut perms: Vec<Permission> = ids
            .filter_map(|p| self.permissions.get(p).cloned())
            .collect();
        perms.sort();
        perms
    }
}

/// Thread-safe in-memory auth store.
///
/// `set_offline(true)` makes every call fail with [`StoreError::Backend`], for
/// exercising storage-failure paths.
#[derive(Debug, Default)]
pub struct InMemoryAuthStore {
    tables: RwLock<Tables>,
    offline: AtomicBool,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored sessions, expired ones included.
    pub fn session_count(&self) -> usize {
        self.tables.read().map(|t| t.sessions.len()).unwrap_or(0)
    }

    /// Number of stored tokens, expired and consumed ones included.
    pub fn token_count(&self) -> usize {
        self.tables.read().map(|t| t.tokens.len()).unwrap_or(0)
    }

    fn online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::backend("store offline"));
        }
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.online()?;
        self.tables
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.online()?;
        self.tables
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))
    }
}

#[async_trait]
impl AuthStore for InMemoryAuthStore {
    // ── Users ────────────────────────────────────────────────────────────────

    async fn create_user(&self, mut user: User) -> StoreResult<User> {
        let mut t = self.write()?;
        user.email = normalize_email(&user.email);
        if t.email_taken(&user.email, None) {
            return Err(StoreError::conflict(format!(
                "email '{}' is already registered",
                user.email
            )));
        }
        if let Some(role_id) = user.role_id {
            if !t.roles.contains_key(&role_id) {
                return Err(StoreError::not_found("role", role_id));
            }
        }
        for &p in &user.permissions {
            t.require_permission(p)?;
        }

        let grants: Vec<_> = user.permissions.iter().map(|&p| (user.id, p)).collect();
        insert_new(&mut t.users, user.clone(), "user")?;
        t.user_permissions.extend(grants);
        Ok(t.user(&user))
    }

    async fn update_user(
        &self,
        user_id: UserId,
        patch: &UserPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<User> {
        let mut t = self.write()?;
        if !t.users.contains_key(&user_id) {
            return Err(StoreError::not_found("user", user_id));
        }
        if let Some(email) = &patch.email {
            let email = normalize_email(email);
            if t.email_taken(&email, Some(user_id)) {
                return Err(StoreError::conflict(format!(
                    "email '{email}' is already registered"
                )));
            }
        }
        if let Some(Some(role_id)) = patch.role_id {
            if !t.roles.contains_key(&role_id) {
                return Err(StoreError::not_found("role", role_id));
            }
        }

        let user = t
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::not_found("user", user_id))?;
        user.apply_patch(patch, now);
        let user = user.clone();
        Ok(t.user(&user))
    }

    async fn delete_user(&self, user_id: UserId) -> StoreResult<bool> {
        Ok(self.write()?.users.remove(&user_id).is_some())
    }

    async fn get_user_by_id(&self, user_id: UserId) -> StoreResult<Option<User>> {
        let t = self.read()?;
        Ok(t.users.get(&user_id).map(|u| t.user(u)))
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let t = self.read()?;
        let email = normalize_email(email);
        Ok(t.users.values().find(|u| u.email == email).map(|u| t.user(u)))
    }

    async fn get_all_users(&self) -> StoreResult<Vec<User>> {
        let t = self.read()?;
        let mut users: Vec<User> = t.users.values().map(|u| t.user(u)).collect();
        users.sort_by_key(|u| (u.created_at, u.id));
        Ok(users)
    }

    async fn get_user_count(&self) -> StoreResult<u64> {
        Ok(self.read()?.users.len() as u64)
    }

    async fn count_users_with_role(&self, role_id: RoleId) -> StoreResult<u64> {
        let t = self.read()?;
        Ok(t.users.values().filter(|u| u.role_id == Some(role_id)).count() as u64)
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    async fn create_session(&self, session: Session) -> StoreResult<Session> {
        let mut t = self.write()?;
        if t.sessions.contains_key(&session.id) {
            return Err(StoreError::conflict("session id collision"));
        }
        let now = session.created_at;
        t.sessions
            .retain(|_, s| s.user_id != session.user_id || !s.is_active(now));
        insert_new(&mut t.sessions, session.clone(), "session")?;
        Ok(session)
    }

    async fn get_session(&self, session_id: &SessionId) -> StoreResult<Option<Session>> {
        Ok(self.read()?.sessions.get(session_id).cloned())
    }

    async fn update_session_expiry(
        &self,
        session_id: &SessionId,
        expires: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Session>> {
        let mut t = self.write()?;
        Ok(t.sessions.get_mut(session_id).map(|s| {
            s.expires = expires;
            s.updated_at = now;
            s.clone()
        }))
    }

    async fn delete_session(&self, session_id: &SessionId) -> StoreResult<bool> {
        Ok(self.write()?.sessions.remove(session_id).is_some())
    }

    async fn invalidate_user_sessions(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut t = self.write()?;
        let before = t.sessions.len();
        t.sessions
            .retain(|_, s| s.user_id != user_id || !s.is_active(now));
        Ok((before - t.sessions.len()) as u64)
    }

    async fn delete_user_sessions(&self, user_id: UserId) -> StoreResult<u64> {
        let mut t = self.write()?;
        let before = t.sessions.len();
        t.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - t.sessions.len()) as u64)
    }

    async fn get_active_sessions(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let t = self.read()?;
        let mut sessions: Vec<Session> = t
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active(now))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut t = self.write()?;
        let before = t.sessions.len();
        t.sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - t.sessions.len()) as u64)
    }

    // ── Tokens ───────────────────────────────────────────────────────────────

    async fn create_token(&self, token: Token) -> StoreResult<Token> {
        let mut t = self.write()?;
        insert_new(&mut t.tokens, token.clone(), "token")?;
        Ok(token)
    }

    async fn get_token(&self, value: &TokenValue) -> StoreResult<Option<Token>> {
        Ok(self.read()?.tokens.get(value).cloned())
    }

    async fn mark_token_consumed(
        &self,
        value: &TokenValue,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut t = self.write()?;
        match t.tokens.get_mut(value) {
            Some(token) if token.consumed_at.is_none() => {
                token.consumed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_token(&self, value: &TokenValue) -> StoreResult<bool> {
        Ok(self.write()?.tokens.remove(value).is_some())
    }

    async fn delete_user_tokens(&self, user_id: UserId) -> StoreResult<u64> {
        let mut t = self.write()?;
        let before = t.tokens.len();
        t.tokens.retain(|_, tok| tok.user_id != user_id);
        Ok((before - t.tokens.len()) as u64)
    }

    async fn get_all_tokens(&self) -> StoreResult<Vec<Token>> {
        let t = self.read()?;
        let mut tokens: Vec<Token> = t.tokens.values().cloned().collect();
        tokens.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.value.cmp(&b.value)));
        Ok(tokens)
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut t = self.write()?;
        let before = t.tokens.len();
        t.tokens.retain(|_, tok| !tok.is_expired(now));
        Ok((before - t.tokens.len()) as u64)
    }

    // ── Roles ────────────────────────────────────────────────────────────────

    async fn create_role(&self, role: Role) -> StoreResult<Role> {
        let mut t = self.write()?;
        if t.role_name_taken(&role.name, None) {
            return Err(StoreError::conflict(format!(
                "role '{}' already exists",
                role.name
            )));
        }
        for &p in &role.permissions {
            t.require_permission(p)?;
        }

        let links: Vec<_> = role.permissions.iter().map(|&p| (role.id, p)).collect();
        insert_new(&mut t.roles, role.clone(), "role")?;
        t.role_permissions.extend(links);
        Ok(t.role(&role))
    }

    async fn update_role(
        &self,
        role_id: RoleId,
        patch: &RolePatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Role> {
        let mut t = self.write()?;
        if let Some(name) = &patch.name {
            if t.role_name_taken(name, Some(role_id)) {
                return Err(StoreError::conflict(format!(
                    "role '{}' already exists",
                    name.trim()
                )));
            }
        }

        let role = t
            .roles
            .get_mut(&role_id)
            .ok_or_else(|| StoreError::not_found("role", role_id))?;
        role.apply_patch(patch, now);
        let role = role.clone();
        Ok(t.role(&role))
    }

    async fn delete_role(&self, role_id: RoleId) -> StoreResult<bool> {
        let mut t = self.write()?;
        t.role_permissions.retain(|(r, _)| *r != role_id);
        Ok(t.roles.remove(&role_id).is_some())
    }

    async fn delete_role_if_unused(&self, role_id: RoleId) -> StoreResult<bool> {
        let mut t = self.write()?;
        let Some(role) = t.roles.get(&role_id) else {
            return Ok(false);
        };
        let in_use = t.users.values().filter(|u| u.role_id == Some(role_id)).count();
        if in_use > 0 {
            return Err(StoreError::conflict(format!(
                "role '{}' is assigned to {in_use} user(s)",
                role.name
            )));
        }
        t.role_permissions.retain(|(r, _)| *r != role_id);
        t.roles.remove(&role_id);
        Ok(true)
    }

    async fn get_role_by_id(&self, role_id: RoleId) -> StoreResult<Option<Role>> {
        let t = self.read()?;
        Ok(t.roles.get(&role_id).map(|r| t.role(r)))
    }

    async fn get_all_roles(&self) -> StoreResult<Vec<Role>> {
        let t = self.read()?;
        let mut roles: Vec<Role> = t.roles.values().map(|r| t.role(r)).collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    // ── Permissions ──────────────────────────────────────────────────────────

    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission> {
        let mut t = self.write()?;
        insert_new(&mut t.permissions, permission.clone(), "permission")?;
        Ok(permission)
    }

    async fn update_permission(
        &self,
        permission_id: PermissionId,
        patch: &PermissionPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Permission> {
        let mut t = self.write()?;
        let permission = t
            .permissions
            .get_mut(&permission_id)
            .ok_or_else(|| StoreError::not_found("permission", permission_id))?;
        permission.apply_patch(patch, now);
        Ok(permission.clone())
    }

    async fn delete_permission(&self, permission_id: PermissionId) -> StoreResult<bool> {
        Ok(self.write()?.permissions.remove(&permission_id).is_some())
    }

    async fn get_permission_by_id(
        &self,
        permission_id: PermissionId,
    ) -> StoreResult<Option<Permission>> {
        Ok(self.read()?.permissions.get(&permission_id).cloned())
    }

    async fn get_all_permissions(&self) -> StoreResult<Vec<Permission>> {
        let t = self.read()?;
        let mut perms: Vec<Permission> = t.permissions.values().cloned().collect();
        perms.sort();
        Ok(perms)
    }

    // ── Links ────────────────────────────────────────────────────────────────

    async fn assign_permission_to_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> StoreResult<()> {
        let mut t = self.write()?;
        if !t.roles.contains_key(&role_id) {
            return Err(StoreError::not_found("role", role_id));
        }
        t.require_permission(permission_id)?;
        t.role_permissions.insert((role_id, permission_id));
        Ok(())
    }

    async fn remove_permission_from_role(
        &self,
        role_id: RoleId,
        permission_id: PermissionId,
    ) -> StoreResult<bool> {
        Ok(self
            .write()?
            .role_permissions
            .remove(&(role_id, permission_id)))
    }

    async fn get_permissions_for_role(&self, role_id: RoleId) -> StoreResult<Vec<Permission>> {
        let t = self.read()?;
        let ids = t
            .role_permissions
            .iter()
            .filter(|(r, _)| *r == role_id)
            .map(|(_, p)| p);
        Ok(t.linked_permissions(ids))
    }

    async fn assign_permission_to_user(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> StoreResult<()> {
        let mut t = self.write()?;
        if !t.users.contains_key(&user_id) {
            return Err(StoreError::not_found("user", user_id));
        }
        t.require_permission(permission_id)?;
        t.user_permissions.insert((user_id, permission_id));
        Ok(())
    }

    async fn remove_permission_from_user(
        &self,
        user_id: UserId,
        permission_id: PermissionId,
    ) -> StoreResult<bool> {
        Ok(self
            .write()?
            .user_permissions
            .remove(&(user_id, permission_id)))
    }

    async fn get_permissions_for_user(&self, user_id: UserId) -> StoreResult<Vec<Permission>> {
        let t = self.read()?;
        let ids = t
            .user_permissions
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, p)| p);
        Ok(t.linked_permissions(ids))
    }

    async fn remove_user_permissions(&self, user_id: UserId) -> StoreResult<u64> {
        let mut t = self.write()?;
        let before = t.user_permissions.len();
        t.user_permissions.retain(|(u, _)| *u != user_id);
        Ok((before - t.user_permissions.len()) as u64)
    }

    async fn remove_permission_links(&self, permission_id: PermissionId) -> StoreResult<u64> {
        let mut t = self.write()?;
        let before = t.role_permissions.len() + t.user_permissions.len();
        t.role_permissions.retain(|(_, p)| *p != permission_id);
        t.user_permissions.retain(|(_, p)| *p != permission_id);
        Ok((before - t.role_permissions.len() - t.user_permissions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use warden_auth::{
        NewPermission, NewRole, NewUser, PermissionAction, PermissionKey, PermissionType,
    };

    use super::*;

    fn user(email: &str) -> User {
        NewUser::new(email, "someone", "correct horse").into_user(
            UserId::new(),
            "$argon2id$stub".into(),
            Utc::now(),
        )
    }

    fn permission() -> Permission {
        NewPermission::new(PermissionKey::new(PermissionType::Collection, PermissionAction::Read))
            .into_permission(PermissionId::new(), Utc::now())
    }

    #[tokio::test]
    async fn email_uniqueness_is_case_insensitive() {
        let store = InMemoryAuthStore::new();
        store.create_user(user("alice@x.com")).await.unwrap();

        let err = store.create_user(user("ALICE@x.com ")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.get_user_by_email(" Alice@X.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn session_insert_drops_other_active_sessions() {
        let store = InMemoryAuthStore::new();
        let user_id = UserId::new();
        let now = Utc::now();

        let session = || {
            Session::new(SessionId::generate().unwrap(), user_id, now, Duration::hours(1)).unwrap()
        };
        let first = session();
        let second = session();
        store.create_session(first.clone()).await.unwrap();
        store.create_session(second.clone()).await.unwrap();

        assert!(store.get_session(&first.id).await.unwrap().is_none());
        let active = store.get_active_sessions(user_id, now).await.unwrap();
        assert_eq!(active, vec![second]);
    }

    #[tokio::test]
    async fn consume_flag_flips_once() {
        let store = InMemoryAuthStore::new();
        let now = Utc::now();
        let token = Token::new(
            TokenValue::generate().unwrap(),
            UserId::new(),
            "a@x.com",
            now,
            Duration::minutes(15),
        )
        .unwrap();
        store.create_token(token.clone()).await.unwrap();

        assert!(store.mark_token_consumed(&token.value, now).await.unwrap());
        assert!(!store.mark_token_consumed(&token.value, now).await.unwrap());
        assert!(!store.mark_token_consumed(&TokenValue::from_raw("nope"), now).await.unwrap());
    }

    #[tokio::test]
    async fn links_are_reflected_on_read_and_removed_with_permission() {
        let store = InMemoryAuthStore::new();
        let perm = store.create_permission(permission()).await.unwrap();
        let role = store
            .create_role(
                NewRole::named("editor")
                    .with_permission(perm.id)
                    .into_role(RoleId::new(), Utc::now()),
            )
            .await
            .unwrap();
        let alice = store.create_user(user("alice@x.com")).await.unwrap();
        store.assign_permission_to_user(alice.id, perm.id).await.unwrap();

        assert!(role.permissions.contains(&perm.id));
        let alice = store.get_user_by_id(alice.id).await.unwrap().unwrap();
        assert!(alice.permissions.contains(&perm.id));

        assert_eq!(store.remove_permission_links(perm.id).await.unwrap(), 2);
        assert!(store.get_permissions_for_role(role.id).await.unwrap().is_empty());
        assert!(store.get_permissions_for_user(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn role_names_are_unique() {
        let store = InMemoryAuthStore::new();
        store
            .create_role(NewRole::named("editor").into_role(RoleId::new(), Utc::now()))
            .await
            .unwrap();
        let err = store
            .create_role(NewRole::named("Editor").into_role(RoleId::new(), Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn assigned_role_survives_conditional_delete() {
        let store = InMemoryAuthStore::new();
        let role = store
            .create_role(NewRole::named("editor").into_role(RoleId::new(), Utc::now()))
            .await
            .unwrap();
        let mut alice = user("alice@x.com");
        alice.role_id = Some(role.id);
        store.create_user(alice).await.unwrap();

        let err = store.delete_role_if_unused(role.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.get_role_by_id(role.id).await.unwrap().is_some());
        assert_eq!(store.count_users_with_role(role.id).await.unwrap(), 1);

        let spare = store
            .create_role(NewRole::named("viewer").into_role(RoleId::new(), Utc::now()))
            .await
            .unwrap();
        assert!(store.delete_role_if_unused(spare.id).await.unwrap());
        assert!(!store.delete_role(spare.id).await.unwrap());
        assert!(!store.delete_role_if_unused(RoleId::new()).await.unwrap());
    }

    #[tokio::test]
    async fn offline_store_reports_backend_errors() {
        let store = InMemoryAuthStore::new();
        store.set_offline(true);
        let err = store.get_user_count().await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        store.set_offline(false);
        assert_eq!(store.get_user_count().await.unwrap(), 0);
    }
}
