//! User accounts.
//!
//! A user carries one optional role plus a set of directly granted permissions
//! that act as overrides on top of the role.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult, Entity, PermissionId, RoleId, UserId};

/// Minimum accepted length of a plaintext password.
pub const MIN_PASSWORD_LEN: usize = 8;

/// User account record.
///
/// # Invariants
/// - `email` is unique across all users and stored trimmed + lowercased.
/// - `password_hash` is an argon2 PHC string; it is never serialized.
/// - `permissions` mirrors the user-permission link relation at read time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role_id: Option<RoleId>,
    pub permissions: BTreeSet<PermissionId>,
    pub blocked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Apply a patch in place, bumping `updated_at`.
    ///
    /// Callers validate the patch first; the email is normalized here.
    pub fn apply_patch(&mut self, patch: &UserPatch, now: DateTime<Utc>) {
        if let Some(email) = &patch.email {
            self.email = normalize_email(email);
        }
        if let Some(username) = &patch.username {
            self.username = username.trim().to_string();
        }
        if let Some(role_id) = patch.role_id {
            self.role_id = role_id;
        }
        if let Some(blocked) = patch.blocked {
            self.blocked = blocked;
        }
        if let Some(hash) = &patch.password_hash {
            self.password_hash = hash.clone();
        }
        self.updated_at = now;
    }
}

impl core::fmt::Debug for User {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("role_id", &self.role_id)
            .field("permissions", &self.permissions)
            .field("blocked", &self.blocked)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Registration input. The password is plaintext and is hashed by the service.
#[derive(Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
    pub role_id: Option<RoleId>,
}

impl NewUser {
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            password: password.into(),
            role_id: None,
        }
    }

    pub fn with_role(mut self, role_id: RoleId) -> Self {
        self.role_id = Some(role_id);
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        validate_email(&self.email)?;
        validate_username(&self.username)?;
        validate_password(&self.password)
    }

    /// Build the stored record once the password has been hashed.
    pub fn into_user(self, id: UserId, password_hash: String, now: DateTime<Utc>) -> User {
        User {
            id,
            email: normalize_email(&self.email),
            username: self.username.trim().to_string(),
            password_hash,
            role_id: self.role_id,
            permissions: BTreeSet::new(),
            blocked: false,
            created_at: now,
            updated_at: now,
        }
    }
}

impl core::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NewUser")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("role_id", &self.role_id)
            .finish()
    }
}

/// Updatable user attributes. `None` leaves a field untouched.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserPatch {
    pub email: Option<String>,
    pub username: Option<String>,
    /// `Some(None)` removes the role.
    pub role_id: Option<Option<RoleId>>,
    pub blocked: Option<bool>,
    /// Already-hashed credential; set by password change/reset flows.
    pub password_hash: Option<String>,
}

impl UserPatch {
    pub fn blocked(blocked: bool) -> Self {
        Self {
            blocked: Some(blocked),
            ..Default::default()
        }
    }

    pub fn role(role_id: Option<RoleId>) -> Self {
        Self {
            role_id: Some(role_id),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> DomainResult<()> {
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(username) = &self.username {
            validate_username(username)?;
        }
        Ok(())
    }
}

impl core::fmt::Debug for UserPatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserPatch")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("role_id", &self.role_id)
            .field("blocked", &self.blocked)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> DomainResult<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            Ok(())
        }
        _ => Err(DomainError::validation("invalid email format")),
    }
}

fn validate_username(username: &str) -> DomainResult<()> {
    if username.trim().is_empty() {
        return Err(DomainError::validation("username cannot be empty"));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> DomainResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(DomainError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> User {
        NewUser::new(" Alice@Example.com ", " alice ", "correct horse")
            .into_user(UserId::new(), "$argon2id$stub".into(), Utc::now())
    }

    #[test]
    fn registration_normalizes_email_and_username() {
        let user = alice();
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.username, "alice");
        assert!(!user.blocked);
        assert!(user.permissions.is_empty());
    }

    #[test]
    fn invalid_registration_input() {
        assert!(NewUser::new("invalid-email", "a", "correct horse").validate().is_err());
        assert!(NewUser::new("a@b", "  ", "correct horse").validate().is_err());
        assert!(NewUser::new("a@b", "a", "short").validate().is_err());
        assert!(NewUser::new("a@b@c", "a", "correct horse").validate().is_err());
        assert!(NewUser::new("a@b", "a", "correct horse").validate().is_ok());
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let mut user = alice();
        let role = RoleId::new();
        user.apply_patch(
            &UserPatch {
                role_id: Some(Some(role)),
                blocked: Some(true),
                ..Default::default()
            },
            Utc::now(),
        );
        assert_eq!(user.role_id, Some(role));
        assert!(user.is_blocked());
        assert_eq!(user.email, "alice@example.com");

        user.apply_patch(&UserPatch::role(None), Utc::now());
        assert_eq!(user.role_id, None);
    }

    #[test]
    fn secrets_are_redacted() {
        let user = alice();
        let debug = format!("{user:?}");
        assert!(!debug.contains("argon2id"));

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password_hash"));

        let input = NewUser::new("a@b", "a", "hunter2hunter2");
        assert!(!format!("{input:?}").contains("hunter2"));
    }

    #[test]
    fn empty_patch() {
        assert!(UserPatch::default().is_empty());
        assert!(!UserPatch::blocked(false).is_empty());
    }
}
