use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{DomainError, Entity, PermissionId};

/// Area of the system a permission applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionType {
    Collection,
    User,
    Configuration,
    System,
}

impl PermissionType {
    pub const ALL: [PermissionType; 4] = [
        PermissionType::Collection,
        PermissionType::User,
        PermissionType::Configuration,
        PermissionType::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionType::Collection => "collection",
            PermissionType::User => "user",
            PermissionType::Configuration => "configuration",
            PermissionType::System => "system",
        }
    }
}

impl core::fmt::Display for PermissionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "collection" => Ok(PermissionType::Collection),
            "user" => Ok(PermissionType::User),
            "configuration" => Ok(PermissionType::Configuration),
            "system" => Ok(PermissionType::System),
            other => Err(DomainError::validation(format!(
                "unknown permission type '{other}'"
            ))),
        }
    }
}

/// Operation a permission allows.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Create,
    Read,
    Update,
    Delete,
    Manage,
    Share,
    Access,
    Execute,
}

impl PermissionAction {
    pub const ALL: [PermissionAction; 8] = [
        PermissionAction::Create,
        PermissionAction::Read,
        PermissionAction::Update,
        PermissionAction::Delete,
        PermissionAction::Manage,
        PermissionAction::Share,
        PermissionAction::Access,
        PermissionAction::Execute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionAction::Create => "create",
            PermissionAction::Read => "read",
            PermissionAction::Update => "update",
            PermissionAction::Delete => "delete",
            PermissionAction::Manage => "manage",
            PermissionAction::Share => "share",
            PermissionAction::Access => "access",
            PermissionAction::Execute => "execute",
        }
    }

    /// Whether holding `self` grants `required` on the same permission type.
    ///
    /// | held   | grants                                                 |
    /// |--------|--------------------------------------------------------|
    /// | manage | manage, create, read, update, delete, share, access    |
    /// | other  | itself                                                 |
    ///
    /// `execute` is only ever granted explicitly.
    pub fn implies(self, required: PermissionAction) -> bool {
        if self == required {
            return true;
        }
        match self {
            PermissionAction::Manage => !matches!(required, PermissionAction::Execute),
            _ => false,
        }
    }
}

impl core::fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PermissionAction::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown permission action '{s}'")))
    }
}

/// The `(type, action, scope)` triple a permission grants, or a check requires.
///
/// Text form is `type:action` or `type:action@scope`, e.g. `collection:read@posts`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    pub permission_type: PermissionType,
    pub action: PermissionAction,
    pub scope: Option<String>,
}

impl PermissionKey {
    pub fn new(permission_type: PermissionType, action: PermissionAction) -> Self {
        Self {
            permission_type,
            action,
            scope: None,
        }
    }

    pub fn scoped(
        permission_type: PermissionType,
        action: PermissionAction,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            permission_type,
            action,
            scope: Some(scope.into()),
        }
    }

    /// Whether a grant of `self` satisfies a check for `required`.
    ///
    /// Types must match exactly. An unscoped grant covers every scope; a scoped
    /// grant only covers the identical scope.
    pub fn covers(&self, required: &PermissionKey) -> bool {
        if self.permission_type != required.permission_type {
            return false;
        }
        if !self.action.implies(required.action) {
            return false;
        }
        match (&self.scope, &required.scope) {
            (None, _) => true,
            (Some(held), Some(wanted)) => held == wanted,
            (Some(_), None) => false,
        }
    }
}

impl core::fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.permission_type, self.action)?;
        if let Some(scope) = &self.scope {
            write!(f, "@{scope}")?;
        }
        Ok(())
    }
}

impl FromStr for PermissionKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (body, scope) = match s.split_once('@') {
            Some((body, scope)) if !scope.trim().is_empty() => {
                (body, Some(scope.trim().to_string()))
            }
            Some(_) => return Err(DomainError::validation(format!("empty scope in '{s}'"))),
            None => (s, None),
        };
        let (ty, action) = body
            .split_once(':')
            .ok_or_else(|| DomainError::validation(format!("expected 'type:action', got '{s}'")))?;

        Ok(Self {
            permission_type: ty.parse()?,
            action: action.parse()?,
            scope,
        })
    }
}

/// Persisted permission record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub permission_type: PermissionType,
    pub action: PermissionAction,
    pub scope: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn key(&self) -> PermissionKey {
        PermissionKey {
            permission_type: self.permission_type,
            action: self.action,
            scope: self.scope.clone(),
        }
    }

    pub fn covers(&self, required: &PermissionKey) -> bool {
        self.key().covers(required)
    }

    /// Apply a patch in place, bumping `updated_at`.
    pub fn apply_patch(&mut self, patch: &PermissionPatch, now: DateTime<Utc>) {
        if let Some(t) = patch.permission_type {
            self.permission_type = t;
        }
        if let Some(a) = patch.action {
            self.action = a;
        }
        if let Some(scope) = &patch.scope {
            self.scope = scope.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        self.updated_at = now;
    }
}

impl Entity for Permission {
    type Id = PermissionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.key(), f)
    }
}

/// Input for creating a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPermission {
    pub key: PermissionKey,
    pub description: Option<String>,
}

impl NewPermission {
    pub fn new(key: PermissionKey) -> Self {
        Self {
            key,
            description: None,
        }
    }

    pub fn into_permission(self, id: PermissionId, now: DateTime<Utc>) -> Permission {
        Permission {
            id,
            permission_type: self.key.permission_type,
            action: self.key.action,
            scope: self.key.scope,
            description: self.description,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Updatable permission attributes. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPatch {
    pub permission_type: Option<PermissionType>,
    pub action: Option<PermissionAction>,
    /// `Some(None)` removes the scope.
    pub scope: Option<Option<String>>,
    pub description: Option<Option<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use PermissionAction as A;
    use PermissionType as T;

    #[test]
    fn manage_implies_everything_but_execute() {
        for action in A::ALL {
            let expected = action != A::Execute;
            assert_eq!(A::Manage.implies(action), expected, "manage -> {action}");
        }
    }

    #[test]
    fn plain_actions_only_imply_themselves() {
        assert!(A::Read.implies(A::Read));
        assert!(!A::Update.implies(A::Read));
        assert!(!A::Access.implies(A::Read));
        assert!(!A::Execute.implies(A::Manage));
    }

    #[test]
    fn subsumption_does_not_cross_types() {
        let held = PermissionKey::new(T::System, A::Manage);
        assert!(!held.covers(&PermissionKey::new(T::Collection, A::Read)));
    }

    #[test]
    fn scope_rules() {
        let global = PermissionKey::new(T::Collection, A::Read);
        let posts = PermissionKey::scoped(T::Collection, A::Read, "posts");
        let pages = PermissionKey::scoped(T::Collection, A::Read, "pages");

        assert!(global.covers(&posts));
        assert!(posts.covers(&posts));
        assert!(!posts.covers(&pages));
        assert!(!posts.covers(&global));
    }

    #[test]
    fn key_text_form_parses() {
        let key: PermissionKey = "collection:manage@posts".parse().unwrap();
        assert_eq!(key, PermissionKey::scoped(T::Collection, A::Manage, "posts"));
        assert_eq!(key.to_string(), "collection:manage@posts");

        let key: PermissionKey = "SYSTEM:Execute".parse().unwrap();
        assert_eq!(key, PermissionKey::new(T::System, A::Execute));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!("collection".parse::<PermissionKey>().is_err());
        assert!("collection:fly".parse::<PermissionKey>().is_err());
        assert!("widgets:read".parse::<PermissionKey>().is_err());
        assert!("collection:read@".parse::<PermissionKey>().is_err());
    }

    #[test]
    fn patch_updates_selected_fields() {
        let now = Utc::now();
        let mut perm = NewPermission::new(PermissionKey::scoped(T::Collection, A::Read, "posts"))
            .into_permission(PermissionId::new(), now);

        perm.apply_patch(
            &PermissionPatch {
                action: Some(A::Update),
                scope: Some(None),
                ..Default::default()
            },
            now,
        );

        assert_eq!(perm.key(), PermissionKey::new(T::Collection, A::Update));
    }

    fn any_type() -> impl Strategy<Value = PermissionType> {
        prop::sample::select(T::ALL.to_vec())
    }

    fn any_action() -> impl Strategy<Value = PermissionAction> {
        prop::sample::select(A::ALL.to_vec())
    }

    fn any_scope() -> impl Strategy<Value = Option<String>> {
        prop::option::of(prop::sample::select(vec!["posts".to_string(), "pages".to_string()]))
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: every key covers itself.
        #[test]
        fn covers_is_reflexive(t in any_type(), a in any_action(), s in any_scope()) {
            let key = PermissionKey { permission_type: t, action: a, scope: s };
            prop_assert!(key.covers(&key));
        }

        /// Property: an unscoped manage grant covers exactly the non-execute
        /// actions of its own type, for any scope.
        #[test]
        fn unscoped_manage_grant(
            held_t in any_type(),
            t in any_type(),
            a in any_action(),
            s in any_scope(),
        ) {
            let held = PermissionKey::new(held_t, A::Manage);
            let required = PermissionKey { permission_type: t, action: a, scope: s };
            prop_assert_eq!(held.covers(&required), held_t == t && a != A::Execute);
        }

        /// Property: covers is transitive.
        #[test]
        fn covers_is_transitive(
            a1 in any_action(), a2 in any_action(), a3 in any_action(),
            s1 in any_scope(), s2 in any_scope(), s3 in any_scope(),
        ) {
            let k1 = PermissionKey { permission_type: T::Collection, action: a1, scope: s1 };
            let k2 = PermissionKey { permission_type: T::Collection, action: a2, scope: s2 };
            let k3 = PermissionKey { permission_type: T::Collection, action: a3, scope: s3 };
            if k1.covers(&k2) && k2.covers(&k3) {
                prop_assert!(k1.covers(&k3));
            }
        }
    }
}
