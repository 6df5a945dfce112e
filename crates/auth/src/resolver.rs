//! Permission resolution.
//!
//! Effective permissions = permissions of the user's role ∪ permissions granted
//! directly to the user. A check passes when any effective permission covers
//! the required key (see [`PermissionAction::implies`] for the subsumption table).
//!
//! - No writes
//! - Absent users/roles resolve to "no permission", never to an error

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use warden_core::{DomainResult, RoleId, UserId};

use crate::store::{AuthStore, store_err};
#[cfg(doc)]
use crate::PermissionAction;
use crate::{Permission, PermissionKey, User};

#[derive(Debug)]
pub struct PermissionResolver<S> {
    store: Arc<S>,
}

impl<S> Clone for PermissionResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: AuthStore> PermissionResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Permissions linked to a role. Unknown roles have none.
    pub async fn permissions_for_role(
        &self,
        role_id: RoleId,
    ) -> DomainResult<BTreeSet<Permission>> {
        let perms = self
            .store
            .get_permissions_for_role(role_id)
            .await
            .map_err(store_err("get_permissions_for_role"))?;
        Ok(perms.into_iter().collect())
    }

    /// Role-derived plus directly granted permissions of `user`.
    pub async fn permissions_for_user(&self, user: &User) -> DomainResult<BTreeSet<Permission>> {
        let (role, direct) = self.grant_sets(user).await?;
        Ok(effective_permissions(&role, &direct))
    }

    pub async fn user_has_permission(
        &self,
        user: &User,
        required: &PermissionKey,
    ) -> DomainResult<bool> {
        let effective = self.permissions_for_user(user).await?;
        let granted = is_covered(&effective, required);
        debug!(user_id = %user.id, required = %required, granted, "permission check");
        Ok(granted)
    }

    /// Same as [`Self::user_has_permission`] for a user looked up by id.
    /// A missing user is denied.
    pub async fn user_id_has_permission(
        &self,
        user_id: UserId,
        required: &PermissionKey,
    ) -> DomainResult<bool> {
        let user = self
            .store
            .get_user_by_id(user_id)
            .await
            .map_err(store_err("get_user_by_id"))?;
        match user {
            Some(user) => self.user_has_permission(&user, required).await,
            None => {
                debug!(%user_id, required = %required, "permission check for unknown user denied");
                Ok(false)
            }
        }
    }

    /// Explain why a check passes or fails.
    pub async fn explain(
        &self,
        user: &User,
        required: &PermissionKey,
    ) -> DomainResult<AuthorizationExplanation> {
        let (role, direct) = self.grant_sets(user).await?;
        Ok(explain_authorization(user, required, &role, &direct))
    }

    /// Role-derived and direct grants of `user`, in that order.
    async fn grant_sets(
        &self,
        user: &User,
    ) -> DomainResult<(BTreeSet<Permission>, BTreeSet<Permission>)> {
        let role = match user.role_id {
            Some(role_id) => self.permissions_for_role(role_id).await?,
            None => BTreeSet::new(),
        };
        let direct = self
            .store
            .get_permissions_for_user(user.id)
            .await
            .map_err(store_err("get_permissions_for_user"))?
            .into_iter()
            .collect();
        Ok((role, direct))
    }
}

/// Union of role-derived and direct grants.
pub fn effective_permissions(
    role_permissions: &BTreeSet<Permission>,
    direct_permissions: &BTreeSet<Permission>,
) -> BTreeSet<Permission> {
    role_permissions.union(direct_permissions).cloned().collect()
}

fn is_covered(effective: &BTreeSet<Permission>, required: &PermissionKey) -> bool {
    effective.iter().any(|p| p.covers(required))
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationExplanation {
    /// The permission that was being checked, in `type:action[@scope]` form.
    pub required_permission: String,

    pub granted: bool,

    /// Human-readable reason for the decision.
    pub reason: String,

    pub principal: PrincipalState,

    /// Where the covering permission came from, if granted.
    pub granted_by: Option<GrantSource>,

    /// If denied, this explains what was missing.
    pub denial_reason: Option<DenialReason>,
}

/// Snapshot of the user being checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrincipalState {
    pub user_id: UserId,
    pub role_id: Option<RoleId>,
    pub blocked: bool,
    pub effective_permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum GrantSource {
    Role { role_id: RoleId, permission: String },
    Direct { permission: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// Nothing of the required type and action (or a subsuming action) is held.
    MissingPermission,
    /// The action is held, but only for other scopes.
    ScopeMismatch,
}

/// Build an explanation from already-resolved permission sets.
///
/// Role-derived grants are reported in preference to direct grants.
pub fn explain_authorization(
    user: &User,
    required: &PermissionKey,
    role_permissions: &BTreeSet<Permission>,
    direct_permissions: &BTreeSet<Permission>,
) -> AuthorizationExplanation {
    let required_str = required.to_string();

    let mut effective: Vec<String> = role_permissions
        .iter()
        .chain(direct_permissions.iter())
        .map(|p| p.to_string())
        .collect();
    effective.sort();
    effective.dedup();

    let principal = PrincipalState {
        user_id: user.id,
        role_id: user.role_id,
        blocked: user.blocked,
        effective_permissions: effective.clone(),
    };

    let from_role = role_permissions.iter().find(|p| p.covers(required));
    let from_direct = direct_permissions.iter().find(|p| p.covers(required));

    let granted_by = match (from_role, user.role_id, from_direct) {
        (Some(p), Some(role_id), _) => Some(GrantSource::Role {
            role_id,
            permission: p.to_string(),
        }),
        (_, _, Some(p)) => Some(GrantSource::Direct {
            permission: p.to_string(),
        }),
        _ => None,
    };

    if let Some(source) = granted_by {
        let reason = match &source {
            GrantSource::Role { permission, .. } => {
                format!("Role permission '{permission}' covers '{required_str}'")
            }
            GrantSource::Direct { permission } => {
                format!("Direct grant '{permission}' covers '{required_str}'")
            }
        };
        return AuthorizationExplanation {
            required_permission: required_str,
            granted: true,
            reason,
            principal,
            granted_by: Some(source),
            denial_reason: None,
        };
    }

    // Same type and a covering action, but scoped elsewhere.
    let unscoped_required = PermissionKey {
        scope: None,
        ..required.clone()
    };
    let scope_only_miss = role_permissions
        .iter()
        .chain(direct_permissions.iter())
        .any(|p| {
            let held = PermissionKey {
                scope: None,
                ..p.key()
            };
            held.covers(&unscoped_required)
        });

    let kind = if scope_only_miss {
        DenialKind::ScopeMismatch
    } else {
        DenialKind::MissingPermission
    };

    let mut suggestions = vec![
        format!("Assign a role that grants '{required_str}'"),
        format!("Grant '{required_str}' directly to the user"),
    ];
    if kind == DenialKind::ScopeMismatch {
        suggestions.insert(
            0,
            format!(
                "The user holds '{}' for other scopes; grant it unscoped or for this scope",
                unscoped_required
            ),
        );
    }

    AuthorizationExplanation {
        required_permission: required_str.clone(),
        granted: false,
        reason: format!(
            "User does not have permission '{required_str}'. Current permissions: {effective:?}"
        ),
        principal,
        granted_by: None,
        denial_reason: Some(DenialReason {
            kind,
            message: format!("Missing required permission: '{required_str}'"),
            suggestions,
        }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;
    use warden_core::PermissionId;

    use super::*;
    use crate::{NewPermission, NewUser, PermissionAction as A, PermissionType as T};

    fn perm(key: &str) -> Permission {
        NewPermission::new(key.parse().unwrap()).into_permission(PermissionId::new(), Utc::now())
    }

    fn user(role_id: Option<RoleId>) -> User {
        let mut new_user = NewUser::new("alice@x.com", "alice", "correct horse");
        new_user.role_id = role_id;
        new_user.into_user(UserId::new(), String::new(), Utc::now())
    }

    #[test]
    fn granted_by_role() {
        let role_id = RoleId::new();
        let role: BTreeSet<_> = [perm("collection:read"), perm("collection:update")].into();
        let ex = explain_authorization(
            &user(Some(role_id)),
            &PermissionKey::new(T::Collection, A::Read),
            &role,
            &BTreeSet::new(),
        );

        assert!(ex.granted);
        assert!(matches!(
            ex.granted_by,
            Some(GrantSource::Role { role_id: r, .. }) if r == role_id
        ));
        assert_eq!(ex.principal.effective_permissions.len(), 2);
    }

    #[test]
    fn granted_by_direct_grant() {
        let direct: BTreeSet<_> = [perm("collection:create")].into();
        let ex = explain_authorization(
            &user(None),
            &PermissionKey::new(T::Collection, A::Create),
            &BTreeSet::new(),
            &direct,
        );
        assert!(ex.granted);
        assert!(matches!(ex.granted_by, Some(GrantSource::Direct { .. })));
    }

    #[test]
    fn manage_grant_explains_subsumption() {
        let role: BTreeSet<_> = [perm("user:manage")].into();
        let ex = explain_authorization(
            &user(Some(RoleId::new())),
            &PermissionKey::new(T::User, A::Delete),
            &role,
            &BTreeSet::new(),
        );
        assert!(ex.granted);
        assert!(ex.reason.contains("user:manage"));
    }

    #[test]
    fn denial_reports_scope_mismatch() {
        let role: BTreeSet<_> = [perm("collection:read@posts")].into();
        let ex = explain_authorization(
            &user(Some(RoleId::new())),
            &PermissionKey::scoped(T::Collection, A::Read, "pages"),
            &role,
            &BTreeSet::new(),
        );

        assert!(!ex.granted);
        let denial = ex.denial_reason.unwrap();
        assert_eq!(denial.kind, DenialKind::ScopeMismatch);
        assert_eq!(denial.suggestions.len(), 3);
    }

    #[test]
    fn denial_reports_missing_permission() {
        let ex = explain_authorization(
            &user(None),
            &PermissionKey::new(T::System, A::Execute),
            &BTreeSet::new(),
            &BTreeSet::new(),
        );
        assert!(!ex.granted);
        assert_eq!(ex.denial_reason.unwrap().kind, DenialKind::MissingPermission);
    }

    fn any_key() -> impl Strategy<Value = PermissionKey> {
        let scope = prop::option::of(prop::sample::select(vec!["posts", "pages"]));
        (prop::sample::select(T::ALL.to_vec()), prop::sample::select(A::ALL.to_vec()), scope)
            .prop_map(|(t, a, scope)| match scope {
                Some(scope) => PermissionKey::scoped(t, a, scope),
                None => PermissionKey::new(t, a),
            })
    }

    fn grants(keys: Vec<PermissionKey>) -> BTreeSet<Permission> {
        keys.into_iter()
            .map(|key| NewPermission::new(key).into_permission(PermissionId::new(), Utc::now()))
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn effective_set_covers_both_sources_and_agrees_with_explain(
            role_keys in prop::collection::vec(any_key(), 0..6),
            direct_keys in prop::collection::vec(any_key(), 0..6),
            required in any_key(),
        ) {
            let role = grants(role_keys);
            let direct = grants(direct_keys);
            let effective = effective_permissions(&role, &direct);

            prop_assert!(effective.is_superset(&role));
            prop_assert!(effective.is_superset(&direct));
            prop_assert_eq!(effective.len(), role.len() + direct.len());

            let ex = explain_authorization(&user(Some(RoleId::new())), &required, &role, &direct);
            prop_assert_eq!(ex.granted, is_covered(&effective, &required));
            prop_assert_eq!(ex.principal.effective_permissions.is_empty(), effective.is_empty());
        }
    }

    #[test]
    fn explanation_serializes() {
        let ex = explain_authorization(
            &user(None),
            &PermissionKey::new(T::Configuration, A::Update),
            &BTreeSet::new(),
            &BTreeSet::new(),
        );
        let json = serde_json::to_value(&ex).unwrap();
        assert_eq!(json["required_permission"], "configuration:update");
        assert_eq!(json["denial_reason"]["kind"], "missing_permission");
    }
}
