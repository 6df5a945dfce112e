use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{DomainError, DomainResult, Entity, PermissionId, RoleId};

/// Named bundle of permissions assignable to users.
///
/// `permissions` is populated by the storage adapter from the role-permission
/// link relation; mutating it on a returned copy has no effect on storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub permissions: BTreeSet<PermissionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn apply_patch(&mut self, patch: &RolePatch, now: DateTime<Utc>) {
        if let Some(name) = &patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        self.updated_at = now;
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Input for creating a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub description: Option<String>,
    /// Permissions linked at creation time.
    pub permissions: BTreeSet<PermissionId>,
}

impl NewRole {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permission(mut self, id: PermissionId) -> Self {
        self.permissions.insert(id);
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        validate_role_name(&self.name)
    }

    pub fn into_role(self, id: RoleId, now: DateTime<Utc>) -> Role {
        Role {
            id,
            name: self.name.trim().to_string(),
            description: self.description,
            permissions: self.permissions,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Updatable role attributes. Permission links change through the link operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePatch {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
}

impl RolePatch {
    pub fn validate(&self) -> DomainResult<()> {
        match &self.name {
            Some(name) => validate_role_name(name),
            None => Ok(()),
        }
    }
}

fn validate_role_name(name: &str) -> DomainResult<()> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("role name cannot be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_role_trims_name() {
        let role = NewRole::named("  editor ").into_role(RoleId::new(), Utc::now());
        assert_eq!(role.name, "editor");
        assert!(role.permissions.is_empty());
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(NewRole::named("   ").validate().is_err());
        let patch = RolePatch {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
    }

    #[test]
    fn patch_can_clear_description() {
        let mut role = NewRole {
            name: "admin".into(),
            description: Some("all access".into()),
            permissions: BTreeSet::new(),
        }
        .into_role(RoleId::new(), Utc::now());

        role.apply_patch(
            &RolePatch {
                description: Some(None),
                ..Default::default()
            },
            Utc::now(),
        );
        assert_eq!(role.description, None);
        assert_eq!(role.name, "admin");
    }
}
