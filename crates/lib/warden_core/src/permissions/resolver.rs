//! Effective permission resolution.
//!
//! effective = (union of role permissions) + granted - revoked
//!
//! Revocation beats both role membership and explicit grants. Resolution is
//! recomputed from the inputs on every call; there is no cache to invalidate.

use std::collections::BTreeSet;

use serde::Serialize;

use super::PermissionOverrides;
use crate::models::auth::Role;

/// Everything the resolver needs about one user, as read from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserGrants {
    pub roles: Vec<Role>,
    pub overrides: PermissionOverrides,
}

impl UserGrants {
    pub fn new(roles: Vec<Role>, overrides: PermissionOverrides) -> Self {
        Self { roles, overrides }
    }

    /// Compute the effective permission set.
    pub fn effective(&self) -> EffectivePermissions {
        let mut names: BTreeSet<String> = self
            .roles
            .iter()
            .flat_map(|r| r.permissions.iter())
            .map(|p| p.name.clone())
            .collect();
        names.extend(self.overrides.granted.names().map(str::to_string));
        for revoked in self.overrides.revoked.names() {
            names.remove(revoked);
        }
        EffectivePermissions(names)
    }

    /// Whether the user may exercise `name`.
    pub fn has_permission(&self, name: &str) -> bool {
        if self.overrides.revoked.contains_name(name) {
            return false;
        }
        self.overrides.granted.contains_name(name)
            || self
                .roles
                .iter()
                .any(|r| r.permissions.iter().any(|p| p.name == name))
    }

    /// Explain why `name` is or is not held.
    pub fn explain(&self, name: &str) -> Decision {
        let source = if self.overrides.revoked.contains_name(name) {
            DecisionSource::Revoked
        } else if self.overrides.granted.contains_name(name) {
            DecisionSource::Granted
        } else if let Some(role) = self
            .roles
            .iter()
            .find(|r| r.permissions.iter().any(|p| p.name == name))
        {
            DecisionSource::Role(role.name.clone())
        } else {
            DecisionSource::Missing
        };

        Decision {
            permission: name.to_string(),
            granted: matches!(source, DecisionSource::Granted | DecisionSource::Role(_)),
            source,
        }
    }
}

/// The resolved set of permission names a user holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EffectivePermissions(BTreeSet<String>);

impl EffectivePermissions {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outcome of [`UserGrants::explain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub permission: String,
    pub granted: bool,
    pub source: DecisionSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "role")]
pub enum DecisionSource {
    /// Held through the named role.
    Role(String),
    /// Held through an explicit grant.
    Granted,
    /// Explicitly revoked; wins over everything else.
    Revoked,
    /// Not held at all.
    Missing,
}
