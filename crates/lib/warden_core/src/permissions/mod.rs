//! Permission sets, per-user overrides, and effective-permission resolution.

pub mod overrides;
pub mod resolver;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::auth::{Permission, PermissionId};

pub use overrides::PermissionOverrides;
pub use resolver::{Decision, DecisionSource, EffectivePermissions, UserGrants};

/// Set of permissions keyed by ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Permission>", into = "Vec<Permission>")]
pub struct PermissionSet(BTreeMap<PermissionId, Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the permission was not already present.
    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission.id, permission).is_none()
    }

    /// Returns `true` if the permission was present.
    pub fn remove(&mut self, id: PermissionId) -> bool {
        self.0.remove(&id).is_some()
    }

    /// Update the name carried for `id`, if present.
    pub fn rename(&mut self, id: PermissionId, name: &str) {
        if let Some(p) = self.0.get_mut(&id) {
            p.name = name.to_string();
        }
    }

    pub fn contains(&self, id: PermissionId) -> bool {
        self.0.contains_key(&id)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.0.values().any(|p| p.name == name)
    }

    pub fn ids(&self) -> impl Iterator<Item = PermissionId> + '_ {
        self.0.keys().copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.values().map(|p| p.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> + '_ {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().map(|p| (p.id, p)).collect())
    }
}

impl From<Vec<Permission>> for PermissionSet {
    fn from(v: Vec<Permission>) -> Self {
        v.into_iter().collect()
    }
}

impl From<PermissionSet> for Vec<Permission> {
    fn from(set: PermissionSet) -> Self {
        set.0.into_values().collect()
    }
}
