//! Per-user granted/revoked overrides.
//!
//! A permission is never in both sets at once: granting clears a revocation
//! and revoking clears a grant. Persisting the result is the caller's job.

use serde::{Deserialize, Serialize};

use super::PermissionSet;
use crate::models::auth::Permission;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverrides {
    pub granted: PermissionSet,
    pub revoked: PermissionSet,
}

impl PermissionOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to `granted` and drop from `revoked`. Idempotent.
    ///
    /// Returns `true` if either set changed.
    pub fn grant(&mut self, permission: Permission) -> bool {
        let unrevoked = self.revoked.remove(permission.id);
        let added = self.granted.insert(permission);
        added || unrevoked
    }

    /// Add to `revoked` and drop from `granted`. Idempotent.
    ///
    /// Returns `true` if either set changed.
    pub fn revoke(&mut self, permission: Permission) -> bool {
        let ungranted = self.granted.remove(permission.id);
        let added = self.revoked.insert(permission);
        added || ungranted
    }

    /// Whether the granted/revoked sets are disjoint.
    pub fn is_consistent(&self) -> bool {
        self.granted.ids().all(|id| !self.revoked.contains(id))
    }
}
