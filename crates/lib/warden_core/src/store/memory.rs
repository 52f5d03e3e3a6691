//! In-process [`AuthStore`] backed by `DashMap`.
//!
//! Per-user edits hold the shard lock of that user's entry for the whole
//! read-modify-write, which serializes concurrent edits of one user.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{AuthStore, OverridesEdit, RolesEdit, StoreError};
use crate::models::auth::{
    Fingerprint, NewUser, Permission, PermissionId, Role, RoleId, TokenRecord, TokenScope, User,
    UserId,
};
use crate::models::page::Page;
use crate::permissions::PermissionOverrides;

#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    users: DashMap<UserId, User>,
    emails: DashMap<String, UserId>,
    tokens: DashMap<Fingerprint, TokenRecord>,
    permissions: DashMap<PermissionId, Permission>,
    permission_names: DashMap<String, PermissionId>,
    roles: DashMap<RoleId, Role>,
    role_names: DashMap<String, RoleId>,
    user_roles: DashMap<UserId, BTreeSet<RoleId>>,
    overrides: DashMap<UserId, PermissionOverrides>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn require_user(&self, id: UserId) -> Result<(), StoreError> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("user {id}")))
        }
    }

    /// Read-modify-write of one per-user entry under its shard lock.
    ///
    /// The user is checked with the lock held: a concurrent `delete_user`
    /// either finishes first and the edit fails, or blocks on this entry
    /// and removes it after the edit.
    fn edit_user_entry<V, F>(
        &self,
        map: &DashMap<UserId, V>,
        user: UserId,
        apply: F,
    ) -> Result<V, StoreError>
    where
        V: Clone + Default,
        F: FnOnce(&mut V) -> Result<(), StoreError>,
    {
        let entry = map.entry(user);
        self.require_user(user)?;
        let mut next = match &entry {
            Entry::Occupied(current) => current.get().clone(),
            Entry::Vacant(_) => V::default(),
        };
        apply(&mut next)?;
        match entry {
            Entry::Occupied(mut current) => {
                current.insert(next.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(next.clone());
            }
        }
        Ok(next)
    }

    fn page_of<K, V>(map: &DashMap<K, V>, page: Page) -> (Vec<V>, u64)
    where
        K: Ord + Copy + std::hash::Hash,
        V: Clone,
    {
        let mut keys: Vec<K> = map.iter().map(|e| *e.key()).collect();
        keys.sort_unstable();
        let total = keys.len() as u64;
        let items = keys
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page.limit as usize)
            .filter_map(|k| map.get(&k).map(|v| v.clone()))
            .collect();
        (items, total)
    }

    fn resolve_roles(&self, ids: &BTreeSet<RoleId>) -> Vec<Role> {
        ids.iter()
            .filter_map(|id| self.roles.get(id).map(|r| r.clone()))
            .collect()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        match self.emails.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict("users_email_key".into())),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let created = User {
                    id: UserId(self.next_id()),
                    email: user.email,
                    password_hash: user.password_hash,
                    is_activated: user.is_activated,
                    is_admin: user.is_admin,
                    created_at: now,
                    updated_at: now,
                };
                slot.insert(created.id);
                self.users.insert(created.id, created.clone());
                Ok(created)
            }
        }
    }

    async fn update_user(&self, user: &User) -> Result<User, StoreError> {
        let old_email = self
            .users
            .get(&user.id)
            .map(|u| u.email.clone())
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user.id)))?;

        if old_email != user.email {
            match self.emails.entry(user.email.clone()) {
                Entry::Occupied(_) => return Err(StoreError::Conflict("users_email_key".into())),
                Entry::Vacant(slot) => {
                    slot.insert(user.id);
                }
            }
            self.emails.remove(&old_email);
        }

        let mut updated = user.clone();
        updated.updated_at = Utc::now();
        self.users.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let id = self.emails.get(email).map(|id| *id);
        Ok(id.and_then(|id| self.users.get(&id).map(|u| u.clone())))
    }

    async fn delete_user(&self, id: UserId) -> Result<(), StoreError> {
        let (_, user) = self
            .users
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        self.emails.remove(&user.email);
        self.tokens.retain(|_, t| t.user_id != id);
        self.user_roles.remove(&id);
        self.overrides.remove(&id);
        Ok(())
    }

    async fn list_users(&self, page: Page) -> Result<(Vec<User>, u64), StoreError> {
        Ok(Self::page_of(&self.users, page))
    }

    async fn insert_token(&self, token: &TokenRecord) -> Result<(), StoreError> {
        self.require_user(token.user_id)?;
        match self.tokens.entry(token.fingerprint) {
            Entry::Occupied(_) => Err(StoreError::Conflict("tokens_pkey".into())),
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
                Ok(())
            }
        }
    }

    async fn token_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.tokens.get(fingerprint).map(|t| t.clone()))
    }

    async fn delete_tokens_for_user(
        &self,
        user: UserId,
        scope: TokenScope,
    ) -> Result<u64, StoreError> {
        let before = self.tokens.len();
        self.tokens
            .retain(|_, t| !(t.user_id == user && t.scope == scope));
        Ok((before - self.tokens.len()) as u64)
    }

    async fn insert_permission(&self, name: &str) -> Result<Permission, StoreError> {
        match self.permission_names.entry(name.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Conflict("permissions_name_key".into())),
            Entry::Vacant(slot) => {
                let permission = Permission {
                    id: PermissionId(self.next_id()),
                    name: name.to_string(),
                };
                slot.insert(permission.id);
                self.permissions.insert(permission.id, permission.clone());
                Ok(permission)
            }
        }
    }

    async fn permission_by_id(&self, id: PermissionId) -> Result<Option<Permission>, StoreError> {
        Ok(self.permissions.get(&id).map(|p| p.clone()))
    }

    async fn list_permissions(&self, page: Page) -> Result<(Vec<Permission>, u64), StoreError> {
        Ok(Self::page_of(&self.permissions, page))
    }

    async fn rename_permission(
        &self,
        id: PermissionId,
        name: &str,
    ) -> Result<Permission, StoreError> {
        let old = self
            .permissions
            .get(&id)
            .map(|p| p.name.clone())
            .ok_or_else(|| StoreError::NotFound(format!("permission {id}")))?;
        if old == name {
            return Ok(Permission { id, name: old });
        }

        // Name index before the row, the same order as insert_permission.
        match self.permission_names.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(StoreError::Conflict("permissions_name_key".into())),
            Entry::Vacant(slot) => {
                let Some(mut permission) = self.permissions.get_mut(&id) else {
                    return Err(StoreError::NotFound(format!("permission {id}")));
                };
                permission.name = name.to_string();
                slot.insert(id);
            }
        }
        self.permission_names.remove(&old);

        for mut role in self.roles.iter_mut() {
            for p in role.permissions.iter_mut().filter(|p| p.id == id) {
                p.name = name.to_string();
            }
        }
        for mut o in self.overrides.iter_mut() {
            o.granted.rename(id, name);
            o.revoked.rename(id, name);
        }
        Ok(Permission {
            id,
            name: name.to_string(),
        })
    }

    async fn delete_permission(&self, id: PermissionId) -> Result<(), StoreError> {
        let (_, permission) = self
            .permissions
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("permission {id}")))?;
        self.permission_names.remove(&permission.name);
        for mut role in self.roles.iter_mut() {
            role.permissions.retain(|p| p.id != id);
        }
        for mut o in self.overrides.iter_mut() {
            o.granted.remove(id);
            o.revoked.remove(id);
        }
        Ok(())
    }

    async fn insert_role(
        &self,
        name: &str,
        permissions: &[PermissionId],
    ) -> Result<Role, StoreError> {
        let mut resolved = Vec::with_capacity(permissions.len());
        let unique: BTreeSet<PermissionId> = permissions.iter().copied().collect();
        for id in unique {
            let permission = self
                .permissions
                .get(&id)
                .map(|p| p.clone())
                .ok_or_else(|| StoreError::NotFound(format!("permission {id}")))?;
            resolved.push(permission);
        }

        match self.role_names.entry(name.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Conflict("roles_name_key".into())),
            Entry::Vacant(slot) => {
                let role = Role {
                    id: RoleId(self.next_id()),
                    name: name.to_string(),
                    permissions: resolved,
                };
                slot.insert(role.id);
                self.roles.insert(role.id, role.clone());
                Ok(role)
            }
        }
    }

    async fn role_by_id(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        Ok(self.roles.get(&id).map(|r| r.clone()))
    }

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        let (_, role) = self
            .roles
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("role {id}")))?;
        self.role_names.remove(&role.name);
        for mut memberships in self.user_roles.iter_mut() {
            memberships.remove(&id);
        }
        Ok(())
    }

    async fn roles_for_user(&self, user: UserId) -> Result<Vec<Role>, StoreError> {
        let ids = self
            .user_roles
            .get(&user)
            .map(|r| r.clone())
            .unwrap_or_default();
        Ok(self.resolve_roles(&ids))
    }

    async fn update_user_roles(
        &self,
        user: UserId,
        edit: RolesEdit,
    ) -> Result<Vec<Role>, StoreError> {
        let ids = self.edit_user_entry(&self.user_roles, user, |ids: &mut BTreeSet<RoleId>| {
            edit(ids);
            match ids.iter().find(|id| !self.roles.contains_key(id)) {
                Some(missing) => Err(StoreError::NotFound(format!("role {missing}"))),
                None => Ok(()),
            }
        })?;
        Ok(self.resolve_roles(&ids))
    }

    async fn permission_overrides(&self, user: UserId) -> Result<PermissionOverrides, StoreError> {
        Ok(self
            .overrides
            .get(&user)
            .map(|o| o.clone())
            .unwrap_or_default())
    }

    async fn update_permission_overrides(
        &self,
        user: UserId,
        edit: OverridesEdit,
    ) -> Result<PermissionOverrides, StoreError> {
        self.edit_user_entry(&self.overrides, user, |o: &mut PermissionOverrides| {
            edit(o);
            match o
                .granted
                .ids()
                .chain(o.revoked.ids())
                .find(|id| !self.permissions.contains_key(id))
            {
                Some(missing) => Err(StoreError::NotFound(format!("permission {missing}"))),
                None => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: "hash".into(),
            is_activated: true,
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let store = MemoryStore::new();
        store.insert_user(new_user("a@example.com")).await.unwrap();
        let err = store.insert_user(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        // case-sensitive
        store.insert_user(new_user("A@example.com")).await.unwrap();
    }

    #[tokio::test]
    async fn update_user_moves_email_index() {
        let store = MemoryStore::new();
        let mut user = store.insert_user(new_user("old@example.com")).await.unwrap();
        user.email = "new@example.com".into();
        store.update_user(&user).await.unwrap();
        assert!(store.user_by_email("old@example.com").await.unwrap().is_none());
        assert_eq!(
            store.user_by_email("new@example.com").await.unwrap().unwrap().id,
            user.id
        );
    }

    #[tokio::test]
    async fn deleting_a_user_cascades_tokens_and_edges() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();
        let perm = store.insert_permission("p").await.unwrap();
        let role = store.insert_role("r", &[perm.id]).await.unwrap();
        let role_id = role.id;
        store
            .update_user_roles(user.id, Box::new(move |r: &mut BTreeSet<RoleId>| {
                r.insert(role_id);
            }))
            .await
            .unwrap();
        let token = TokenRecord {
            fingerprint: Fingerprint([9; 32]),
            user_id: user.id,
            scope: TokenScope::Authentication,
            expiry: Utc::now() + Duration::hours(1),
        };
        store.insert_token(&token).await.unwrap();

        store.delete_user(user.id).await.unwrap();

        assert!(store.token_by_fingerprint(&token.fingerprint).await.unwrap().is_none());
        assert!(store.roles_for_user(user.id).await.unwrap().is_empty());
        assert!(store.user_by_email("a@example.com").await.unwrap().is_none());
        assert!(store.role_by_id(role.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deleting_a_permission_cascades_to_roles_and_overrides() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();
        let keep = store.insert_permission("keep").await.unwrap();
        let dropped = store.insert_permission("drop").await.unwrap();
        let role = store.insert_role("r", &[keep.id, dropped.id]).await.unwrap();
        let granted = dropped.clone();
        store
            .update_permission_overrides(user.id, Box::new(move |o: &mut PermissionOverrides| {
                o.grant(granted);
            }))
            .await
            .unwrap();

        store.delete_permission(dropped.id).await.unwrap();

        let role = store.role_by_id(role.id).await.unwrap().unwrap();
        assert_eq!(role.permissions, vec![keep]);
        assert!(store.permission_overrides(user.id).await.unwrap().granted.is_empty());
    }

    #[tokio::test]
    async fn deleting_a_role_clears_memberships() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();
        let role = store.insert_role("r", &[]).await.unwrap();
        let role_id = role.id;
        store
            .update_user_roles(user.id, Box::new(move |r: &mut BTreeSet<RoleId>| {
                r.insert(role_id);
            }))
            .await
            .unwrap();
        store.delete_role(role.id).await.unwrap();
        assert!(store.roles_for_user(user.id).await.unwrap().is_empty());
        let err = store.delete_role(role.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn edits_reject_unknown_references() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();

        let err = store
            .update_user_roles(user.id, Box::new(|r: &mut BTreeSet<RoleId>| {
                r.insert(RoleId(999));
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let err = store
            .update_permission_overrides(UserId(999), Box::new(|_: &mut PermissionOverrides| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let err = store.insert_role("r", &[PermissionId(999)]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_tokens_for_user_is_scoped() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();
        let expiry = Utc::now() + Duration::hours(1);
        for (i, scope) in [TokenScope::Activation, TokenScope::Authentication]
            .into_iter()
            .enumerate()
        {
            store
                .insert_token(&TokenRecord {
                    fingerprint: Fingerprint([i as u8; 32]),
                    user_id: user.id,
                    scope,
                    expiry,
                })
                .await
                .unwrap();
        }
        let removed = store
            .delete_tokens_for_user(user.id, TokenScope::Activation)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.token_by_fingerprint(&Fingerprint([1; 32])).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn edits_of_a_deleted_user_leave_no_rows() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("gone@example.com")).await.unwrap();
        let perm = store.insert_permission("p").await.unwrap();
        store.delete_user(user.id).await.unwrap();

        let err = store
            .update_permission_overrides(user.id, Box::new(move |o: &mut PermissionOverrides| {
                o.grant(perm);
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        let err = store
            .update_user_roles(user.id, Box::new(|_: &mut BTreeSet<RoleId>| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        assert!(!store.overrides.contains_key(&user.id));
        assert!(!store.user_roles.contains_key(&user.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_grant_and_revoke_stay_exclusive() {
        let store = Arc::new(MemoryStore::new());
        let user = store.insert_user(new_user("busy@example.com")).await.unwrap().id;
        let mut perms = Vec::new();
        for name in ["a", "b", "c"] {
            perms.push(store.insert_permission(name).await.unwrap());
        }

        let mut tasks = Vec::new();
        for i in 0..200usize {
            let store = Arc::clone(&store);
            let perm = perms[i % perms.len()].clone();
            tasks.push(tokio::spawn(async move {
                let edit: OverridesEdit = if i % 2 == 0 {
                    Box::new(move |o: &mut PermissionOverrides| {
                        o.grant(perm);
                    })
                } else {
                    Box::new(move |o: &mut PermissionOverrides| {
                        o.revoke(perm);
                    })
                };
                let o = store.update_permission_overrides(user, edit).await.unwrap();
                assert!(o.is_consistent());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let o = store.permission_overrides(user).await.unwrap();
        assert!(o.is_consistent());
        assert_eq!(o.granted.len() + o.revoked.len(), perms.len());
    }

    #[tokio::test]
    async fn listing_pages_by_id() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.insert_user(new_user(&format!("u{i}@example.com"))).await.unwrap();
        }
        let (first, total) = store.list_users(Page::new(1, 2)).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(first.len(), 2);
        assert!(first[0].id < first[1].id);

        let (last, _) = store.list_users(Page::new(3, 2)).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].email, "u4@example.com");

        let (beyond, total) = store.list_users(Page::new(9, 2)).await.unwrap();
        assert!(beyond.is_empty());
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn rename_permission_follows_into_roles_and_overrides() {
        let store = MemoryStore::new();
        let user = store.insert_user(new_user("a@example.com")).await.unwrap();
        let perm = store.insert_permission("old").await.unwrap();
        store.insert_permission("taken").await.unwrap();
        let role = store.insert_role("r", &[perm.id]).await.unwrap();
        let granted = perm.clone();
        store
            .update_permission_overrides(user.id, Box::new(move |o: &mut PermissionOverrides| {
                o.grant(granted);
            }))
            .await
            .unwrap();

        let err = store.rename_permission(perm.id, "taken").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let renamed = store.rename_permission(perm.id, "new").await.unwrap();
        assert_eq!(renamed.name, "new");
        assert_eq!(store.role_by_id(role.id).await.unwrap().unwrap().permissions[0].name, "new");
        assert!(store.permission_overrides(user.id).await.unwrap().granted.contains_name("new"));

        // The old name is free again, the new one is not.
        store.insert_permission("old").await.unwrap();
        let err = store.insert_permission("new").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = store.rename_permission(PermissionId(999), "x").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
