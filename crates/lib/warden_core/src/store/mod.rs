//! Storage collaborator for the access-control core.
//!
//! The core holds no cross-request state; everything durable lives behind
//! [`AuthStore`]. Two implementations ship with the crate: [`MemoryStore`]
//! for tests and embedding, and [`PgStore`] for PostgreSQL.

pub mod memory;
pub mod postgres;

use std::collections::BTreeSet;
use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthError;
use crate::models::auth::{
    Fingerprint, NewUser, Permission, PermissionId, Role, RoleId, TokenRecord, TokenScope, User,
    UserId,
};
use crate::models::page::Page;
use crate::permissions::PermissionOverrides;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".into()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.constraint().unwrap_or("unique").to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::NotFound(db.constraint().unwrap_or("reference").to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Edit applied atomically to a user's granted/revoked sets.
pub type OverridesEdit = Box<dyn FnOnce(&mut PermissionOverrides) + Send>;

/// Edit applied atomically to a user's role memberships.
pub type RolesEdit = Box<dyn FnOnce(&mut BTreeSet<RoleId>) + Send>;

/// Durable state of users, roles, permissions and tokens.
///
/// Implementations must provide at least read-committed isolation and must
/// serialize concurrent `update_*` calls for the same user (row lock or
/// optimistic retry). The core does no locking of its own and relies on
/// this for the granted/revoked exclusivity invariant.
///
/// Deleting a user, role or permission must cascade to every edge that
/// references it, and deleting a user must delete its tokens.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Create a user. A duplicate email is `Conflict`.
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    /// Persist email, password hash and flags; bumps `updated_at`.
    async fn update_user(&self, user: &User) -> Result<User, StoreError>;

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// Exact, case-sensitive email match.
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn delete_user(&self, id: UserId) -> Result<(), StoreError>;

    /// One page of users ordered by ID, plus the total user count.
    async fn list_users(&self, page: Page) -> Result<(Vec<User>, u64), StoreError>;

    async fn insert_token(&self, token: &TokenRecord) -> Result<(), StoreError>;

    /// Point lookup by fingerprint. Scope and expiry are checked by the caller.
    async fn token_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<TokenRecord>, StoreError>;

    /// Delete every token of `scope` owned by `user`, returning how many went.
    async fn delete_tokens_for_user(
        &self,
        user: UserId,
        scope: TokenScope,
    ) -> Result<u64, StoreError>;

    /// Create a permission. A duplicate name is `Conflict`.
    async fn insert_permission(&self, name: &str) -> Result<Permission, StoreError>;

    async fn permission_by_id(&self, id: PermissionId) -> Result<Option<Permission>, StoreError>;

    /// One page of permissions ordered by ID, plus the total count.
    async fn list_permissions(&self, page: Page) -> Result<(Vec<Permission>, u64), StoreError>;

    /// Change a permission's name. A name already in use is `Conflict`.
    async fn rename_permission(
        &self,
        id: PermissionId,
        name: &str,
    ) -> Result<Permission, StoreError>;

    async fn delete_permission(&self, id: PermissionId) -> Result<(), StoreError>;

    /// Create a role holding `permissions`. Unknown permission IDs are `NotFound`.
    async fn insert_role(
        &self,
        name: &str,
        permissions: &[PermissionId],
    ) -> Result<Role, StoreError>;

    async fn role_by_id(&self, id: RoleId) -> Result<Option<Role>, StoreError>;

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError>;

    /// Roles of `user`, each with its permissions.
    async fn roles_for_user(&self, user: UserId) -> Result<Vec<Role>, StoreError>;

    /// Read-modify-write of `user`'s role memberships in one transaction.
    async fn update_user_roles(
        &self,
        user: UserId,
        edit: RolesEdit,
    ) -> Result<Vec<Role>, StoreError>;

    async fn permission_overrides(&self, user: UserId) -> Result<PermissionOverrides, StoreError>;

    /// Read-modify-write of `user`'s granted/revoked sets in one transaction.
    async fn update_permission_overrides(
        &self,
        user: UserId,
        edit: OverridesEdit,
    ) -> Result<PermissionOverrides, StoreError>;
}

/// Await a store call unless `cancel` fires first.
///
/// Cancellation is checked before polling the store, so an already
/// cancelled token never issues the read.
pub async fn with_cancel<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AuthError::Cancelled),
        res = fut => res.map_err(AuthError::from),
    }
}
