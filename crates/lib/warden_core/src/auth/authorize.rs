//! Authorization guards.
//!
//! Each guard checks the request identity and either runs the wrapped
//! operation or returns the denial without running it.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::AuthError;
use super::gate::Identity;
use crate::models::auth::{User, UserId};
use crate::permissions::UserGrants;
use crate::store::{AuthStore, with_cancel};

/// What a protected operation demands of its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// An activated, authenticated user.
    Authenticated,
    /// An activated user holding the named permission, or an admin.
    Permission(String),
}

/// The authenticated, activated user behind `identity`, or the denial.
pub fn check_authenticated(identity: &Identity) -> Result<&User, AuthError> {
    match identity {
        Identity::Anonymous => Err(AuthError::AuthenticationRequired),
        Identity::Rejected => Err(AuthError::TokenExpiredOrUnknown),
        Identity::Authenticated(user) if !user.is_activated => {
            debug!(user_id = %user.id, "inactive account denied");
            Err(AuthError::AccountInactive)
        }
        Identity::Authenticated(user) => Ok(user),
    }
}

/// Permission check against grants already loaded for `user`.
pub fn check_permission(user: &User, grants: &UserGrants, name: &str) -> Result<(), AuthError> {
    if user.is_admin || grants.has_permission(name) {
        return Ok(());
    }
    debug!(user_id = %user.id, permission = name, "permission denied");
    Err(AuthError::NotPermitted(name.to_string()))
}

/// Load roles and overrides for `user` from the store.
pub async fn load_grants(
    store: &dyn AuthStore,
    user: UserId,
    cancel: &CancellationToken,
) -> Result<UserGrants, AuthError> {
    let (roles, overrides) = tokio::try_join!(
        with_cancel(cancel, store.roles_for_user(user)),
        with_cancel(cancel, store.permission_overrides(user)),
    )?;
    Ok(UserGrants::new(roles, overrides))
}

/// Verify `requirement` for `identity`, reading the store only when needed.
///
/// Admins skip the store read entirely.
pub async fn enforce(
    store: &dyn AuthStore,
    requirement: &Requirement,
    identity: &Identity,
    cancel: &CancellationToken,
) -> Result<(), AuthError> {
    let user = check_authenticated(identity)?;
    match requirement {
        Requirement::Authenticated => Ok(()),
        Requirement::Permission(_) if user.is_admin => Ok(()),
        Requirement::Permission(name) => {
            let grants = load_grants(store, user.id, cancel).await?;
            check_permission(user, &grants, name)
        }
    }
}

/// Run `next` only if `identity` is an activated user.
pub async fn require_authenticated<T, F, Fut>(identity: &Identity, next: F) -> Result<T, AuthError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, AuthError>>,
{
    check_authenticated(identity)?;
    next().await
}

/// Run `next` only if `identity` holds `permission` (or is an admin).
pub async fn require_permission<T, F, Fut>(
    store: &dyn AuthStore,
    permission: &str,
    identity: &Identity,
    cancel: &CancellationToken,
    next: F,
) -> Result<T, AuthError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, AuthError>>,
{
    enforce(
        store,
        &Requirement::Permission(permission.to_string()),
        identity,
        cancel,
    )
    .await?;
    next().await
}
