//! Access-control service facade.
//!
//! [`AccessControl`] bundles a store with [`AuthConfig`] and exposes every
//! account, token and permission operation the API layer needs.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::AuthError;
use crate::auth::authorize::{self, Requirement};
use crate::auth::gate::{self, Identity};
use crate::auth::password;
use crate::auth::tokens::generate_token;
use crate::config::AuthConfig;
use crate::models::auth::{
    IssuedToken, NewUser, Permission, PermissionId, Role, RoleId, TokenScope, User, UserId,
};
use crate::models::page::{MAX_LIMIT, MAX_PAGE, Page, PageMetadata, Paginated};
use crate::permissions::{Decision, EffectivePermissions, PermissionOverrides, PermissionSet, UserGrants};
use crate::store::{AuthStore, with_cancel};

/// bcrypt ignores input past 72 bytes.
const MAX_PASSWORD_BYTES: usize = 72;
const MIN_PASSWORD_CHARS: usize = 8;

/// Plaintext behind the decoy digest verified for unknown emails at login.
const DECOY_PASSWORD: &str = "warden-decoy-password";

/// Registration request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
}

/// Result of registration: the inactive user and its activation token.
///
/// The activation secret is for out-of-band delivery and is not
/// serializable, so it cannot leak into a response body by accident.
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    pub activation: IssuedToken,
}

/// Partial edit of a user. `None` leaves the field alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Roles, overrides and the resolved permission set of one user.
#[derive(Debug, Clone, Serialize)]
pub struct AccessSummary {
    pub user: User,
    pub roles: Vec<Role>,
    pub granted: PermissionSet,
    pub revoked: PermissionSet,
    pub effective: EffectivePermissions,
}

/// Entry point to the access-control core.
#[derive(Clone)]
pub struct AccessControl {
    store: Arc<dyn AuthStore>,
    config: AuthConfig,
    decoy_hash: Arc<OnceLock<String>>,
}

impl std::fmt::Debug for AccessControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessControl")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AccessControl {
    pub fn new(store: Arc<dyn AuthStore>, config: AuthConfig) -> Self {
        Self {
            store,
            config,
            decoy_hash: Arc::default(),
        }
    }

    pub fn store(&self) -> &dyn AuthStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // -- Gate and guards ----------------------------------------------------

    pub async fn authenticate(
        &self,
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Identity, AuthError> {
        gate::authenticate(self.store(), credential, cancel).await
    }

    pub async fn require_authenticated<T, F, Fut>(
        &self,
        identity: &Identity,
        next: F,
    ) -> Result<T, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        authorize::require_authenticated(identity, next).await
    }

    pub async fn require_permission<T, F, Fut>(
        &self,
        permission: &str,
        identity: &Identity,
        cancel: &CancellationToken,
        next: F,
    ) -> Result<T, AuthError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        authorize::require_permission(self.store(), permission, identity, cancel, next).await
    }

    pub async fn enforce(
        &self,
        requirement: &Requirement,
        identity: &Identity,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        authorize::enforce(self.store(), requirement, identity, cancel).await
    }

    // -- Passwords and tokens -----------------------------------------------

    /// Replace the in-memory password hash of `user`. Persisting is the caller's.
    pub fn set_password(&self, user: &mut User, plaintext: &str) -> Result<(), AuthError> {
        validate_password(plaintext)?;
        user.password_hash = password::hash_password(plaintext, self.config.bcrypt_cost)?;
        Ok(())
    }

    pub fn verify_password(&self, user: &User, plaintext: &str) -> Result<bool, AuthError> {
        password::verify_password(plaintext, &user.password_hash)
    }

    /// bcrypt digest at the configured cost that no real account uses.
    fn decoy_hash(&self) -> Result<&str, AuthError> {
        if let Some(hash) = self.decoy_hash.get() {
            return Ok(hash.as_str());
        }
        let hash = password::hash_password(DECOY_PASSWORD, self.config.bcrypt_cost)?;
        Ok(self.decoy_hash.get_or_init(|| hash).as_str())
    }

    /// Generate and persist a token. The returned secret is never stored.
    pub async fn issue_token(
        &self,
        user: UserId,
        ttl: Duration,
        scope: TokenScope,
        cancel: &CancellationToken,
    ) -> Result<IssuedToken, AuthError> {
        let token = generate_token(user, ttl, scope)?;
        with_cancel(cancel, self.store.insert_token(&token.record)).await?;
        debug!(user_id = %user, scope = %scope, "token issued");
        Ok(token.issued())
    }

    // -- Account lifecycle --------------------------------------------------

    /// Create an inactive, non-admin user and an activation token for it.
    pub async fn register(
        &self,
        account: NewAccount,
        cancel: &CancellationToken,
    ) -> Result<Registration, AuthError> {
        let email = account.email.trim().to_string();
        validate_email(&email)?;
        validate_password(&account.password)?;
        let password_hash = password::hash_password(&account.password, self.config.bcrypt_cost)?;

        let user = with_cancel(
            cancel,
            self.store.insert_user(NewUser {
                email,
                password_hash,
                is_activated: false,
                is_admin: false,
            }),
        )
        .await?;
        let activation = match self
            .issue_token(user.id, self.config.activation_ttl, TokenScope::Activation, cancel)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                // Without its token the account could never be activated.
                if let Err(cleanup) = self.store.delete_user(user.id).await {
                    warn!(user_id = %user.id, error = %cleanup, "could not roll back registration");
                }
                return Err(e);
            }
        };

        info!(user_id = %user.id, "user registered");
        Ok(Registration { user, activation })
    }

    /// Replace the activation tokens of an inactive user with a fresh one.
    ///
    /// An already active account is `Conflict`.
    pub async fn reissue_activation(
        &self,
        user: UserId,
        cancel: &CancellationToken,
    ) -> Result<IssuedToken, AuthError> {
        let account = self.user(user, cancel).await?;
        if account.is_activated {
            return Err(AuthError::Conflict(format!("user {user} is already activated")));
        }
        with_cancel(
            cancel,
            self.store.delete_tokens_for_user(user, TokenScope::Activation),
        )
        .await?;
        let token = self
            .issue_token(user, self.config.activation_ttl, TokenScope::Activation, cancel)
            .await?;
        info!(user_id = %user, "activation token reissued");
        Ok(token)
    }

    /// Activate the owner of a live activation token.
    ///
    /// Every activation token of that user is spent.
    pub async fn activate(&self, secret: &str, cancel: &CancellationToken) -> Result<User, AuthError> {
        let found =
            gate::find_live_token(self.store(), secret.trim(), TokenScope::Activation, Utc::now(), cancel)
                .await?;
        let Some((_, mut user)) = found else {
            return Err(AuthError::TokenExpiredOrUnknown);
        };

        user.is_activated = true;
        let user = with_cancel(cancel, self.store.update_user(&user)).await?;
        with_cancel(
            cancel,
            self.store.delete_tokens_for_user(user.id, TokenScope::Activation),
        )
        .await?;

        info!(user_id = %user.id, "user activated");
        Ok(user)
    }

    /// Exchange email and password for an authentication token.
    pub async fn login(
        &self,
        email: &str,
        plaintext: &str,
        cancel: &CancellationToken,
    ) -> Result<IssuedToken, AuthError> {
        let Some(user) = with_cancel(cancel, self.store.user_by_email(email.trim())).await? else {
            // Same bcrypt work as a wrong password, so timing does not reveal
            // whether the email has an account.
            password::verify_password(plaintext, self.decoy_hash()?)?;
            debug!("login for unknown email");
            return Err(AuthError::CredentialMismatch);
        };
        if !self.verify_password(&user, plaintext)? {
            debug!(user_id = %user.id, "password mismatch");
            return Err(AuthError::CredentialMismatch);
        }
        self.issue_token(user.id, self.config.token_ttl, TokenScope::Authentication, cancel)
            .await
    }

    /// Set a new password and sign the user out everywhere.
    pub async fn change_password(
        &self,
        user: UserId,
        plaintext: &str,
        cancel: &CancellationToken,
    ) -> Result<User, AuthError> {
        let changes = UserUpdate {
            password: Some(plaintext.to_string()),
            ..UserUpdate::default()
        };
        self.update_user(user, changes, cancel).await
    }

    /// Change email and/or password. A new password signs the user out
    /// everywhere.
    pub async fn update_user(
        &self,
        user: UserId,
        changes: UserUpdate,
        cancel: &CancellationToken,
    ) -> Result<User, AuthError> {
        let mut current = self.user(user, cancel).await?;
        if let Some(email) = &changes.email {
            let email = email.trim();
            validate_email(email)?;
            current.email = email.to_string();
        }
        if let Some(plaintext) = &changes.password {
            self.set_password(&mut current, plaintext)?;
        }

        let updated = with_cancel(cancel, self.store.update_user(&current)).await?;
        if changes.password.is_some() {
            with_cancel(
                cancel,
                self.store.delete_tokens_for_user(user, TokenScope::Authentication),
            )
            .await?;
        }
        info!(
            user_id = %user,
            email_changed = changes.email.is_some(),
            password_changed = changes.password.is_some(),
            "user updated"
        );
        Ok(updated)
    }

    pub async fn set_admin(
        &self,
        user: UserId,
        is_admin: bool,
        cancel: &CancellationToken,
    ) -> Result<User, AuthError> {
        let mut current = self.user(user, cancel).await?;
        current.is_admin = is_admin;
        let updated = with_cancel(cancel, self.store.update_user(&current)).await?;
        info!(user_id = %user, is_admin, "admin flag changed");
        Ok(updated)
    }

    pub async fn user(&self, id: UserId, cancel: &CancellationToken) -> Result<User, AuthError> {
        with_cancel(cancel, self.store.user_by_id(id))
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("user {id}")))
    }

    pub async fn list_users(
        &self,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Paginated<User>, AuthError> {
        validate_page(page)?;
        let (items, total) = with_cancel(cancel, self.store.list_users(page)).await?;
        Ok(Paginated {
            items,
            metadata: PageMetadata::new(page, total),
        })
    }

    pub async fn delete_user(&self, id: UserId, cancel: &CancellationToken) -> Result<(), AuthError> {
        with_cancel(cancel, self.store.delete_user(id)).await?;
        info!(user_id = %id, "user deleted");
        Ok(())
    }

    // -- Permission overrides -----------------------------------------------

    /// Grant `permission` to `user`, clearing any revocation of it.
    pub async fn grant_permission(
        &self,
        user: UserId,
        permission: PermissionId,
        cancel: &CancellationToken,
    ) -> Result<PermissionOverrides, AuthError> {
        let perm = self.permission(permission, cancel).await?;
        let overrides = with_cancel(
            cancel,
            self.store.update_permission_overrides(
                user,
                Box::new(move |o: &mut PermissionOverrides| {
                    o.grant(perm);
                }),
            ),
        )
        .await?;
        info!(user_id = %user, permission_id = %permission, "permission granted");
        Ok(overrides)
    }

    /// Revoke `permission` from `user`, clearing any grant of it.
    pub async fn revoke_permission(
        &self,
        user: UserId,
        permission: PermissionId,
        cancel: &CancellationToken,
    ) -> Result<PermissionOverrides, AuthError> {
        let perm = self.permission(permission, cancel).await?;
        let overrides = with_cancel(
            cancel,
            self.store.update_permission_overrides(
                user,
                Box::new(move |o: &mut PermissionOverrides| {
                    o.revoke(perm);
                }),
            ),
        )
        .await?;
        info!(user_id = %user, permission_id = %permission, "permission revoked");
        Ok(overrides)
    }

    // -- Roles --------------------------------------------------------------

    pub async fn assign_roles(
        &self,
        user: UserId,
        roles: &[RoleId],
        cancel: &CancellationToken,
    ) -> Result<Vec<Role>, AuthError> {
        let add: Vec<RoleId> = roles.to_vec();
        let updated = with_cancel(
            cancel,
            self.store.update_user_roles(
                user,
                Box::new(move |set: &mut BTreeSet<RoleId>| set.extend(add)),
            ),
        )
        .await?;
        info!(user_id = %user, count = roles.len(), "roles assigned");
        Ok(updated)
    }

    pub async fn unassign_roles(
        &self,
        user: UserId,
        roles: &[RoleId],
        cancel: &CancellationToken,
    ) -> Result<Vec<Role>, AuthError> {
        let drop_ids: BTreeSet<RoleId> = roles.iter().copied().collect();
        let updated = with_cancel(
            cancel,
            self.store.update_user_roles(
                user,
                Box::new(move |set: &mut BTreeSet<RoleId>| set.retain(|r| !drop_ids.contains(r))),
            ),
        )
        .await?;
        info!(user_id = %user, count = roles.len(), "roles unassigned");
        Ok(updated)
    }

    // -- Catalogue ----------------------------------------------------------

    pub async fn create_permission(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Permission, AuthError> {
        let name = validate_name("permission", name)?;
        let perm = with_cancel(cancel, self.store.insert_permission(name)).await?;
        info!(permission = %perm.name, "permission created");
        Ok(perm)
    }

    pub async fn permission(
        &self,
        id: PermissionId,
        cancel: &CancellationToken,
    ) -> Result<Permission, AuthError> {
        with_cancel(cancel, self.store.permission_by_id(id))
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("permission {id}")))
    }

    pub async fn list_permissions(
        &self,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Paginated<Permission>, AuthError> {
        validate_page(page)?;
        let (items, total) = with_cancel(cancel, self.store.list_permissions(page)).await?;
        Ok(Paginated {
            items,
            metadata: PageMetadata::new(page, total),
        })
    }

    pub async fn rename_permission(
        &self,
        id: PermissionId,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Permission, AuthError> {
        let name = validate_name("permission", name)?;
        let perm = with_cancel(cancel, self.store.rename_permission(id, name)).await?;
        info!(permission_id = %id, permission = %perm.name, "permission renamed");
        Ok(perm)
    }

    pub async fn delete_permission(
        &self,
        id: PermissionId,
        cancel: &CancellationToken,
    ) -> Result<(), AuthError> {
        with_cancel(cancel, self.store.delete_permission(id)).await?;
        info!(permission_id = %id, "permission deleted");
        Ok(())
    }

    pub async fn create_role(
        &self,
        name: &str,
        permissions: &[PermissionId],
        cancel: &CancellationToken,
    ) -> Result<Role, AuthError> {
        let name = validate_name("role", name)?;
        let role = with_cancel(cancel, self.store.insert_role(name, permissions)).await?;
        info!(role = %role.name, "role created");
        Ok(role)
    }

    pub async fn role(&self, id: RoleId, cancel: &CancellationToken) -> Result<Role, AuthError> {
        with_cancel(cancel, self.store.role_by_id(id))
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("role {id}")))
    }

    pub async fn delete_role(&self, id: RoleId, cancel: &CancellationToken) -> Result<(), AuthError> {
        with_cancel(cancel, self.store.delete_role(id)).await?;
        info!(role_id = %id, "role deleted");
        Ok(())
    }

    // -- Views --------------------------------------------------------------

    pub async fn grants(&self, user: UserId, cancel: &CancellationToken) -> Result<UserGrants, AuthError> {
        authorize::load_grants(self.store(), user, cancel).await
    }

    pub async fn access_summary(
        &self,
        user: UserId,
        cancel: &CancellationToken,
    ) -> Result<AccessSummary, AuthError> {
        let account = self.user(user, cancel).await?;
        let grants = self.grants(user, cancel).await?;
        let effective = grants.effective();
        let UserGrants { roles, overrides } = grants;
        Ok(AccessSummary {
            user: account,
            roles,
            granted: overrides.granted,
            revoked: overrides.revoked,
            effective,
        })
    }

    pub async fn explain(
        &self,
        user: UserId,
        permission: &str,
        cancel: &CancellationToken,
    ) -> Result<Decision, AuthError> {
        Ok(self.grants(user, cancel).await?.explain(permission))
    }
}

fn validate_email(email: &str) -> Result<(), AuthError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    };
    if valid && email.len() <= 500 {
        Ok(())
    } else {
        Err(AuthError::Invalid("email must be a valid email address".into()))
    }
}

fn validate_password(plaintext: &str) -> Result<(), AuthError> {
    if plaintext.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AuthError::Invalid(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    if plaintext.len() > MAX_PASSWORD_BYTES {
        return Err(AuthError::Invalid(format!(
            "password must not be more than {MAX_PASSWORD_BYTES} bytes"
        )));
    }
    Ok(())
}

fn validate_page(page: Page) -> Result<(), AuthError> {
    if page.is_valid() {
        Ok(())
    } else {
        Err(AuthError::Invalid(format!(
            "page must be 1..={MAX_PAGE} and limit 1..={MAX_LIMIT}"
        )))
    }
}

fn validate_name<'a>(kind: &str, name: &'a str) -> Result<&'a str, AuthError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AuthError::Invalid(format!("{kind} name must not be empty")));
    }
    Ok(name)
}
