//! Authentication gate: bearer secret to request identity.
//!
//! Three outcomes: no usable credential (`Anonymous`), a credential that
//! matches a live `authentication` token (`Authenticated`), or a credential
//! that matches nothing live (`Rejected`). Unknown and expired tokens are
//! indistinguishable.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::AuthError;
use super::tokens::{fingerprint, is_well_formed};
use crate::models::auth::{TokenRecord, TokenScope, User};
use crate::store::{AuthStore, with_cancel};

/// Who is acting on this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Authenticated(User),
    Rejected,
}

impl Identity {
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }
}

/// Per-request state threaded from the gate to the guards.
///
/// The identity is attached exactly once. Reading it before then is a
/// wiring bug in the caller, reported as [`AuthError::IdentityNotAttached`].
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    identity: Option<Identity>,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose store reads abort when `cancel` fires.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            identity: None,
            cancel,
        }
    }

    pub fn attach(&mut self, identity: Identity) -> Result<(), AuthError> {
        if self.identity.is_some() {
            error!("request identity attached twice");
            return Err(AuthError::IdentityAlreadyAttached);
        }
        self.identity = Some(identity);
        Ok(())
    }

    pub fn identity(&self) -> Result<&Identity, AuthError> {
        self.identity.as_ref().ok_or_else(|| {
            error!("request identity read before the authentication gate ran");
            AuthError::IdentityNotAttached
        })
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Find the live token of `scope` for `secret` and its owner.
///
/// `None` covers unknown secret, wrong scope, expired token and vanished user.
pub async fn find_live_token(
    store: &dyn AuthStore,
    secret: &str,
    scope: TokenScope,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Option<(TokenRecord, User)>, AuthError> {
    let fp = fingerprint(secret);
    let Some(record) = with_cancel(cancel, store.token_by_fingerprint(&fp)).await? else {
        return Ok(None);
    };
    if record.scope != scope || !record.is_live_at(now) {
        return Ok(None);
    }
    let user = with_cancel(cancel, store.user_by_id(record.user_id)).await?;
    Ok(user.map(|u| (record, u)))
}

/// Resolve a presented bearer secret to an [`Identity`] as of `now`.
///
/// Errors are faults only (store down, cancelled); every credential problem
/// is an `Identity` variant.
pub async fn authenticate_at(
    store: &dyn AuthStore,
    credential: Option<&str>,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Identity, AuthError> {
    let secret = match credential.map(str::trim) {
        None => return Ok(Identity::Anonymous),
        Some(s) if !is_well_formed(s) => {
            debug!("malformed bearer credential treated as anonymous");
            return Ok(Identity::Anonymous);
        }
        Some(s) => s,
    };

    match find_live_token(store, secret, TokenScope::Authentication, now, cancel).await? {
        Some((_, user)) => {
            debug!(user_id = %user.id, "bearer token accepted");
            Ok(Identity::Authenticated(user))
        }
        None => {
            debug!("bearer token unknown, expired or out of scope");
            Ok(Identity::Rejected)
        }
    }
}

/// [`authenticate_at`] with the current time.
pub async fn authenticate(
    store: &dyn AuthStore,
    credential: Option<&str>,
    cancel: &CancellationToken,
) -> Result<Identity, AuthError> {
    authenticate_at(store, credential, Utc::now(), cancel).await
}
