//! Authentication and authorization logic.
//!
//! Provides password hashing, opaque bearer tokens, the authentication gate
//! and the authorization guards. Storage is reached only through
//! [`crate::store::AuthStore`].

pub mod authorize;
pub mod gate;
pub mod password;
pub mod tokens;

use thiserror::Error;

use crate::store::StoreError;

/// Authentication and authorization errors.
///
/// Denials (`CredentialMismatch` through `NotPermitted`) are expected
/// outcomes of user input. Everything else is a fault.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Password hashing failed: {0}")]
    HashingFailure(String),

    #[error("Random source failed: {0}")]
    RandomSourceFailure(String),

    #[error("Invalid credentials")]
    CredentialMismatch,

    #[error("Invalid or missing token")]
    TokenExpiredOrUnknown,

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Account is not activated")]
    AccountInactive,

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Request identity read before the authentication gate attached it")]
    IdentityNotAttached,

    #[error("Request identity attached twice")]
    IdentityAlreadyAttached,
}

impl AuthError {
    /// True for outcomes caused by what the caller presented.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            AuthError::CredentialMismatch
                | AuthError::TokenExpiredOrUnknown
                | AuthError::AuthenticationRequired
                | AuthError::AccountInactive
                | AuthError::NotPermitted(_)
        )
    }

    /// True for infrastructure failures and programming errors.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            AuthError::HashingFailure(_)
                | AuthError::RandomSourceFailure(_)
                | AuthError::StoreUnavailable(_)
                | AuthError::IdentityNotAttached
                | AuthError::IdentityAlreadyAttached
        )
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => AuthError::StoreUnavailable(msg),
            StoreError::NotFound(what) => AuthError::NotFound(what),
            StoreError::Conflict(what) => AuthError::Conflict(what),
        }
    }
}
