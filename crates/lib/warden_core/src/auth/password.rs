//! Password hashing via bcrypt.

use super::AuthError;

/// Default bcrypt cost factor.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Hash a password with bcrypt at the given cost.
pub fn hash_password(password: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(password, cost).map_err(|e| AuthError::HashingFailure(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
///
/// A non-matching password is `Ok(false)`. Only a digest bcrypt cannot read
/// is an error.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(password, hash)
        .map_err(|e| AuthError::HashingFailure(format!("bcrypt verify: {e}")))
}
