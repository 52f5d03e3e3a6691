//! Opaque bearer tokens.
//!
//! The client gets a random URL-safe secret exactly once. Storage only ever
//! sees its SHA-256 fingerprint, so a leaked table yields no usable
//! credentials.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use super::AuthError;
use crate::models::auth::{Fingerprint, IssuedToken, TokenRecord, TokenScope, UserId};

/// Random bytes per secret (128 bits).
pub const SECRET_BYTES: usize = 16;

/// A freshly generated token: the plaintext secret plus the row to persist.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub secret: String,
    pub record: TokenRecord,
}

impl NewToken {
    /// The client-facing view. Call once, after the record is stored.
    pub fn issued(&self) -> IssuedToken {
        IssuedToken {
            secret: self.secret.clone(),
            expiry: self.record.expiry,
        }
    }
}

/// Generate a token for `user_id` valid for `ttl` from now.
pub fn generate_token(
    user_id: UserId,
    ttl: Duration,
    scope: TokenScope,
) -> Result<NewToken, AuthError> {
    generate_token_at(user_id, ttl, scope, Utc::now())
}

/// Generate a token whose expiry is computed from an explicit `now`.
pub fn generate_token_at(
    user_id: UserId,
    ttl: Duration,
    scope: TokenScope,
    now: DateTime<Utc>,
) -> Result<NewToken, AuthError> {
    let expiry = now
        .checked_add_signed(ttl)
        .ok_or_else(|| AuthError::Invalid(format!("token lifetime of {ttl} is out of range")))?;

    let mut bytes = [0u8; SECRET_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::RandomSourceFailure(e.to_string()))?;

    let secret = URL_SAFE_NO_PAD.encode(bytes);
    let fingerprint = fingerprint(&secret);

    Ok(NewToken {
        secret,
        record: TokenRecord {
            fingerprint,
            user_id,
            scope,
            expiry,
        },
    })
}

/// SHA-256 fingerprint of a presented secret, used as the storage lookup key.
pub fn fingerprint(secret: &str) -> Fingerprint {
    let digest = Sha256::digest(secret.as_bytes());
    Fingerprint(digest.into())
}

/// Whether `secret` has the shape of a secret this module issues.
///
/// Anything else cannot match a stored fingerprint and is treated as no
/// credential at all.
pub fn is_well_formed(secret: &str) -> bool {
    URL_SAFE_NO_PAD
        .decode(secret)
        .is_ok_and(|bytes| bytes.len() == SECRET_BYTES)
}
