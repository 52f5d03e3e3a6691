//! Access-control configuration.

use std::str::FromStr;

use chrono::Duration;
use tracing::warn;

use crate::auth::password::DEFAULT_COST;

/// Authentication token lifetime: 3 days.
const DEFAULT_TOKEN_TTL_SECS: i64 = 3 * 24 * 60 * 60;

/// Activation token lifetime: 3 days.
const DEFAULT_ACTIVATION_TTL_SECS: i64 = 3 * 24 * 60 * 60;

/// Upper bound for either lifetime: 10 years.
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Tunables for token issuance and password hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Lifetime of `authentication` tokens issued at login.
    pub token_ttl: Duration,
    /// Lifetime of `activation` tokens issued at registration.
    pub activation_ttl: Duration,
    /// bcrypt work factor (4..=31).
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
            activation_ttl: Duration::seconds(DEFAULT_ACTIVATION_TTL_SECS),
            bcrypt_cost: DEFAULT_COST,
        }
    }
}

impl AuthConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                     | Default  |
    /// |------------------------------|----------|
    /// | `WARDEN_TOKEN_TTL_SECS`      | `259200` |
    /// | `WARDEN_ACTIVATION_TTL_SECS` | `259200` |
    /// | `WARDEN_BCRYPT_COST`         | `12`     |
    ///
    /// Unparseable or out-of-range values fall back to the default with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AuthConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let token_ttl = read(&lookup, "WARDEN_TOKEN_TTL_SECS", ttl_in_range)
            .and_then(Duration::try_seconds)
            .unwrap_or(defaults.token_ttl);
        let activation_ttl = read(&lookup, "WARDEN_ACTIVATION_TTL_SECS", ttl_in_range)
            .and_then(Duration::try_seconds)
            .unwrap_or(defaults.activation_ttl);
        let bcrypt_cost = read(&lookup, "WARDEN_BCRYPT_COST", |c: u32| (4..=31).contains(&c))
            .unwrap_or(defaults.bcrypt_cost);

        Self {
            token_ttl,
            activation_ttl,
            bcrypt_cost,
        }
    }
}

fn ttl_in_range(secs: i64) -> bool {
    (1..=MAX_TTL_SECS).contains(&secs)
}

fn read<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    valid: impl Fn(T) -> bool,
) -> Option<T>
where
    T: Copy,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) if valid(v) => Some(v),
        _ => {
            warn!(key, value = %raw, "ignoring invalid configuration value");
            None
        }
    }
}
