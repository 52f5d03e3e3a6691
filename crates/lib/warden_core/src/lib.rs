//! # warden_core
//!
//! Access-control core for Warden: password hashing, opaque bearer tokens,
//! effective-permission resolution, the authentication gate and the
//! authorization guards.

pub mod auth;
pub mod config;
pub mod migrate;
pub mod models;
pub mod permissions;
pub mod service;
pub mod store;

pub use auth::AuthError;
pub use auth::authorize::Requirement;
pub use auth::gate::{Identity, RequestContext};
pub use config::AuthConfig;
pub use models::page::{Page, PageMetadata, Paginated};
pub use service::{AccessControl, AccessSummary, NewAccount, Registration, UserUpdate};
pub use store::{AuthStore, MemoryStore, PgStore};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
