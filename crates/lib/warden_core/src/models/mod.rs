//! Domain models shared by the core, the stores, and the API layer.

pub mod auth;
pub mod page;
