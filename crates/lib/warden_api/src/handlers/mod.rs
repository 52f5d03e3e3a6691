//! Request handlers.

pub mod access;
pub mod health;
pub mod tokens;
pub mod users;
