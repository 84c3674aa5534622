// ============================
// crates/backend-lib/src/handlers/mod.rs
// ============================
//! HTTP handlers for the auth routes.

pub mod password;
pub mod phone;
pub mod provider;
pub mod social;
