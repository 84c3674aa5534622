// crates/backend-lib/src/middleware/mod.rs

//! Request extractors and middleware for the auth routes.

pub mod params;
pub mod user;

pub use params::Params;
pub use user::{client_ip, resolve_user, touch_online, CurrentUser, OFFLINE_HEADER};
