// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for Prometheus metric keys
pub const LOGIN_SUCCEEDED: &str = "auth.login.succeeded";
pub const LOGIN_FAILED: &str = "auth.login.failed";
pub const SIGNUP: &str = "auth.signup";
pub const SOCIAL_LOGIN: &str = "auth.social.login";
pub const PASSPORT_CREATED: &str = "auth.passport.created";
pub const PASSPORT_REFRESHED: &str = "auth.passport.refreshed";
pub const PROVIDER_FETCH_FAILED: &str = "auth.provider.fetch_failed";
pub const PRESENCE_FLUSHED: &str = "presence.flushed";
pub const PRESENCE_TRACKED: &str = "presence.tracked";
