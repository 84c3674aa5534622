// ============================
// passport-backend-lib/src/lib.rs
// ============================
//! Social-identity linking and login for a host web application.
//!
//! [`AuthModule`] owns the lifecycle: it reads the auth configuration,
//! instantiates the configured provider strategies, starts presence tracking
//! and mounts the HTTP surface under `/api/module/auth`. Request handlers
//! share one [`AppState`].

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod module;
pub mod presence;
pub mod router;
pub mod social;
pub mod storage;
pub mod strategies;
pub mod validation;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::auth::{AuthRateLimiter, TokenSigner, VerificationStore};
use crate::config::Settings;
use crate::error::AppError;
use crate::presence::PresenceTracker;
use crate::storage::SharedStorage;
use crate::strategies::{PassportStrategy, StrategyContext, StrategyRegistry};

pub use crate::module::AuthModule;

/// An authorization redirect waiting for its callback
#[derive(Debug, Clone)]
pub struct PendingHandshake {
    pub provider: String,
    pub expires_at: Instant,
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Settings the module was initialized with
    pub settings: Arc<Settings>,
    /// Storage collaborator for users and passports
    pub storage: SharedStorage,
    /// Signs and verifies user and passport tokens
    pub signer: Arc<TokenSigner>,
    /// Configured provider strategies
    pub strategies: Arc<StrategyRegistry>,
    /// Handshake objects, keyed by provider. Filled in by `AuthModule::run`.
    pub handshakes: Arc<HashMap<String, PassportStrategy>>,
    /// CSRF state of in-flight handshakes
    pub pending_handshakes: Arc<DashMap<String, PendingHandshake>>,
    /// Last-seen tracking
    pub presence: PresenceTracker,
    /// Failed password logins per client
    pub auth_rate_limiter: Arc<AuthRateLimiter>,
    /// Email, recovery and phone codes
    pub verification: VerificationStore,
    /// Client used for provider calls
    pub http: reqwest::Client,
}

impl AppState {
    /// Build the state from settings. Presence flushing is not started here.
    pub fn new(settings: Settings, storage: SharedStorage) -> Result<Self, AppError> {
        let auth = &settings.auth;
        let context = StrategyContext::new(
            settings.base_url.clone(),
            Duration::from_secs(auth.profile_fetch_timeout_secs),
        )?;
        let strategies = StrategyRegistry::build(&auth.socials, &context);

        let presence_storage = storage.clone();
        let presence = PresenceTracker::new(move |user_id, seen_at| {
            let storage = presence_storage.clone();
            async move { storage.touch_user(&user_id, seen_at).await }
        })
        .with_retention(Duration::from_secs(settings.presence.online_window_secs));

        Ok(Self {
            signer: Arc::new(TokenSigner::from_settings(&settings.jwt)),
            strategies: Arc::new(strategies),
            handshakes: Arc::new(HashMap::new()),
            pending_handshakes: Arc::new(DashMap::new()),
            presence,
            auth_rate_limiter: Arc::new(AuthRateLimiter::new(
                auth.login_max_attempts,
                Duration::from_secs(auth.login_lockout_secs),
            )),
            verification: VerificationStore::new(Duration::from_secs(auth.verification_ttl_secs)),
            http: context.http,
            settings: Arc::new(settings),
            storage,
        })
    }

    /// Remember the CSRF state of a redirect to `provider`
    pub fn remember_handshake(&self, state: String, provider: &str) {
        let ttl = Duration::from_secs(self.settings.auth.handshake_ttl_secs);
        self.pending_handshakes.insert(
            state,
            PendingHandshake {
                provider: provider.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Consume a CSRF state; true if it was issued for `provider` and is live
    pub fn take_handshake(&self, state: &str, provider: &str) -> bool {
        self.pending_handshakes
            .remove(state)
            .is_some_and(|(_, pending)| {
                pending.provider == provider && pending.expires_at > Instant::now()
            })
    }

    /// Drop expired handshake states and verification codes
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.pending_handshakes.retain(|_, pending| pending.expires_at > now);
        self.verification.cleanup();
        self.auth_rate_limiter.cleanup();
    }
}
