// ============================
// passport-backend-lib/src/module.rs
// ============================
//! Auth module lifecycle.
//!
//! `init` reads the auth configuration and builds the shared state,
//! `run` composes the provider handshakes and returns the HTTP surface,
//! `shutdown` drains presence tracking.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tracing::{info, trace, warn};

use crate::config::Settings;
use crate::error::AppError;
use crate::router::create_router;
use crate::storage::SharedStorage;
use crate::strategies::PassportStrategy;
use crate::AppState;

enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready(AppState),
}

pub struct AuthModule {
    settings: Settings,
    storage: SharedStorage,
    lifecycle: Lifecycle,
}

impl AuthModule {
    pub fn new(settings: Settings, storage: SharedStorage) -> Self {
        Self {
            settings,
            storage,
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    /// Build the strategies and start presence tracking. Must be called
    /// from within a tokio runtime, once.
    pub fn init(&mut self) -> Result<(), AppError> {
        if !matches!(self.lifecycle, Lifecycle::Uninitialized) {
            warn!("auth module initialized twice");
            return Err(AppError::Configuration("already initialized".to_string()));
        }
        self.lifecycle = Lifecycle::Initializing;

        if let Some(telegram) = &self.settings.auth.telegram {
            info!(
                bot = telegram.username.as_deref().unwrap_or("<unnamed>"),
                "telegram channel configured, handled by the host"
            );
        }

        let state = match AppState::new(self.settings.clone(), self.storage.clone()) {
            Ok(state) => state,
            Err(e) => {
                self.lifecycle = Lifecycle::Uninitialized;
                return Err(e);
            },
        };
        if !state.signer.is_configured() {
            warn!("jwt secret is not set, token issuance will fail");
        }
        state.presence.start(Duration::from_secs(
            self.settings.presence.flush_interval_secs,
        ));

        info!(
            providers = state.strategies.len(),
            skipped = state.strategies.skipped().len(),
            "auth module initialized"
        );
        self.lifecycle = Lifecycle::Ready(state);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Ready(_))
    }

    /// Shared state, once initialized
    pub fn state(&self) -> Result<&AppState, AppError> {
        match &self.lifecycle {
            Lifecycle::Ready(state) => Ok(state),
            Lifecycle::Uninitialized | Lifecycle::Initializing => {
                Err(AppError::Configuration("auth module is not initialized".to_string()))
            },
        }
    }

    /// Compose every provider handshake and return the module router.
    pub fn run(&self) -> Result<Router, AppError> {
        Ok(create_router(self.composed_state()?))
    }

    /// State with the handshake of every provider that can build one.
    /// Providers whose handshake fails are left out.
    pub fn composed_state(&self) -> Result<AppState, AppError> {
        let mut state = self.state()?.clone();

        let mut handshakes: HashMap<String, PassportStrategy> = HashMap::new();
        for (provider, strategy) in state.strategies.iter() {
            match strategy.get_passport_strategy() {
                Ok(handshake) => {
                    handshakes.insert(provider.to_string(), handshake);
                },
                Err(e) => warn!(provider, error = %e, "provider handshake unavailable, skipped"),
            }
        }
        let mut names: Vec<&str> = handshakes.keys().map(String::as_str).collect();
        names.sort_unstable();
        trace!(providers = ?names, "auth strategies");

        state.handshakes = Arc::new(handshakes);
        Ok(state)
    }

    /// Stop presence flushing and write what is still pending
    pub async fn shutdown(&self) {
        if let Lifecycle::Ready(state) = &self.lifecycle {
            let saved = state.presence.shutdown().await;
            info!(saved, "auth module stopped");
        }
    }
}
