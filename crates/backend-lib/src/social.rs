// ============================
// passport-backend-lib/src/social.rs
// ============================
//! Passport resolution and the passport/user binding flows.
use metrics::counter;
use passport_common::AuthResponse;
use tracing::{debug, info};

use crate::auth::ExtraClaims;
use crate::error::AppError;
use crate::metrics::{PASSPORT_CREATED, PASSPORT_REFRESHED, SOCIAL_LOGIN};
use crate::models::{Passport, User};
use crate::strategies::{HandshakeResult, Strategy};
use crate::AppState;

/// Attempts at creating a user for a passport before giving up on a free
/// username
const SIGNUP_ATTEMPTS: usize = 3;

fn bound_elsewhere(passport: &Passport) -> AppError {
    AppError::UniquenessConflict(format!(
        "passport {}:{}",
        passport.provider, passport.provider_id
    ))
}

impl AppState {
    /// Token plus public view for a user
    pub fn auth_response(&self, user: &User) -> Result<AuthResponse, AppError> {
        Ok(AuthResponse {
            token: user.generate_token(&self.signer)?,
            user: user.to_view(),
        })
    }

    /// Passport token handed to the browser after a provider callback
    pub fn passport_token(&self, passport: &Passport) -> Result<String, AppError> {
        let mut extra = ExtraClaims::new();
        extra.insert("provider".to_string(), passport.provider.clone().into());
        passport.generate_token(&self.signer, extra)
    }

    /// Find or create the passport for a completed handshake. A repeat login
    /// refreshes the stored profile; concurrent first logins converge on one
    /// record.
    pub async fn resolve_passport(
        &self,
        provider: &str,
        handshake: HandshakeResult,
    ) -> Result<Passport, AppError> {
        let strategy = self
            .strategies
            .get(provider)
            .ok_or_else(|| AppError::NotFound(format!("provider {provider}")))?;

        if let Some(existing) = self
            .storage
            .find_passport_by_provider(provider, &handshake.provider_id)
            .await?
        {
            return self.refresh_passport(strategy.as_ref(), existing, &handshake).await;
        }

        match strategy.create_passport(self.storage.as_ref(), &handshake).await {
            Ok(passport) => {
                counter!(PASSPORT_CREATED).increment(1);
                info!(provider, passport_id = %passport.id, "passport created");
                Ok(passport)
            },
            Err(AppError::UniquenessConflict(_)) => {
                debug!(provider, provider_id = %handshake.provider_id, "passport created concurrently");
                let winner = self
                    .storage
                    .find_passport_by_provider(provider, &handshake.provider_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!(
                            "passport {provider}:{} vanished after conflict",
                            handshake.provider_id
                        ))
                    })?;
                self.refresh_passport(strategy.as_ref(), winner, &handshake).await
            },
            Err(e) => Err(e),
        }
    }

    async fn refresh_passport(
        &self,
        strategy: &dyn Strategy,
        passport: Passport,
        handshake: &HandshakeResult,
    ) -> Result<Passport, AppError> {
        let passport = self
            .storage
            .refresh_passport(&passport.id, strategy.new_passport(handshake))
            .await?;
        counter!(PASSPORT_REFRESHED).increment(1);
        debug!(passport_id = %passport.id, "passport refreshed");
        Ok(passport)
    }

    /// Log in with a passport token, creating and binding a user on first use.
    /// When two first logins race, the one whose bind lands wins and the
    /// other logs in as the winner's user.
    pub async fn social_login(&self, passport_token: &str) -> Result<AuthResponse, AppError> {
        let passport =
            Passport::get_by_token(&self.signer, self.storage.as_ref(), passport_token).await?;

        let user = match passport.get_user(self.storage.as_ref()).await? {
            Some(user) => user,
            None => self.bind_new_user(&passport).await?,
        };

        counter!(SOCIAL_LOGIN).increment(1);
        self.auth_response(&user)
    }

    async fn bind_new_user(&self, passport: &Passport) -> Result<User, AppError> {
        let user = self.create_user_for(passport).await?;
        let bound = self
            .storage
            .bind_passport(&passport.id, passport.user_id.as_deref(), Some(&user.id))
            .await;

        match bound {
            Ok(_) => {
                info!(user_id = %user.id, passport_id = %passport.id, "user created from passport");
                Ok(user)
            },
            Err(AppError::UniquenessConflict(_)) => {
                self.storage.delete_user(&user.id).await?;
                debug!(passport_id = %passport.id, "passport bound concurrently");
                let current = self
                    .storage
                    .find_passport(&passport.id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("passport {}", passport.id)))?;
                current.get_user(self.storage.as_ref()).await?.ok_or_else(|| {
                    AppError::UniquenessConflict(format!("passport {}", passport.id))
                })
            },
            Err(e) => {
                self.storage.delete_user(&user.id).await?;
                Err(e)
            },
        }
    }

    async fn create_user_for(&self, passport: &Passport) -> Result<User, AppError> {
        for attempt in 1..=SIGNUP_ATTEMPTS {
            let mut user = User::new(passport.generate_username(self.storage.as_ref()).await?);
            user.name = passport.profile.display_name();
            user.avatar = passport.profile.avatar.clone();

            match self.storage.insert_user(&user).await {
                Ok(()) => return Ok(user),
                Err(AppError::UniquenessConflict(_)) => {
                    debug!(attempt, username = %user.username, "username taken concurrently, retrying");
                },
                Err(e) => return Err(e),
            }
        }
        Err(AppError::UniquenessConflict("username".to_string()))
    }

    /// Attach a passport to an already authenticated user
    pub async fn social_bind(&self, user: &User, passport_token: &str) -> Result<Passport, AppError> {
        let passport =
            Passport::get_by_token(&self.signer, self.storage.as_ref(), passport_token).await?;
        match passport.user_id.as_deref() {
            Some(owner) if owner == user.id => return Ok(passport),
            Some(_) => return Err(bound_elsewhere(&passport)),
            None => {},
        }

        match self
            .storage
            .bind_passport(&passport.id, None, Some(&user.id))
            .await
        {
            Ok(bound) => {
                info!(user_id = %user.id, passport_id = %bound.id, "passport bound");
                Ok(bound)
            },
            Err(AppError::UniquenessConflict(_)) => {
                // Lost a race; fine if the winner was this same user
                match self.storage.find_passport(&passport.id).await? {
                    Some(current) if current.user_id.as_deref() == Some(user.id.as_str()) => {
                        Ok(current)
                    },
                    _ => Err(bound_elsewhere(&passport)),
                }
            },
            Err(e) => Err(e),
        }
    }

    /// Detach one of the user's passports, chosen by id or provider. The
    /// passport record is kept.
    pub async fn social_unbind(
        &self,
        user: &User,
        passport_id: Option<&str>,
        provider: Option<&str>,
    ) -> Result<Passport, AppError> {
        if passport_id.is_none() && provider.is_none() {
            return Err(AppError::InvalidInput(
                "passportId or provider is required".to_string(),
            ));
        }

        let passport = self
            .social_list(user)
            .await?
            .into_iter()
            .find(|p| match (passport_id, provider) {
                (Some(id), _) => p.id == id,
                (None, Some(provider)) => p.provider == provider,
                (None, None) => false,
            })
            .ok_or_else(|| AppError::NotFound("passport".to_string()))?;

        let passport = self
            .storage
            .bind_passport(&passport.id, Some(&user.id), None)
            .await?;
        info!(user_id = %user.id, passport_id = %passport.id, "passport unbound");
        Ok(passport)
    }

    /// Passports bound to the user, oldest first
    pub async fn social_list(&self, user: &User) -> Result<Vec<Passport>, AppError> {
        self.storage.find_passports_by_user(&user.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, ProviderEntry, Settings};
    use crate::models::NewPassport;
    use crate::storage::{MemoryStorage, SharedStorage, Storage, UserLookup};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    /// Memory storage whose reads take a while, so concurrent flows interleave
    struct SlowReads(MemoryStorage);

    impl SlowReads {
        async fn pause() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[async_trait]
    impl Storage for SlowReads {
        async fn find_user(&self, lookup: UserLookup<'_>) -> Result<Option<User>, AppError> {
            Self::pause().await;
            self.0.find_user(lookup).await
        }
        async fn insert_user(&self, user: &User) -> Result<(), AppError> {
            self.0.insert_user(user).await
        }
        async fn update_user(&self, user: &User) -> Result<(), AppError> {
            self.0.update_user(user).await
        }
        async fn delete_user(&self, id: &str) -> Result<(), AppError> {
            self.0.delete_user(id).await
        }
        async fn touch_user(&self, id: &str, visited_at: DateTime<Utc>) -> Result<(), AppError> {
            self.0.touch_user(id, visited_at).await
        }
        async fn find_passport(&self, id: &str) -> Result<Option<Passport>, AppError> {
            Self::pause().await;
            self.0.find_passport(id).await
        }
        async fn find_passport_by_provider(
            &self,
            provider: &str,
            provider_id: &str,
        ) -> Result<Option<Passport>, AppError> {
            Self::pause().await;
            self.0.find_passport_by_provider(provider, provider_id).await
        }
        async fn find_passports_by_user(&self, user_id: &str) -> Result<Vec<Passport>, AppError> {
            Self::pause().await;
            self.0.find_passports_by_user(user_id).await
        }
        async fn insert_passport(&self, passport: &Passport) -> Result<(), AppError> {
            self.0.insert_passport(passport).await
        }
        async fn refresh_passport(&self, id: &str, data: NewPassport) -> Result<Passport, AppError> {
            self.0.refresh_passport(id, data).await
        }
        async fn bind_passport(
            &self,
            id: &str,
            expected: Option<&str>,
            user_id: Option<&str>,
        ) -> Result<Passport, AppError> {
            self.0.bind_passport(id, expected, user_id).await
        }
    }

    fn state() -> (AppState, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (state_over(storage.clone()), storage)
    }

    fn state_over(storage: SharedStorage) -> AppState {
        let settings = Settings::builder()
            .jwt_secret("secret")
            .social(ProviderEntry {
                provider: "demo".to_string(),
                kind: "oauth-demo".to_string(),
                config: ProviderConfig::default(),
            })
            .build()
            .unwrap();
        AppState::new(settings, storage).unwrap()
    }

    fn handshake(provider_id: &str, first_name: &str) -> HandshakeResult {
        HandshakeResult {
            access_token: "at".to_string(),
            refresh_token: None,
            extra_data: json!({ "first_name": first_name, "last_name": "B", "sex": 1 }),
            provider_id: provider_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_resolve_passport_reuses_record() {
        let (state, storage) = state();
        let first = state.resolve_passport("demo", handshake("42", "A")).await.unwrap();
        let second = state.resolve_passport("demo", handshake("42", "Z")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.profile.first_name.as_deref(), Some("Z"));
        assert_eq!(storage.passport_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_passport_concurrently() {
        let (state, storage) = state();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move { state.resolve_passport("demo", handshake("7", "A")).await })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(storage.passport_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_passport_unknown_provider() {
        let (state, _) = state();
        assert!(matches!(
            state.resolve_passport("nope", handshake("1", "A")).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_social_login_creates_user_once() {
        let (state, storage) = state();
        let passport = state.resolve_passport("demo", handshake("42", "A")).await.unwrap();
        let token = state.passport_token(&passport).unwrap();

        let first = state.social_login(&token).await.unwrap();
        assert_eq!(first.user.username, "42_demo.com");
        assert_eq!(first.user.name.as_deref(), Some("A B"));

        let again = state.social_login(&token).await.unwrap();
        assert_eq!(again.user.id, first.user.id);

        let stored = storage.find_passport(&passport.id).await.unwrap().unwrap();
        assert_eq!(stored.user_id.as_deref(), Some(first.user.id.as_str()));
    }

    #[tokio::test]
    async fn test_concurrent_social_login_shares_one_user() {
        let memory = MemoryStorage::new();
        let state = state_over(Arc::new(SlowReads(memory.clone())));
        let passport = state.resolve_passport("demo", handshake("42", "A")).await.unwrap();
        let token = state.passport_token(&passport).unwrap();

        let (a, b) = tokio::join!(state.social_login(&token), state.social_login(&token));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.user.id, b.user.id);

        let stored = memory.find_passport(&passport.id).await.unwrap().unwrap();
        assert_eq!(stored.user_id.as_deref(), Some(a.user.id.as_str()));

        // The losing signup leaves no orphan account behind
        for username in ["42_demo.com", "42_demo.com_1"] {
            if let Some(user) = memory.find_user(UserLookup::Username(username)).await.unwrap() {
                assert_eq!(user.id, a.user.id);
            }
        }
    }

    #[tokio::test]
    async fn test_refresh_keeps_binding() {
        let (state, storage) = state();
        let alice = User::new("alice");
        storage.insert_user(&alice).await.unwrap();

        let passport = state.resolve_passport("demo", handshake("42", "A")).await.unwrap();
        let token = state.passport_token(&passport).unwrap();
        state.social_bind(&alice, &token).await.unwrap();

        let refreshed = state.resolve_passport("demo", handshake("42", "Z")).await.unwrap();
        assert_eq!(refreshed.user_id.as_deref(), Some(alice.id.as_str()));
        assert_eq!(refreshed.profile.first_name.as_deref(), Some("Z"));
    }

    #[tokio::test]
    async fn test_social_login_picks_free_username() {
        let (state, storage) = state();
        storage.insert_user(&User::new("42_demo.com")).await.unwrap();
        let passport = state.resolve_passport("demo", handshake("42", "A")).await.unwrap();
        let token = state.passport_token(&passport).unwrap();
        let response = state.social_login(&token).await.unwrap();
        assert_eq!(response.user.username, "42_demo.com_1");
    }

    #[tokio::test]
    async fn test_bind_and_unbind() {
        let (state, storage) = state();
        let alice = User::new("alice");
        let bob = User::new("bob");
        storage.insert_user(&alice).await.unwrap();
        storage.insert_user(&bob).await.unwrap();

        let passport = state.resolve_passport("demo", handshake("42", "A")).await.unwrap();
        let token = state.passport_token(&passport).unwrap();

        state.social_bind(&alice, &token).await.unwrap();
        assert!(matches!(
            state.social_bind(&bob, &token).await,
            Err(AppError::UniquenessConflict(_))
        ));
        assert_eq!(state.social_list(&alice).await.unwrap().len(), 1);

        let unbound = state.social_unbind(&alice, None, Some("demo")).await.unwrap();
        assert!(unbound.user_id.is_none());

        let stored = storage.find_passport(&passport.id).await.unwrap().unwrap();
        assert!(stored.get_user(storage.as_ref()).await.unwrap().is_none());
        assert!(state.social_list(&alice).await.unwrap().is_empty());

        assert!(matches!(
            state.social_unbind(&alice, Some(&passport.id), None).await,
            Err(AppError::NotFound(_))
        ));
        assert!(storage
            .find_user(UserLookup::Id(&alice.id))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_unbind_needs_a_selector() {
        let (state, _) = state();
        assert!(matches!(
            state.social_unbind(&User::new("x"), None, None).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
