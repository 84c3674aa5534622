//! Passport: one external identity, normalized.
//!
//! A passport is keyed logically by `(provider, providerId)`. It is created
//! when a provider handshake completes, refreshed on repeat logins, and bound
//! to at most one [`User`] through `userId`. Unbinding clears `userId`; the
//! record itself is kept.
use chrono::{DateTime, Utc};
use passport_common::PassportView;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::token::{Claims, ExtraClaims, TokenSigner};
use crate::error::AppError;
use crate::models::User;
use crate::storage::{Storage, UserLookup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

/// Provider-independent subset of an external profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassportProfile {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    /// Smallest first
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl PassportProfile {
    /// "First Last", whichever parts are present
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

/// Fields supplied by a strategy when creating a passport
#[derive(Debug, Clone)]
pub struct NewPassport {
    pub provider: String,
    pub provider_id: String,
    pub raw: Value,
    pub profile: PassportProfile,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Passport {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub provider: String,
    pub provider_id: String,
    /// Payload exactly as received from the provider
    #[serde(default)]
    pub raw: Value,
    #[serde(default)]
    pub profile: PassportProfile,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub fetched_at: DateTime<Utc>,
    /// Reserved for revocation
    pub status: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Passport {
    pub fn new(data: NewPassport) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: None,
            provider: data.provider,
            provider_id: data.provider_id,
            raw: data.raw,
            profile: data.profile,
            token: data.token,
            refresh_token: data.refresh_token,
            fetched_at: now,
            status: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Take the fetched data of a repeat login. Binding is left untouched.
    pub fn refresh(&mut self, data: NewPassport) {
        let now = Utc::now();
        self.raw = data.raw;
        self.profile = data.profile;
        if data.token.is_some() {
            self.token = data.token;
        }
        if data.refresh_token.is_some() {
            self.refresh_token = data.refresh_token;
        }
        self.fetched_at = now;
        self.updated_at = now;
    }

    /// Username candidate derived from the external identity.
    ///
    /// Starts from `"{providerId}_{provider}.com"` and appends `_1`, `_2`, ...
    /// until no user holds the name. Concurrent signups may still pick the
    /// same name; the storage uniqueness check rejects the loser.
    pub async fn generate_username(&self, storage: &dyn Storage) -> Result<String, AppError> {
        let base = format!("{}_{}.com", self.provider_id, self.provider).to_lowercase();
        let mut username = base.clone();
        let mut count: u64 = 0;
        while storage
            .find_user(UserLookup::Username(&username))
            .await?
            .is_some()
        {
            count += 1;
            username = format!("{base}_{count}");
        }
        Ok(username)
    }

    /// The bound user, if any and still present
    pub async fn get_user(&self, storage: &dyn Storage) -> Result<Option<User>, AppError> {
        match &self.user_id {
            Some(user_id) => storage.find_user(UserLookup::Id(user_id)).await,
            None => Ok(None),
        }
    }

    pub fn get_identity(&self, extra: ExtraClaims) -> Claims {
        Claims::new(self.id.clone(), extra)
    }

    pub fn generate_token(
        &self,
        signer: &TokenSigner,
        extra: ExtraClaims,
    ) -> Result<String, AppError> {
        signer.sign(self.get_identity(extra))
    }

    pub fn decode_token(signer: &TokenSigner, token: &str) -> Result<Claims, AppError> {
        signer.decode(token)
    }

    /// Load the passport a token was issued for
    pub async fn get_by_token(
        signer: &TokenSigner,
        storage: &dyn Storage,
        token: &str,
    ) -> Result<Passport, AppError> {
        let claims = Self::decode_token(signer, token)?;
        storage
            .find_passport(&claims.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("passport {}", claims.id)))
    }

    pub fn to_view(&self) -> PassportView {
        PassportView {
            id: self.id.clone(),
            provider: self.provider.clone(),
            provider_id: self.provider_id.clone(),
            user_id: self.user_id.clone(),
            profile: serde_json::to_value(&self.profile).unwrap_or(Value::Null),
            fetched_at: self.fetched_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn passport(provider: &str, provider_id: &str) -> Passport {
        Passport::new(NewPassport {
            provider: provider.to_string(),
            provider_id: provider_id.to_string(),
            raw: json!({}),
            profile: PassportProfile::default(),
            token: None,
            refresh_token: None,
        })
    }

    #[tokio::test]
    async fn test_generate_username_without_collision() {
        let storage = MemoryStorage::new();
        let username = passport("VKontakte", "42")
            .generate_username(&storage)
            .await
            .unwrap();
        assert_eq!(username, "42_vkontakte.com");
    }

    #[tokio::test]
    async fn test_generate_username_suffix_matches_collisions() {
        let storage = MemoryStorage::new();
        storage.insert_user(&User::new("42_vkontakte.com")).await.unwrap();
        storage.insert_user(&User::new("42_vkontakte.com_1")).await.unwrap();
        storage.insert_user(&User::new("42_vkontakte.com_2")).await.unwrap();

        let username = passport("vkontakte", "42")
            .generate_username(&storage)
            .await
            .unwrap();
        assert_eq!(username, "42_vkontakte.com_3");
        assert!(storage
            .find_user(UserLookup::Username(&username))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_get_user() {
        let storage = MemoryStorage::new();
        let mut p = passport("demo", "1");
        assert!(p.get_user(&storage).await.unwrap().is_none());

        let user = User::new("bob");
        storage.insert_user(&user).await.unwrap();
        p.user_id = Some(user.id.clone());
        assert_eq!(p.get_user(&storage).await.unwrap().unwrap().id, user.id);

        // Dangling reference
        p.user_id = Some("gone".to_string());
        assert!(p.get_user(&storage).await.unwrap().is_none());
    }

    #[test]
    fn test_get_identity_is_minimal() {
        let p = passport("demo", "1");
        let mut extra = ExtraClaims::new();
        extra.insert("provider".to_string(), json!("demo"));
        let claims = p.get_identity(extra);
        assert_eq!(claims.id, p.id);
        assert_eq!(claims.extra.len(), 1);
    }

    #[tokio::test]
    async fn test_get_by_token() {
        let storage = MemoryStorage::new();
        let signer = TokenSigner::new(Some("secret".to_string()), None);
        let p = passport("demo", "7");
        storage.insert_passport(&p).await.unwrap();

        let token = p.generate_token(&signer, ExtraClaims::new()).unwrap();
        assert_eq!(Passport::decode_token(&signer, &token).unwrap().id, p.id);
        assert_eq!(
            Passport::get_by_token(&signer, &storage, &token).await.unwrap().id,
            p.id
        );

        let stray = passport("demo", "8").generate_token(&signer, ExtraClaims::new()).unwrap();
        assert!(matches!(
            Passport::get_by_token(&signer, &storage, &stray).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_refresh_keeps_binding() {
        let mut p = passport("demo", "1");
        p.user_id = Some("u1".to_string());
        p.token = Some("old".to_string());
        p.refresh(NewPassport {
            provider: "demo".to_string(),
            provider_id: "1".to_string(),
            raw: json!({ "first_name": "A" }),
            profile: PassportProfile {
                first_name: Some("A".to_string()),
                ..PassportProfile::default()
            },
            token: None,
            refresh_token: Some("r".to_string()),
        });
        assert_eq!(p.user_id.as_deref(), Some("u1"));
        assert_eq!(p.token.as_deref(), Some("old"));
        assert_eq!(p.refresh_token.as_deref(), Some("r"));
        assert_eq!(p.profile.display_name().as_deref(), Some("A"));
    }
}
