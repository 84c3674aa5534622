// ============================
// passport-backend-lib/src/strategies/vkontakte.rs
// ============================
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    fill, first_profile, id_field, str_field, title_field, AccessTokens, PassportStrategy,
    Strategy, StrategyContext, StrategyInit,
};
use crate::config::ProviderConfig;
use crate::error::AppError;
use crate::models::{Gender, PassportProfile};

pub const TYPE_NAME: &str = "vkontakte";

const AUTH_URL: &str = "https://oauth.vk.com/authorize";
const TOKEN_URL: &str = "https://oauth.vk.com/access_token";
const PROFILE_URL: &str = "https://api.vk.com/method/users.get";
const API_VERSION: &str = "5.131";

pub const DEFAULT_FIELDS: [&str; 9] = [
    "sex",
    "bdate",
    "city",
    "country",
    "photo_50",
    "photo_100",
    "photo_200",
    "photo_max_orig",
    "photo_max",
];

/// Smallest first
const PHOTO_FIELDS: [&str; 5] = [
    "photo_50",
    "photo_100",
    "photo_200",
    "photo_max",
    "photo_max_orig",
];

pub struct VkontakteStrategy {
    provider: String,
    config: ProviderConfig,
    http: reqwest::Client,
}

impl VkontakteStrategy {
    pub fn new(init: StrategyInit) -> Self {
        let config = Self::update_config(&init.provider, init.config, &init.context);
        Self {
            provider: init.provider,
            config,
            http: init.context.http,
        }
    }

    fn fields(&self) -> String {
        match &self.config.fields {
            Some(fields) => fields.join(","),
            None => DEFAULT_FIELDS.join(","),
        }
    }
}

pub fn construct(init: StrategyInit) -> Arc<dyn Strategy> {
    Arc::new(VkontakteStrategy::new(init))
}

/// VK `sex`: 1 is female, 2 is male, 0 is unspecified
fn gender(value: &Value) -> Option<Gender> {
    match value.get("sex").and_then(Value::as_i64) {
        Some(1) => Some(Gender::Female),
        Some(2) => Some(Gender::Male),
        _ => None,
    }
}

#[async_trait]
impl Strategy for VkontakteStrategy {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn kind(&self) -> &'static str {
        TYPE_NAME
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn update_config(
        provider: &str,
        mut config: ProviderConfig,
        context: &StrategyContext,
    ) -> ProviderConfig {
        fill(&mut config.callback_url, context.callback_url(provider));
        fill(&mut config.auth_url, AUTH_URL);
        fill(&mut config.token_url, TOKEN_URL);
        fill(&mut config.profile_url, PROFILE_URL);
        fill(&mut config.api_version, API_VERSION);
        if config.fields.is_none() {
            config.fields = Some(DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect());
        }
        config
    }

    /// `users.get` for the token's user. VK hands out `user_id` and `email`
    /// only in the token response; the email is merged into the profile.
    async fn get_extra_data(&self, tokens: &AccessTokens) -> Result<Value, AppError> {
        let url = self.config.profile_url.as_deref().unwrap_or(PROFILE_URL);
        let version = self.config.api_version.as_deref().unwrap_or(API_VERSION);
        let token_fields = tokens.profile.as_ref();

        let mut query = vec![
            ("fields", self.fields()),
            ("access_token", tokens.access_token.clone()),
            ("v", version.to_string()),
        ];
        if let Some(user_id) = token_fields.and_then(|t| id_field(t, "user_id")) {
            query.push(("user_ids", user_id));
        }

        let json: Value = self
            .http
            .get(url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // VK reports API errors with a 200 status
        if let Some(error) = json.get("error") {
            let message = str_field(error, "error_msg").unwrap_or_else(|| error.to_string());
            return Err(AppError::ProviderUnavailable(format!(
                "{}: {message}",
                self.provider
            )));
        }

        let mut profile = first_profile(json).ok_or_else(|| {
            AppError::ProviderUnavailable(format!("{}: unexpected profile response", self.provider))
        })?;
        if let (Some(email), Value::Object(obj)) =
            (token_fields.and_then(|t| str_field(t, "email")), &mut profile)
        {
            obj.entry("email").or_insert(Value::String(email));
        }
        Ok(profile)
    }

    fn build_profile(&self, extra_data: &Value) -> PassportProfile {
        let photos: Vec<String> = PHOTO_FIELDS
            .iter()
            .filter_map(|field| str_field(extra_data, field))
            .collect();
        PassportProfile {
            first_name: str_field(extra_data, "first_name"),
            last_name: str_field(extra_data, "last_name"),
            gender: gender(extra_data),
            photos,
            avatar: str_field(extra_data, "photo_200"),
            city: title_field(extra_data, "city"),
            country: title_field(extra_data, "country"),
        }
    }

    fn get_passport_strategy(&self) -> Result<PassportStrategy, AppError> {
        Ok(PassportStrategy::new(&self.provider, &self.config)?.with_credentials_in_body())
    }
}
