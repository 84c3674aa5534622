// ============================
// passport-backend-lib/src/strategies/demo.rs
// ============================
//! Generic OAuth2 adapter.
//!
//! Endpoints default to paths under the host base URL so a local
//! authorization server can stand in for a real provider.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    fill, first_profile, str_field, title_field, AccessTokens, Strategy, StrategyContext,
    StrategyInit,
};
use crate::config::ProviderConfig;
use crate::error::AppError;
use crate::models::{Gender, PassportProfile};

pub const TYPE_NAME: &str = "oauth-demo";

const DEFAULT_CLIENT_ID: &str = "demo";

pub struct DemoStrategy {
    provider: String,
    config: ProviderConfig,
    http: reqwest::Client,
}

impl DemoStrategy {
    pub fn new(init: StrategyInit) -> Self {
        let config = Self::update_config(&init.provider, init.config, &init.context);
        Self {
            provider: init.provider,
            config,
            http: init.context.http,
        }
    }
}

pub fn construct(init: StrategyInit) -> Arc<dyn Strategy> {
    Arc::new(DemoStrategy::new(init))
}

/// ISO/IEC 5218: 1 is male, 2 is female
fn gender(value: &Value) -> Option<Gender> {
    let code = match value.get("sex")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    match code {
        Some(1) => Some(Gender::Male),
        Some(2) => Some(Gender::Female),
        _ => None,
    }
}

#[async_trait]
impl Strategy for DemoStrategy {
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
        let base = &context.base_url;
        fill(&mut config.client_id, DEFAULT_CLIENT_ID);
        fill(&mut config.callback_url, context.callback_url(provider));
        fill(&mut config.auth_url, format!("{base}/oauth-demo/authorize"));
        fill(&mut config.token_url, format!("{base}/oauth-demo/token"));
        fill(&mut config.profile_url, format!("{base}/oauth-demo/profile"));
        if config.scope.is_none() {
            config.scope = Some(vec!["profile".to_string()]);
        }
        config
    }

    async fn get_extra_data(&self, tokens: &AccessTokens) -> Result<Value, AppError> {
        let url = self.config.profile_url.as_deref().ok_or_else(|| {
            AppError::Configuration(format!("{}: profile_url is not set", self.provider))
        })?;
        let mut request = self.http.get(url).bearer_auth(&tokens.access_token);
        if let Some(fields) = &self.config.fields {
            request = request.query(&[("fields", fields.join(","))]);
        }
        let json: Value = request.send().await?.error_for_status()?.json().await?;

        first_profile(json).ok_or_else(|| {
            AppError::ProviderUnavailable(format!("{}: unexpected profile response", self.provider))
        })
    }

    fn build_profile(&self, extra_data: &Value) -> PassportProfile {
        let picture = str_field(extra_data, "picture").or_else(|| str_field(extra_data, "avatar"));
        PassportProfile {
            first_name: str_field(extra_data, "first_name"),
            last_name: str_field(extra_data, "last_name"),
            gender: gender(extra_data),
            photos: picture.iter().cloned().collect(),
            avatar: picture,
            city: title_field(extra_data, "city"),
            country: title_field(extra_data, "country"),
        }
    }
}
