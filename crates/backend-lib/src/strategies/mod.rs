// ============================
// passport-backend-lib/src/strategies/mod.rs
// ============================
//! Social login strategies.
//!
//! Each supported provider type is one adapter implementing [`Strategy`].
//! The set of types is closed and listed in [`registry::get_strategies`];
//! configuration only decides which instances exist and with what options.
//!
//! A login goes through an adapter in this order:
//! 1. [`Strategy::get_passport_strategy`] builds the OAuth2 handshake object,
//!    which redirects the browser and exchanges the callback code.
//! 2. [`Strategy::get_extra_data`] fetches the provider profile with the
//!    access token.
//! 3. [`Strategy::create_passport`] maps the profile into a [`Passport`].
use std::time::Duration;

use async_trait::async_trait;
use oauth2::basic::BasicTokenType;
use oauth2::url::Url;
use oauth2::{
    AccessToken, AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ProviderConfig;
use crate::error::AppError;
use crate::models::{NewPassport, Passport, PassportProfile};
use crate::storage::Storage;

pub mod demo;
pub mod registry;
pub mod vkontakte;

pub use registry::{get_strategies, SkippedProvider, StrategyConstructor, StrategyRegistry};

/// Path under which the module mounts its HTTP surface
pub const MODULE_PREFIX: &str = "/api/module/auth";

/// Host-provided data every adapter is built with
#[derive(Clone)]
pub struct StrategyContext {
    /// Public base URL of the host, without trailing slash
    pub base_url: String,
    /// Client for profile fetches; carries the fetch timeout
    pub http: reqwest::Client,
}

impl StrategyContext {
    pub fn new(base_url: impl Into<String>, fetch_timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::Configuration(format!("failed to build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    /// `"{base_url}/api/module/auth/{provider}/callback"`
    pub fn callback_url(&self, provider: &str) -> String {
        format!("{}{}/{}/callback", self.base_url, MODULE_PREFIX, provider)
    }
}

/// Everything needed to instantiate one configured provider
#[derive(Clone)]
pub struct StrategyInit {
    pub provider: String,
    pub config: ProviderConfig,
    pub context: StrategyContext,
}

/// Credentials returned by the provider's token endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct AccessTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Non-standard fields of the token response, e.g. VK's `user_id` and
    /// `email`
    pub profile: Option<Value>,
}

/// A completed handshake, ready to become a passport
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub extra_data: Value,
    pub provider_id: String,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    /// Instance key from configuration
    fn provider(&self) -> &str;

    /// Adapter type name
    fn kind(&self) -> &'static str;

    /// Effective configuration, after defaulting
    fn config(&self) -> &ProviderConfig;

    /// Fill in provider defaults the caller left unset. Never overwrites a
    /// value that is already present.
    fn update_config(
        provider: &str,
        config: ProviderConfig,
        context: &StrategyContext,
    ) -> ProviderConfig
    where
        Self: Sized;

    /// Fetch the provider profile for an access token
    async fn get_extra_data(&self, tokens: &AccessTokens) -> Result<Value, AppError>;

    /// External identifier inside a fetched profile
    fn provider_id(&self, extra_data: &Value) -> Result<String, AppError> {
        id_field(extra_data, "id").ok_or_else(|| {
            AppError::ProviderUnavailable(format!("{} profile has no id", self.provider()))
        })
    }

    /// Provider-specific mapping into the normalized profile
    fn build_profile(&self, extra_data: &Value) -> PassportProfile;

    /// Passport fields for a handshake, without persisting anything
    fn new_passport(&self, handshake: &HandshakeResult) -> NewPassport {
        NewPassport {
            provider: self.provider().to_string(),
            provider_id: handshake.provider_id.clone(),
            raw: handshake.extra_data.clone(),
            profile: self.build_profile(&handshake.extra_data),
            token: Some(handshake.access_token.clone()),
            refresh_token: handshake.refresh_token.clone(),
        }
    }

    /// Map and persist a new passport. Existing passports are not checked
    /// here; the storage uniqueness constraint rejects a duplicate.
    async fn create_passport(
        &self,
        storage: &dyn Storage,
        handshake: &HandshakeResult,
    ) -> Result<Passport, AppError> {
        let passport = Passport::new(self.new_passport(handshake));
        storage.insert_passport(&passport).await?;
        Ok(passport)
    }

    /// OAuth2 handshake object for this provider
    fn get_passport_strategy(&self) -> Result<PassportStrategy, AppError> {
        PassportStrategy::new(self.provider(), self.config())
    }
}

fn bearer() -> BasicTokenType {
    BasicTokenType::Bearer
}

/// Token endpoint response. Unlike the RFC 6749 shape, `token_type` may be
/// missing (VK omits it); unknown fields are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTokenResponse {
    access_token: AccessToken,
    #[serde(default = "bearer")]
    token_type: BasicTokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TokenResponse for ProviderTokenResponse {
    type TokenType = BasicTokenType;

    fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    fn token_type(&self) -> &BasicTokenType {
        &self.token_type
    }

    fn expires_in(&self) -> Option<Duration> {
        self.expires_in.map(Duration::from_secs)
    }

    fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    fn scopes(&self) -> Option<&Vec<Scope>> {
        None
    }
}

type ProviderClient<HasAuthUrl, HasTokenUrl> = oauth2::Client<
    oauth2::basic::BasicErrorResponse,
    ProviderTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    HasAuthUrl,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    HasTokenUrl,
>;

/// OAuth client type with auth URL and token URL set.
type ConfiguredClient = ProviderClient<EndpointSet, EndpointSet>;

/// Handshake object composed into the request pipeline: builds the
/// authorization redirect and exchanges the callback code.
#[derive(Clone)]
pub struct PassportStrategy {
    provider: String,
    client: ConfiguredClient,
    scopes: Vec<String>,
}

fn required<'a>(value: &'a Option<String>, name: &str, provider: &str) -> Result<&'a str, AppError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Configuration(format!("{provider}: {name} is not set")))
}

impl PassportStrategy {
    pub fn new(provider: &str, config: &ProviderConfig) -> Result<Self, AppError> {
        let invalid = |name: &str, e: oauth2::url::ParseError| {
            AppError::Configuration(format!("{provider}: invalid {name}: {e}"))
        };
        let client_id = required(&config.client_id, "client_id", provider)?;
        let auth_url = AuthUrl::new(required(&config.auth_url, "auth_url", provider)?.to_string())
            .map_err(|e| invalid("auth_url", e))?;
        let token_url =
            TokenUrl::new(required(&config.token_url, "token_url", provider)?.to_string())
                .map_err(|e| invalid("token_url", e))?;
        let redirect_url =
            RedirectUrl::new(required(&config.callback_url, "callback_url", provider)?.to_string())
                .map_err(|e| invalid("callback_url", e))?;

        let client_id = ClientId::new(client_id.to_string());
        let mut client = ProviderClient::<EndpointNotSet, EndpointNotSet>::new(client_id)
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);
        if let Some(secret) = config.client_secret.as_ref().filter(|s| !s.is_empty()) {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        Ok(Self {
            provider: provider.to_string(),
            client,
            scopes: config.scope.clone().unwrap_or_default(),
        })
    }

    /// Send client credentials as form fields instead of HTTP basic auth
    pub fn with_credentials_in_body(mut self) -> Self {
        self.client = self.client.set_auth_type(AuthType::RequestBody);
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Authorization URL plus the CSRF state to remember for the callback
    pub fn authorize_url(&self) -> (Url, CsrfToken) {
        self.client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .url()
    }

    /// Exchange the callback code for provider credentials
    pub async fn exchange_code(
        &self,
        code: &str,
        http: &reqwest::Client,
    ) -> Result<AccessTokens, AppError> {
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(http)
            .await
            .map_err(|e| {
                AppError::ProviderUnavailable(format!("{}: token exchange failed: {e}", self.provider))
            })?;
        Ok(AccessTokens {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            profile: (!token.extra.is_empty()).then(|| Value::Object(token.extra.clone())),
        })
    }
}

/// Set `slot` unless the caller already did
pub(crate) fn fill(slot: &mut Option<String>, value: impl Into<String>) {
    if slot.as_deref().is_none_or(str::is_empty) {
        *slot = Some(value.into());
    }
}

/// Non-empty string field
pub(crate) fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Identifier that may arrive as a number or a string
pub(crate) fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Place name given either as a string or as `{"id": .., "title": ".."}`
pub(crate) fn title_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => obj
            .get("title")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

/// The primary profile object in a response: unwraps a `{"response": [...]}`
/// envelope or a bare array, and accepts a bare object.
pub(crate) fn first_profile(json: Value) -> Option<Value> {
    let json = match json {
        Value::Object(mut obj) if obj.contains_key("response") => obj.remove("response")?,
        other => other,
    };
    match json {
        Value::Array(items) => items.into_iter().next().filter(Value::is_object),
        obj @ Value::Object(_) => Some(obj),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ProviderConfig {
        ProviderConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            callback_url: Some("https://host/api/module/auth/x/callback".to_string()),
            auth_url: Some("https://provider/authorize".to_string()),
            token_url: Some("https://provider/token".to_string()),
            scope: Some(vec!["email".to_string()]),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn test_first_profile_shapes() {
        assert_eq!(
            first_profile(json!({ "response": [{ "id": 1 }, { "id": 2 }] })),
            Some(json!({ "id": 1 }))
        );
        assert_eq!(first_profile(json!([{ "id": 3 }])), Some(json!({ "id": 3 })));
        assert_eq!(first_profile(json!({ "id": 4 })), Some(json!({ "id": 4 })));
        assert_eq!(first_profile(json!({ "response": [] })), None);
        assert_eq!(first_profile(json!("nope")), None);
    }

    #[test]
    fn test_field_helpers() {
        let v = json!({ "id": 42, "sid": "x", "city": { "id": 1, "title": "Paris" }, "country": "FR", "empty": "" });
        assert_eq!(id_field(&v, "id").as_deref(), Some("42"));
        assert_eq!(id_field(&v, "sid").as_deref(), Some("x"));
        assert_eq!(title_field(&v, "city").as_deref(), Some("Paris"));
        assert_eq!(title_field(&v, "country").as_deref(), Some("FR"));
        assert_eq!(str_field(&v, "empty"), None);
    }

    #[test]
    fn test_fill_keeps_caller_values() {
        let mut set = Some("mine".to_string());
        fill(&mut set, "default");
        assert_eq!(set.as_deref(), Some("mine"));

        let mut unset = None;
        fill(&mut unset, "default");
        assert_eq!(unset.as_deref(), Some("default"));
    }

    #[test]
    fn test_token_response_without_token_type() {
        let token: ProviderTokenResponse = serde_json::from_value(json!({
            "access_token": "vk-at",
            "expires_in": 86400,
            "user_id": 66748,
            "email": "a@b.c"
        }))
        .unwrap();
        assert_eq!(token.access_token().secret(), "vk-at");
        assert_eq!(token.token_type(), &BasicTokenType::Bearer);
        assert_eq!(token.expires_in(), Some(Duration::from_secs(86400)));
        assert!(token.refresh_token().is_none());
        assert_eq!(token.extra.get("user_id"), Some(&json!(66748)));
        assert_eq!(token.extra.get("email"), Some(&json!("a@b.c")));

        let standard: ProviderTokenResponse = serde_json::from_value(json!({
            "access_token": "at",
            "token_type": "bearer",
            "refresh_token": "rt"
        }))
        .unwrap();
        assert_eq!(standard.refresh_token().map(|t| t.secret().as_str()), Some("rt"));
        assert!(standard.extra.is_empty());
    }

    #[test]
    fn test_authorize_url_carries_redirect_scope_and_state() {
        let strategy = PassportStrategy::new("x", &config()).unwrap();
        let (url, state) = strategy.authorize_url();
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query.get("client_id").map(String::as_str), Some("id"));
        assert_eq!(query.get("scope").map(String::as_str), Some("email"));
        assert_eq!(query.get("state"), Some(state.secret()));
        assert_eq!(
            query.get("redirect_uri").map(String::as_str),
            Some("https://host/api/module/auth/x/callback")
        );
    }

    #[test]
    fn test_passport_strategy_rejects_bad_config() {
        let mut missing = config();
        missing.client_id = None;
        assert!(matches!(
            PassportStrategy::new("x", &missing),
            Err(AppError::Configuration(_))
        ));

        let mut malformed = config();
        malformed.token_url = Some("not a url".to_string());
        assert!(matches!(
            PassportStrategy::new("x", &malformed),
            Err(AppError::Configuration(_))
        ));
    }
}
