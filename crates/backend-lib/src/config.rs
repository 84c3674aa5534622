// ============================
// passport-backend-lib/src/config.rs
// ============================
//! Configuration management.
use std::path::{Path, PathBuf};

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::auth::PasswordRequirements;
use crate::error::AppError;

/// Prefix for environment overrides, e.g. `PASSPORT_JWT__SECRET`.
pub const ENV_PREFIX: &str = "PASSPORT_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Listener settings
    pub server: ServerSettings,
    /// Public base URL of the host, used to derive provider callback URLs
    pub base_url: String,
    /// Log level
    pub log_level: String,
    /// Storage settings
    pub storage: StorageSettings,
    /// Token signing settings
    pub jwt: JwtSettings,
    /// Auth module settings
    pub auth: AuthSettings,
    /// Presence tracker settings
    pub presence: PresenceSettings,
    /// Password requirements
    pub password_requirements: PasswordRequirements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Which storage collaborator backs the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    /// Process-wide signing secret. Token issuance fails while unset.
    pub secret: Option<String>,
    /// Token lifetime; tokens never expire when unset
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Configured social providers, `{provider, type, ...config}`
    pub socials: Vec<ProviderEntry>,
    /// Optional bot channel, handled by the host
    pub telegram: Option<TelegramSettings>,
    /// Where the provider callback sends the browser, with `?p=<passport token>`
    pub social_redirect: String,
    /// Where `/email/approve` redirects after approval
    pub email_approve_redirect: String,
    /// Timeout for the provider profile fetch
    pub profile_fetch_timeout_secs: u64,
    /// Lifetime of email/phone/recovery codes
    pub verification_ttl_secs: u64,
    /// Lifetime of a pending provider handshake
    pub handshake_ttl_secs: u64,
    /// Failed logins before a client is locked out
    pub login_max_attempts: u32,
    /// Lockout duration
    pub login_lockout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    pub token: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// One configured provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderEntry {
    /// Instance key, e.g. `vkontakte`
    pub provider: String,
    /// Adapter type, e.g. `vkontakte` or `oauth-demo`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub config: ProviderConfig,
}

/// Provider-specific secrets and options. Anything left unset is filled in by
/// the adapter's `update_config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    #[serde(alias = "callbackURL")]
    pub callback_url: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub profile_url: Option<String>,
    /// Requested profile fields
    pub fields: Option<Vec<String>>,
    pub scope: Option<Vec<String>>,
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceSettings {
    /// How often pending touches are written to storage
    pub flush_interval_secs: u64,
    /// A user counts as online this long after the last touch
    pub online_window_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            base_url: "http://localhost:8080".to_string(),
            log_level: "info".to_string(),
            storage: StorageSettings::default(),
            jwt: JwtSettings::default(),
            auth: AuthSettings::default(),
            presence: PresenceSettings::default(),
            password_requirements: PasswordRequirements::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: PathBuf::from("data"),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            socials: Vec::new(),
            telegram: None,
            social_redirect: "/auth/passport".to_string(),
            email_approve_redirect: "/cabinet".to_string(),
            profile_fetch_timeout_secs: 10,
            verification_ttl_secs: 15 * 60,
            handshake_ttl_secs: 10 * 60,
            login_max_attempts: 5,
            login_lockout_secs: 5 * 60,
        }
    }
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            flush_interval_secs: 10,
            online_window_secs: 5 * 60,
        }
    }
}

impl Settings {
    /// Load settings from defaults, `config.toml` and `PASSPORT_*` env vars
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load settings using an explicit config file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Start a builder from default settings
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Check values that would make the module misbehave at runtime
    pub fn validate(&self) -> Result<(), AppError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(AppError::Configuration(format!(
                "invalid log level: {}",
                self.log_level
            )));
        }
        if self.presence.flush_interval_secs == 0 {
            return Err(AppError::Configuration(
                "presence.flush_interval_secs must be positive".to_string(),
            ));
        }
        if self.auth.profile_fetch_timeout_secs == 0 {
            return Err(AppError::Configuration(
                "auth.profile_fetch_timeout_secs must be positive".to_string(),
            ));
        }
        if self.auth.verification_ttl_secs == 0 || self.auth.handshake_ttl_secs == 0 {
            return Err(AppError::Configuration(
                "verification and handshake TTLs must be positive".to_string(),
            ));
        }
        if self.jwt.ttl_secs == Some(0) {
            return Err(AppError::Configuration(
                "jwt.ttl_secs must be positive when set".to_string(),
            ));
        }
        if self.password_requirements.min_length < 6 {
            return Err(AppError::Configuration(
                "password_requirements.min_length must be at least 6".to_string(),
            ));
        }
        if self.base_url.ends_with('/') {
            return Err(AppError::Configuration(
                "base_url must not end with '/'".to_string(),
            ));
        }
        Ok(())
    }

    /// Socket address string for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Builder for `Settings`, mostly for tests and embedding hosts
#[derive(Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.settings.base_url = base_url.into();
        self
    }

    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.settings.jwt.secret = Some(secret.into());
        self
    }

    pub fn jwt_ttl(mut self, ttl_secs: u64) -> Self {
        self.settings.jwt.ttl_secs = Some(ttl_secs);
        self
    }

    pub fn social(mut self, entry: ProviderEntry) -> Self {
        self.settings.auth.socials.push(entry);
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.settings.log_level = level.into();
        self
    }

    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.storage.backend = StorageBackend::File;
        self.settings.storage.path = path.into();
        self
    }

    pub fn build(self) -> Result<Settings, AppError> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

/// Holds the live settings
pub struct SettingsManager {
    settings: RwLock<Settings>,
}

impl SettingsManager {
    pub fn new(settings: Settings) -> Result<Self, AppError> {
        settings.validate()?;
        Ok(Self {
            settings: RwLock::new(settings),
        })
    }

    pub async fn get(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn update(&self, settings: Settings) -> Result<(), AppError> {
        settings.validate()?;
        *self.settings.write().await = settings;
        Ok(())
    }
}
