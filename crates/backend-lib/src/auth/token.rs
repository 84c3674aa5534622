// ============================
// passport-backend-lib/src/auth/token.rs
// ============================
//! Signed session tokens.
//!
//! Tokens are HS256 JWTs over `{_id, ...extraClaims}`. An `exp` claim is
//! added only when a TTL is configured; tokens without one never expire.
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use zeroize::Zeroizing;

use crate::config::JwtSettings;
use crate::error::AppError;

/// Caller-supplied claims merged into a token
pub type ExtraClaims = Map<String, Value>;

const RESERVED_CLAIMS: [&str; 3] = ["_id", "iat", "exp"];

/// Claim set carried by a session token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub extra: ExtraClaims,
}

impl Claims {
    /// Build claims for an entity id. Reserved keys in `extra` are dropped,
    /// so extra claims can never replace the identity.
    pub fn new(id: impl Into<String>, mut extra: ExtraClaims) -> Self {
        for key in RESERVED_CLAIMS {
            extra.remove(key);
        }
        Self {
            id: id.into(),
            iat: None,
            exp: None,
            extra,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// Signs and verifies tokens with the process-wide secret
#[derive(Clone)]
pub struct TokenSigner {
    secret: Option<Zeroizing<String>>,
    ttl: Option<Duration>,
}

impl TokenSigner {
    pub fn new(secret: Option<String>, ttl: Option<Duration>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()).map(Zeroizing::new),
            ttl,
        }
    }

    pub fn from_settings(settings: &JwtSettings) -> Self {
        Self::new(
            settings.secret.clone(),
            settings.ttl_secs.map(Duration::from_secs),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    fn secret(&self) -> Result<&[u8], AppError> {
        self.secret
            .as_ref()
            .map(|s| s.as_bytes())
            .ok_or_else(|| AppError::Configuration("jwt secret is not configured".to_string()))
    }

    /// Sign a claim set
    pub fn sign(&self, mut claims: Claims) -> Result<String, AppError> {
        let secret = self.secret()?;
        if let Some(ttl) = self.ttl {
            let now = Utc::now().timestamp();
            claims.iat = Some(now);
            claims.exp = Some(now + ttl.as_secs() as i64);
        }
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret),
        )
        .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
    }

    /// Verify signature (and expiry when present) and return the claims
    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let secret = self.secret()?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        validation.leeway = 0;
        let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extra(value: Value) -> ExtraClaims {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_round_trip_keeps_id_and_extra_claims() {
        let signer = TokenSigner::new(Some("secret".to_string()), None);
        let token = signer
            .sign(Claims::new("abc", extra(json!({ "provider": "vkontakte" }))))
            .unwrap();

        let claims = signer.decode(&token).unwrap();
        assert_eq!(claims.id, "abc");
        assert_eq!(claims.get("provider"), Some(&json!("vkontakte")));
        assert!(claims.exp.is_none());
    }

    #[test]
    fn test_other_secret_is_rejected() {
        let signer = TokenSigner::new(Some("secret".to_string()), None);
        let other = TokenSigner::new(Some("another".to_string()), None);
        let token = signer.sign(Claims::new("abc", ExtraClaims::new())).unwrap();

        assert!(matches!(other.decode(&token), Err(AppError::InvalidToken(_))));
        assert!(matches!(signer.decode("garbage"), Err(AppError::InvalidToken(_))));
    }

    #[test]
    fn test_missing_secret_fails() {
        let signer = TokenSigner::new(None, None);
        assert!(!signer.is_configured());
        assert!(matches!(
            signer.sign(Claims::new("abc", ExtraClaims::new())),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_extra_claims_cannot_override_identity() {
        let claims = Claims::new("abc", extra(json!({ "_id": "evil", "exp": 1, "role": "x" })));
        assert_eq!(claims.id, "abc");
        assert!(claims.exp.is_none());
        assert_eq!(claims.extra.len(), 1);
    }

    #[test]
    fn test_ttl_sets_expiry() {
        let signer = TokenSigner::new(Some("secret".to_string()), Some(Duration::from_secs(60)));
        let token = signer.sign(Claims::new("abc", ExtraClaims::new())).unwrap();
        let claims = signer.decode(&token).unwrap();
        assert_eq!(claims.exp.unwrap() - claims.iat.unwrap(), 60);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let signer = TokenSigner::new(Some("secret".to_string()), None);
        let mut claims = Claims::new("abc", ExtraClaims::new());
        claims.exp = Some(Utc::now().timestamp() - 120);
        let token = signer.sign(claims).unwrap();
        assert!(matches!(signer.decode(&token), Err(AppError::InvalidToken(_))));
    }
}
