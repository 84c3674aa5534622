// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between auth clients and the server.
//! This module defines the request and response bodies of the auth HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Password login request
/// # Fields
/// * `username` - Username or email
/// * `password` - Plain password
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
}

/// Password signup request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Password recovery request.
///
/// Without `code` a reset code is issued for `email`/`username`;
/// with `code` and `password` the password is replaced.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RecoveryRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Request carrying a bare token
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenRequest {
    pub token: String,
}

/// Verification code request (email approval)
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CodeRequest {
    pub code: String,
}

/// Phone verification request.
/// `code` is absent when requesting a new code.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PhoneRequest {
    pub phone: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Request carrying a passport token (`p`), as handed out by the provider callback
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PassportTokenRequest {
    #[serde(alias = "token")]
    pub p: String,
}

/// Unbind request: either the passport id or the provider name
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UnbindRequest {
    #[serde(default, rename = "passportId")]
    pub passport_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Provider callback query
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

/// Public view of a user
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserView {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "emailApproved", default)]
    pub email_approved: bool,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(rename = "visitedAt", default)]
    pub visited_at: Option<DateTime<Utc>>,
}

/// Response to every successful login-like call
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthResponse {
    pub user: UserView,
    pub token: String,
}

/// Public view of a passport
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PassportView {
    #[serde(rename = "_id")]
    pub id: String,
    pub provider: String,
    #[serde(rename = "providerId")]
    pub provider_id: String,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    pub profile: serde_json::Value,
    #[serde(rename = "fetchedAt")]
    pub fetched_at: DateTime<Utc>,
}

/// Generic acknowledgement
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passport_token_request_accepts_alias() {
        let req: PassportTokenRequest =
            serde_json::from_value(serde_json::json!({ "token": "abc" })).unwrap();
        assert_eq!(req.p, "abc");
    }

    #[test]
    fn test_user_view_uses_host_field_names() {
        let view = UserView {
            id: "u1".to_string(),
            username: "alice".to_string(),
            name: None,
            avatar: None,
            email: None,
            email_approved: false,
            phone: None,
            visited_at: None,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["_id"], "u1");
        assert!(json.get("emailApproved").is_some());
    }
}
