//! Canonical user account.
//!
//! Users belong to the host application; the auth module creates them only
//! through password signup and the passport binding flow.
use chrono::{DateTime, Utc};
use passport_common::UserView;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::token::{Claims, ExtraClaims, TokenSigner};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_approved: bool,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub phone_approved: bool,
    #[serde(default)]
    pub visited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.into(),
            password_hash: None,
            name: None,
            avatar: None,
            email: None,
            email_approved: false,
            phone: None,
            phone_approved: false,
            visited_at: None,
            created_at: Utc::now(),
        }
    }

    /// Minimal claim set identifying this user
    pub fn get_identity(&self, extra: ExtraClaims) -> Claims {
        Claims::new(self.id.clone(), extra)
    }

    pub fn generate_token(&self, signer: &TokenSigner) -> Result<String, AppError> {
        signer.sign(self.get_identity(ExtraClaims::new()))
    }

    pub fn to_view(&self) -> UserView {
        UserView {
            id: self.id.clone(),
            username: self.username.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            email: self.email.clone(),
            email_approved: self.email_approved,
            phone: self.phone.clone(),
            visited_at: self.visited_at,
        }
    }
}
