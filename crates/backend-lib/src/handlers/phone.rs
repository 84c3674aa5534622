// ============================
// crates/backend-lib/src/handlers/phone.rs
// ============================
//! Phone verification codes, approval and login.
use axum::{extract::State, http::HeaderMap, Json};
use metrics::counter;
use passport_common::{Ack, AuthResponse, PhoneRequest, UserView};
use tracing::{debug, info};

use crate::auth::VerificationPurpose;
use crate::error::AppError;
use crate::metrics::{LOGIN_FAILED, LOGIN_SUCCEEDED};
use crate::middleware::{client_ip, CurrentUser, Params};
use crate::storage::UserLookup;
use crate::validation::canonize_phone;
use crate::AppState;

/// Redeem the code sent to `phone`; returns the canonical number. Wrong
/// guesses count against both the client and the phone number.
fn redeem(state: &AppState, headers: &HeaderMap, req: &PhoneRequest) -> Result<String, AppError> {
    let phone = canonize_phone(&req.phone)?;
    let code = req
        .code
        .as_deref()
        .ok_or_else(|| AppError::InvalidInput("code is required".to_string()))?;

    let limiter = &state.auth_rate_limiter;
    let phone_key = format!("phone:{phone}");
    let keys = [client_ip(headers), phone_key.clone()];
    if keys.iter().any(|key| !limiter.check_rate_limit(key)) {
        return Err(AppError::AuthRateLimited);
    }

    if !state.verification.redeem_for(VerificationPurpose::Phone, &phone, code) {
        for key in &keys {
            limiter.record_failed_attempt(key);
        }
        counter!(LOGIN_FAILED).increment(1);
        debug!(phone = %phone, "phone code rejected");
        return Err(AppError::InvalidInput("phone code is invalid or expired".to_string()));
    }
    limiter.record_success(&phone_key);
    Ok(phone)
}

/// `/phone/code`: `{phone}` sends a 6-digit code
pub async fn phone_code(
    State(state): State<AppState>,
    Params(req): Params<PhoneRequest>,
) -> Result<Json<Ack>, AppError> {
    let phone = canonize_phone(&req.phone)?;
    let code = state.verification.issue(VerificationPurpose::Phone, &phone);
    info!(phone = %phone, code = %code, "phone code issued");
    Ok(Json(Ack::ok()))
}

/// `/phone/approve`: `{phone, code}` attaches an approved phone to the
/// current user
pub async fn phone_approve(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    headers: HeaderMap,
    Params(req): Params<PhoneRequest>,
) -> Result<Json<UserView>, AppError> {
    let phone = redeem(&state, &headers, &req)?;
    if let Some(holder) = state.storage.find_user(UserLookup::Phone(&phone)).await? {
        if holder.id != user.id {
            return Err(AppError::UniquenessConflict("phone".to_string()));
        }
    }

    user.phone = Some(phone);
    user.phone_approved = true;
    state.storage.update_user(&user).await?;
    info!(user_id = %user.id, "phone approved");
    Ok(Json(user.to_view()))
}

/// `/phone/login`: `{phone, code}` logs in the user holding the phone
pub async fn phone_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Params(req): Params<PhoneRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let phone = redeem(&state, &headers, &req)?;
    let mut user = state
        .storage
        .find_user(UserLookup::Phone(&phone))
        .await?
        .ok_or_else(|| AppError::NotFound("no account for this phone".to_string()))?;

    if !user.phone_approved {
        user.phone_approved = true;
        state.storage.update_user(&user).await?;
    }
    counter!(LOGIN_SUCCEEDED).increment(1);
    info!(user_id = %user.id, "phone login");
    Ok(Json(state.auth_response(&user)?))
}
