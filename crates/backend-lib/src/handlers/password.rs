// ============================
// crates/backend-lib/src/handlers/password.rs
// ============================
//! Username/password login, signup, recovery and token refresh.
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use metrics::counter;
use passport_common::{
    Ack, AuthResponse, CodeRequest, LoginRequest, RecoveryRequest, SignupRequest, TokenRequest,
};
use tracing::{debug, info, warn};

use crate::auth::{
    hash_password_secure, validate_password_strength, verify_dummy_password, verify_password,
    VerificationPurpose,
};
use crate::error::AppError;
use crate::metrics::{LOGIN_FAILED, LOGIN_SUCCEEDED, SIGNUP};
use crate::middleware::{client_ip, CurrentUser, Params};
use crate::models::User;
use crate::storage::UserLookup;
use crate::validation::{canonize_phone, canonize_username, validate_email, validate_username};
use crate::AppState;

/// Check strength and hash, wiping the plain text
fn new_password_hash(state: &AppState, mut plain: String) -> Result<String, AppError> {
    let requirements = &state.settings.password_requirements;
    if !validate_password_strength(&plain, requirements) {
        return Err(AppError::InvalidInput(requirements.describe()));
    }
    hash_password_secure(&mut plain).map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

async fn find_by_login(state: &AppState, req: &LoginRequest) -> Result<Option<User>, AppError> {
    match (req.username.as_deref(), req.email.as_deref()) {
        (Some(username), _) if username.contains('@') => {
            let email = username.trim().to_lowercase();
            state.storage.find_user(UserLookup::Email(&email)).await
        },
        (Some(username), _) => {
            let username = canonize_username(username);
            state.storage.find_user(UserLookup::Username(&username)).await
        },
        (None, Some(email)) => {
            let email = email.trim().to_lowercase();
            state.storage.find_user(UserLookup::Email(&email)).await
        },
        (None, None) => Err(AppError::InvalidInput("username or email is required".to_string())),
    }
}

/// `/login`: `{username | email, password}`
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Params(req): Params<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let client = client_ip(&headers);
    if !state.auth_rate_limiter.check_rate_limit(&client) {
        return Err(AppError::AuthRateLimited);
    }

    let user = find_by_login(&state, &req).await?;
    let verified = match user {
        Some(user) => {
            let matches = match user.password_hash.as_deref() {
                Some(hash) => verify_password(hash, &req.password),
                None => {
                    verify_dummy_password(&req.password);
                    false
                },
            };
            matches.then_some(user)
        },
        None => {
            verify_dummy_password(&req.password);
            None
        },
    };

    let Some(user) = verified else {
        state.auth_rate_limiter.record_failed_attempt(&client);
        counter!(LOGIN_FAILED).increment(1);
        debug!(client = %client, "password login failed");
        return Err(AppError::InvalidPassword);
    };

    state.auth_rate_limiter.record_success(&client);
    counter!(LOGIN_SUCCEEDED).increment(1);
    info!(user_id = %user.id, "password login");
    Ok(Json(state.auth_response(&user)?))
}

/// `/signup`: `{username, password, email?, phone?, name?}`
pub async fn signup(
    State(state): State<AppState>,
    Params(req): Params<SignupRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let username = validate_username(&req.username)?;
    let email = req.email.as_deref().map(validate_email).transpose()?;
    let phone = req.phone.as_deref().map(canonize_phone).transpose()?;

    if let Some(email) = &email {
        if state.storage.find_user(UserLookup::Email(email)).await?.is_some() {
            return Err(AppError::UniquenessConflict("email".to_string()));
        }
    }
    if let Some(phone) = &phone {
        if state.storage.find_user(UserLookup::Phone(phone)).await?.is_some() {
            return Err(AppError::UniquenessConflict("phone".to_string()));
        }
    }

    let mut user = User::new(username);
    user.password_hash = Some(new_password_hash(&state, req.password)?);
    user.name = req.name.filter(|n| !n.trim().is_empty());
    user.email = email;
    user.phone = phone;
    state.storage.insert_user(&user).await?;
    counter!(SIGNUP).increment(1);
    info!(user_id = %user.id, username = %user.username, "user signed up");

    if let Some(email) = &user.email {
        let code = state.verification.issue(VerificationPurpose::EmailApprove, &user.id);
        info!(user_id = %user.id, email = %email, code = %code, "email approval code issued");
    }

    Ok(Json(state.auth_response(&user)?))
}

/// `/recovery`: `{email | username}` issues a reset code, `{code, password}`
/// redeems it
pub async fn recovery(
    State(state): State<AppState>,
    Params(req): Params<RecoveryRequest>,
) -> Result<Response, AppError> {
    if let Some(code) = req.code.as_deref() {
        let password = req
            .password
            .ok_or_else(|| AppError::InvalidInput("password is required".to_string()))?;
        let user_id = state
            .verification
            .redeem(VerificationPurpose::Recovery, code)
            .ok_or_else(|| AppError::InvalidInput("recovery code is invalid or expired".to_string()))?;
        let mut user = state
            .storage
            .find_user(UserLookup::Id(&user_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;

        user.password_hash = Some(new_password_hash(&state, password)?);
        state.storage.update_user(&user).await?;
        info!(user_id = %user.id, "password reset");
        return Ok(Json(state.auth_response(&user)?).into_response());
    }

    let lookup = LoginRequest {
        username: req.username,
        email: req.email,
        password: String::new(),
    };
    match find_by_login(&state, &lookup).await? {
        Some(user) => {
            let code = state.verification.issue(VerificationPurpose::Recovery, &user.id);
            info!(user_id = %user.id, code = %code, "recovery code issued");
        },
        // Same answer either way, so accounts cannot be enumerated
        None => warn!("recovery requested for unknown account"),
    }
    Ok(Json(Ack::ok()).into_response())
}

/// `/updateToken`: fresh token for the current user
pub async fn update_token(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<AuthResponse>, AppError> {
    Ok(Json(state.auth_response(&user)?))
}

/// `/loginToken`: `{token}` exchanges a user token for a fresh one
pub async fn login_token(
    State(state): State<AppState>,
    Params(req): Params<TokenRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let claims = state.signer.decode(&req.token)?;
    let user = state
        .storage
        .find_user(UserLookup::Id(&claims.id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {}", claims.id)))?;
    counter!(LOGIN_SUCCEEDED).increment(1);
    Ok(Json(state.auth_response(&user)?))
}

/// `/email/approve`: `{code}` marks the email approved and redirects
pub async fn email_approve(
    State(state): State<AppState>,
    Params(req): Params<CodeRequest>,
) -> Result<Redirect, AppError> {
    let user_id = state
        .verification
        .redeem(VerificationPurpose::EmailApprove, &req.code)
        .ok_or_else(|| AppError::InvalidInput("approval code is invalid or expired".to_string()))?;
    let mut user = state
        .storage
        .find_user(UserLookup::Id(&user_id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;

    user.email_approved = true;
    state.storage.update_user(&user).await?;
    info!(user_id = %user.id, "email approved");
    Ok(Redirect::to(&state.settings.auth.email_approve_redirect))
}
