// ============================
// crates/backend-lib/src/handlers/social.rs
// ============================
//! Passport token exchange, binding and listing.
use axum::{extract::State, Json};
use passport_common::{AuthResponse, PassportTokenRequest, PassportView, UnbindRequest};

use crate::error::AppError;
use crate::middleware::{CurrentUser, Params};
use crate::models::Passport;
use crate::AppState;

/// `/social`: passports bound to the current user
pub async fn social_list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<PassportView>>, AppError> {
    let passports = state.social_list(&user).await?;
    Ok(Json(passports.iter().map(Passport::to_view).collect()))
}

/// `/social/signup`, `/social/login`: `{p}` logs in with a passport token
pub async fn social_login(
    State(state): State<AppState>,
    Params(req): Params<PassportTokenRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    Ok(Json(state.social_login(&req.p).await?))
}

/// `/social/bind`: `{p}` attaches the passport to the current user
pub async fn social_bind(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Params(req): Params<PassportTokenRequest>,
) -> Result<Json<PassportView>, AppError> {
    let passport = state.social_bind(&user, &req.p).await?;
    Ok(Json(passport.to_view()))
}

/// `/social/unbind`: `{passportId | provider}`
pub async fn social_unbind(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Params(req): Params<UnbindRequest>,
) -> Result<Json<PassportView>, AppError> {
    let passport = state
        .social_unbind(&user, req.passport_id.as_deref(), req.provider.as_deref())
        .await?;
    Ok(Json(passport.to_view()))
}

/// `/passport/getByToken`: `{token | p}`
pub async fn passport_by_token(
    State(state): State<AppState>,
    Params(req): Params<PassportTokenRequest>,
) -> Result<Json<PassportView>, AppError> {
    let passport = Passport::get_by_token(&state.signer, state.storage.as_ref(), &req.p).await?;
    Ok(Json(passport.to_view()))
}
