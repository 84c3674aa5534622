// ============================
// crates/backend-lib/src/handlers/provider.rs
// ============================
//! Provider handshake: authorization redirect and callback.
use axum::{
    extract::{Path, State},
    response::Redirect,
};
use metrics::counter;
use passport_common::CallbackQuery;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::metrics::PROVIDER_FETCH_FAILED;
use crate::middleware::Params;
use crate::strategies::{HandshakeResult, PassportStrategy};
use crate::AppState;

fn handshake<'a>(state: &'a AppState, provider: &str) -> Result<&'a PassportStrategy, AppError> {
    state
        .handshakes
        .get(provider)
        .ok_or_else(|| AppError::NotFound(format!("provider {provider}")))
}

/// `{social_redirect}?p={token}`, appending to an existing query if any
fn redirect_with_token(target: &str, token: &str) -> String {
    let separator = if target.contains('?') { '&' } else { '?' };
    format!("{target}{separator}p={token}")
}

/// `/{provider}`, `/{provider}/auth`: send the browser to the provider
pub async fn provider_auth(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Redirect, AppError> {
    let (url, csrf_state) = handshake(&state, &provider)?.authorize_url();
    state.remember_handshake(csrf_state.secret().clone(), &provider);
    debug!(provider = %provider, "redirecting to provider");
    Ok(Redirect::to(url.as_str()))
}

/// `/{provider}/callback`: finish the handshake, resolve the passport and
/// hand its token to the front end
pub async fn provider_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Params(query): Params<CallbackQuery>,
) -> Result<Redirect, AppError> {
    let handshake = handshake(&state, &provider)?;
    if !state.take_handshake(&query.state, &provider) {
        return Err(AppError::InvalidInput(
            "unknown or expired handshake state".to_string(),
        ));
    }
    let strategy = state
        .strategies
        .get(&provider)
        .ok_or_else(|| AppError::NotFound(format!("provider {provider}")))?;

    let fetched = async {
        let tokens = handshake.exchange_code(&query.code, &state.http).await?;
        let extra_data = strategy.get_extra_data(&tokens).await?;
        let provider_id = strategy.provider_id(&extra_data)?;
        Ok::<_, AppError>(HandshakeResult {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            extra_data,
            provider_id,
        })
    }
    .await;
    let result = match fetched {
        Ok(result) => result,
        Err(e) => {
            counter!(PROVIDER_FETCH_FAILED).increment(1);
            warn!(provider = %provider, error = %e, "provider handshake failed");
            return Err(e);
        },
    };

    let passport = state.resolve_passport(&provider, result).await?;
    let token = state.passport_token(&passport)?;
    debug!(provider = %provider, passport_id = %passport.id, "handshake complete");
    Ok(Redirect::to(&redirect_with_token(
        &state.settings.auth.social_redirect,
        &token,
    )))
}
