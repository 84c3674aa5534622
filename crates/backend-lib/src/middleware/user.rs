// crates/backend-lib/src/middleware/user.rs

//! Access-token resolution and the presence hook.
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::error::AppError;
use crate::models::User;
use crate::storage::UserLookup;
use crate::AppState;

/// Requests with this header do not count as user activity
pub const OFFLINE_HEADER: &str = "offline";

const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// The user behind the request's access token. Rejects with 401 when the
/// request carries no valid token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

fn access_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));
    bearer
        .or_else(|| headers.get(ACCESS_TOKEN_HEADER).and_then(|h| h.to_str().ok()))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn load_user(state: &AppState, token: &str) -> Result<User, AppError> {
    let claims = state.signer.decode(token)?;
    state
        .storage
        .find_user(UserLookup::Id(&claims.id))
        .await?
        .ok_or_else(|| AppError::InvalidToken(format!("unknown user {}", claims.id)))
}

/// Attach [`CurrentUser`] when the request carries a valid access token.
/// Anonymous and invalid-token requests pass through unchanged.
pub async fn resolve_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = access_token(request.headers()).map(str::to_string) {
        match load_user(&state, &token).await {
            Ok(user) => {
                request.extensions_mut().insert(CurrentUser(user));
            },
            Err(e) => debug!(error = %e, "access token ignored"),
        }
    }
    next.run(request).await
}

/// Record activity for the resolved user unless the request is marked
/// `offline`. Must run after [`resolve_user`].
pub async fn touch_online(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !request.headers().contains_key(OFFLINE_HEADER) {
        if let Some(CurrentUser(user)) = request.extensions().get::<CurrentUser>() {
            state.presence.touch(&user.id);
        }
    }
    next.run(request).await
}

/// Best-effort client address for login throttling
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.split(',').next())
        })
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or("unknown")
        .to_string()
}
