// ============================
// passport-backend-lib/src/router.rs
// ============================
//! Route table for the auth module.
use axum::{
    middleware::from_fn_with_state,
    routing::{any, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{password, phone, provider, social};
use crate::middleware::{resolve_user, touch_online};
use crate::strategies::MODULE_PREFIX;
use crate::AppState;

/// Routes relative to the module prefix
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/login", any(password::login))
        .route("/signup", post(password::signup))
        .route("/recovery", any(password::recovery))
        .route("/updateToken", any(password::update_token))
        .route("/loginToken", any(password::login_token))
        .route("/email/approve", any(password::email_approve))
        .route("/phone/code", any(phone::phone_code))
        .route("/phone/approve", any(phone::phone_approve))
        .route("/phone/login", any(phone::phone_login))
        .route("/social", any(social::social_list))
        .route("/social/signup", any(social::social_login))
        .route("/social/login", any(social::social_login))
        .route("/social/bind", any(social::social_bind))
        .route("/social/unbind", any(social::social_unbind))
        .route("/passport/getByToken", any(social::passport_by_token))
        .route("/{provider}", get(provider::provider_auth))
        .route("/{provider}/auth", get(provider::provider_auth))
        .route("/{provider}/callback", get(provider::provider_callback))
}

/// Create the module router, mounted under `/api/module/auth`
pub fn create_router(state: AppState) -> Router {
    // Layers run outermost-first: user resolution, then the presence hook
    let api = api_routes()
        .layer(from_fn_with_state(state.clone(), touch_online))
        .layer(from_fn_with_state(state.clone(), resolve_user));

    Router::new()
        .nest(MODULE_PREFIX, api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
