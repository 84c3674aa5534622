//! Shared setup for the router tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use backend_lib::{
    config::{ProviderConfig, ProviderEntry, Settings, SettingsBuilder},
    storage::MemoryStorage,
    AuthModule,
};
use serde_json::Value;
use tower::ServiceExt;

pub const PREFIX: &str = "/api/module/auth";

pub fn demo_entry() -> ProviderEntry {
    ProviderEntry {
        provider: "demo".to_string(),
        kind: "oauth-demo".to_string(),
        config: ProviderConfig::default(),
    }
}

pub fn settings() -> SettingsBuilder {
    Settings::builder().jwt_secret("test-secret").social(demo_entry())
}

/// An initialized module on in-memory storage, plus its router
pub fn setup(settings: Settings) -> (AuthModule, Router, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let mut module = AuthModule::new(settings, storage.clone());
    module.init().unwrap();
    let app = module.run().unwrap();
    (module, app, storage)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn location(&self) -> &str {
        self.headers
            .get(header::LOCATION)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
    }
}

pub async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        },
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn post(app: &Router, path: &str, body: Value) -> TestResponse {
    call(app, Method::POST, &format!("{PREFIX}{path}"), &[], Some(body)).await
}

pub async fn post_as(app: &Router, path: &str, token: &str, body: Value) -> TestResponse {
    let bearer = format!("Bearer {token}");
    call(
        app,
        Method::POST,
        &format!("{PREFIX}{path}"),
        &[("authorization", bearer.as_str())],
        Some(body),
    )
    .await
}

/// Sign up through the router; returns `(user id, token)`
pub async fn signup(app: &Router, username: &str) -> (String, String) {
    let response = post(
        app,
        "/signup",
        serde_json::json!({ "username": username, "password": "password1" }),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    (
        response.body["user"]["_id"].as_str().unwrap().to_string(),
        response.body["token"].as_str().unwrap().to_string(),
    )
}
